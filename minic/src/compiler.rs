//! Single-pass compiler: parse and emit in one walk.
//!
//! There is no syntax tree. The recursive-descent parser emits
//! instructions as it recognizes each construct, using operator
//! precedence climbing for expressions. Jump targets that are not
//! known yet are emitted as placeholders and patched once the
//! destination index is known.
//!
//! Expressions follow the accumulator convention: the compiled code
//! leaves each subexpression's value in `ax`, spilling the left
//! operand of a binary operator to the stack. Assignable expressions
//! always end in a load instruction; assignment and the increment
//! operators rewrite that trailing load into a push of the address,
//! then store through it.

use smol_str::SmolStr;

use std::{error, fmt};

use crate::bytecode::{Addr, Builtin, Op, Program, Region, Value};
use crate::constants::{
    DATA_CAPACITY, GLOBALS_CAPACITY, MAX_NESTING, PRINTF_MAX_ARGS, TEXT_CAPACITY, WORD_SIZE,
};
use crate::lexer::{LexError, Lexer};
use crate::symbols::{Base, DuplicateName, SymClass, Symbol, SymbolTable, Type};
use crate::tokens::{Keyword, Span, Token, TokenKind};

/// Binding strength of the unary operators; operands of prefix
/// operators are parsed at this level so only postfix operators
/// bind into them.
const PREC_UNARY: u8 = 13;

/// Compiles a source text into a loadable program.
pub fn compile(source: &str) -> Result<Program, CompileError> {
    Compiler::new(source)?.run()
}

pub struct Compiler<'a> {
    source: &'a str,
    lexer: Lexer<'a>,
    /// Single token of lookahead; the grammar needs no more.
    token: Token,
    symbols: SymbolTable,
    code: Vec<Op>,
    data: Vec<u8>,
    /// Number of global variable slots handed out so far.
    globals: usize,
    /// Frame ordinal that local offsets are measured against in the
    /// function currently being compiled.
    local_base: i64,
    /// Statement and expression recursion depth.
    depth: usize,
}

impl<'a> Compiler<'a> {
    pub fn new(source: &'a str) -> Result<Self, CompileError> {
        let mut symbols = SymbolTable::new();
        // Bootstrap the host built-ins; the table is empty, so none
        // of these can clash.
        for builtin in Builtin::ALL {
            let _ = symbols.declare_global(Symbol::new(
                builtin.name(),
                SymClass::Sys(builtin),
                Type::INT,
                0,
            ));
        }

        let mut compiler = Compiler {
            source,
            lexer: Lexer::new(source),
            token: Token::new(TokenKind::EOF, Span::new(0, 0, 1)),
            symbols,
            code: Vec::new(),
            data: Vec::new(),
            globals: 0,
            local_base: 0,
            depth: 0,
        };
        compiler.advance()?;
        Ok(compiler)
    }

    pub fn run(mut self) -> Result<Program, CompileError> {
        while self.token.kind != TokenKind::EOF {
            self.global_declaration()?;
        }

        let entry = match self.symbols.lookup_global("main") {
            Some(sym) if sym.class == SymClass::Fun => sym.value as usize,
            _ => return Err(self.error(CompileErrorKind::MainNotDefined)),
        };

        Ok(Program {
            code: self.code,
            data: self.data,
            globals: self.globals,
            entry,
        })
    }

    // ------------------------------------------------------------- //
    //                         Declarations                          //
    // ------------------------------------------------------------- //

    fn global_declaration(&mut self) -> Result<(), CompileError> {
        if self.accept(TokenKind::Keyword(Keyword::Enum))? {
            self.enum_declaration()?;
            return self.expect(TokenKind::Semicolon);
        }

        let base = self.base_type()?;
        loop {
            let ty = self.pointer_type(base)?;
            let name = self.expect_ident()?;

            if self.token.kind == TokenKind::LeftParen {
                return self.function_definition(name, ty);
            }

            if self.globals == GLOBALS_CAPACITY {
                return Err(self.error(CompileErrorKind::GlobalsOverflow));
            }
            let slot = self.globals as i64;
            self.declare_global(Symbol::new(&name, SymClass::Global, ty, slot))?;
            self.globals += 1;

            if !self.accept(TokenKind::Comma)? {
                break;
            }
        }
        self.expect(TokenKind::Semicolon)
    }

    /// `enum` body. The optional tag is accepted and discarded; only
    /// the constants are bound, as integers in the global namespace.
    fn enum_declaration(&mut self) -> Result<(), CompileError> {
        if self.token.kind == TokenKind::Ident {
            self.advance()?;
        }
        self.expect(TokenKind::LeftBrace)?;

        let mut next_value: i64 = 0;
        while self.token.kind != TokenKind::RightBrace {
            let name = self.expect_ident()?;
            if self.accept(TokenKind::Assign)? {
                let negative = self.accept(TokenKind::Sub)?;
                if self.token.kind != TokenKind::Num {
                    return Err(self.error(CompileErrorKind::BadEnumInitializer));
                }
                next_value = self.decode_number()?;
                if negative {
                    next_value = -next_value;
                }
                self.advance()?;
            }
            self.declare_global(Symbol::new(&name, SymClass::EnumConst, Type::INT, next_value))?;
            next_value += 1;

            if self.token.kind != TokenKind::RightBrace {
                self.expect(TokenKind::Comma)?;
            }
        }
        self.advance()
    }

    fn function_definition(&mut self, name: SmolStr, return_ty: Type) -> Result<(), CompileError> {
        let entry = self.code.len() as i64;
        self.declare_global(Symbol::new(&name, SymClass::Fun, return_ty, entry))?;

        self.expect(TokenKind::LeftParen)?;
        let mut nparams: i64 = 0;
        if !self.accept(TokenKind::RightParen)? {
            loop {
                let base = self.base_type()?;
                let ty = self.pointer_type(base)?;
                let param = self.expect_ident()?;
                self.declare_local(Symbol::new(&param, SymClass::Local, ty, nparams))?;
                nparams += 1;
                if !self.accept(TokenKind::Comma)? {
                    break;
                }
            }
            self.expect(TokenKind::RightParen)?;
        }
        self.expect(TokenKind::LeftBrace)?;

        // Local declarations must precede statements. Frame ordinals
        // continue past the saved return address, so parameter offsets
        // come out positive and local offsets negative relative to
        // `local_base`.
        self.local_base = nparams + 1;
        let mut nlocals: i64 = 0;
        while matches!(
            self.token.kind,
            TokenKind::Keyword(Keyword::Int)
                | TokenKind::Keyword(Keyword::Char)
                | TokenKind::Keyword(Keyword::Void)
        ) {
            let base = self.base_type()?;
            loop {
                let ty = self.pointer_type(base)?;
                let local = self.expect_ident()?;
                nlocals += 1;
                let ordinal = self.local_base + nlocals;
                self.declare_local(Symbol::new(&local, SymClass::Local, ty, ordinal))?;
                if !self.accept(TokenKind::Comma)? {
                    break;
                }
            }
            self.expect(TokenKind::Semicolon)?;
        }

        self.emit(Op::Ent(nlocals as usize))?;
        while self.token.kind != TokenKind::RightBrace {
            self.statement()?;
        }
        self.advance()?;
        // Falling off the end of the body returns like an explicit
        // `return;` would.
        self.emit(Op::Lev)?;

        self.symbols.exit_function();
        Ok(())
    }

    /// Optional base type keyword. An absent type means `int`; `void`
    /// is an alias for `char`.
    fn base_type(&mut self) -> Result<Base, CompileError> {
        match self.token.kind {
            TokenKind::Keyword(Keyword::Int) => {
                self.advance()?;
                Ok(Base::Int)
            }
            TokenKind::Keyword(Keyword::Char) | TokenKind::Keyword(Keyword::Void) => {
                self.advance()?;
                Ok(Base::Char)
            }
            _ => Ok(Base::Int),
        }
    }

    fn pointer_type(&mut self, base: Base) -> Result<Type, CompileError> {
        let mut ty = Type { base, indir: 0 };
        while self.accept(TokenKind::Mul)? {
            ty = ty.pointer_to();
        }
        Ok(ty)
    }

    // ------------------------------------------------------------- //
    //                          Statements                           //
    // ------------------------------------------------------------- //

    fn statement(&mut self) -> Result<(), CompileError> {
        if self.depth >= MAX_NESTING {
            return Err(self.error(CompileErrorKind::NestingTooDeep));
        }
        self.depth += 1;
        let result = self.statement_inner();
        self.depth -= 1;
        result
    }

    fn statement_inner(&mut self) -> Result<(), CompileError> {
        match self.token.kind {
            TokenKind::Keyword(Keyword::If) => {
                self.advance()?;
                self.expect(TokenKind::LeftParen)?;
                self.expr(1)?;
                self.expect(TokenKind::RightParen)?;

                let jz_at = self.emit(Op::Jz(0))?;
                self.statement()?;
                if self.accept(TokenKind::Keyword(Keyword::Else))? {
                    let jmp_at = self.emit(Op::Jmp(0))?;
                    self.patch_jump(jz_at);
                    self.statement()?;
                    self.patch_jump(jmp_at);
                } else {
                    self.patch_jump(jz_at);
                }
                Ok(())
            }
            TokenKind::Keyword(Keyword::While) => {
                self.advance()?;
                let test_at = self.code.len();
                self.expect(TokenKind::LeftParen)?;
                self.expr(1)?;
                self.expect(TokenKind::RightParen)?;

                let jz_at = self.emit(Op::Jz(0))?;
                self.statement()?;
                self.emit(Op::Jmp(test_at))?;
                self.patch_jump(jz_at);
                Ok(())
            }
            TokenKind::Keyword(Keyword::Return) => {
                self.advance()?;
                if self.token.kind != TokenKind::Semicolon {
                    self.expr(1)?;
                }
                self.emit(Op::Lev)?;
                self.expect(TokenKind::Semicolon)
            }
            TokenKind::LeftBrace => {
                self.advance()?;
                while self.token.kind != TokenKind::RightBrace {
                    self.statement()?;
                }
                self.advance()
            }
            TokenKind::Semicolon => self.advance(),
            _ => {
                self.expr(1)?;
                self.expect(TokenKind::Semicolon)
            }
        }
    }

    // ------------------------------------------------------------- //
    //                          Expressions                          //
    // ------------------------------------------------------------- //

    /// Parses an expression, consuming operators that bind at least
    /// as tightly as `min_prec`, and emits code leaving the value in
    /// `ax`. Returns the expression's static type.
    fn expr(&mut self, min_prec: u8) -> Result<Type, CompileError> {
        if self.depth >= MAX_NESTING {
            return Err(self.error(CompileErrorKind::NestingTooDeep));
        }
        self.depth += 1;
        let result = self.expr_inner(min_prec);
        self.depth -= 1;
        result
    }

    fn expr_inner(&mut self, min_prec: u8) -> Result<Type, CompileError> {
        let mut ty = self.unary()?;
        while let Some(prec) = self.token.kind.precedence() {
            if prec < min_prec {
                break;
            }
            ty = self.infix(ty, prec)?;
        }
        Ok(ty)
    }

    fn unary(&mut self) -> Result<Type, CompileError> {
        use TokenKind as T;

        match self.token.kind {
            T::Num => {
                let value = self.decode_number()?;
                self.advance()?;
                self.emit(Op::Imm(Value::Int(value)))?;
                Ok(Type::INT)
            }
            T::CharLit => {
                let value = self.decode_char()?;
                self.advance()?;
                self.emit(Op::Imm(Value::Int(value)))?;
                Ok(Type::INT)
            }
            T::Str => {
                let offset = self.intern_string()?;
                self.emit(Op::Imm(Value::Ptr(Addr::new(Region::Data, offset))))?;
                Ok(Type::CHAR.pointer_to())
            }
            T::Keyword(Keyword::Sizeof) => {
                self.advance()?;
                self.expect(T::LeftParen)?;
                let ty = match self.token.kind {
                    T::Keyword(Keyword::Int) | T::Keyword(Keyword::Char) | T::Keyword(Keyword::Void) => {
                        let base = self.base_type()?;
                        self.pointer_type(base)?
                    }
                    _ => return Err(self.error(CompileErrorKind::BadSizeof)),
                };
                self.expect(T::RightParen)?;
                self.emit(Op::Imm(Value::Int(ty.width() as i64)))?;
                Ok(Type::INT)
            }
            T::Ident => self.identifier_expr(),
            T::LeftParen => {
                self.advance()?;
                if matches!(
                    self.token.kind,
                    T::Keyword(Keyword::Int) | T::Keyword(Keyword::Char) | T::Keyword(Keyword::Void)
                ) {
                    // Cast: reinterprets the static type only; the
                    // operand code is unchanged.
                    let base = self.base_type()?;
                    let ty = self.pointer_type(base)?;
                    self.expect(T::RightParen)?;
                    self.expr(PREC_UNARY)?;
                    Ok(ty)
                } else {
                    let ty = self.expr(1)?;
                    self.expect(T::RightParen)?;
                    Ok(ty)
                }
            }
            T::Mul => {
                self.advance()?;
                let ty = self.expr(PREC_UNARY)?;
                let inner = ty
                    .deref()
                    .ok_or_else(|| self.error(CompileErrorKind::BadDereference))?;
                self.emit(if inner.is_byte() { Op::Lc } else { Op::Li })?;
                Ok(inner)
            }
            T::And => {
                self.advance()?;
                let ty = self.expr(PREC_UNARY)?;
                // The operand just loaded through its own address;
                // dropping the load leaves that address in ax.
                if self.pop_load().is_none() {
                    return Err(self.error(CompileErrorKind::BadAddressOf));
                }
                Ok(ty.pointer_to())
            }
            T::Not => {
                self.advance()?;
                self.expr(PREC_UNARY)?;
                self.emit(Op::Push)?;
                self.emit(Op::Imm(Value::Int(0)))?;
                self.emit(Op::Eq)?;
                Ok(Type::INT)
            }
            T::Tilde => {
                self.advance()?;
                self.expr(PREC_UNARY)?;
                self.emit(Op::Push)?;
                self.emit(Op::Imm(Value::Int(-1)))?;
                self.emit(Op::Xor)?;
                Ok(Type::INT)
            }
            T::Sub => {
                self.advance()?;
                if self.token.kind == T::Num {
                    let value = self.decode_number()?;
                    self.advance()?;
                    self.emit(Op::Imm(Value::Int(-value)))?;
                } else {
                    self.emit(Op::Imm(Value::Int(-1)))?;
                    self.emit(Op::Push)?;
                    self.expr(PREC_UNARY)?;
                    self.emit(Op::Mul)?;
                }
                Ok(Type::INT)
            }
            T::Inc | T::Dec => {
                let kind = self.token.kind;
                self.advance()?;
                let ty = self.expr(PREC_UNARY)?;
                let load = self
                    .pop_load()
                    .ok_or_else(|| self.error(CompileErrorKind::BadLvalue))?;
                self.emit(Op::Push)?;
                self.emit(load)?;
                self.emit(Op::Push)?;
                self.emit(Op::Imm(Value::Int(step_of(ty))))?;
                self.emit(if kind == T::Inc { Op::Add } else { Op::Sub })?;
                self.emit(store_for(load))?;
                Ok(ty)
            }
            found => Err(self.error(CompileErrorKind::ExpectedExpression { found })),
        }
    }

    /// Named value or function call.
    fn identifier_expr(&mut self) -> Result<Type, CompileError> {
        let name = SmolStr::new(self.fragment());
        self.advance()?;

        if self.accept(TokenKind::LeftParen)? {
            let mut args: usize = 0;
            if self.token.kind != TokenKind::RightParen {
                loop {
                    self.expr(1)?;
                    self.emit(Op::Push)?;
                    args += 1;
                    if !self.accept(TokenKind::Comma)? {
                        break;
                    }
                }
            }
            self.expect(TokenKind::RightParen)?;

            let sym = self
                .symbols
                .lookup(&name)
                .cloned()
                .ok_or_else(|| self.error(CompileErrorKind::UndefinedSymbol(name.clone())))?;
            match sym.class {
                SymClass::Fun => {
                    self.emit(Op::Call(sym.value as usize))?;
                }
                SymClass::Sys(builtin) => self.builtin_call(builtin, &name, args)?,
                _ => return Err(self.error(CompileErrorKind::NotAFunction(name))),
            }
            if args > 0 {
                self.emit(Op::Adj(args))?;
            }
            return Ok(sym.ty);
        }

        let sym = self
            .symbols
            .lookup(&name)
            .cloned()
            .ok_or_else(|| self.error(CompileErrorKind::UndefinedSymbol(name.clone())))?;
        match sym.class {
            SymClass::EnumConst => {
                self.emit(Op::Imm(Value::Int(sym.value)))?;
                Ok(Type::INT)
            }
            SymClass::Local => {
                self.emit(Op::Lea(self.local_base - sym.value))?;
                self.emit(if sym.ty.is_byte() { Op::Lc } else { Op::Li })?;
                Ok(sym.ty)
            }
            SymClass::Global => {
                let offset = sym.value as usize * WORD_SIZE;
                self.emit(Op::Imm(Value::Ptr(Addr::new(Region::Globals, offset))))?;
                self.emit(if sym.ty.is_byte() { Op::Lc } else { Op::Li })?;
                Ok(sym.ty)
            }
            SymClass::Fun | SymClass::Sys(_) => {
                Err(self.error(CompileErrorKind::NotAVariable(name)))
            }
        }
    }

    fn builtin_call(
        &mut self,
        builtin: Builtin,
        name: &SmolStr,
        args: usize,
    ) -> Result<(), CompileError> {
        match builtin.arity() {
            Some(expected) if args != expected => {
                return Err(self.error(CompileErrorKind::BadArgumentCount {
                    name: name.clone(),
                    expected,
                    found: args,
                }));
            }
            None => {
                // Variadic printf still reads from fixed frame slots,
                // so its argument count is capped at compile time.
                if args == 0 {
                    return Err(self.error(CompileErrorKind::BadArgumentCount {
                        name: name.clone(),
                        expected: 1,
                        found: 0,
                    }));
                }
                if args > 1 + PRINTF_MAX_ARGS {
                    return Err(self.error(CompileErrorKind::TooManyArguments(name.clone())));
                }
            }
            _ => {}
        }

        let op = match builtin {
            Builtin::Open => Op::Open,
            Builtin::Read => Op::Read,
            Builtin::Clos => Op::Clos,
            Builtin::Prtf => Op::Prtf { args },
            Builtin::Malc => Op::Malc,
            Builtin::Mset => Op::Mset,
            Builtin::Mcmp => Op::Mcmp,
            Builtin::Exit => Op::Exit,
        };
        self.emit(op)?;
        Ok(())
    }

    /// One infix or postfix operator application. `lhs` is the type
    /// of the value currently in `ax`.
    fn infix(&mut self, lhs: Type, prec: u8) -> Result<Type, CompileError> {
        use TokenKind as T;

        let kind = self.token.kind;
        match kind {
            T::Assign => {
                self.advance()?;
                let load = self
                    .pop_load()
                    .ok_or_else(|| self.error(CompileErrorKind::BadLvalue))?;
                self.emit(Op::Push)?;
                self.expr(1)?;
                self.emit(store_for(load))?;
                Ok(lhs)
            }
            T::Cond => {
                self.advance()?;
                let jz_at = self.emit(Op::Jz(0))?;
                let then_ty = self.expr(1)?;
                self.expect(T::Colon)?;
                let jmp_at = self.emit(Op::Jmp(0))?;
                self.patch_jump(jz_at);
                self.expr(prec)?;
                self.patch_jump(jmp_at);
                Ok(then_ty)
            }
            T::Lor => {
                // Short circuit: a truthy left side skips the right
                // side entirely, keeping its own value in ax.
                self.advance()?;
                let jnz_at = self.emit(Op::Jnz(0))?;
                self.expr(prec + 1)?;
                self.patch_jump(jnz_at);
                Ok(Type::INT)
            }
            T::Lan => {
                self.advance()?;
                let jz_at = self.emit(Op::Jz(0))?;
                self.expr(prec + 1)?;
                self.patch_jump(jz_at);
                Ok(Type::INT)
            }
            T::Add => {
                self.advance()?;
                self.emit(Op::Push)?;
                self.expr(prec + 1)?;
                if lhs.is_pointer() && step_of(lhs) > 1 {
                    self.emit(Op::Push)?;
                    self.emit(Op::Imm(Value::Int(WORD_SIZE as i64)))?;
                    self.emit(Op::Mul)?;
                }
                self.emit(Op::Add)?;
                Ok(lhs)
            }
            T::Sub => {
                self.advance()?;
                self.emit(Op::Push)?;
                let rhs = self.expr(prec + 1)?;
                if lhs.is_pointer() && rhs == lhs {
                    // Pointer difference, in elements.
                    self.emit(Op::Sub)?;
                    if step_of(lhs) > 1 {
                        self.emit(Op::Push)?;
                        self.emit(Op::Imm(Value::Int(WORD_SIZE as i64)))?;
                        self.emit(Op::Div)?;
                    }
                    Ok(Type::INT)
                } else if lhs.is_pointer() && step_of(lhs) > 1 {
                    self.emit(Op::Push)?;
                    self.emit(Op::Imm(Value::Int(WORD_SIZE as i64)))?;
                    self.emit(Op::Mul)?;
                    self.emit(Op::Sub)?;
                    Ok(lhs)
                } else {
                    self.emit(Op::Sub)?;
                    Ok(lhs)
                }
            }
            T::Inc | T::Dec => {
                // Postfix: store the stepped value, then step ax back
                // so the expression yields the original.
                self.advance()?;
                let load = self
                    .pop_load()
                    .ok_or_else(|| self.error(CompileErrorKind::BadLvalue))?;
                let step = step_of(lhs);
                self.emit(Op::Push)?;
                self.emit(load)?;
                self.emit(Op::Push)?;
                self.emit(Op::Imm(Value::Int(step)))?;
                self.emit(if kind == T::Inc { Op::Add } else { Op::Sub })?;
                self.emit(store_for(load))?;
                self.emit(Op::Push)?;
                self.emit(Op::Imm(Value::Int(step)))?;
                self.emit(if kind == T::Inc { Op::Sub } else { Op::Add })?;
                Ok(lhs)
            }
            T::LeftBracket => {
                self.advance()?;
                self.emit(Op::Push)?;
                self.expr(1)?;
                self.expect(T::RightBracket)?;

                let inner = lhs
                    .deref()
                    .ok_or_else(|| self.error(CompileErrorKind::PointerExpected))?;
                if step_of(lhs) > 1 {
                    self.emit(Op::Push)?;
                    self.emit(Op::Imm(Value::Int(WORD_SIZE as i64)))?;
                    self.emit(Op::Mul)?;
                }
                self.emit(Op::Add)?;
                self.emit(if inner.is_byte() { Op::Lc } else { Op::Li })?;
                Ok(inner)
            }
            T::Or => self.binary(Op::Or, prec),
            T::Xor => self.binary(Op::Xor, prec),
            T::And => self.binary(Op::And, prec),
            T::Eq => self.binary(Op::Eq, prec),
            T::Ne => self.binary(Op::Ne, prec),
            T::Lt => self.binary(Op::Lt, prec),
            T::Gt => self.binary(Op::Gt, prec),
            T::Le => self.binary(Op::Le, prec),
            T::Ge => self.binary(Op::Ge, prec),
            T::Shl => self.binary(Op::Shl, prec),
            T::Shr => self.binary(Op::Shr, prec),
            T::Mul => self.binary(Op::Mul, prec),
            T::Div => self.binary(Op::Div, prec),
            T::Mod => self.binary(Op::Mod, prec),
            found => Err(self.error(CompileErrorKind::ExpectedExpression { found })),
        }
    }

    /// Plain left-associative binary operator yielding an integer.
    fn binary(&mut self, op: Op, prec: u8) -> Result<Type, CompileError> {
        self.advance()?;
        self.emit(Op::Push)?;
        self.expr(prec + 1)?;
        self.emit(op)?;
        Ok(Type::INT)
    }

    // ------------------------------------------------------------- //
    //                           Plumbing                            //
    // ------------------------------------------------------------- //

    fn advance(&mut self) -> Result<(), CompileError> {
        match self.lexer.next_token() {
            Ok(token) => {
                self.token = token;
                Ok(())
            }
            Err(err) => Err(CompileError {
                line: err.line(),
                kind: CompileErrorKind::Lex(err),
            }),
        }
    }

    /// Consumes the current token if it matches.
    fn accept(&mut self, kind: TokenKind) -> Result<bool, CompileError> {
        if self.token.kind == kind {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<(), CompileError> {
        if self.token.kind == kind {
            self.advance()
        } else {
            Err(self.error(CompileErrorKind::Expected {
                expected: kind,
                found: self.token.kind,
            }))
        }
    }

    fn expect_ident(&mut self) -> Result<SmolStr, CompileError> {
        if self.token.kind == TokenKind::Ident {
            let name = SmolStr::new(self.fragment());
            self.advance()?;
            Ok(name)
        } else {
            Err(self.error(CompileErrorKind::ExpectedIdentifier {
                found: self.token.kind,
            }))
        }
    }

    fn fragment(&self) -> &'a str {
        self.token.span.fragment(self.source)
    }

    fn error(&self, kind: CompileErrorKind) -> CompileError {
        CompileError {
            line: self.token.span.line,
            kind,
        }
    }

    fn declare_global(&mut self, symbol: Symbol) -> Result<(), CompileError> {
        self.symbols
            .declare_global(symbol)
            .map_err(|DuplicateName(name)| self.error(CompileErrorKind::DuplicateGlobal(name)))
    }

    fn declare_local(&mut self, symbol: Symbol) -> Result<(), CompileError> {
        self.symbols
            .declare_local(symbol)
            .map_err(|DuplicateName(name)| self.error(CompileErrorKind::DuplicateLocal(name)))
    }

    fn emit(&mut self, op: Op) -> Result<usize, CompileError> {
        if self.code.len() == TEXT_CAPACITY {
            return Err(self.error(CompileErrorKind::TextOverflow));
        }
        self.code.push(op);
        Ok(self.code.len() - 1)
    }

    /// Redirects the placeholder jump at `at` to the next instruction
    /// to be emitted.
    fn patch_jump(&mut self, at: usize) {
        let target = self.code.len();
        if let Some(Op::Jmp(t) | Op::Jz(t) | Op::Jnz(t)) = self.code.get_mut(at) {
            *t = target;
        }
    }

    /// Removes a trailing load instruction, exposing the address that
    /// fed it. `None` when the last emitted code was not a load, which
    /// means the expression is not assignable.
    fn pop_load(&mut self) -> Option<Op> {
        match self.code.last() {
            Some(Op::Li) | Some(Op::Lc) => self.code.pop(),
            _ => None,
        }
    }

    /// Appends the bytes of one or more adjacent string literals to
    /// the data region, decoding escapes, and NUL-terminates the lot.
    /// Returns the byte offset of the first character.
    fn intern_string(&mut self) -> Result<usize, CompileError> {
        let start = self.data.len();
        while self.token.kind == TokenKind::Str {
            let fragment = self.fragment();
            let content = &fragment.as_bytes()[1..fragment.len() - 1];
            let mut bytes = content.iter().copied();
            while let Some(byte) = bytes.next() {
                let decoded = if byte == b'\\' {
                    match bytes.next() {
                        Some(b'n') => b'\n',
                        Some(other) => other,
                        None => break,
                    }
                } else {
                    byte
                };
                self.push_data(decoded)?;
            }
            self.advance()?;
        }
        self.push_data(0)?;
        Ok(start)
    }

    fn push_data(&mut self, byte: u8) -> Result<(), CompileError> {
        if self.data.len() == DATA_CAPACITY {
            return Err(self.error(CompileErrorKind::DataOverflow));
        }
        self.data.push(byte);
        Ok(())
    }

    /// Decodes the current numeric literal: decimal, `0x` hexadecimal
    /// or leading-zero octal.
    fn decode_number(&self) -> Result<i64, CompileError> {
        let fragment = self.fragment();
        let parsed = if let Some(hex) = fragment
            .strip_prefix("0x")
            .or_else(|| fragment.strip_prefix("0X"))
        {
            i64::from_str_radix(hex, 16)
        } else if fragment.len() > 1 && fragment.starts_with('0') {
            i64::from_str_radix(&fragment[1..], 8)
        } else {
            fragment.parse::<i64>()
        };
        parsed.map_err(|_| self.error(CompileErrorKind::BadNumber))
    }

    fn decode_char(&self) -> Result<i64, CompileError> {
        let fragment = self.fragment();
        let content = &fragment.as_bytes()[1..fragment.len() - 1];
        let value = match content {
            [b'\\', b'n'] => b'\n',
            [b'\\', other] => *other,
            [single, ..] => *single,
            [] => return Err(self.error(CompileErrorKind::BadNumber)),
        };
        Ok(i64::from(value))
    }
}

/// Element width the increment operators and pointer arithmetic step
/// by: the pointee width for pointers, one for scalars.
fn step_of(ty: Type) -> i64 {
    ty.deref().map(|inner| inner.width() as i64).unwrap_or(1)
}

fn store_for(load: Op) -> Op {
    match load {
        Op::Lc => Op::Sc,
        _ => Op::Si,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    /// 1-based source line the error was detected on.
    pub line: u32,
    pub kind: CompileErrorKind,
}

impl error::Error for CompileError {}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.line, self.kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileErrorKind {
    Lex(LexError),
    Expected { expected: TokenKind, found: TokenKind },
    ExpectedIdentifier { found: TokenKind },
    ExpectedExpression { found: TokenKind },
    DuplicateGlobal(SmolStr),
    DuplicateLocal(SmolStr),
    UndefinedSymbol(SmolStr),
    NotAFunction(SmolStr),
    NotAVariable(SmolStr),
    BadLvalue,
    BadDereference,
    BadAddressOf,
    PointerExpected,
    BadEnumInitializer,
    BadNumber,
    BadSizeof,
    BadArgumentCount { name: SmolStr, expected: usize, found: usize },
    TooManyArguments(SmolStr),
    NestingTooDeep,
    TextOverflow,
    DataOverflow,
    GlobalsOverflow,
    MainNotDefined,
}

impl fmt::Display for CompileErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use CompileErrorKind as K;
        match self {
            K::Lex(err) => fmt::Display::fmt(err, f),
            K::Expected { expected, found } => {
                write!(f, "expected {}, found {}", expected, found)
            }
            K::ExpectedIdentifier { found } => {
                write!(f, "expected identifier, found {}", found)
            }
            K::ExpectedExpression { found } => {
                write!(f, "expected expression, found {}", found)
            }
            K::DuplicateGlobal(name) => write!(f, "duplicate global declaration: {}", name),
            K::DuplicateLocal(name) => write!(f, "duplicate local declaration: {}", name),
            K::UndefinedSymbol(name) => write!(f, "undefined symbol: {}", name),
            K::NotAFunction(name) => write!(f, "{} is not a function", name),
            K::NotAVariable(name) => write!(f, "{} is not a variable", name),
            K::BadLvalue => write!(f, "expression is not assignable"),
            K::BadDereference => write!(f, "dereference of a non-pointer value"),
            K::BadAddressOf => write!(f, "address-of needs an addressable value"),
            K::PointerExpected => write!(f, "subscript on a non-pointer value"),
            K::BadEnumInitializer => write!(f, "bad enum initializer"),
            K::BadNumber => write!(f, "bad numeric literal"),
            K::BadSizeof => write!(f, "sizeof expects a type name"),
            K::BadArgumentCount { name, expected, found } => {
                write!(f, "{} takes {} arguments, found {}", name, expected, found)
            }
            K::TooManyArguments(name) => write!(f, "too many arguments to {}", name),
            K::NestingTooDeep => write!(f, "expression nested too deeply"),
            K::TextOverflow => write!(f, "code region full"),
            K::DataOverflow => write!(f, "data region full"),
            K::GlobalsOverflow => write!(f, "too many global variables"),
            K::MainNotDefined => write!(f, "main function not defined"),
        }
    }
}
