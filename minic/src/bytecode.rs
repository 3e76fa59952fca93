//! Machine-level representation: values, addresses and instructions.
//!
//! Instructions are structured records rather than packed words. Each
//! [`Op`] carries its operand, and jump targets are indices into the
//! code vector, so a decoded program can always be printed back
//! faithfully and an undecodable instruction cannot exist.

use std::fmt;

/// Memory region an address points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    /// Instructions; offsets are code indices.
    Code,
    /// String literal bytes.
    Data,
    /// Global variable slots; word granular.
    Globals,
    /// Runtime stack slots; word granular.
    Stack,
    /// `malloc` arena bytes.
    Heap,
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Region::Code => write!(f, "code"),
            Region::Data => write!(f, "data"),
            Region::Globals => write!(f, "globals"),
            Region::Stack => write!(f, "stack"),
            Region::Heap => write!(f, "heap"),
        }
    }
}

/// A machine address: a region and a byte offset into it.
///
/// Code addresses are the exception; their offset counts instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Addr {
    pub region: Region,
    pub offset: usize,
}

impl Addr {
    pub fn new(region: Region, offset: usize) -> Self {
        Addr { region, offset }
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}+{}", self.region, self.offset)
    }
}

/// A machine word. Integers and pointers are distinct at runtime, so
/// a stray integer can never be dereferenced and a pointer's
/// provenance is never lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Ptr(Addr),
}

impl Value {
    /// Truth of a conditional-jump operand. Pointers are always
    /// truthy; the null pointer of this machine is integer zero.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Int(n) => *n != 0,
            Value::Ptr(_) => true,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Int(0)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Ptr(addr) => write!(f, "{}", addr),
        }
    }
}

/// Host services callable from compiled code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Open,
    Read,
    Clos,
    Prtf,
    Malc,
    Mset,
    Mcmp,
    Exit,
}

impl Builtin {
    pub const ALL: [Builtin; 8] = [
        Builtin::Open,
        Builtin::Read,
        Builtin::Clos,
        Builtin::Prtf,
        Builtin::Malc,
        Builtin::Mset,
        Builtin::Mcmp,
        Builtin::Exit,
    ];

    /// Source-level name the compiler binds this built-in to.
    pub fn name(&self) -> &'static str {
        match self {
            Builtin::Open => "open",
            Builtin::Read => "read",
            Builtin::Clos => "close",
            Builtin::Prtf => "printf",
            Builtin::Malc => "malloc",
            Builtin::Mset => "memset",
            Builtin::Mcmp => "memcmp",
            Builtin::Exit => "exit",
        }
    }

    /// Number of arguments, or `None` for variadic `printf`.
    pub fn arity(&self) -> Option<usize> {
        match self {
            Builtin::Open => Some(2),
            Builtin::Read => Some(3),
            Builtin::Clos => Some(1),
            Builtin::Prtf => None,
            Builtin::Malc => Some(1),
            Builtin::Mset => Some(3),
            Builtin::Mcmp => Some(3),
            Builtin::Exit => Some(1),
        }
    }
}

/// One machine instruction.
///
/// Calling convention: arguments are pushed left to right, `Call`
/// pushes the return address, `Ent` saves the caller's base pointer
/// and reserves local slots, `Adj` pops the arguments after return,
/// `Lev` unwinds the frame. Binary operators take their left operand
/// from the stack and their right operand from `ax`, leaving the
/// result in `ax`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Load an immediate value into `ax`.
    Imm(Value),
    /// Load the address of a frame slot into `ax`. Positive offsets
    /// reach parameters, negative offsets reach locals.
    Lea(i64),
    Jmp(usize),
    /// Jump if `ax` is falsy.
    Jz(usize),
    /// Jump if `ax` is truthy.
    Jnz(usize),
    Call(usize),
    /// Enter a function: save `bp`, reserve this many local slots.
    Ent(usize),
    /// Discard this many argument slots.
    Adj(usize),
    /// Leave a function: unwind the frame, restore `bp`, return.
    Lev,
    /// Load the word at address `ax` into `ax`.
    Li,
    /// Load the byte at address `ax` into `ax`, widened to an integer.
    Lc,
    /// Store word `ax` through the address popped from the stack.
    Si,
    /// Store the low byte of `ax` through the address popped from the
    /// stack; `ax` becomes the stored byte.
    Sc,
    /// Push `ax` onto the stack.
    Push,

    Or,
    Xor,
    And,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Shl,
    Shr,
    Add,
    Sub,
    Mul,
    Div,
    Mod,

    Open,
    Read,
    Clos,
    /// Formatted print; reads the format string and `args - 1`
    /// values from the caller's argument slots.
    Prtf { args: usize },
    Malc,
    Mset,
    Mcmp,
    Exit,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Op::Imm(value) => write!(f, "IMM  {}", value),
            Op::Lea(offset) => write!(f, "LEA  {}", offset),
            Op::Jmp(target) => write!(f, "JMP  {}", target),
            Op::Jz(target) => write!(f, "JZ   {}", target),
            Op::Jnz(target) => write!(f, "JNZ  {}", target),
            Op::Call(target) => write!(f, "CALL {}", target),
            Op::Ent(slots) => write!(f, "ENT  {}", slots),
            Op::Adj(slots) => write!(f, "ADJ  {}", slots),
            Op::Lev => write!(f, "LEV"),
            Op::Li => write!(f, "LI"),
            Op::Lc => write!(f, "LC"),
            Op::Si => write!(f, "SI"),
            Op::Sc => write!(f, "SC"),
            Op::Push => write!(f, "PUSH"),
            Op::Or => write!(f, "OR"),
            Op::Xor => write!(f, "XOR"),
            Op::And => write!(f, "AND"),
            Op::Eq => write!(f, "EQ"),
            Op::Ne => write!(f, "NE"),
            Op::Lt => write!(f, "LT"),
            Op::Gt => write!(f, "GT"),
            Op::Le => write!(f, "LE"),
            Op::Ge => write!(f, "GE"),
            Op::Shl => write!(f, "SHL"),
            Op::Shr => write!(f, "SHR"),
            Op::Add => write!(f, "ADD"),
            Op::Sub => write!(f, "SUB"),
            Op::Mul => write!(f, "MUL"),
            Op::Div => write!(f, "DIV"),
            Op::Mod => write!(f, "MOD"),
            Op::Open => write!(f, "OPEN"),
            Op::Read => write!(f, "READ"),
            Op::Clos => write!(f, "CLOS"),
            Op::Prtf { args } => write!(f, "PRTF {}", args),
            Op::Malc => write!(f, "MALC"),
            Op::Mset => write!(f, "MSET"),
            Op::Mcmp => write!(f, "MCMP"),
            Op::Exit => write!(f, "EXIT"),
        }
    }
}

/// A compiled program, ready to be loaded into the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    pub code: Vec<Op>,
    /// String literal bytes, NUL terminators included.
    pub data: Vec<u8>,
    /// Number of global variable slots the program needs.
    pub globals: usize,
    /// Code index of `main`.
    pub entry: usize,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Int(0).is_truthy());
        assert!(Value::Int(-3).is_truthy());
        assert!(Value::Ptr(Addr::new(Region::Data, 0)).is_truthy());
    }

    #[test]
    fn test_op_display() {
        assert_eq!(Op::Imm(Value::Int(42)).to_string(), "IMM  42");
        assert_eq!(
            Op::Imm(Value::Ptr(Addr::new(Region::Data, 12))).to_string(),
            "IMM  data+12"
        );
        assert_eq!(Op::Lea(-2).to_string(), "LEA  -2");
        assert_eq!(Op::Prtf { args: 2 }.to_string(), "PRTF 2");
        assert_eq!(Op::Lev.to_string(), "LEV");
    }

    #[test]
    fn test_builtin_names() {
        for builtin in Builtin::ALL {
            assert!(!builtin.name().is_empty());
        }
        assert_eq!(Builtin::Prtf.name(), "printf");
        assert_eq!(Builtin::Prtf.arity(), None);
        assert_eq!(Builtin::Read.arity(), Some(3));
    }
}
