//! Symbol table and the value types it tracks.
use smol_str::SmolStr;

use std::fmt;

use crate::bytecode::Builtin;
use crate::constants::WORD_SIZE;

/// Scalar base of a [`Type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Base {
    Char,
    Int,
}

/// A value type: a scalar base plus a level of pointer indirection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Type {
    pub base: Base,
    /// Number of `*` levels. Zero for plain scalars.
    pub indir: u8,
}

impl Type {
    pub const INT: Type = Type { base: Base::Int, indir: 0 };
    pub const CHAR: Type = Type { base: Base::Char, indir: 0 };

    pub fn pointer_to(self) -> Type {
        Type { base: self.base, indir: self.indir + 1 }
    }

    /// The type obtained by dereferencing, if this is a pointer.
    pub fn deref(self) -> Option<Type> {
        if self.indir > 0 {
            Some(Type { base: self.base, indir: self.indir - 1 })
        } else {
            None
        }
    }

    pub fn is_pointer(self) -> bool {
        self.indir > 0
    }

    /// Storage width in bytes. Pointers are word sized; `char` is the
    /// only byte-wide type.
    pub fn width(self) -> usize {
        if self.indir > 0 || self.base == Base::Int {
            WORD_SIZE
        } else {
            1
        }
    }

    /// Whether loads and stores through this type move a single byte.
    pub fn is_byte(self) -> bool {
        self.width() == 1
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.base {
            Base::Char => write!(f, "char")?,
            Base::Int => write!(f, "int")?,
        }
        for _ in 0..self.indir {
            write!(f, "*")?;
        }
        Ok(())
    }
}

/// Storage class of a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymClass {
    /// Named constant from an `enum` declaration; `value` is the constant.
    EnumConst,
    /// Defined function; `value` is the code index of its first instruction.
    Fun,
    /// Host built-in function.
    Sys(Builtin),
    /// Global variable; `value` is its slot index in the globals region.
    Global,
    /// Parameter or local variable; `value` is its frame ordinal.
    Local,
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: SmolStr,
    /// Cached name hash, used to prefilter lookups.
    hash: u32,
    pub class: SymClass,
    pub ty: Type,
    pub value: i64,
}

impl Symbol {
    pub fn new(name: &str, class: SymClass, ty: Type, value: i64) -> Self {
        Symbol {
            name: SmolStr::new(name),
            hash: name_hash(name),
            class,
            ty,
            value,
        }
    }
}

/// Rolling byte hash over a symbol name.
///
/// The hash is a prefilter only; lookups always confirm with a full
/// name comparison, so colliding names still resolve correctly.
fn name_hash(name: &str) -> u32 {
    name.bytes()
        .fold(0u32, |h, b| h.wrapping_mul(147).wrapping_add(u32::from(b)))
}

fn find_in<'a>(symbols: &'a [Symbol], hash: u32, name: &str) -> Option<&'a Symbol> {
    symbols
        .iter()
        .find(|sym| sym.hash == hash && sym.name == name)
}

/// Two-level symbol table.
///
/// Globals (variables, functions, enum constants, built-ins) persist
/// for the whole compilation. Locals (parameters and local variables)
/// exist only while a function body is being compiled and shadow any
/// global of the same name; [`SymbolTable::exit_function`] drops them,
/// which restores the shadowed globals without any save/restore
/// bookkeeping.
#[derive(Debug, Default)]
pub struct SymbolTable {
    globals: Vec<Symbol>,
    locals: Vec<Symbol>,
}

/// Attempt to declare a name that is already bound at the same level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateName(pub SmolStr);

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable::default()
    }

    /// Resolves a name, innermost binding first.
    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        let hash = name_hash(name);
        find_in(&self.locals, hash, name).or_else(|| find_in(&self.globals, hash, name))
    }

    /// Resolves a name at global level only, ignoring any local shadow.
    pub fn lookup_global(&self, name: &str) -> Option<&Symbol> {
        find_in(&self.globals, name_hash(name), name)
    }

    /// Binds a global symbol. Redeclaring a global name is an error;
    /// built-ins, functions, variables and enum constants all share
    /// the one global namespace.
    pub fn declare_global(&mut self, symbol: Symbol) -> Result<(), DuplicateName> {
        if find_in(&self.globals, symbol.hash, &symbol.name).is_some() {
            return Err(DuplicateName(symbol.name));
        }
        self.globals.push(symbol);
        Ok(())
    }

    /// Binds a parameter or local variable for the function currently
    /// being compiled. Shadowing a global is allowed; clashing with
    /// another local is not.
    pub fn declare_local(&mut self, symbol: Symbol) -> Result<(), DuplicateName> {
        if find_in(&self.locals, symbol.hash, &symbol.name).is_some() {
            return Err(DuplicateName(symbol.name));
        }
        self.locals.push(symbol);
        Ok(())
    }

    /// Drops all local bindings at the end of a function body.
    pub fn exit_function(&mut self) {
        self.locals.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn int_global(name: &str, slot: i64) -> Symbol {
        Symbol::new(name, SymClass::Global, Type::INT, slot)
    }

    #[test]
    fn test_type_widths() {
        assert_eq!(Type::INT.width(), WORD_SIZE);
        assert_eq!(Type::CHAR.width(), 1);
        assert_eq!(Type::CHAR.pointer_to().width(), WORD_SIZE);
        assert_eq!(Type::CHAR.pointer_to().deref(), Some(Type::CHAR));
        assert_eq!(Type::INT.deref(), None);
    }

    #[test]
    fn test_local_shadows_global() {
        let mut table = SymbolTable::new();
        table.declare_global(int_global("x", 0)).unwrap();
        table
            .declare_local(Symbol::new("x", SymClass::Local, Type::CHAR, 2))
            .unwrap();

        let sym = table.lookup("x").unwrap();
        assert_eq!(sym.class, SymClass::Local);
        assert_eq!(sym.ty, Type::CHAR);

        // Dropping the function scope restores the global binding.
        table.exit_function();
        let sym = table.lookup("x").unwrap();
        assert_eq!(sym.class, SymClass::Global);
        assert_eq!(sym.value, 0);
    }

    #[test]
    fn test_duplicate_global_rejected() {
        let mut table = SymbolTable::new();
        table.declare_global(int_global("x", 0)).unwrap();
        assert_eq!(
            table.declare_global(int_global("x", 1)),
            Err(DuplicateName(SmolStr::new("x")))
        );
        // Distinct names are fine.
        table.declare_global(int_global("y", 1)).unwrap();
    }

    #[test]
    fn test_duplicate_local_rejected() {
        let mut table = SymbolTable::new();
        table
            .declare_local(Symbol::new("n", SymClass::Local, Type::INT, 0))
            .unwrap();
        assert!(table
            .declare_local(Symbol::new("n", SymClass::Local, Type::INT, 1))
            .is_err());
        // A new function body starts clean.
        table.exit_function();
        table
            .declare_local(Symbol::new("n", SymClass::Local, Type::INT, 0))
            .unwrap();
    }

    #[test]
    fn test_hash_collision_falls_back_to_name() {
        // Force two records onto the same hash value; the prefilter
        // must fall back to comparing the actual names.
        let mut a = Symbol::new("alpha", SymClass::Global, Type::INT, 1);
        let mut b = Symbol::new("beta", SymClass::Global, Type::INT, 2);
        let hash = a.hash;
        a.hash = hash;
        b.hash = hash;
        let symbols = vec![a, b];

        assert_eq!(find_in(&symbols, hash, "alpha").unwrap().value, 1);
        assert_eq!(find_in(&symbols, hash, "beta").unwrap().value, 2);
        assert!(find_in(&symbols, hash, "gamma").is_none());
    }
}
