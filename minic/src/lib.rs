mod bytecode;
mod compiler;
pub mod constants;
mod cpu;
mod disasm;
mod error;
mod host;
mod lexer;
mod symbols;
mod tokens;
mod vm;

pub use self::compiler::compile;
pub use self::host::Host;

pub mod prelude {
    pub use super::{
        bytecode::{Addr, Op, Program, Region, Value},
        compiler::{compile, CompileError, CompileErrorKind},
        disasm::Disassembler,
        error::{MinicError, MinicResult, VmError},
        host::{Host, StdHost},
        vm::{MinicConf, MinicVm},
    };
}
