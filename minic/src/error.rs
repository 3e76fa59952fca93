use std::{error, fmt, io};

use crate::compiler::CompileError;

pub type MinicResult<T> = Result<T, MinicError>;

#[derive(Debug)]
pub enum MinicError {
    /// Fatal diagnostic from the compiler.
    Compile(CompileError),
    /// Runtime fault in the virtual machine.
    Vm(VmError),
    Io(io::Error),
    Fmt(fmt::Error),
}

impl error::Error for MinicError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            MinicError::Compile(err) => Some(err),
            MinicError::Vm(err) => Some(err),
            MinicError::Io(err) => Some(err),
            MinicError::Fmt(err) => Some(err),
        }
    }
}

impl fmt::Display for MinicError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MinicError::Compile(err) => fmt::Display::fmt(err, f),
            MinicError::Vm(err) => fmt::Display::fmt(err, f),
            MinicError::Io(err) => fmt::Display::fmt(err, f),
            MinicError::Fmt(err) => fmt::Display::fmt(err, f),
        }
    }
}

impl From<CompileError> for MinicError {
    fn from(err: CompileError) -> Self {
        MinicError::Compile(err)
    }
}

impl From<VmError> for MinicError {
    fn from(err: VmError) -> Self {
        MinicError::Vm(err)
    }
}

impl From<io::Error> for MinicError {
    fn from(err: io::Error) -> Self {
        MinicError::Io(err)
    }
}

impl From<fmt::Error> for MinicError {
    fn from(err: fmt::Error) -> Self {
        MinicError::Fmt(err)
    }
}

/// Runtime faults. Any of these stops the machine; there is no
/// recovery into the running program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// Control transferred outside the code region.
    BadJump(usize),
    /// Memory access outside its region, or misaligned for the region's
    /// word granularity.
    BadAddress,
    /// An operand had the wrong kind, such as dereferencing an integer
    /// or doing arithmetic between unrelated pointers.
    TypeFault(&'static str),
    StackOverflow,
    StackUnderflow,
    DivideByZero,
    /// The `malloc` arena is exhausted.
    OutOfMemory,
    /// The configured cycle budget ran out before the program exited.
    CycleBudget,
    /// Program does not fit in the code region.
    ProgramTooLarge,
}

impl error::Error for VmError {}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            VmError::BadJump(target) => write!(f, "jump outside code region: {}", target),
            VmError::BadAddress => write!(f, "bad address"),
            VmError::TypeFault(message) => write!(f, "type fault: {}", message),
            VmError::StackOverflow => write!(f, "stack overflow"),
            VmError::StackUnderflow => write!(f, "stack underflow"),
            VmError::DivideByZero => write!(f, "division by zero"),
            VmError::OutOfMemory => write!(f, "out of heap memory"),
            VmError::CycleBudget => write!(f, "cycle budget exhausted"),
            VmError::ProgramTooLarge => write!(f, "program too large for code region"),
        }
    }
}
