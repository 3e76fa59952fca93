//! Capacities of the fixed-size machine regions, and shared limits.
//!
//! Every region is an arena: sized once, never reallocated. Writes past
//! a capacity are surfaced as errors by the compiler or the VM rather
//! than growing the region.

/// Size of one machine word in bytes. All addresses are byte offsets,
/// so pointer arithmetic on word-sized elements scales by this.
pub const WORD_SIZE: usize = 8;

/// Maximum number of instructions in the code region.
pub const TEXT_CAPACITY: usize = 64 * 1024;

/// Maximum number of string-literal bytes in the data region.
pub const DATA_CAPACITY: usize = 64 * 1024;

/// Maximum number of global variable slots.
pub const GLOBALS_CAPACITY: usize = 4 * 1024;

/// Number of word slots in the runtime stack.
pub const STACK_WORDS: usize = 32 * 1024;

/// Maximum number of bytes `malloc` may hand out in one run.
pub const HEAP_CAPACITY: usize = 256 * 1024;

/// Parser recursion guard. Expression and statement nesting beyond
/// this depth is reported as a fatal error instead of overflowing
/// the host stack.
pub const MAX_NESTING: usize = 200;

/// `printf` reads its format string plus at most this many variadic
/// arguments from the caller's frame.
pub const PRINTF_MAX_ARGS: usize = 6;
