//! Machine state: registers and memory regions.
//!
//! The memory model is split by region. Code holds instructions and
//! is never readable as data. Data (string literals) and heap are
//! byte arrays; words stored there are little-endian integers, and a
//! tagged pointer cannot be serialized into them. The stack and the
//! globals hold whole tagged words, so pointers survive there, and
//! byte access to them goes through the integer slot's byte view.

use crate::bytecode::{Addr, Op, Region, Value};
use crate::constants::{STACK_WORDS, WORD_SIZE};
use crate::error::VmError;

pub struct MinicCpu {
    /// Index of the next instruction to execute.
    pub(crate) pc: usize,
    /// Base pointer: stack slot index of the saved frame link.
    pub(crate) bp: usize,
    /// Stack pointer: slot index of the top of stack. The stack grows
    /// towards slot zero; an empty stack has `sp == STACK_WORDS`.
    pub(crate) sp: usize,
    /// Accumulator.
    pub(crate) ax: Value,

    pub(crate) code: Vec<Op>,
    pub(crate) data: Vec<u8>,
    pub(crate) globals: Vec<Value>,
    pub(crate) stack: Vec<Value>,
    /// Bump-allocated arena; `len()` is the current break.
    pub(crate) heap: Vec<u8>,
}

impl MinicCpu {
    pub fn new() -> Self {
        MinicCpu {
            pc: 0,
            bp: STACK_WORDS,
            sp: STACK_WORDS,
            ax: Value::default(),
            code: Vec::new(),
            data: Vec::new(),
            globals: Vec::new(),
            stack: vec![Value::default(); STACK_WORDS],
            heap: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, value: Value) -> Result<(), VmError> {
        if self.sp == 0 {
            return Err(VmError::StackOverflow);
        }
        self.sp -= 1;
        self.stack[self.sp] = value;
        Ok(())
    }

    pub(crate) fn pop(&mut self) -> Result<Value, VmError> {
        if self.sp >= STACK_WORDS {
            return Err(VmError::StackUnderflow);
        }
        let value = self.stack[self.sp];
        self.sp += 1;
        Ok(value)
    }

    /// Value `index` slots below the top of stack, without popping.
    pub(crate) fn peek(&self, index: usize) -> Result<Value, VmError> {
        let slot = self.sp.checked_add(index).ok_or(VmError::BadAddress)?;
        if slot >= STACK_WORDS {
            return Err(VmError::StackUnderflow);
        }
        Ok(self.stack[slot])
    }

    /// Address of the stack slot `offset` words away from `bp`.
    /// Positive offsets reach the caller's arguments.
    pub(crate) fn frame_addr(&self, offset: i64) -> Result<Addr, VmError> {
        let slot = (self.bp as i64).checked_add(offset).ok_or(VmError::BadAddress)?;
        if slot < 0 || slot > STACK_WORDS as i64 {
            return Err(VmError::BadAddress);
        }
        Ok(Addr::new(Region::Stack, slot as usize * WORD_SIZE))
    }

    pub(crate) fn load_word(&self, addr: Addr) -> Result<Value, VmError> {
        match addr.region {
            Region::Stack => Ok(self.stack[word_slot(addr, STACK_WORDS)?]),
            Region::Globals => Ok(self.globals[word_slot(addr, self.globals.len())?]),
            Region::Data => Ok(Value::Int(load_le_word(&self.data, addr.offset)?)),
            Region::Heap => Ok(Value::Int(load_le_word(&self.heap, addr.offset)?)),
            Region::Code => Err(VmError::BadAddress),
        }
    }

    pub(crate) fn store_word(&mut self, addr: Addr, value: Value) -> Result<(), VmError> {
        match addr.region {
            Region::Stack => {
                let slot = word_slot(addr, STACK_WORDS)?;
                self.stack[slot] = value;
                Ok(())
            }
            Region::Globals => {
                let slot = word_slot(addr, self.globals.len())?;
                self.globals[slot] = value;
                Ok(())
            }
            Region::Data | Region::Heap => {
                // Byte memory cannot carry a pointer's provenance.
                let Value::Int(n) = value else {
                    return Err(VmError::TypeFault("pointer stored into byte memory"));
                };
                let bytes = match addr.region {
                    Region::Data => &mut self.data,
                    _ => &mut self.heap,
                };
                store_le_word(bytes, addr.offset, n)
            }
            Region::Code => Err(VmError::BadAddress),
        }
    }

    /// Loads one byte, widened to an integer.
    pub(crate) fn load_byte(&self, addr: Addr) -> Result<i64, VmError> {
        match addr.region {
            Region::Data => byte_at(&self.data, addr.offset),
            Region::Heap => byte_at(&self.heap, addr.offset),
            Region::Stack => slot_byte(&self.stack, addr, STACK_WORDS),
            Region::Globals => slot_byte(&self.globals, addr, self.globals.len()),
            Region::Code => Err(VmError::BadAddress),
        }
    }

    pub(crate) fn store_byte(&mut self, addr: Addr, byte: u8) -> Result<(), VmError> {
        match addr.region {
            Region::Data => store_byte_at(&mut self.data, addr.offset, byte),
            Region::Heap => store_byte_at(&mut self.heap, addr.offset, byte),
            Region::Stack => store_slot_byte(&mut self.stack, addr, STACK_WORDS, byte),
            Region::Globals => {
                let limit = self.globals.len();
                store_slot_byte(&mut self.globals, addr, limit, byte)
            }
            Region::Code => Err(VmError::BadAddress),
        }
    }

    /// Reads a NUL-terminated byte string starting at `addr`.
    pub(crate) fn read_cstring(&self, addr: Addr) -> Result<String, VmError> {
        let mut bytes = Vec::new();
        let mut offset = addr.offset;
        loop {
            let byte = self.load_byte(Addr::new(addr.region, offset))? as u8;
            if byte == 0 {
                break;
            }
            bytes.push(byte);
            offset += 1;
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl Default for MinicCpu {
    fn default() -> Self {
        MinicCpu::new()
    }
}

/// Word-granular regions insist on aligned, in-bounds slot access.
fn word_slot(addr: Addr, limit: usize) -> Result<usize, VmError> {
    if addr.offset % WORD_SIZE != 0 {
        return Err(VmError::BadAddress);
    }
    let slot = addr.offset / WORD_SIZE;
    if slot >= limit {
        return Err(VmError::BadAddress);
    }
    Ok(slot)
}

fn byte_at(bytes: &[u8], offset: usize) -> Result<i64, VmError> {
    bytes
        .get(offset)
        .map(|b| i64::from(*b))
        .ok_or(VmError::BadAddress)
}

fn store_byte_at(bytes: &mut [u8], offset: usize, byte: u8) -> Result<(), VmError> {
    match bytes.get_mut(offset) {
        Some(slot) => {
            *slot = byte;
            Ok(())
        }
        None => Err(VmError::BadAddress),
    }
}

fn load_le_word(bytes: &[u8], offset: usize) -> Result<i64, VmError> {
    let end = offset.checked_add(WORD_SIZE).ok_or(VmError::BadAddress)?;
    let slice = bytes.get(offset..end).ok_or(VmError::BadAddress)?;
    let mut word = [0u8; WORD_SIZE];
    word.copy_from_slice(slice);
    Ok(i64::from_le_bytes(word))
}

fn store_le_word(bytes: &mut [u8], offset: usize, value: i64) -> Result<(), VmError> {
    let end = offset.checked_add(WORD_SIZE).ok_or(VmError::BadAddress)?;
    let slice = bytes.get_mut(offset..end).ok_or(VmError::BadAddress)?;
    slice.copy_from_slice(&value.to_le_bytes());
    Ok(())
}

/// Byte view into a word-granular region: the addressed slot must
/// hold an integer, whose little-endian byte is returned.
fn slot_byte(slots: &[Value], addr: Addr, limit: usize) -> Result<i64, VmError> {
    let slot = addr.offset / WORD_SIZE;
    if slot >= limit {
        return Err(VmError::BadAddress);
    }
    match slots[slot] {
        Value::Int(n) => {
            let shift = (addr.offset % WORD_SIZE) * 8;
            Ok((n >> shift) & 0xff)
        }
        Value::Ptr(_) => Err(VmError::TypeFault("byte read of a pointer slot")),
    }
}

fn store_slot_byte(slots: &mut [Value], addr: Addr, limit: usize, byte: u8) -> Result<(), VmError> {
    let slot = addr.offset / WORD_SIZE;
    if slot >= limit {
        return Err(VmError::BadAddress);
    }
    match slots[slot] {
        Value::Int(n) => {
            let shift = (addr.offset % WORD_SIZE) * 8;
            let cleared = n & !(0xff << shift);
            slots[slot] = Value::Int(cleared | (i64::from(byte) << shift));
            Ok(())
        }
        Value::Ptr(_) => Err(VmError::TypeFault("byte write into a pointer slot")),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_push_pop() {
        let mut cpu = MinicCpu::new();
        cpu.push(Value::Int(7)).unwrap();
        cpu.push(Value::Int(9)).unwrap();
        assert_eq!(cpu.peek(0).unwrap(), Value::Int(9));
        assert_eq!(cpu.peek(1).unwrap(), Value::Int(7));
        assert_eq!(cpu.pop().unwrap(), Value::Int(9));
        assert_eq!(cpu.pop().unwrap(), Value::Int(7));
        assert_eq!(cpu.pop(), Err(VmError::StackUnderflow));
    }

    #[test]
    fn test_heap_word_roundtrip() {
        let mut cpu = MinicCpu::new();
        cpu.heap.resize(32, 0);
        let addr = Addr::new(Region::Heap, 8);
        cpu.store_word(addr, Value::Int(-12345)).unwrap();
        assert_eq!(cpu.load_word(addr).unwrap(), Value::Int(-12345));
        // Low byte of the stored word is visible byte-wise.
        assert_eq!(
            cpu.load_byte(addr).unwrap(),
            i64::from((-12345i64).to_le_bytes()[0])
        );
    }

    #[test]
    fn test_pointer_rejected_in_byte_memory() {
        let mut cpu = MinicCpu::new();
        cpu.heap.resize(16, 0);
        let ptr = Value::Ptr(Addr::new(Region::Heap, 0));
        assert!(matches!(
            cpu.store_word(Addr::new(Region::Heap, 0), ptr),
            Err(VmError::TypeFault(_))
        ));
    }

    #[test]
    fn test_stack_byte_view() {
        let mut cpu = MinicCpu::new();
        cpu.push(Value::Int(0x0102)).unwrap();
        let base = cpu.sp * WORD_SIZE;
        assert_eq!(cpu.load_byte(Addr::new(Region::Stack, base)).unwrap(), 0x02);
        assert_eq!(
            cpu.load_byte(Addr::new(Region::Stack, base + 1)).unwrap(),
            0x01
        );

        cpu.store_byte(Addr::new(Region::Stack, base), 0xff).unwrap();
        assert_eq!(cpu.peek(0).unwrap(), Value::Int(0x01ff));
    }

    #[test]
    fn test_misaligned_word_access_faults() {
        let mut cpu = MinicCpu::new();
        cpu.globals = vec![Value::default(); 4];
        assert_eq!(
            cpu.load_word(Addr::new(Region::Globals, 3)),
            Err(VmError::BadAddress)
        );
        assert_eq!(
            cpu.load_word(Addr::new(Region::Globals, 4 * WORD_SIZE)),
            Err(VmError::BadAddress)
        );
    }

    #[test]
    fn test_read_cstring() {
        let mut cpu = MinicCpu::new();
        cpu.data = b"hi\0trailing".to_vec();
        assert_eq!(
            cpu.read_cstring(Addr::new(Region::Data, 0)).unwrap(),
            "hi"
        );
        // Unterminated strings run off the region and fault.
        cpu.data = b"xyz".to_vec();
        assert_eq!(
            cpu.read_cstring(Addr::new(Region::Data, 0)),
            Err(VmError::BadAddress)
        );
    }

    #[test]
    fn test_code_region_unreadable() {
        let cpu = MinicCpu::new();
        assert_eq!(
            cpu.load_word(Addr::new(Region::Code, 0)),
            Err(VmError::BadAddress)
        );
    }
}
