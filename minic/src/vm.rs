//! Virtual machine: instruction dispatch and built-in services.

use crate::bytecode::{Addr, Op, Program, Region, Value};
use crate::constants::{HEAP_CAPACITY, STACK_WORDS, TEXT_CAPACITY, WORD_SIZE};
use crate::cpu::MinicCpu;
use crate::error::{MinicResult, VmError};
use crate::host::{Host, StdHost};

/// Instructions appended after the program: call the entry function,
/// then exit with its return value.
const ENTRY_STUB_LEN: usize = 3;

/// Virtual machine configuration.
#[derive(Debug, Clone, Default)]
pub struct MinicConf {
    /// Cap on executed instructions. `None` runs until the program
    /// exits or faults.
    pub max_cycles: Option<u64>,
}

/// Outcome of a single step.
enum Flow {
    Continue,
    Exit(i64),
}

pub struct MinicVm {
    cpu: MinicCpu,
    conf: MinicConf,
    host: Box<dyn Host>,
    cycles: u64,
}

impl MinicVm {
    pub fn new(conf: MinicConf) -> Self {
        MinicVm::with_host(conf, Box::new(StdHost::new()))
    }

    pub fn with_host(conf: MinicConf, host: Box<dyn Host>) -> Self {
        MinicVm {
            cpu: MinicCpu::new(),
            conf,
            host,
            cycles: 0,
        }
    }

    /// Instructions executed since the last [`MinicVm::load_program`].
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Resets the machine and installs a program. Execution will start
    /// at the entry stub, which calls the program's `main`.
    pub fn load_program(&mut self, program: &Program) -> MinicResult<()> {
        if program.code.len() + ENTRY_STUB_LEN > TEXT_CAPACITY {
            return Err(VmError::ProgramTooLarge.into());
        }
        if program.entry >= program.code.len() {
            return Err(VmError::BadJump(program.entry).into());
        }

        let mut cpu = MinicCpu::new();
        cpu.code = program.code.clone();
        let stub = cpu.code.len();
        cpu.code.push(Op::Call(program.entry));
        cpu.code.push(Op::Push);
        cpu.code.push(Op::Exit);
        cpu.data = program.data.clone();
        cpu.globals = vec![Value::default(); program.globals];
        cpu.pc = stub;

        self.cpu = cpu;
        self.cycles = 0;
        Ok(())
    }

    /// Runs the loaded program to completion and returns its exit
    /// status.
    pub fn execute(&mut self) -> MinicResult<i64> {
        loop {
            if let Some(max_cycles) = self.conf.max_cycles {
                if self.cycles >= max_cycles {
                    return Err(VmError::CycleBudget.into());
                }
            }
            self.cycles += 1;

            match self.step()? {
                Flow::Continue => {}
                Flow::Exit(status) => return Ok(status),
            }
        }
    }

    fn step(&mut self) -> Result<Flow, VmError> {
        let op = *self
            .cpu
            .code
            .get(self.cpu.pc)
            .ok_or(VmError::BadJump(self.cpu.pc))?;
        self.cpu.pc += 1;

        match op {
            Op::Imm(value) => self.cpu.ax = value,
            Op::Lea(offset) => self.cpu.ax = Value::Ptr(self.cpu.frame_addr(offset)?),
            Op::Jmp(target) => self.cpu.pc = target,
            Op::Jz(target) => {
                if !self.cpu.ax.is_truthy() {
                    self.cpu.pc = target;
                }
            }
            Op::Jnz(target) => {
                if self.cpu.ax.is_truthy() {
                    self.cpu.pc = target;
                }
            }
            Op::Call(target) => {
                self.cpu
                    .push(Value::Ptr(Addr::new(Region::Code, self.cpu.pc)))?;
                self.cpu.pc = target;
            }
            Op::Ent(slots) => {
                self.cpu
                    .push(Value::Ptr(Addr::new(Region::Stack, self.cpu.bp * WORD_SIZE)))?;
                self.cpu.bp = self.cpu.sp;
                if self.cpu.sp < slots {
                    return Err(VmError::StackOverflow);
                }
                self.cpu.sp -= slots;
                // Locals start zeroed rather than holding stale words
                // from earlier frames.
                for slot in self.cpu.sp..self.cpu.bp {
                    self.cpu.stack[slot] = Value::default();
                }
            }
            Op::Adj(slots) => {
                let sp = self.cpu.sp.checked_add(slots).ok_or(VmError::StackUnderflow)?;
                if sp > STACK_WORDS {
                    return Err(VmError::StackUnderflow);
                }
                self.cpu.sp = sp;
            }
            Op::Lev => {
                self.cpu.sp = self.cpu.bp;
                match self.cpu.pop()? {
                    Value::Ptr(Addr { region: Region::Stack, offset }) => {
                        self.cpu.bp = offset / WORD_SIZE;
                    }
                    _ => return Err(VmError::TypeFault("corrupt frame link")),
                }
                match self.cpu.pop()? {
                    Value::Ptr(Addr { region: Region::Code, offset }) => {
                        self.cpu.pc = offset;
                    }
                    _ => return Err(VmError::TypeFault("corrupt return address")),
                }
            }
            Op::Li => {
                let addr = ptr_operand(self.cpu.ax, "load through a non-pointer")?;
                self.cpu.ax = self.cpu.load_word(addr)?;
            }
            Op::Lc => {
                let addr = ptr_operand(self.cpu.ax, "load through a non-pointer")?;
                self.cpu.ax = Value::Int(self.cpu.load_byte(addr)?);
            }
            Op::Si => {
                let addr = ptr_operand(self.cpu.pop()?, "store through a non-pointer")?;
                self.cpu.store_word(addr, self.cpu.ax)?;
            }
            Op::Sc => {
                let addr = ptr_operand(self.cpu.pop()?, "store through a non-pointer")?;
                let byte = int_operand(self.cpu.ax, "pointer stored as a byte")? as u8;
                self.cpu.store_byte(addr, byte)?;
                self.cpu.ax = Value::Int(i64::from(byte));
            }
            Op::Push => self.cpu.push(self.cpu.ax)?,

            Op::Or | Op::Xor | Op::And | Op::Eq | Op::Ne | Op::Lt | Op::Gt | Op::Le
            | Op::Ge | Op::Shl | Op::Shr | Op::Add | Op::Sub | Op::Mul | Op::Div
            | Op::Mod => {
                let lhs = self.cpu.pop()?;
                self.cpu.ax = binary_op(op, lhs, self.cpu.ax)?;
            }

            Op::Open => {
                let flags = int_operand(self.cpu.peek(0)?, "open flags")?;
                let path_addr = ptr_operand(self.cpu.peek(1)?, "open path")?;
                let path = self.cpu.read_cstring(path_addr)?;
                self.cpu.ax = Value::Int(self.host.open(&path, flags));
            }
            Op::Read => {
                let count = int_operand(self.cpu.peek(0)?, "read count")?;
                let buf_addr = ptr_operand(self.cpu.peek(1)?, "read buffer")?;
                let fd = int_operand(self.cpu.peek(2)?, "read descriptor")?;

                let count = usize::try_from(count).map_err(|_| VmError::BadAddress)?;
                let mut buf = vec![0u8; count];
                let read = self.host.read(fd, &mut buf);
                if read > 0 {
                    for (index, byte) in buf[..read as usize].iter().enumerate() {
                        self.cpu
                            .store_byte(ptr_offset(buf_addr, index as i64)?, *byte)?;
                    }
                }
                self.cpu.ax = Value::Int(read);
            }
            Op::Clos => {
                let fd = int_operand(self.cpu.peek(0)?, "close descriptor")?;
                self.cpu.ax = Value::Int(self.host.close(fd));
            }
            Op::Prtf { args } => {
                let text = self.format_printf(args)?;
                self.host.write_out(&text);
                self.cpu.ax = Value::Int(text.len() as i64);
            }
            Op::Malc => {
                let size = int_operand(self.cpu.peek(0)?, "malloc size")?;
                let size = usize::try_from(size).map_err(|_| VmError::OutOfMemory)?;
                let brk = self.cpu.heap.len();
                if HEAP_CAPACITY - brk < size {
                    return Err(VmError::OutOfMemory);
                }
                self.cpu.heap.resize(brk + size, 0);
                self.cpu.ax = Value::Ptr(Addr::new(Region::Heap, brk));
            }
            Op::Mset => {
                let count = int_operand(self.cpu.peek(0)?, "memset count")?;
                let byte = int_operand(self.cpu.peek(1)?, "memset value")? as u8;
                let dst = ptr_operand(self.cpu.peek(2)?, "memset target")?;
                for index in 0..count {
                    self.cpu.store_byte(ptr_offset(dst, index)?, byte)?;
                }
                self.cpu.ax = Value::Ptr(dst);
            }
            Op::Mcmp => {
                let count = int_operand(self.cpu.peek(0)?, "memcmp count")?;
                let b = ptr_operand(self.cpu.peek(1)?, "memcmp operand")?;
                let a = ptr_operand(self.cpu.peek(2)?, "memcmp operand")?;
                let mut result = 0;
                for index in 0..count {
                    let x = self.cpu.load_byte(ptr_offset(a, index)?)?;
                    let y = self.cpu.load_byte(ptr_offset(b, index)?)?;
                    if x != y {
                        result = x - y;
                        break;
                    }
                }
                self.cpu.ax = Value::Int(result);
            }
            Op::Exit => {
                let status = int_operand(self.cpu.peek(0)?, "exit status")?;
                return Ok(Flow::Exit(status));
            }
        }

        Ok(Flow::Continue)
    }

    /// Renders a `printf` call. The format string is the deepest
    /// argument slot; `%d`, `%x`, `%c`, `%s` and `%%` are honored and
    /// any other specifier is passed through verbatim.
    fn format_printf(&self, args: usize) -> Result<String, VmError> {
        if args == 0 {
            return Err(VmError::TypeFault("printf missing format string"));
        }
        let fmt_addr = ptr_operand(self.cpu.peek(args - 1)?, "printf format")?;
        let fmt = self.cpu.read_cstring(fmt_addr)?;

        let mut out = String::new();
        let mut used = 0;
        let mut chars = fmt.chars();
        while let Some(c) = chars.next() {
            if c != '%' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('%') => out.push('%'),
                Some(spec @ ('d' | 'x' | 'c' | 's')) => {
                    used += 1;
                    if used >= args {
                        return Err(VmError::TypeFault("printf missing argument"));
                    }
                    let value = self.cpu.peek(args - 1 - used)?;
                    match spec {
                        'd' => out.push_str(&int_operand(value, "printf %d")?.to_string()),
                        'x' => out.push_str(&format!("{:x}", int_operand(value, "printf %x")?)),
                        'c' => out.push(int_operand(value, "printf %c")? as u8 as char),
                        _ => {
                            let addr = ptr_operand(value, "printf %s")?;
                            out.push_str(&self.cpu.read_cstring(addr)?);
                        }
                    }
                }
                Some(other) => {
                    out.push('%');
                    out.push(other);
                }
                None => out.push('%'),
            }
        }
        Ok(out)
    }
}

fn int_operand(value: Value, what: &'static str) -> Result<i64, VmError> {
    match value {
        Value::Int(n) => Ok(n),
        Value::Ptr(_) => Err(VmError::TypeFault(what)),
    }
}

fn ptr_operand(value: Value, what: &'static str) -> Result<Addr, VmError> {
    match value {
        Value::Ptr(addr) => Ok(addr),
        Value::Int(_) => Err(VmError::TypeFault(what)),
    }
}

/// Pointer arithmetic; addresses never leave their region and never
/// go below offset zero.
fn ptr_offset(addr: Addr, delta: i64) -> Result<Addr, VmError> {
    let offset = (addr.offset as i64)
        .checked_add(delta)
        .ok_or(VmError::BadAddress)?;
    if offset < 0 {
        return Err(VmError::BadAddress);
    }
    Ok(Addr::new(addr.region, offset as usize))
}

fn bool_value(condition: bool) -> Value {
    Value::Int(i64::from(condition))
}

fn values_equal(lhs: Value, rhs: Value) -> bool {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Ptr(a), Value::Ptr(b)) => a == b,
        // An integer never equals a live pointer; the only null
        // pointer is the integer zero itself.
        _ => false,
    }
}

fn binary_op(op: Op, lhs: Value, rhs: Value) -> Result<Value, VmError> {
    use Value::{Int, Ptr};

    match (op, lhs, rhs) {
        (Op::Add, Int(a), Int(b)) => Ok(Int(a.wrapping_add(b))),
        (Op::Add, Ptr(p), Int(n)) | (Op::Add, Int(n), Ptr(p)) => Ok(Ptr(ptr_offset(p, n)?)),
        (Op::Sub, Int(a), Int(b)) => Ok(Int(a.wrapping_sub(b))),
        (Op::Sub, Ptr(p), Int(n)) => {
            let delta = n.checked_neg().ok_or(VmError::BadAddress)?;
            Ok(Ptr(ptr_offset(p, delta)?))
        }
        (Op::Sub, Ptr(a), Ptr(b)) if a.region == b.region => {
            Ok(Int(a.offset as i64 - b.offset as i64))
        }
        (Op::Mul, Int(a), Int(b)) => Ok(Int(a.wrapping_mul(b))),
        (Op::Div, Int(_), Int(0)) => Err(VmError::DivideByZero),
        (Op::Div, Int(a), Int(b)) => Ok(Int(a.wrapping_div(b))),
        (Op::Mod, Int(_), Int(0)) => Err(VmError::DivideByZero),
        (Op::Mod, Int(a), Int(b)) => Ok(Int(a.wrapping_rem(b))),
        (Op::Or, Int(a), Int(b)) => Ok(Int(a | b)),
        (Op::Xor, Int(a), Int(b)) => Ok(Int(a ^ b)),
        (Op::And, Int(a), Int(b)) => Ok(Int(a & b)),
        (Op::Shl, Int(a), Int(b)) => Ok(Int(a.wrapping_shl(b as u32))),
        (Op::Shr, Int(a), Int(b)) => Ok(Int(a.wrapping_shr(b as u32))),
        (Op::Eq, a, b) => Ok(bool_value(values_equal(a, b))),
        (Op::Ne, a, b) => Ok(bool_value(!values_equal(a, b))),
        (Op::Lt, Int(a), Int(b)) => Ok(bool_value(a < b)),
        (Op::Gt, Int(a), Int(b)) => Ok(bool_value(a > b)),
        (Op::Le, Int(a), Int(b)) => Ok(bool_value(a <= b)),
        (Op::Ge, Int(a), Int(b)) => Ok(bool_value(a >= b)),
        (Op::Lt, Ptr(a), Ptr(b)) if a.region == b.region => Ok(bool_value(a.offset < b.offset)),
        (Op::Gt, Ptr(a), Ptr(b)) if a.region == b.region => Ok(bool_value(a.offset > b.offset)),
        (Op::Le, Ptr(a), Ptr(b)) if a.region == b.region => Ok(bool_value(a.offset <= b.offset)),
        (Op::Ge, Ptr(a), Ptr(b)) if a.region == b.region => Ok(bool_value(a.offset >= b.offset)),
        _ => Err(VmError::TypeFault("invalid operand kinds")),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::MinicError;

    fn program(code: Vec<Op>) -> Program {
        Program {
            code,
            data: Vec::new(),
            globals: 0,
            entry: 0,
        }
    }

    fn run(code: Vec<Op>) -> MinicResult<i64> {
        let mut vm = MinicVm::new(MinicConf { max_cycles: Some(10_000) });
        vm.load_program(&program(code))?;
        vm.execute()
    }

    #[test]
    fn test_execute_return_value() {
        let status = run(vec![Op::Ent(0), Op::Imm(Value::Int(5)), Op::Lev, Op::Lev]).unwrap();
        assert_eq!(status, 5);
    }

    #[test]
    fn test_execute_arithmetic() {
        // 2 + 3 * 4
        let status = run(vec![
            Op::Ent(0),
            Op::Imm(Value::Int(2)),
            Op::Push,
            Op::Imm(Value::Int(3)),
            Op::Push,
            Op::Imm(Value::Int(4)),
            Op::Mul,
            Op::Add,
            Op::Lev,
            Op::Lev,
        ])
        .unwrap();
        assert_eq!(status, 14);
    }

    #[test]
    fn test_divide_by_zero_faults() {
        let err = run(vec![
            Op::Ent(0),
            Op::Imm(Value::Int(1)),
            Op::Push,
            Op::Imm(Value::Int(0)),
            Op::Div,
            Op::Lev,
            Op::Lev,
        ])
        .unwrap_err();
        assert!(matches!(err, MinicError::Vm(VmError::DivideByZero)));
    }

    #[test]
    fn test_null_dereference_faults() {
        let err = run(vec![Op::Ent(0), Op::Imm(Value::Int(0)), Op::Li, Op::Lev, Op::Lev])
            .unwrap_err();
        assert!(matches!(err, MinicError::Vm(VmError::TypeFault(_))));
    }

    #[test]
    fn test_jump_outside_code_faults() {
        let err = run(vec![Op::Jmp(100)]).unwrap_err();
        assert!(matches!(err, MinicError::Vm(VmError::BadJump(100))));
    }

    #[test]
    fn test_cycle_budget() {
        // Tight infinite loop.
        let err = run(vec![Op::Jmp(0)]).unwrap_err();
        assert!(matches!(err, MinicError::Vm(VmError::CycleBudget)));
    }

    #[test]
    fn test_entry_must_be_inside_code() {
        let mut vm = MinicVm::new(MinicConf::default());
        let mut bad = program(vec![Op::Ent(0), Op::Lev]);
        bad.entry = 9;
        assert!(matches!(
            vm.load_program(&bad),
            Err(MinicError::Vm(VmError::BadJump(9)))
        ));
    }

    #[test]
    fn test_binary_op_pointer_rules() {
        let a = Value::Ptr(Addr::new(Region::Heap, 24));
        let b = Value::Ptr(Addr::new(Region::Heap, 8));
        assert_eq!(binary_op(Op::Sub, a, b).unwrap(), Value::Int(16));
        assert_eq!(
            binary_op(Op::Add, a, Value::Int(8)).unwrap(),
            Value::Ptr(Addr::new(Region::Heap, 32))
        );
        // Differencing across regions has no meaning.
        let c = Value::Ptr(Addr::new(Region::Data, 0));
        assert!(binary_op(Op::Sub, a, c).is_err());
        // Comparing a pointer with a non-zero integer is always unequal.
        assert_eq!(binary_op(Op::Eq, a, Value::Int(24)).unwrap(), Value::Int(0));
        assert_eq!(binary_op(Op::Ne, a, Value::Int(0)).unwrap(), Value::Int(1));
    }
}
