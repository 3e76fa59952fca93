//! Instruction listing for troubleshooting compiled programs.
use std::fmt::Write as FmtWrite;

use crate::bytecode::Program;

pub struct Disassembler<'a> {
    program: &'a Program,
}

impl<'a> Disassembler<'a> {
    pub fn new(program: &'a Program) -> Self {
        Disassembler { program }
    }

    /// Prints the listing to standard output.
    pub fn print(&self) {
        let mut out = String::new();
        if self.disassemble(&mut out).is_ok() {
            print!("{}", out);
        }
    }

    /// Writes one `index: OP` line per instruction, followed by a
    /// summary of the data and globals regions.
    pub fn disassemble<W: FmtWrite>(&self, w: &mut W) -> std::fmt::Result {
        for (index, op) in self.program.code.iter().enumerate() {
            let marker = if index == self.program.entry { '>' } else { ' ' };
            writeln!(w, "{}{:04}: {}", marker, index, op)?;
        }
        writeln!(
            w,
            "; {} data bytes, {} global slots",
            self.program.data.len(),
            self.program.globals
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bytecode::{Op, Value};

    #[test]
    fn test_disassemble_listing() {
        let program = Program {
            code: vec![Op::Ent(0), Op::Imm(Value::Int(7)), Op::Lev],
            data: b"ok\0".to_vec(),
            globals: 2,
            entry: 0,
        };

        let mut out = String::new();
        Disassembler::new(&program).disassemble(&mut out).unwrap();
        assert_eq!(
            out,
            ">0000: ENT  0\n 0001: IMM  7\n 0002: LEV\n; 3 data bytes, 2 global slots\n"
        );
    }
}
