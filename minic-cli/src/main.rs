//! Entrypoint for CLI
use std::{env, fs, time::Instant};

use log::{error, info};
use minic::prelude::*;

static USAGE: &str = r#"
usage: minic CMD FILE

commands:
    run     Compile and run the target source file
    dis     Compile the target source file and print its instructions

examples:
    minic run fib.c
    minic dis fib.c
"#;

fn load_program(filepath: &str) -> MinicResult<Program> {
    let source_code = fs::read_to_string(filepath)?;
    let program = compile(&source_code)?;
    Ok(program)
}

fn run_program(filepath: &str) -> MinicResult<i64> {
    let program = load_program(filepath)?;

    let mut vm = MinicVm::new(MinicConf::default());
    vm.load_program(&program)?;

    let start = Instant::now();
    let status = vm.execute()?;
    info!(
        "exit status {status} after {} cycles in {}ms",
        vm.cycles(),
        start.elapsed().as_nanos() as f64 / 1000000.0
    );

    Ok(status)
}

fn disassemble_program(filepath: &str) -> MinicResult<()> {
    let program = load_program(filepath)?;
    Disassembler::new(&program).print();
    Ok(())
}

fn main() {
    simple_logger::SimpleLogger::new().env().init().unwrap();

    match parse_args() {
        Some(Cmd::Run { filepath }) => match run_program(&filepath) {
            // The compiled program's exit value becomes the process
            // exit status, truncated the way a shell would see it.
            Ok(status) => std::process::exit(status as u8 as i32),
            Err(err) => {
                error!("{err}");
                std::process::exit(1)
            }
        },
        Some(Cmd::Dis { filepath }) => {
            if let Err(err) = disassemble_program(&filepath) {
                error!("{err}");
                std::process::exit(1)
            }
        }
        None => {
            print_usage();
            // FreeBSD EX_USAGE (64)
            std::process::exit(64)
        }
    }
}

fn parse_args() -> Option<Cmd> {
    let mut args = env::args().skip(1);
    match args.next() {
        Some(cmd) => match cmd.as_str() {
            "run" => Some(Cmd::Run { filepath: args.next()? }),
            "dis" => Some(Cmd::Dis { filepath: args.next()? }),
            _ => None,
        },
        None => None,
    }
}

fn print_usage() {
    println!("minic v{}", env!("CARGO_PKG_VERSION"));
    println!("{USAGE}");
}

enum Cmd {
    /// Compile and execute
    Run { filepath: String },
    /// Compile and list instructions
    Dis { filepath: String },
}
