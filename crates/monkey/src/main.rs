use std::env;
use std::fs;
use std::io::{self, BufRead, Write};
use std::process;

use monkey_vm::{RunError, Session};

fn main() {
    let args: Vec<String> = env::args().collect();
    match args.len() {
        1 => run_repl(),
        2 => match fs::read_to_string(&args[1]) {
            Ok(source) => run_source(&source),
            Err(e) => {
                eprintln!("monkey: cannot read '{}': {}", args[1], e);
                process::exit(1);
            }
        },
        _ => {
            eprintln!("Usage: monkey [script.monkey]");
            process::exit(1);
        }
    }
}

/// One-arg mode: compile and run the whole file once against a fresh
/// session, per spec.md §6.
fn run_source(source: &str) {
    let mut session = Session::new();
    if let Err(e) = session.eval(source) {
        print_error(&e);
        process::exit(1);
    }
}

/// No-args mode: a line-oriented REPL that keeps one `Session` alive for
/// the whole process, so constants, globals and `let` bindings persist
/// across lines (spec.md §5). `quit` ends the session.
fn run_repl() {
    let mut session = Session::new();
    let stdin = io::stdin();
    loop {
        print!(">> ");
        io::stdout().flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                eprintln!("monkey: error reading input: {e}");
                break;
            }
        }

        let line = line.trim_end();
        if line == "quit" {
            break;
        }
        if line.is_empty() {
            continue;
        }

        match session.eval(line) {
            Ok(value) if value != "null" => println!("{value}"),
            Ok(_) => {}
            Err(e) => print_error(&e),
        }
    }
}

fn print_error(err: &RunError) {
    match err {
        RunError::Lex(e) => eprintln!("{e}"),
        RunError::Parse(e) => eprintln!("{e}"),
        RunError::Compile(e) => eprintln!("{e}"),
        RunError::Vm(e) => eprintln!("{e}"),
    }
}
