//! Bytecode compiler, object model/GC and virtual machine for the Monkey
//! language. [`run`] is the one-shot entry point a file-running CLI wants;
//! [`Session`] is the REPL entry point, carrying the constant pool, symbol
//! table and globals forward across successive [`Session::eval`] calls per
//! spec.md §5.

pub mod builtins;
pub mod code;
pub mod compiler;
pub mod error;
pub mod gc;
pub mod object;
pub mod opcode;
pub mod symbol_table;
pub mod vm;

use std::cell::RefCell;
use std::rc::Rc;

pub use compiler::{Bytecode, Compiler};
pub use error::{CompileError, CompileResult, VmError, VmResult};
pub use gc::{Handle, Heap};
pub use object::Object;
pub use symbol_table::SymbolTable;
pub use vm::Vm;

/// Any of the three disjoint taxonomies from spec.md §7 can end a
/// compile/run cycle; a `RunError` carries no partial bytecode or value
/// back to the caller regardless of which stage raised it.
#[derive(Debug, Clone, PartialEq)]
pub enum RunError {
    Lex(monkey_lexer::LexError),
    Parse(monkey_parser::ParseError),
    Compile(CompileError),
    Vm(VmError),
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunError::Lex(e) => write!(f, "{e}"),
            RunError::Parse(e) => write!(f, "{e}"),
            RunError::Compile(e) => write!(f, "{e}"),
            RunError::Vm(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for RunError {}

/// Compiles and runs `source` once against a fresh heap, constant pool and
/// symbol table. Returns the last popped value's `inspect` rendering.
pub fn run(source: &str) -> Result<String, RunError> {
    let (program, lex_errors, parse_errors) = monkey_parser::parse(source);
    if let Some(e) = lex_errors.into_iter().next() {
        return Err(RunError::Lex(e));
    }
    if let Some(e) = parse_errors.into_iter().next() {
        return Err(RunError::Parse(e));
    }

    let heap = Rc::new(RefCell::new(Heap::new()));
    let mut compiler = Compiler::new(Rc::clone(&heap));
    compiler.compile_program(&program).map_err(RunError::Compile)?;
    let bytecode = compiler.bytecode();

    let mut vm = Vm::new(Rc::clone(&heap), bytecode);
    vm.run().map_err(RunError::Vm)?;
    let result = vm.last_popped().inspect(&heap.borrow());
    heap.borrow_mut().collect();
    Ok(result)
}

/// A REPL session: one [`Heap`], constant pool and [`SymbolTable`] shared
/// across every line, matching the "may be shared across successive
/// compile/run cycles" contract of spec.md §5. Each [`Session::eval`] call
/// compiles and runs exactly one line's worth of source against this
/// carried-forward state.
pub struct Session {
    heap: Rc<RefCell<Heap>>,
    constants: Vec<Object>,
    symbol_table: SymbolTable,
    globals: Vec<Object>,
}

impl Session {
    pub fn new() -> Self {
        Session {
            heap: Rc::new(RefCell::new(Heap::new())),
            constants: Vec::new(),
            symbol_table: SymbolTable::new(),
            globals: vec![Object::Null; vm::GLOBALS_SIZE],
        }
    }

    /// Compiles and runs one line, threading the constant pool, symbol
    /// table and globals through to the next call. On a compile error the
    /// session's carried-forward state is left exactly as it was, so a bad
    /// line doesn't corrupt subsequent ones. A runtime error still advances
    /// the constant pool and symbol table (the line did compile) but the
    /// globals array is restored to its pre-line snapshot, since a
    /// half-executed line may have mutated only some of its `let`s.
    pub fn eval(&mut self, source: &str) -> Result<String, RunError> {
        let (program, lex_errors, parse_errors) = monkey_parser::parse(source);
        if let Some(e) = lex_errors.into_iter().next() {
            return Err(RunError::Lex(e));
        }
        if let Some(e) = parse_errors.into_iter().next() {
            return Err(RunError::Parse(e));
        }

        let symbol_table = std::mem::take(&mut self.symbol_table);
        let mut compiler =
            Compiler::new_with_state(Rc::clone(&self.heap), self.constants.clone(), symbol_table);
        let compile_result = compiler.compile_program(&program);
        let (bytecode, symbol_table) = compiler.into_bytecode_and_symbols();
        // Any `define`s that happened before the failing expression stay
        // visible to the next line, matching a REPL's incremental feel.
        self.symbol_table = symbol_table;
        if let Err(e) = compile_result {
            return Err(RunError::Compile(e));
        }
        self.constants = bytecode.constants.clone();

        let globals_snapshot = self.globals.clone();
        let mut vm = Vm::with_globals(Rc::clone(&self.heap), bytecode, std::mem::take(&mut self.globals));
        match vm.run() {
            Ok(()) => {
                let value = vm.last_popped().inspect(&self.heap.borrow());
                self.globals = vm.into_globals();
                self.heap.borrow_mut().collect();
                Ok(value)
            }
            Err(e) => {
                self.globals = globals_snapshot;
                Err(RunError::Vm(e))
            }
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
