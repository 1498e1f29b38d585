//! AST → bytecode lowering. Walks the parser's `Program` once, emitting into
//! a stack of [`CompilationScope`]s (one per function body currently being
//! compiled) and resolving identifiers through a matching stack of
//! [`SymbolTable`]s. Constants (integers, strings, compiled functions) are
//! appended to a single pool shared with whatever [`Heap`] the caller hands
//! in — in REPL mode that heap, the constant pool and the symbol table all
//! outlive any one `Compiler` and are threaded back in via
//! [`Compiler::new_with_state`].

use std::cell::RefCell;
use std::rc::Rc;

use monkey_parser::ast::*;

use crate::code::{self, Instructions};
use crate::error::{CompileError, CompileResult};
use crate::gc::Heap;
use crate::object::{CompiledFunction, HeapData, Object};
use crate::opcode::Op;
use crate::symbol_table::SymbolTable;

/// The compiler's output: a flat instruction stream plus the constant pool
/// it indexes into. Cheap to clone — `instructions` is the only owned
/// buffer of any size and callers typically move it straight into a `Vm`.
#[derive(Debug, Clone)]
pub struct Bytecode {
    pub instructions: Instructions,
    pub constants: Vec<Object>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EmittedInstruction {
    opcode: Op,
    position: usize,
}

/// One nested function body under construction. `enter_scope`/`leave_scope`
/// push and pop these; the bottom of the stack is the top-level program.
#[derive(Default)]
struct CompilationScope {
    instructions: Instructions,
    last_instruction: Option<EmittedInstruction>,
    previous_instruction: Option<EmittedInstruction>,
}

pub struct Compiler {
    constants: Vec<Object>,
    symbol_table: SymbolTable,
    scopes: Vec<CompilationScope>,
    heap: Rc<RefCell<Heap>>,
}

impl Compiler {
    pub fn new(heap: Rc<RefCell<Heap>>) -> Self {
        let mut symbol_table = SymbolTable::new();
        for (i, name) in crate::builtins::NAMES.iter().enumerate() {
            symbol_table.define_builtin(i, name);
        }
        Compiler {
            constants: Vec::new(),
            symbol_table,
            scopes: vec![CompilationScope::default()],
            heap,
        }
    }

    /// REPL entry point: resumes compilation against a constant pool and
    /// symbol table left over from a previous compile/run cycle, so `let`
    /// bindings and prior literals stay visible across input lines.
    pub fn new_with_state(
        heap: Rc<RefCell<Heap>>,
        constants: Vec<Object>,
        symbol_table: SymbolTable,
    ) -> Self {
        Compiler { constants, symbol_table, scopes: vec![CompilationScope::default()], heap }
    }

    pub fn bytecode(self) -> Bytecode {
        Bytecode { instructions: self.current_instructions().clone(), constants: self.constants }
    }

    /// REPL variant of [`Compiler::bytecode`]: also hands back the symbol
    /// table, so the next line's compiler can resume with every `let`
    /// binding from this one still in scope.
    pub fn into_bytecode_and_symbols(self) -> (Bytecode, SymbolTable) {
        let instructions = self.current_instructions().clone();
        let Compiler { constants, symbol_table, .. } = self;
        (Bytecode { instructions, constants }, symbol_table)
    }

    // ── Program / statements ───────────────────────────────────────────

    pub fn compile_program(&mut self, program: &Program) -> CompileResult<()> {
        for statement in &program.statements {
            self.compile_statement(statement)?;
        }
        Ok(())
    }

    fn compile_block(&mut self, block: &Block) -> CompileResult<()> {
        for statement in &block.statements {
            self.compile_statement(statement)?;
        }
        Ok(())
    }

    fn compile_statement(&mut self, statement: &Statement) -> CompileResult<()> {
        match statement {
            Statement::Let { name, value, .. } => {
                // Defined before the value compiles so a recursive reference
                // to `name` inside a let-bound function body resolves.
                let symbol = self.symbol_table.define(name);
                self.compile_expression(value)?;
                match symbol.scope {
                    crate::symbol_table::SymbolScope::Global => {
                        self.emit(Op::SetGlobal, &[symbol.index]);
                    }
                    _ => {
                        self.emit(Op::SetLocal, &[symbol.index]);
                    }
                }
                Ok(())
            }
            Statement::Return { value, .. } => {
                self.compile_expression(value)?;
                self.emit(Op::ReturnValue, &[]);
                Ok(())
            }
            Statement::Expression { value, .. } => {
                self.compile_expression(value)?;
                self.emit(Op::Pop, &[]);
                Ok(())
            }
        }
    }

    // ── Expressions ─────────────────────────────────────────────────────

    fn compile_expression(&mut self, expression: &Expression) -> CompileResult<()> {
        match expression {
            Expression::IntegerLiteral(value) => {
                let index = self.add_constant(Object::Integer(*value));
                self.emit(Op::Constant, &[index]);
            }
            Expression::BooleanLiteral(true) => {
                self.emit(Op::True, &[]);
            }
            Expression::BooleanLiteral(false) => {
                self.emit(Op::False, &[]);
            }
            Expression::StringLiteral(value) => {
                let handle = self.heap.borrow_mut().alloc(HeapData::String(value.clone()));
                let object = Object::String(handle);
                self.heap.borrow_mut().set_constant_ref(object);
                let index = self.add_constant(object);
                self.emit(Op::Constant, &[index]);
            }
            Expression::Identifier(name) => {
                self.compile_identifier(name)?;
            }
            Expression::Prefix { operator, right } => {
                self.compile_expression(right)?;
                match operator.as_str() {
                    "!" => self.emit(Op::Bang, &[]),
                    "-" => self.emit(Op::Minus, &[]),
                    other => return Err(CompileError::UnknownOperator(other.to_string())),
                };
            }
            Expression::Infix { operator, left, right } => {
                // `<` is rewritten to `GreaterThan` with swapped operands;
                // the sole operator rewrite the compiler performs.
                if operator == "<" {
                    self.compile_expression(right)?;
                    self.compile_expression(left)?;
                    self.emit(Op::GreaterThan, &[]);
                    return Ok(());
                }
                self.compile_expression(left)?;
                self.compile_expression(right)?;
                match operator.as_str() {
                    "+" => self.emit(Op::Add, &[]),
                    "-" => self.emit(Op::Sub, &[]),
                    "*" => self.emit(Op::Mul, &[]),
                    "/" => self.emit(Op::Div, &[]),
                    "==" => self.emit(Op::Equal, &[]),
                    "!=" => self.emit(Op::NotEqual, &[]),
                    ">" => self.emit(Op::GreaterThan, &[]),
                    other => return Err(CompileError::UnknownOperator(other.to_string())),
                };
            }
            Expression::If { condition, consequence, alternative } => {
                self.compile_expression(condition)?;
                let jump_not_truthy_pos = self.emit(Op::JumpNotTruthy, &[9999]);

                self.compile_block(consequence)?;
                if self.last_instruction_is(Op::Pop) {
                    self.remove_last_pop();
                }

                let jump_pos = self.emit(Op::Jump, &[9999]);
                let after_consequence = self.current_instructions().len();
                self.change_operand(jump_not_truthy_pos, after_consequence);

                match alternative {
                    None => {
                        self.emit(Op::Null, &[]);
                    }
                    Some(alternative) => {
                        self.compile_block(alternative)?;
                        if self.last_instruction_is(Op::Pop) {
                            self.remove_last_pop();
                        }
                    }
                }
                let after_alternative = self.current_instructions().len();
                self.change_operand(jump_pos, after_alternative);
            }
            Expression::ArrayLiteral(elements) => {
                for element in elements {
                    self.compile_expression(element)?;
                }
                self.emit(Op::Array, &[elements.len()]);
            }
            Expression::HashLiteral(pairs) => {
                for (key, value) in pairs {
                    self.compile_expression(key)?;
                    self.compile_expression(value)?;
                }
                self.emit(Op::Hash, &[pairs.len() * 2]);
            }
            Expression::Index { left, index } => {
                self.compile_expression(left)?;
                self.compile_expression(index)?;
                self.emit(Op::Index, &[]);
            }
            Expression::FunctionLiteral { parameters, body, name } => {
                self.compile_function_literal(parameters, body, name.as_deref())?;
            }
            Expression::Call { function, arguments } => {
                self.compile_expression(function)?;
                for argument in arguments {
                    self.compile_expression(argument)?;
                }
                self.emit(Op::Call, &[arguments.len()]);
            }
        }
        Ok(())
    }

    fn compile_identifier(&mut self, name: &str) -> CompileResult<()> {
        let symbol = self
            .symbol_table
            .resolve(name)
            .ok_or_else(|| CompileError::UndefinedVariable(name.to_string()))?;
        self.load_symbol(&symbol);
        Ok(())
    }

    fn compile_function_literal(
        &mut self,
        parameters: &[String],
        body: &Block,
        name: Option<&str>,
    ) -> CompileResult<()> {
        self.enter_scope();

        if let Some(name) = name {
            self.symbol_table.define_function_name(name);
        }
        for parameter in parameters {
            self.symbol_table.define(parameter);
        }

        self.compile_block(body)?;

        if self.last_instruction_is(Op::Pop) {
            self.replace_last_pop_with_return();
        }
        if !self.last_instruction_is(Op::ReturnValue) {
            self.emit(Op::Return, &[]);
        }

        let free_symbols = self.symbol_table.free_symbols.clone();
        let num_locals = self.symbol_table.num_definitions;
        let instructions = self.leave_scope();

        // Free variables are loaded from the *enclosing* scope, in the
        // order they were promoted, so the closure op below can pop exactly
        // that many values off the stack.
        for free in &free_symbols {
            self.load_symbol(free);
        }

        let function = Object::CompiledFunction(self.heap.borrow_mut().alloc(
            HeapData::CompiledFunction(CompiledFunction {
                instructions,
                num_locals,
                num_parameters: parameters.len(),
            }),
        ));
        self.heap.borrow_mut().set_constant_ref(function);
        let index = self.add_constant(function);
        self.emit(Op::Closure, &[index, free_symbols.len()]);
        Ok(())
    }

    fn load_symbol(&mut self, symbol: &crate::symbol_table::Symbol) {
        use crate::symbol_table::SymbolScope;
        match symbol.scope {
            SymbolScope::Global => self.emit(Op::GetGlobal, &[symbol.index]),
            SymbolScope::Local => self.emit(Op::GetLocal, &[symbol.index]),
            SymbolScope::Builtin => self.emit(Op::GetBuiltin, &[symbol.index]),
            SymbolScope::Free => self.emit(Op::GetFree, &[symbol.index]),
            SymbolScope::Function => self.emit(Op::CurrentClosure, &[]),
        };
    }

    // ── Constant pool ───────────────────────────────────────────────────

    fn add_constant(&mut self, object: Object) -> usize {
        self.constants.push(object);
        self.constants.len() - 1
    }

    // ── Scope management ────────────────────────────────────────────────

    fn enter_scope(&mut self) {
        self.scopes.push(CompilationScope::default());
        let outer = std::mem::take(&mut self.symbol_table);
        self.symbol_table = SymbolTable::new_enclosed(outer);
    }

    fn leave_scope(&mut self) -> Instructions {
        let scope = self.scopes.pop().expect("leave_scope with no active scope");
        let outer = self.symbol_table.outer.take().expect("leave_scope outside a function");
        self.symbol_table = *outer;
        scope.instructions
    }

    fn current_scope(&mut self) -> &mut CompilationScope {
        self.scopes.last_mut().expect("compiler always has at least one scope")
    }

    fn current_instructions(&self) -> &Instructions {
        &self.scopes.last().expect("compiler always has at least one scope").instructions
    }

    // ── Emission ─────────────────────────────────────────────────────────

    fn emit(&mut self, op: Op, operands: &[usize]) -> usize {
        let instruction = code::make(op, operands);
        let position = self.current_instructions().len();
        let scope = self.current_scope();
        scope.instructions.extend(instruction);
        scope.previous_instruction = scope.last_instruction;
        scope.last_instruction = Some(EmittedInstruction { opcode: op, position });
        position
    }

    fn last_instruction_is(&self, op: Op) -> bool {
        match self.scopes.last().unwrap().last_instruction {
            Some(emitted) => emitted.opcode == op,
            None => false,
        }
    }

    fn remove_last_pop(&mut self) {
        let scope = self.current_scope();
        let last = scope.last_instruction.expect("remove_last_pop with no last instruction");
        scope.instructions.truncate(last.position);
        scope.last_instruction = scope.previous_instruction;
    }

    fn replace_last_pop_with_return(&mut self) {
        let scope = self.current_scope();
        let last =
            scope.last_instruction.expect("replace_last_pop_with_return with no last instruction");
        let new_instruction = code::make(Op::ReturnValue, &[]);
        scope.instructions[last.position..last.position + new_instruction.len()]
            .copy_from_slice(&new_instruction);
        scope.last_instruction =
            Some(EmittedInstruction { opcode: Op::ReturnValue, position: last.position });
    }

    fn replace_instruction(&mut self, position: usize, new_instruction: Instructions) {
        let scope = self.current_scope();
        scope.instructions[position..position + new_instruction.len()]
            .copy_from_slice(&new_instruction);
    }

    fn change_operand(&mut self, position: usize, operand: usize) {
        let op = Op::from_u8(self.current_instructions()[position])
            .expect("change_operand on a non-opcode byte");
        let new_instruction = code::make(op, &[operand]);
        self.replace_instruction(position, new_instruction);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use monkey_parser::parse;

    fn compile(source: &str) -> (Instructions, Vec<Object>, Rc<RefCell<Heap>>) {
        let (program, lex_errors, parse_errors) = parse(source);
        assert!(lex_errors.is_empty(), "{lex_errors:?}");
        assert!(parse_errors.is_empty(), "{parse_errors:?}");
        let heap = Rc::new(RefCell::new(Heap::new()));
        let mut compiler = Compiler::new(Rc::clone(&heap));
        compiler.compile_program(&program).expect("compile error");
        let bytecode = compiler.bytecode();
        (bytecode.instructions, bytecode.constants, heap)
    }

    fn concat(chunks: &[Instructions]) -> Instructions {
        chunks.iter().flatten().copied().collect()
    }

    #[test]
    fn integer_arithmetic_emits_constants_then_add_then_pop() {
        let (ins, constants, _heap) = compile("1 + 2");
        assert_eq!(constants, vec![Object::Integer(1), Object::Integer(2)]);
        let expected = concat(&[
            code::make(Op::Constant, &[0]),
            code::make(Op::Constant, &[1]),
            code::make(Op::Add, &[]),
            code::make(Op::Pop, &[]),
        ]);
        assert_eq!(ins, expected);
    }

    #[test]
    fn less_than_swaps_operands_and_emits_greater_than() {
        let (ins, constants, _heap) = compile("1 < 2");
        assert_eq!(constants, vec![Object::Integer(2), Object::Integer(1)]);
        let expected = concat(&[
            code::make(Op::Constant, &[0]),
            code::make(Op::Constant, &[1]),
            code::make(Op::GreaterThan, &[]),
            code::make(Op::Pop, &[]),
        ]);
        assert_eq!(ins, expected);
    }

    #[test]
    fn if_without_alternative_patches_both_jumps() {
        let (ins, _constants, _heap) = compile("if (true) { 10 }; 3333;");
        let expected = concat(&[
            code::make(Op::True, &[]),
            code::make(Op::JumpNotTruthy, &[10]),
            code::make(Op::Constant, &[0]),
            code::make(Op::Jump, &[11]),
            code::make(Op::Null, &[]),
            code::make(Op::Pop, &[]),
            code::make(Op::Constant, &[1]),
            code::make(Op::Pop, &[]),
        ]);
        assert_eq!(ins, expected);
    }

    #[test]
    fn let_bindings_use_global_slots_in_declaration_order() {
        let (ins, _constants, _heap) = compile("let one = 1; let two = one; two;");
        let expected = concat(&[
            code::make(Op::Constant, &[0]),
            code::make(Op::SetGlobal, &[0]),
            code::make(Op::GetGlobal, &[0]),
            code::make(Op::SetGlobal, &[1]),
            code::make(Op::GetGlobal, &[1]),
            code::make(Op::Pop, &[]),
        ]);
        assert_eq!(ins, expected);
    }

    #[test]
    fn string_literals_are_pooled_as_constants() {
        let (ins, constants, heap) = compile(r#""monkey""#);
        let Object::String(handle) = constants[0] else { panic!("expected a string constant") };
        assert_eq!(heap.borrow().get(handle), &HeapData::String("monkey".to_string()));
        assert_eq!(ins, concat(&[code::make(Op::Constant, &[0]), code::make(Op::Pop, &[])]));
    }

    #[test]
    fn nested_function_captures_outer_parameter_as_free_variable() {
        let (_ins, constants, heap) = compile("fn(a) { fn(b) { a + b } }");
        let Some(Object::CompiledFunction(outer_fn)) =
            constants.iter().copied().find(|c| matches!(c, Object::CompiledFunction(_)))
        else {
            panic!("expected a compiled function constant");
        };
        let heap_ref = heap.borrow();
        let HeapData::CompiledFunction(outer) = heap_ref.get(outer_fn) else { panic!() };
        assert!(code::disassemble(&outer.instructions).contains("OpGetFree 0"));
    }

    #[test]
    fn undefined_identifier_is_a_compile_error() {
        let (program, lex_errors, parse_errors) = parse("foobar;");
        assert!(lex_errors.is_empty());
        assert!(parse_errors.is_empty());
        let heap = Rc::new(RefCell::new(Heap::new()));
        let mut compiler = Compiler::new(heap);
        let err = compiler.compile_program(&program).unwrap_err();
        assert_eq!(err, CompileError::UndefinedVariable("foobar".to_string()));
    }
}
