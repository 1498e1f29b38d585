//! The stack-based executor. Consumes a [`Bytecode`] program, a shared
//! [`Heap`] and (in REPL mode) a globals array and constant pool carried
//! over from a previous run, and drives a straight dispatch loop over call
//! [`Frame`]s until the outermost frame's instructions are exhausted.

use std::cell::RefCell;
use std::rc::Rc;

use crate::code::{self, Instructions};
use crate::compiler::Bytecode;
use crate::error::{VmError, VmResult};
use crate::gc::Heap;
use crate::object::{Closure, CompiledFunction, HeapData, Object};
use crate::opcode::Op;

pub const STACK_SIZE: usize = 2048;
pub const GLOBALS_SIZE: usize = 65536;

/// A single call's instruction pointer and stack window. `ip` is
/// pre-incremented by the dispatch loop, so it starts one byte before the
/// first instruction. `base_pointer` is the stack slot of the frame's first
/// local/argument. `closure_handle` lets `OpCurrentClosure` push back the
/// exact closure this frame is executing, for self-referential recursion.
struct Frame {
    closure_handle: crate::gc::Handle,
    closure: Closure,
    function: CompiledFunction,
    ip: isize,
    base_pointer: usize,
}

impl Frame {
    fn new(
        closure_handle: crate::gc::Handle,
        closure: Closure,
        function: CompiledFunction,
        base_pointer: usize,
    ) -> Self {
        Frame { closure_handle, closure, function, ip: -1, base_pointer }
    }

    fn instructions(&self) -> &Instructions {
        &self.function.instructions
    }
}

pub struct Vm {
    heap: Rc<RefCell<Heap>>,
    constants: Vec<Object>,
    globals: Vec<Object>,
    stack: Vec<Object>,
    sp: usize,
    frames: Vec<Frame>,
    last_popped: Object,
}

impl Vm {
    /// Wraps `bytecode`'s top-level instructions as a synthetic
    /// zero-argument, zero-local function and pushes it as frame 0, per
    /// spec.md §4.4.
    pub fn new(heap: Rc<RefCell<Heap>>, bytecode: Bytecode) -> Self {
        Self::with_globals(heap, bytecode, vec![Object::Null; GLOBALS_SIZE])
    }

    /// REPL entry point: resumes against a globals array left over from a
    /// previous compile/run cycle.
    pub fn with_globals(heap: Rc<RefCell<Heap>>, bytecode: Bytecode, globals: Vec<Object>) -> Self {
        let main_fn = CompiledFunction {
            instructions: bytecode.instructions,
            num_locals: 0,
            num_parameters: 0,
        };
        let function_handle = heap.borrow_mut().alloc(HeapData::CompiledFunction(main_fn.clone()));
        let main_closure = Closure { function: function_handle, free: vec![] };
        let closure_handle = heap.borrow_mut().alloc(HeapData::Closure(main_closure.clone()));
        let frame = Frame::new(closure_handle, main_closure, main_fn, 0);
        Vm {
            heap,
            constants: bytecode.constants,
            globals,
            stack: vec![Object::Null; STACK_SIZE],
            sp: 0,
            frames: vec![frame],
            last_popped: Object::Null,
        }
    }

    pub fn into_globals(self) -> Vec<Object> {
        self.globals
    }

    /// The value of the last `Pop`ped stack slot, i.e. the result of the
    /// last top-level expression statement. Used by the REPL to echo a
    /// line's value.
    pub fn last_popped(&self) -> Object {
        self.last_popped
    }

    // ── Dispatch loop ────────────────────────────────────────────────────

    pub fn run(&mut self) -> VmResult<()> {
        while self.current_frame().ip < self.current_frame().instructions().len() as isize - 1 {
            self.current_frame_mut().ip += 1;
            let ip = self.current_frame().ip as usize;
            let ins = self.current_frame().instructions();
            let op = Op::from_u8(ins[ip]).expect("bytecode contains an unknown opcode");

            match op {
                Op::Constant => {
                    let idx = self.read_u16() as usize;
                    let value = self.constants[idx];
                    self.push(value)?;
                }
                Op::Pop => {
                    self.pop();
                }
                Op::Add | Op::Sub | Op::Mul | Op::Div => self.execute_binary_op(op)?,
                Op::True => self.push(Object::Boolean(true))?,
                Op::False => self.push(Object::Boolean(false))?,
                Op::Null => self.push(Object::Null)?,
                Op::Equal | Op::NotEqual | Op::GreaterThan => self.execute_comparison(op)?,
                Op::Minus => self.execute_minus()?,
                Op::Bang => self.execute_bang()?,
                Op::Jump => {
                    let target = self.read_u16();
                    self.current_frame_mut().ip = target as isize - 1;
                }
                Op::JumpNotTruthy => {
                    let target = self.read_u16();
                    let condition = self.pop();
                    if !condition.is_truthy() {
                        self.current_frame_mut().ip = target as isize - 1;
                    }
                }
                Op::SetGlobal => {
                    let idx = self.read_u16() as usize;
                    let value = self.pop();
                    if !matches!(self.globals[idx], Object::Null) {
                        self.heap.borrow_mut().clear_global_ref(self.globals[idx]);
                    }
                    self.globals[idx] = value;
                    self.heap.borrow_mut().set_global_ref(value);
                }
                Op::GetGlobal => {
                    let idx = self.read_u16() as usize;
                    let value = self.globals[idx];
                    self.push(value)?;
                }
                Op::Array => {
                    let n = self.read_u16() as usize;
                    let array = self.build_array(self.sp - n, self.sp);
                    self.discard_stack_refs(self.sp - n..self.sp);
                    self.sp -= n;
                    self.push(array)?;
                }
                Op::Hash => {
                    let n = self.read_u16() as usize;
                    let hash = self.build_hash(self.sp - n, self.sp)?;
                    self.discard_stack_refs(self.sp - n..self.sp);
                    self.sp -= n;
                    self.push(hash)?;
                }
                Op::Index => {
                    let index = self.pop();
                    let collection = self.pop();
                    let result = self.execute_index(collection, index)?;
                    self.push(result)?;
                }
                Op::Call => {
                    let argc = self.read_u8() as usize;
                    self.execute_call(argc)?;
                }
                Op::ReturnValue => {
                    let old_sp = self.sp;
                    let value = self.pop();
                    let frame = self.pop_frame();
                    self.discard_stack_refs(frame.base_pointer - 1..old_sp);
                    self.sp = frame.base_pointer - 1;
                    self.push(value)?;
                }
                Op::Return => {
                    let old_sp = self.sp;
                    let frame = self.pop_frame();
                    self.discard_stack_refs(frame.base_pointer - 1..old_sp);
                    self.sp = frame.base_pointer - 1;
                    self.push(Object::Null)?;
                }
                Op::GetLocal => {
                    let idx = self.read_u8() as usize;
                    let base = self.current_frame().base_pointer;
                    let value = self.stack[base + idx];
                    self.push(value)?;
                }
                Op::SetLocal => {
                    let idx = self.read_u8() as usize;
                    let base = self.current_frame().base_pointer;
                    let value = self.pop();
                    self.stack[base + idx] = value;
                }
                Op::GetBuiltin => {
                    let idx = self.read_u8() as usize;
                    self.push(Object::Builtin(idx))?;
                }
                Op::Closure => {
                    let const_idx = self.read_u16() as usize;
                    let num_free = self.read_u8() as usize;
                    self.push_closure(const_idx, num_free)?;
                }
                Op::GetFree => {
                    let idx = self.read_u8() as usize;
                    let value = self.current_frame().closure.free[idx];
                    self.push(value)?;
                }
                Op::CurrentClosure => {
                    let handle = self.current_frame().closure_handle;
                    self.push(Object::Closure(handle))?;
                }
            }
        }
        Ok(())
    }

    // ── Operand fetch ────────────────────────────────────────────────────

    fn read_u16(&mut self) -> u16 {
        let frame = self.current_frame_mut();
        let ip = frame.ip as usize;
        let value = code::read_u16(&frame.function.instructions[ip + 1..]);
        frame.ip += 2;
        value
    }

    fn read_u8(&mut self) -> u8 {
        let frame = self.current_frame_mut();
        let ip = frame.ip as usize;
        let value = code::read_u8(&frame.function.instructions[ip + 1..]);
        frame.ip += 1;
        value
    }

    // ── Stack ────────────────────────────────────────────────────────────

    fn push(&mut self, value: Object) -> VmResult<()> {
        if self.sp >= STACK_SIZE {
            return Err(VmError::StackOverflow);
        }
        self.stack[self.sp] = value;
        self.sp += 1;
        self.heap.borrow_mut().inc_stack_ref(value);
        Ok(())
    }

    fn pop(&mut self) -> Object {
        self.heap.borrow_mut().dec_stack_ref(self.last_popped);
        self.sp -= 1;
        let value = self.stack[self.sp];
        self.last_popped = value;
        value
    }

    fn current_frame(&self) -> &Frame {
        self.frames.last().expect("vm always has at least one frame")
    }

    fn current_frame_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("vm always has at least one frame")
    }

    fn pop_frame(&mut self) -> Frame {
        self.frames.pop().expect("vm always has at least one frame")
    }

    /// Releases the stack-ref GC bit for every value in `range`, for slots
    /// that are about to fall outside `sp` without passing through `pop()`
    /// one at a time — array/hash literal builds, frame returns and closure
    /// captures all discard several slots in one step.
    fn discard_stack_refs(&mut self, range: std::ops::Range<usize>) {
        for i in range {
            let value = self.stack[i];
            self.heap.borrow_mut().dec_stack_ref(value);
        }
    }

    // ── Arithmetic / comparison / unary ──────────────────────────────────

    fn execute_binary_op(&mut self, op: Op) -> VmResult<()> {
        let right = self.pop();
        let left = self.pop();
        match (left, right) {
            (Object::Integer(l), Object::Integer(r)) => {
                let result = match op {
                    Op::Add => l + r,
                    Op::Sub => l - r,
                    Op::Mul => l * r,
                    Op::Div => l / r,
                    _ => unreachable!(),
                };
                self.push(Object::Integer(result))
            }
            (Object::String(_), Object::String(_)) if op == Op::Add => {
                let concatenated = self.concat_strings(left, right);
                self.push(concatenated)
            }
            (Object::String(_), Object::String(_)) => Err(VmError::UnsupportedOperator(format!(
                "unknown string operator: {op}"
            ))),
            (l, r) => Err(VmError::UnsupportedTypes(format!(
                "unsupported types for binary operation: {} {}",
                l.type_name(),
                r.type_name()
            ))),
        }
    }

    fn concat_strings(&mut self, left: Object, right: Object) -> Object {
        let (Object::String(lh), Object::String(rh)) = (left, right) else {
            unreachable!("concat_strings called with non-string operands");
        };
        let mut heap = self.heap.borrow_mut();
        let concatenated = match (heap.get(lh), heap.get(rh)) {
            (HeapData::String(l), HeapData::String(r)) => format!("{l}{r}"),
            _ => unreachable!(),
        };
        Object::String(heap.alloc(HeapData::String(concatenated)))
    }

    fn execute_comparison(&mut self, op: Op) -> VmResult<()> {
        let right = self.pop();
        let left = self.pop();
        let result = match (left, right) {
            (Object::Integer(l), Object::Integer(r)) => match op {
                Op::Equal => l == r,
                Op::NotEqual => l != r,
                Op::GreaterThan => l > r,
                _ => unreachable!(),
            },
            (Object::Boolean(l), Object::Boolean(r)) => match op {
                Op::Equal => l == r,
                Op::NotEqual => l != r,
                _ => {
                    return Err(VmError::UnsupportedOperator(format!(
                        "unknown operator: {op} ({} {})",
                        left.type_name(),
                        right.type_name()
                    )))
                }
            },
            (l, r) => {
                return Err(VmError::UnsupportedTypes(format!(
                    "unsupported types for binary operation: {} {}",
                    l.type_name(),
                    r.type_name()
                )))
            }
        };
        self.push(Object::Boolean(result))
    }

    fn execute_minus(&mut self) -> VmResult<()> {
        let operand = self.pop();
        match operand {
            Object::Integer(i) => self.push(Object::Integer(-i)),
            other => Err(VmError::UnsupportedTypes(format!("unsupported type for negation: {}", other.type_name()))),
        }
    }

    fn execute_bang(&mut self) -> VmResult<()> {
        let operand = self.pop();
        let result = match operand {
            Object::Boolean(b) => !b,
            Object::Null => true,
            _ => false,
        };
        self.push(Object::Boolean(result))
    }

    // ── Arrays / hashes / indexing ───────────────────────────────────────

    fn build_array(&self, start: usize, end: usize) -> Object {
        let elements = self.stack[start..end].to_vec();
        Object::Array(self.heap.borrow_mut().alloc(HeapData::Array(elements)))
    }

    fn build_hash(&self, start: usize, end: usize) -> VmResult<Object> {
        let mut pairs = indexmap::IndexMap::new();
        let mut i = start;
        while i < end {
            let key = self.stack[i];
            let value = self.stack[i + 1];
            let heap = self.heap.borrow();
            let hash_key = key.hash_key(&heap).map_err(VmError::InvalidKey)?;
            drop(heap);
            pairs.insert(hash_key, (key, value));
            i += 2;
        }
        Ok(Object::Hash(self.heap.borrow_mut().alloc(HeapData::Hash(pairs))))
    }

    fn execute_index(&self, collection: Object, index: Object) -> VmResult<Object> {
        match (collection, index) {
            (Object::Array(h), Object::Integer(i)) => {
                let heap = self.heap.borrow();
                let HeapData::Array(elements) = heap.get(h) else { unreachable!() };
                if i < 0 || i as usize >= elements.len() {
                    Ok(Object::Null)
                } else {
                    Ok(elements[i as usize])
                }
            }
            (Object::Hash(h), key) => {
                let heap = self.heap.borrow();
                let hash_key = key.hash_key(&heap).map_err(VmError::InvalidKey)?;
                let HeapData::Hash(pairs) = heap.get(h) else { unreachable!() };
                Ok(pairs.get(&hash_key).map(|(_, v)| *v).unwrap_or(Object::Null))
            }
            (c, _i) => Err(VmError::UnsupportedTypes(format!("index operator not supported: {}", c.type_name()))),
        }
    }

    // ── Calls ─────────────────────────────────────────────────────────────

    fn execute_call(&mut self, argc: usize) -> VmResult<()> {
        let callee = self.stack[self.sp - 1 - argc];
        match callee {
            Object::Closure(handle) => self.call_closure(handle, argc),
            Object::Builtin(index) => self.call_builtin(index, argc),
            other => Err(VmError::CallNonFunction(format!(
                "calling non-function and non-built-in: {}",
                other.type_name()
            ))),
        }
    }

    fn call_closure(&mut self, handle: crate::gc::Handle, argc: usize) -> VmResult<()> {
        let (closure, function) = {
            let heap = self.heap.borrow();
            let HeapData::Closure(closure) = heap.get(handle) else {
                return Err(VmError::CallNonFunction("calling non-function and non-built-in: CLOSURE".into()));
            };
            let HeapData::CompiledFunction(function) = heap.get(closure.function) else {
                unreachable!("closure must reference a CompiledFunction");
            };
            (closure.clone(), function.clone())
        };
        if argc != function.num_parameters {
            return Err(VmError::CallWrongParams(format!(
                "wrong number of arguments: want={}, got={}",
                function.num_parameters, argc
            )));
        }
        let base_pointer = self.sp - argc;
        let new_sp = base_pointer + function.num_locals;
        // Slots above the arguments are the function's locals; zero them
        // rather than leaving a previous call's leftover stack content
        // behind, releasing whatever stack ref that leftover still held.
        self.discard_stack_refs(self.sp..new_sp);
        for slot in &mut self.stack[self.sp..new_sp] {
            *slot = Object::Null;
        }
        self.sp = new_sp;
        self.frames.push(Frame::new(handle, closure, function, base_pointer));
        Ok(())
    }

    fn call_builtin(&mut self, index: usize, argc: usize) -> VmResult<()> {
        let args: Vec<Object> = self.stack[self.sp - argc..self.sp].to_vec();
        self.discard_stack_refs(self.sp - argc - 1..self.sp);
        self.sp -= argc + 1;
        let result = crate::builtins::call(index, &args, &mut self.heap.borrow_mut());
        self.push(result)
    }

    // ── Closures ─────────────────────────────────────────────────────────

    fn push_closure(&mut self, const_idx: usize, num_free: usize) -> VmResult<()> {
        let Object::CompiledFunction(function_handle) = self.constants[const_idx] else {
            return Err(VmError::CallNonFunction(
                "calling non-function and non-built-in: not a compiled function".into(),
            ));
        };
        let free: Vec<Object> = self.stack[self.sp - num_free..self.sp].to_vec();
        self.discard_stack_refs(self.sp - num_free..self.sp);
        self.sp -= num_free;
        let closure = Closure { function: function_handle, free };
        let handle = self.heap.borrow_mut().alloc(HeapData::Closure(closure));
        self.push(Object::Closure(handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Compiler;
    use monkey_parser::parse;

    fn run(source: &str) -> (Object, Rc<RefCell<Heap>>) {
        let (program, lex_errors, parse_errors) = parse(source);
        assert!(lex_errors.is_empty(), "{lex_errors:?}");
        assert!(parse_errors.is_empty(), "{parse_errors:?}");
        let heap = Rc::new(RefCell::new(Heap::new()));
        let mut compiler = Compiler::new(Rc::clone(&heap));
        compiler.compile_program(&program).expect("compile error");
        let bytecode = compiler.bytecode();
        let mut vm = Vm::new(Rc::clone(&heap), bytecode);
        vm.run().expect("vm error");
        (vm.last_popped(), heap)
    }

    fn run_err(source: &str) -> VmError {
        let (program, lex_errors, parse_errors) = parse(source);
        assert!(lex_errors.is_empty());
        assert!(parse_errors.is_empty());
        let heap = Rc::new(RefCell::new(Heap::new()));
        let mut compiler = Compiler::new(Rc::clone(&heap));
        compiler.compile_program(&program).expect("compile error");
        let bytecode = compiler.bytecode();
        let mut vm = Vm::new(heap, bytecode);
        vm.run().unwrap_err()
    }

    #[test]
    fn arithmetic_precedence_matches_expected_integer() {
        let (result, _heap) = run("(5 + 10 * 2 + 15 / 3) * 2 + -10");
        assert_eq!(result, Object::Integer(50));
    }

    #[test]
    fn if_with_false_condition_and_no_alternative_yields_null() {
        let (result, _heap) = run("if (false) { 10 }");
        assert_eq!(result, Object::Null);
    }

    #[test]
    fn string_concatenation_chains_left_to_right() {
        let (result, heap) = run(r#""mon" + "key" + "banana""#);
        let Object::String(h) = result else { panic!("expected a string") };
        assert_eq!(heap.borrow().get(h), &HeapData::String("monkeybanana".to_string()));
    }

    #[test]
    fn hash_literal_indexes_back_to_its_value() {
        let (result, _heap) = run("{1: 2, 2: 3}[2]");
        assert_eq!(result, Object::Integer(3));
    }

    #[test]
    fn closures_over_function_calls_share_no_state() {
        let (result, _heap) = run("let f = fn(a, b) { a + b }; f(1, 2) + f(3, 4)");
        assert_eq!(result, Object::Integer(10));
    }

    #[test]
    fn nested_closure_captures_a_free_variable() {
        let (result, _heap) =
            run("let newAdder = fn(a, b) { let c = a + b; fn(d) { c + d } }; newAdder(1, 2)(8)");
        assert_eq!(result, Object::Integer(11));
    }

    #[test]
    fn recursive_let_bound_function_terminates_via_current_closure() {
        let (result, _heap) =
            run("let cd = fn(x) { if (x == 0) { 0 } else { cd(x - 1) } }; cd(1)");
        assert_eq!(result, Object::Integer(0));
    }

    #[test]
    fn calling_a_function_with_wrong_arity_is_a_call_error() {
        let err = run_err("fn(a) { a }()");
        assert_eq!(
            err,
            VmError::CallWrongParams("wrong number of arguments: want=1, got=0".to_string())
        );
    }

    #[test]
    fn builtin_misuse_is_an_ordinary_error_value_not_a_vm_error() {
        let (result, heap) = run("push(1, 1)");
        let Object::Error(h) = result else { panic!("expected an Error object, got {result:?}") };
        assert_eq!(
            heap.borrow().get(h),
            &HeapData::Error("argument to 'push' must be ARRAY, got INTEGER".to_string())
        );
    }

    #[test]
    fn array_index_out_of_range_is_null_not_an_error() {
        let (result, _heap) = run("[1, 2, 3][10]");
        assert_eq!(result, Object::Null);
    }

    #[test]
    fn hash_miss_is_null() {
        let (result, _heap) = run("{1: 2}[5]");
        assert_eq!(result, Object::Null);
    }
}
