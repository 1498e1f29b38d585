//! The tagged-variant value type shared by the compiler (constants) and the
//! VM (stack, globals, locals). Heap-backed variants carry a [`Handle`] into
//! a [`crate::gc::Heap`] rather than an owning pointer; see `gc.rs`.

use indexmap::IndexMap;

use crate::code::Instructions;
use crate::gc::Handle;

/// A Monkey value. `Integer`, `Boolean`, `Null` and `Builtin` are plain,
/// copyable tags — they own no heap storage and are invisible to the
/// collector. Every other variant points at a heap slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Object {
    Integer(i64),
    Boolean(bool),
    Null,
    String(Handle),
    ReturnValue(Handle),
    Error(Handle),
    Array(Handle),
    Hash(Handle),
    CompiledFunction(Handle),
    Closure(Handle),
    Builtin(usize),
}

impl Object {
    /// The heap slot this value points into, if any.
    pub fn handle(self) -> Option<Handle> {
        match self {
            Object::String(h)
            | Object::ReturnValue(h)
            | Object::Error(h)
            | Object::Array(h)
            | Object::Hash(h)
            | Object::CompiledFunction(h)
            | Object::Closure(h) => Some(h),
            Object::Integer(_) | Object::Boolean(_) | Object::Null | Object::Builtin(_) => None,
        }
    }

    pub fn type_name(self) -> &'static str {
        match self {
            Object::Integer(_) => "INTEGER",
            Object::Boolean(_) => "BOOLEAN",
            Object::Null => "NULL",
            Object::String(_) => "STRING",
            Object::ReturnValue(_) => "RETURN_VALUE",
            Object::Error(_) => "ERROR",
            Object::Array(_) => "ARRAY",
            Object::Hash(_) => "HASH",
            Object::CompiledFunction(_) => "COMPILED_FUNCTION_OBJ",
            Object::Closure(_) => "CLOSURE",
            Object::Builtin(_) => "BUILTIN",
        }
    }

    pub fn is_truthy(self) -> bool {
        match self {
            Object::Null => false,
            Object::Boolean(b) => b,
            _ => true,
        }
    }

    /// The key a hashable value contributes to a `Hash` object. Only
    /// `Integer`, `Boolean` and `String` are hashable.
    pub fn hash_key(self, heap: &crate::gc::Heap) -> Result<HashKey, String> {
        match self {
            Object::Integer(i) => Ok(HashKey::Integer(i)),
            Object::Boolean(b) => Ok(HashKey::Boolean(b)),
            Object::String(h) => match heap.get(h) {
                HeapData::String(s) => Ok(HashKey::String(s.clone())),
                _ => unreachable!("String handle must point at HeapData::String"),
            },
            other => Err(other.type_name().to_string()),
        }
    }

    /// The value's `inspect` rendering, used by `puts`, `printf` and the
    /// REPL's last-popped-value echo.
    pub fn inspect(self, heap: &crate::gc::Heap) -> String {
        match self {
            Object::Integer(i) => i.to_string(),
            Object::Boolean(b) => b.to_string(),
            Object::Null => "null".to_string(),
            Object::String(h) => match heap.get(h) {
                HeapData::String(s) => s.clone(),
                _ => unreachable!(),
            },
            Object::ReturnValue(h) => match heap.get(h) {
                HeapData::ReturnValue(inner) => inner.inspect(heap),
                _ => unreachable!(),
            },
            Object::Error(h) => match heap.get(h) {
                HeapData::Error(msg) => format!("ERROR: {msg}"),
                _ => unreachable!(),
            },
            Object::Array(h) => match heap.get(h) {
                HeapData::Array(elems) => {
                    let parts: Vec<String> = elems.iter().map(|e| e.inspect(heap)).collect();
                    format!("[{}]", parts.join(", "))
                }
                _ => unreachable!(),
            },
            Object::Hash(h) => match heap.get(h) {
                HeapData::Hash(pairs) => {
                    let parts: Vec<String> = pairs
                        .values()
                        .map(|(k, v)| format!("{}: {}", k.inspect(), v.inspect(heap)))
                        .collect();
                    format!("{{{}}}", parts.join(", "))
                }
                _ => unreachable!(),
            },
            Object::CompiledFunction(h) => format!("CompiledFunction[{}]", h.index()),
            Object::Closure(h) => format!("Closure[{}]", h.index()),
            Object::Builtin(_) => "builtin function".to_string(),
        }
    }
}

/// The key side of a `Hash` object's entries. Stores the actual scalar
/// content (not a `Handle`) so that two distinct string allocations with
/// equal contents compare equal as keys, matching Monkey's value semantics.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    Integer(i64),
    Boolean(bool),
    String(String),
}

impl HashKey {
    fn inspect(&self) -> String {
        match self {
            HashKey::Integer(i) => i.to_string(),
            HashKey::Boolean(b) => b.to_string(),
            HashKey::String(s) => s.clone(),
        }
    }
}

/// A compiled function body: its instructions and the frame shape the VM
/// must allocate when calling it.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFunction {
    pub instructions: Instructions,
    pub num_locals: usize,
    pub num_parameters: usize,
}

/// A function value paired with its captured free variables, in the order
/// the compiler promoted them.
#[derive(Debug, Clone, PartialEq)]
pub struct Closure {
    pub function: Handle,
    pub free: Vec<Object>,
}

/// The owned payload behind a heap-backed `Object` variant.
#[derive(Debug, Clone, PartialEq)]
pub enum HeapData {
    String(String),
    ReturnValue(Object),
    Error(String),
    Array(Vec<Object>),
    Hash(IndexMap<HashKey, (Object, Object)>),
    CompiledFunction(CompiledFunction),
    Closure(Closure),
}
