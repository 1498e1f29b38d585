use std::fmt;

/// Compiler error taxonomy: the first one raised aborts compilation, no
/// partial bytecode is returned.
#[derive(Debug, Clone, PartialEq)]
pub enum CompileError {
    UnknownOperator(String),
    UndefinedVariable(String),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::UnknownOperator(op) => write!(f, "[CompileError] unknown operator: {op}"),
            CompileError::UndefinedVariable(name) => {
                write!(f, "[CompileError] undefined variable {name}")
            }
        }
    }
}

impl std::error::Error for CompileError {}

pub type CompileResult<T> = Result<T, CompileError>;

/// VM error taxonomy. Fatal for the current run; distinct from an `Error`
/// object, which is an ordinary value that propagates through expression
/// evaluation rather than aborting the dispatch loop.
#[derive(Debug, Clone, PartialEq)]
pub enum VmError {
    StackOverflow,
    UnsupportedTypes(String),
    UnsupportedOperator(String),
    InvalidKey(String),
    CallNonFunction(String),
    CallWrongParams(String),
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmError::StackOverflow => write!(f, "[RuntimeError] stack overflow"),
            VmError::UnsupportedTypes(m) => write!(f, "[RuntimeError] {m}"),
            VmError::UnsupportedOperator(m) => write!(f, "[RuntimeError] {m}"),
            VmError::InvalidKey(m) => write!(f, "[RuntimeError] {m}"),
            VmError::CallNonFunction(m) => write!(f, "[RuntimeError] {m}"),
            VmError::CallWrongParams(m) => write!(f, "[RuntimeError] {m}"),
        }
    }
}

impl std::error::Error for VmError {}

pub type VmResult<T> = Result<T, VmError>;
