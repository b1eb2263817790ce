use crate::value::LuaValue;
use thiserror::Error;

/// Shorthand for results produced by the engine.
pub type LuaResult<T> = Result<T, LuaError>;

/// All faults that can occur while executing bytecode.
///
/// Every variant is a catchable condition: a fault unwinds through the Rust
/// call stack as an `Err` until a protected call (or the embedder) takes it.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LuaError {
    /// A runtime error with a plain message.
    #[error("{0}")]
    Runtime(String),

    /// A value raised by the `error` function; `pcall` hands it back untouched.
    #[error("{}", raised_message(.0))]
    Raised(LuaValue),

    /// Operand kind unsupported by an operation.
    #[error("attempt to {op} a {got} value")]
    TypeError { op: &'static str, got: &'static str },

    /// Ordering between two incompatible kinds.
    #[error("{}", compare_message(.lhs, .rhs))]
    Compare {
        lhs: &'static str,
        rhs: &'static str,
    },

    #[error("table index is nil")]
    NilIndex,

    #[error("table index is NaN")]
    NaNIndex,

    /// Bitwise operand is a float without an exact integer value.
    #[error("number has no integer representation")]
    NoIntegerRep,

    /// Unknown opcode, out-of-range operand or otherwise malformed code.
    #[error("malformed bytecode: {0}")]
    Bytecode(String),

    /// Call nesting exceeded the configured depth.
    #[error("stack overflow")]
    StackOverflow,

    /// Engine misuse by the embedder; never caused by script code.
    #[error("internal error: {0}")]
    Internal(String),

    /// A fault annotated with the frame it surfaced in.
    #[error("{chunk}:{line}: {source}")]
    Located {
        chunk: String,
        line: u32,
        source: Box<LuaError>,
    },
}

impl LuaError {
    /// Attach a source location, unless the fault already carries one or is a
    /// raised value (which must reach `pcall` unchanged).
    pub fn locate(self, chunk: &str, line: u32) -> Self {
        match self {
            LuaError::Located { .. } | LuaError::Raised(_) => self,
            other => LuaError::Located {
                chunk: chunk.to_owned(),
                line,
                source: Box::new(other),
            },
        }
    }

    /// The fault without its location wrapper.
    pub fn kind(&self) -> &LuaError {
        match self {
            LuaError::Located { source, .. } => source.kind(),
            other => other,
        }
    }

    /// The value a protected call reports for this fault.
    pub fn to_value(&self) -> LuaValue {
        match self {
            LuaError::Raised(v) => v.clone(),
            other => LuaValue::LuaString(other.to_string()),
        }
    }
}

fn raised_message(v: &LuaValue) -> String {
    match v {
        LuaValue::LuaString(s) => s.clone(),
        LuaValue::Integer(_) | LuaValue::Float(_) => v.to_string(),
        LuaValue::Nil => "nil".into(),
        other => format!("(error object is a {} value)", other.type_name()),
    }
}

fn compare_message(lhs: &str, rhs: &str) -> String {
    if lhs == rhs {
        format!("attempt to compare two {lhs} values")
    } else {
        format!("attempt to compare {lhs} with {rhs}")
    }
}
