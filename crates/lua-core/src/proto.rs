//! Function templates.

use crate::instruction::Instruction;
use crate::value::LuaValue;
use std::rc::Rc;

// ── Function prototype ────────────────────────────────────────────────────────

/// A compiled function prototype, immutable once handed to the engine.
///
/// Every Lua function (main chunk or nested function) is described by a
/// `Proto`. Closures share a `Proto` via `Rc`; upvalue cells are per-instance.
#[derive(Debug, Default)]
pub struct Proto {
    /// Debug: chunk name used in error locations.
    pub source: String,
    pub line_defined: u32,
    pub last_line_defined: u32,
    /// Number of fixed parameters.
    pub num_params: u8,
    /// Whether the function accepts varargs (`...`).
    pub is_vararg: bool,
    /// Registers the function needs.
    pub max_stack_size: u8,
    /// Bytecode instructions.
    pub code: Vec<Instruction>,
    /// Constant pool (nil, booleans, numbers, strings).
    pub constants: Vec<LuaValue>,
    /// How to obtain each upvalue when the closure is instantiated.
    pub upvalues: Vec<UpvalueDesc>,
    /// Nested function prototypes referenced by `CLOSURE`.
    pub protos: Vec<Rc<Proto>>,
    /// Debug: source line of each instruction; may be empty.
    pub line_info: Vec<u32>,
}

impl Proto {
    /// Source line for the instruction at `pc`, falling back to `pc + 1`
    /// when the template carries no line information.
    pub fn line_at(&self, pc: usize) -> u32 {
        self.line_info
            .get(pc)
            .copied()
            .unwrap_or(pc as u32 + 1)
    }
}

// ── Upvalue descriptors ───────────────────────────────────────────────────────

/// Describes where to find an upvalue at closure instantiation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpvalueDesc {
    /// Capture the local at register `reg` in the **immediately enclosing** call frame.
    Stack(u8),
    /// Re-use upvalue at index `idx` from the **enclosing** closure.
    Upvalue(u8),
}

// ── Proto builder ─────────────────────────────────────────────────────────────

/// Mutable builder for a [`Proto`], for loaders and hand-assembled code.
#[derive(Debug, Default)]
pub struct ProtoBuilder {
    proto: Proto,
    line: u32,
}

impl ProtoBuilder {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            proto: Proto {
                source: source.into(),
                max_stack_size: 2,
                ..Proto::default()
            },
            line: 0,
        }
    }

    pub fn params(mut self, n: u8) -> Self {
        self.proto.num_params = n;
        self
    }

    pub fn vararg(mut self) -> Self {
        self.proto.is_vararg = true;
        self
    }

    pub fn max_stack(mut self, n: u8) -> Self {
        self.proto.max_stack_size = n;
        self
    }

    pub fn lines(mut self, defined: u32, last: u32) -> Self {
        self.proto.line_defined = defined;
        self.proto.last_line_defined = last;
        self
    }

    /// Source line attached to subsequently emitted instructions.
    pub fn set_line(&mut self, line: u32) {
        self.line = line;
    }

    /// Append an instruction and return its pc.
    pub fn emit(&mut self, inst: Instruction) -> usize {
        self.proto.code.push(inst);
        if self.line > 0 {
            self.proto.line_info.resize(self.proto.code.len() - 1, self.line);
            self.proto.line_info.push(self.line);
        }
        self.proto.code.len() - 1
    }

    /// Pc the next emitted instruction will get.
    pub fn pc(&self) -> usize {
        self.proto.code.len()
    }

    /// Overwrite an already emitted instruction (jump patching).
    pub fn patch(&mut self, pc: usize, inst: Instruction) {
        self.proto.code[pc] = inst;
    }

    /// Intern a constant and return its pool index. Integers and floats are
    /// kept apart even when numerically equal.
    pub fn constant(&mut self, value: impl Into<LuaValue>) -> u32 {
        let value = value.into();
        debug_assert!(
            !matches!(value, LuaValue::Table(_) | LuaValue::Function(_)),
            "tables and functions cannot be constants"
        );
        let same = |c: &LuaValue| {
            std::mem::discriminant(c) == std::mem::discriminant(&value)
                && match (c, &value) {
                    (LuaValue::Float(a), LuaValue::Float(b)) => a.to_bits() == b.to_bits(),
                    (a, b) => a == b,
                }
        };
        if let Some(idx) = self.proto.constants.iter().position(same) {
            return idx as u32;
        }
        self.proto.constants.push(value);
        (self.proto.constants.len() - 1) as u32
    }

    pub fn upvalue(&mut self, desc: UpvalueDesc) -> u8 {
        self.proto.upvalues.push(desc);
        (self.proto.upvalues.len() - 1) as u8
    }

    pub fn proto(&mut self, proto: impl Into<Rc<Proto>>) -> u32 {
        self.proto.protos.push(proto.into());
        (self.proto.protos.len() - 1) as u32
    }

    pub fn build(self) -> Proto {
        self.proto
    }

    pub fn finish(self) -> Rc<Proto> {
        Rc::new(self.build())
    }
}
