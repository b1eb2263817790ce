//! Closure and upvalue types.

use crate::api::NativeFn;
use crate::proto::Proto;
use crate::value::LuaValue;
use std::cell::RefCell;
use std::rc::Rc;

// ── Closures ──────────────────────────────────────────────────────────────────

/// A callable value: either compiled bytecode bound to its upvalues, or a
/// host function. Never both.
pub enum Closure {
    Lua(LuaClosure),
    Native(NativeFunction),
}

impl Closure {
    pub fn as_lua(&self) -> Option<&LuaClosure> {
        match self {
            Closure::Lua(c) => Some(c),
            Closure::Native(_) => None,
        }
    }
}

impl std::fmt::Debug for Closure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Closure::Lua(c) => write!(
                f,
                "Closure::Lua({}, {} upvalues)",
                c.proto.source,
                c.upvalues.len()
            ),
            Closure::Native(n) => write!(f, "Closure::Native({})", n.name),
        }
    }
}

/// A runtime closure: a `Proto` paired with its captured upvalue cells.
pub struct LuaClosure {
    /// The compiled function body.
    pub proto: Rc<Proto>,
    /// Upvalue cells, one per `proto.upvalues` entry.
    pub upvalues: Vec<Upvalue>,
}

impl LuaClosure {
    pub fn new(proto: Rc<Proto>, upvalues: Vec<Upvalue>) -> Self {
        Self { proto, upvalues }
    }
}

/// A host function registered with the engine.
pub struct NativeFunction {
    /// Name used in diagnostics.
    pub name: String,
    pub func: NativeFn,
}

impl NativeFunction {
    pub fn new(name: impl Into<String>, func: NativeFn) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

// ── Upvalue cells ─────────────────────────────────────────────────────────────

/// Stable handle to a call frame: its depth on the call stack plus the serial
/// number it was created with, so a stale handle can be told apart from a
/// newer frame at the same depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameId {
    pub depth: usize,
    pub serial: u64,
}

/// A shared, mutable upvalue cell.
///
/// While the captured local is still live (`Open`), the cell names the frame
/// and register holding it. When that frame is popped, or the local's scope
/// ends, the runtime copies the value into the cell (`Closed`).
#[derive(Debug, Clone)]
pub struct Upvalue(pub Rc<RefCell<UpvalueState>>);

impl Upvalue {
    /// Create an open upvalue aliasing register `reg` of `frame`.
    pub fn open(frame: FrameId, reg: usize) -> Self {
        Self(Rc::new(RefCell::new(UpvalueState::Open { frame, reg })))
    }

    /// Create a closed upvalue owning `val`.
    pub fn closed(val: LuaValue) -> Self {
        Self(Rc::new(RefCell::new(UpvalueState::Closed(val))))
    }

    /// Detach from the frame, taking ownership of the register's final value.
    pub fn close(&self, val: LuaValue) {
        *self.0.borrow_mut() = UpvalueState::Closed(val);
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.0.borrow(), UpvalueState::Open { .. })
    }

    pub fn ptr_eq(&self, other: &Upvalue) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// Interior state of an upvalue cell.
#[derive(Debug, Clone)]
pub enum UpvalueState {
    /// The value lives in register `reg` of a frame still on the call stack.
    Open { frame: FrameId, reg: usize },
    /// The frame exited; the value was migrated here.
    Closed(LuaValue),
}
