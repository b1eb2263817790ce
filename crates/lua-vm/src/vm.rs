use crate::arith::{self, ArithOp};
use crate::compare;
use crate::config::VmConfig;
use crate::frame::Frame;
use crate::stdlib;
use lua_core::{
    Closure, FrameId, LuaClosure, LuaError, LuaResult, LuaTable, LuaValue, NativeFn,
    NativeFunction, Proto, State, TableRef, Upvalue, UpvalueState,
};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, trace, warn};

// ── VM ────────────────────────────────────────────────────────────────────────

/// Register-based virtual machine that executes Lua 5.3 bytecode.
///
/// Each Lua call runs in its own [`Frame`]; a `CALL` instruction recurses into
/// [`Vm::call_value`], so the Rust stack mirrors the Lua call stack.
pub struct Vm {
    frames: Vec<Frame>,
    globals: TableRef,
    /// Metatable shared by every non-table value.
    default_meta: TableRef,
    config: VmConfig,
    next_serial: u64,
    /// Host functions currently running, counted against the depth limit.
    native_depth: usize,
}

impl Vm {
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    pub fn with_config(config: VmConfig) -> Self {
        let mut vm = Vm {
            frames: Vec::new(),
            globals: Rc::new(RefCell::new(LuaTable::new())),
            default_meta: Rc::new(RefCell::new(LuaTable::new())),
            config,
            next_serial: 0,
            native_depth: 0,
        };
        if vm.config.open_base_lib {
            stdlib::open_base(&mut vm);
        }
        vm
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Number of frames currently on the call stack.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// The metatable consulted for strings, numbers, booleans and nil.
    pub fn default_metatable(&self) -> TableRef {
        self.default_meta.clone()
    }

    pub fn get_global(&self, name: &str) -> LuaValue {
        self.globals.borrow().get(&name.into())
    }

    pub fn set_global(&mut self, name: &str, val: LuaValue) -> LuaResult<()> {
        self.globals.borrow_mut().set(name.into(), val)
    }

    /// Call any value with `args`, honouring `__call` on non-functions.
    pub fn call_value(&mut self, func: LuaValue, mut args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
        match func {
            LuaValue::Function(c) => self.call_closure(c, args),
            other => match self.meta_field(&other, "__call") {
                LuaValue::Function(handler) => {
                    args.insert(0, other);
                    self.call_closure(handler, args)
                }
                _ => Err(LuaError::TypeError {
                    op: "call",
                    got: other.type_name(),
                }),
            },
        }
    }

    fn call_closure(&mut self, closure: Rc<Closure>, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
        if self.frames.len() + self.native_depth >= self.config.max_call_depth {
            return Err(LuaError::StackOverflow);
        }
        let proto = match &*closure {
            Closure::Native(native) => {
                let func = native.func.clone();
                self.native_depth += 1;
                let results = func(self, args);
                self.native_depth -= 1;
                return results;
            }
            Closure::Lua(lua) => lua.proto.clone(),
        };
        let depth = self.frames.len();
        self.push_frame(closure, proto, args);
        let outcome = self.execute();
        if let Err(e) = &outcome {
            warn!(depth, frames = self.frames.len() - depth, error = %e, "unwinding after fault");
        }
        let results = self.unwind_to(depth);
        outcome.map(|()| results)
    }

    // ── Frame management ──────────────────────────────────────────────────────

    fn push_frame(&mut self, closure: Rc<Closure>, proto: Rc<Proto>, args: Vec<LuaValue>) {
        self.next_serial += 1;
        let id = FrameId {
            depth: self.frames.len(),
            serial: self.next_serial,
        };
        debug!(depth = id.depth, source = %proto.source, nargs = args.len(), "push frame");
        self.frames
            .push(Frame::new(id, closure, proto, args, self.config.min_registers));
    }

    /// Pop frames until `depth` remain, closing their upvalues. Yields the
    /// results of the last frame popped.
    fn unwind_to(&mut self, depth: usize) -> Vec<LuaValue> {
        let mut results = Vec::new();
        while self.frames.len() > depth {
            if let Some(mut frame) = self.frames.pop() {
                let closed = frame.close_upvalues(0);
                debug!(depth = frame.id.depth, closed, "pop frame");
                results = std::mem::take(&mut frame.results);
            }
        }
        results
    }

    pub(crate) fn frame(&self) -> &Frame {
        let top = self.frames.len() - 1;
        &self.frames[top]
    }

    pub(crate) fn frame_mut(&mut self) -> &mut Frame {
        let top = self.frames.len() - 1;
        &mut self.frames[top]
    }

    // ── Core interpreter loop ─────────────────────────────────────────────────

    /// Run the top frame until its `RETURN`. Faults are located at the
    /// instruction that raised them.
    fn execute(&mut self) -> LuaResult<()> {
        loop {
            let frame = self.frame_mut();
            let pc = frame.pc;
            let Some(&inst) = frame.proto.code.get(pc) else {
                let err = LuaError::Bytecode(format!("pc {pc} past end of code"));
                return Err(self.locate(err, pc));
            };
            frame.pc += 1;
            let Some(op) = inst.opcode() else {
                let err = LuaError::Bytecode(format!("unknown opcode {}", inst.opcode_raw()));
                return Err(self.locate(err, pc));
            };
            trace!(pc, %inst, "exec");
            if let Err(e) = self.dispatch(op, inst) {
                return Err(self.locate(e, pc));
            }
            if op == lua_core::OpCode::Return {
                return Ok(());
            }
        }
    }

    fn locate(&self, err: LuaError, pc: usize) -> LuaError {
        let proto = &self.frame().proto;
        err.locate(&proto.source, proto.line_at(pc))
    }

    // ── Register access ───────────────────────────────────────────────────────

    pub(crate) fn reg(&self, r: usize) -> LuaValue {
        self.frame().get(r)
    }

    pub(crate) fn set_reg(&mut self, r: usize, val: LuaValue) {
        self.frame_mut().set(r, val);
    }

    pub(crate) fn constant(&self, idx: usize) -> LuaResult<LuaValue> {
        self.frame()
            .proto
            .constants
            .get(idx)
            .cloned()
            .ok_or_else(|| LuaError::Bytecode(format!("constant {idx} out of range")))
    }

    /// Decode an RK operand: a constant when the high bit is set, else a register.
    pub(crate) fn rk(&self, x: u32) -> LuaResult<LuaValue> {
        if lua_core::instruction::is_k(x) {
            self.constant(lua_core::instruction::index_k(x))
        } else {
            Ok(self.reg(x as usize))
        }
    }

    // ── Upvalue helpers ───────────────────────────────────────────────────────

    fn upvalue_cell(&self, idx: usize) -> LuaResult<Upvalue> {
        self.frame()
            .upvalue(idx)
            .cloned()
            .ok_or_else(|| LuaError::Bytecode(format!("upvalue {idx} out of range")))
    }

    pub(crate) fn upvalue_get(&self, idx: usize) -> LuaResult<LuaValue> {
        let cell = self.upvalue_cell(idx)?;
        let state = cell.0.borrow();
        Ok(match &*state {
            UpvalueState::Open { frame, reg } => self.frames[frame.depth].get(*reg),
            UpvalueState::Closed(v) => v.clone(),
        })
    }

    pub(crate) fn upvalue_set(&mut self, idx: usize, val: LuaValue) -> LuaResult<()> {
        let cell = self.upvalue_cell(idx)?;
        let target = match &*cell.0.borrow() {
            UpvalueState::Open { frame, reg } => Some((*frame, *reg)),
            UpvalueState::Closed(_) => None,
        };
        match target {
            // Frames close their cells when popped, so an open cell always
            // points at a live frame.
            Some((frame, reg)) => self.frames[frame.depth].set(reg, val),
            None => cell.close(val),
        }
        Ok(())
    }

    /// Upvalue cells for a closure over `proto` created in the current frame.
    pub(crate) fn capture_upvalues(&mut self, proto: &Proto) -> LuaResult<Vec<Upvalue>> {
        let frame = self.frame_mut();
        proto
            .upvalues
            .iter()
            .map(|desc| match *desc {
                lua_core::UpvalueDesc::Stack(reg) => Ok(frame.capture(reg as usize)),
                lua_core::UpvalueDesc::Upvalue(idx) => frame.upvalue(idx as usize).cloned().ok_or_else(
                    || LuaError::Bytecode(format!("enclosing upvalue {idx} out of range")),
                ),
            })
            .collect()
    }

    // ── Metamethods ───────────────────────────────────────────────────────────

    fn metatable_for(&self, v: &LuaValue) -> Option<TableRef> {
        match v {
            LuaValue::Table(t) => t.borrow().get_metatable(),
            _ => Some(self.default_meta.clone()),
        }
    }

    fn metamethod_of(&self, v: &LuaValue, event: &str) -> LuaValue {
        self.metatable_for(v)
            .map(|mt| mt.borrow().get(&event.into()))
            .unwrap_or_default()
    }

    /// Call the `event` handler of `a`, else of `b`. `None` when neither has one.
    fn binary_metamethod(&mut self, event: &str, a: &LuaValue, b: &LuaValue) -> LuaResult<Option<LuaValue>> {
        let mut mm = self.metamethod_of(a, event);
        if mm.is_nil() {
            mm = self.metamethod_of(b, event);
        }
        if mm.is_nil() {
            return Ok(None);
        }
        let results = self.call_value(mm, vec![a.clone(), b.clone()])?;
        Ok(Some(first(results)))
    }

    /// Arithmetic or bitwise `op`, falling back to the operand metamethods.
    pub(crate) fn arith(&mut self, op: ArithOp, a: &LuaValue, b: &LuaValue) -> LuaResult<LuaValue> {
        if let Some(v) = arith::arith(op, a, b)? {
            return Ok(v);
        }
        if let Some(v) = self.binary_metamethod(op.event(), a, b)? {
            return Ok(v);
        }
        let culprit = if a.to_float().is_none() { a } else { b };
        if op.is_bitwise() {
            if culprit.to_float().is_some() {
                return Err(LuaError::NoIntegerRep);
            }
            return Err(LuaError::TypeError {
                op: "perform bitwise operation on",
                got: culprit.type_name(),
            });
        }
        Err(LuaError::TypeError {
            op: "perform arithmetic on",
            got: culprit.type_name(),
        })
    }

    /// `a == b`, consulting `__eq` when both operands are tables or functions.
    pub(crate) fn equals(&mut self, a: &LuaValue, b: &LuaValue) -> LuaResult<bool> {
        if a == b {
            return Ok(true);
        }
        let by_reference = |v: &LuaValue| matches!(v, LuaValue::Table(_) | LuaValue::Function(_));
        if !(by_reference(a) && by_reference(b)) {
            return Ok(false);
        }
        Ok(self
            .binary_metamethod("__eq", a, b)?
            .is_some_and(|v| v.is_truthy()))
    }

    pub(crate) fn less_than(&mut self, a: &LuaValue, b: &LuaValue) -> LuaResult<bool> {
        if let Some(r) = compare::raw_lt(a, b) {
            return Ok(r);
        }
        match self.binary_metamethod("__lt", a, b)? {
            Some(v) => Ok(v.is_truthy()),
            None => Err(compare_error(a, b)),
        }
    }

    pub(crate) fn less_equal(&mut self, a: &LuaValue, b: &LuaValue) -> LuaResult<bool> {
        if let Some(r) = compare::raw_le(a, b) {
            return Ok(r);
        }
        if let Some(v) = self.binary_metamethod("__le", a, b)? {
            return Ok(v.is_truthy());
        }
        // a <= b  ==  not (b < a)
        match self.binary_metamethod("__lt", b, a)? {
            Some(v) => Ok(!v.is_truthy()),
            None => Err(compare_error(a, b)),
        }
    }

    /// `#v`: string byte length, then `__len`, then the table border.
    pub(crate) fn length(&mut self, v: &LuaValue) -> LuaResult<LuaValue> {
        if let LuaValue::LuaString(s) = v {
            return Ok(LuaValue::Integer(s.len() as i64));
        }
        let mm = self.metamethod_of(v, "__len");
        if !mm.is_nil() {
            return Ok(first(self.call_value(mm, vec![v.clone()])?));
        }
        match v {
            LuaValue::Table(t) => Ok(LuaValue::Integer(t.borrow().length())),
            other => Err(LuaError::TypeError {
                op: "get length of",
                got: other.type_name(),
            }),
        }
    }

    /// `a .. b` for strings and numbers, else `__concat`.
    pub(crate) fn concat(&mut self, a: &LuaValue, b: &LuaValue) -> LuaResult<LuaValue> {
        if let (Some(x), Some(y)) = (a.to_str_coerce(), b.to_str_coerce()) {
            return Ok(LuaValue::LuaString(x + &y));
        }
        if let Some(v) = self.binary_metamethod("__concat", a, b)? {
            return Ok(v);
        }
        let culprit = if a.to_str_coerce().is_none() { a } else { b };
        Err(LuaError::TypeError {
            op: "concatenate",
            got: culprit.type_name(),
        })
    }

    // ── Table access ──────────────────────────────────────────────────────────

    /// `obj[key]` with `__index`. A table handler gets a single raw lookup.
    pub(crate) fn get_table(&mut self, obj: &LuaValue, key: &LuaValue) -> LuaResult<LuaValue> {
        if let LuaValue::Table(t) = obj {
            let direct = t.borrow().get(key);
            if !direct.is_nil() {
                return Ok(direct);
            }
        }
        match self.metamethod_of(obj, "__index") {
            LuaValue::Nil if matches!(obj, LuaValue::Table(_)) => Ok(LuaValue::Nil),
            LuaValue::Table(fallback) => Ok(fallback.borrow().get(key)),
            LuaValue::Function(f) => Ok(first(self.call_closure(f, vec![obj.clone(), key.clone()])?)),
            _ => Err(LuaError::TypeError {
                op: "index",
                got: obj.type_name(),
            }),
        }
    }

    /// `obj[key] = val` with `__newindex`. A table handler is assigned
    /// through, which may trigger its own `__newindex`.
    pub(crate) fn set_table(&mut self, obj: LuaValue, key: LuaValue, val: LuaValue) -> LuaResult<()> {
        if let LuaValue::Table(t) = &obj {
            let present = !t.borrow().get(&key).is_nil();
            if present {
                return t.borrow_mut().set(key, val);
            }
        }
        match self.metamethod_of(&obj, "__newindex") {
            LuaValue::Nil => match &obj {
                LuaValue::Table(t) => t.borrow_mut().set(key, val),
                other => Err(LuaError::TypeError {
                    op: "index",
                    got: other.type_name(),
                }),
            },
            target @ LuaValue::Table(_) => self.set_table(target, key, val),
            LuaValue::Function(f) => self.call_closure(f, vec![obj, key, val]).map(|_| ()),
            _ => Err(LuaError::TypeError {
                op: "index",
                got: obj.type_name(),
            }),
        }
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

// ── Embedding API ─────────────────────────────────────────────────────────────

impl State for Vm {
    fn load(&mut self, proto: Rc<Proto>) {
        // The main chunk's first upvalue is its _ENV.
        let upvalues = (0..proto.upvalues.len())
            .map(|i| {
                if i == 0 {
                    Upvalue::closed(LuaValue::Table(self.globals.clone()))
                } else {
                    Upvalue::closed(LuaValue::Nil)
                }
            })
            .collect();
        debug!(source = %proto.source, instructions = proto.code.len(), "load chunk");
        let closure = Rc::new(Closure::Lua(LuaClosure::new(proto.clone(), upvalues)));
        self.push_frame(closure, proto, Vec::new());
    }

    fn register(&mut self, name: &str, func: NativeFn) {
        debug!(name, "register host function");
        let f = LuaValue::Function(Rc::new(Closure::Native(NativeFunction::new(name, func))));
        self.globals.borrow_mut().set_str(name, f);
    }

    fn run(&mut self) -> LuaResult<Vec<LuaValue>> {
        let Some(depth) = self.frames.len().checked_sub(1) else {
            return Err(LuaError::Internal("run called with no loaded chunk".into()));
        };
        let outcome = self.execute();
        if let Err(e) = &outcome {
            warn!(error = %e, "chunk failed");
        }
        let results = self.unwind_to(depth);
        outcome.map(|()| results)
    }

    fn call_by_param(&mut self, name: &str, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
        let func = self.get_global(name);
        if func.is_nil() {
            return Err(LuaError::Runtime(format!(
                "attempt to call a nil value (global '{name}')"
            )));
        }
        self.call_value(func, args)
    }

    fn call(&mut self, func: LuaValue, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
        self.call_value(func, args)
    }

    fn index(&mut self, obj: &LuaValue, key: &LuaValue) -> LuaResult<LuaValue> {
        self.get_table(obj, key)
    }

    fn globals(&self) -> TableRef {
        self.globals.clone()
    }

    fn metatable_of(&self, value: &LuaValue) -> Option<TableRef> {
        match value {
            LuaValue::Table(t) => t.borrow().get_metatable(),
            _ if self.default_meta.borrow().is_empty() => None,
            _ => Some(self.default_meta.clone()),
        }
    }

    fn meta_field(&self, value: &LuaValue, event: &str) -> LuaValue {
        self.metamethod_of(value, event)
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// First result of a call, or nil.
pub(crate) fn first(results: Vec<LuaValue>) -> LuaValue {
    results.into_iter().next().unwrap_or_default()
}

fn compare_error(a: &LuaValue, b: &LuaValue) -> LuaError {
    LuaError::Compare {
        lhs: a.type_name(),
        rhs: b.type_name(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
