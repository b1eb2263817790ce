use lua_core::{Closure, FrameId, LuaValue, Proto, Upvalue};
use std::collections::BTreeMap;
use std::rc::Rc;

/// A single activation record on the call stack.
///
/// The previous frame is the one below it on the stack.
pub(crate) struct Frame {
    pub id: FrameId,
    /// The function being executed; always a `Closure::Lua`.
    pub closure: Rc<Closure>,
    pub proto: Rc<Proto>,
    /// Register file; grows on demand, never shrinks.
    pub regs: Vec<LuaValue>,
    /// One past the last live register after a variable-result operation.
    pub top: usize,
    /// Index of the next instruction to fetch.
    pub pc: usize,
    /// Arguments beyond the fixed parameters, for vararg functions.
    pub varargs: Vec<LuaValue>,
    /// Registers captured by live closures, keyed by register index.
    pub open_upvalues: BTreeMap<usize, Upvalue>,
    /// Values handed back by `RETURN`.
    pub results: Vec<LuaValue>,
}

impl Frame {
    pub fn new(
        id: FrameId,
        closure: Rc<Closure>,
        proto: Rc<Proto>,
        mut args: Vec<LuaValue>,
        min_registers: usize,
    ) -> Self {
        let nparams = proto.num_params as usize;
        let varargs = if args.len() > nparams {
            let extra = args.split_off(nparams);
            if proto.is_vararg {
                extra
            } else {
                Vec::new()
            }
        } else {
            Vec::new()
        };
        let size = (proto.max_stack_size as usize).max(min_registers).max(nparams);
        let mut regs = args;
        regs.resize(size, LuaValue::Nil);
        Self {
            id,
            closure,
            proto,
            regs,
            top: nparams,
            pc: 0,
            varargs,
            open_upvalues: BTreeMap::new(),
            results: Vec::new(),
        }
    }

    /// Make sure registers `0..n` exist.
    pub fn ensure(&mut self, n: usize) {
        if self.regs.len() < n {
            self.regs.resize(n, LuaValue::Nil);
        }
    }

    pub fn get(&self, reg: usize) -> LuaValue {
        self.regs.get(reg).cloned().unwrap_or_default()
    }

    pub fn set(&mut self, reg: usize, val: LuaValue) {
        self.ensure(reg + 1);
        self.regs[reg] = val;
    }

    /// Copy `values` into registers starting at `base`.
    pub fn set_range(&mut self, base: usize, values: impl IntoIterator<Item = LuaValue>) {
        for (k, v) in values.into_iter().enumerate() {
            self.set(base + k, v);
        }
    }

    /// Upvalue `idx` of the executing closure.
    pub fn upvalue(&self, idx: usize) -> Option<&Upvalue> {
        self.closure.as_lua().and_then(|c| c.upvalues.get(idx))
    }

    /// The cell aliasing register `reg`, shared with any closure that
    /// already captured it.
    pub fn capture(&mut self, reg: usize) -> Upvalue {
        let id = self.id;
        self.open_upvalues
            .entry(reg)
            .or_insert_with(|| Upvalue::open(id, reg))
            .clone()
    }

    /// Close every open upvalue at or above register `from`.
    /// Returns how many cells were closed.
    pub fn close_upvalues(&mut self, from: usize) -> usize {
        let closing = self.open_upvalues.split_off(&from);
        for (reg, cell) in &closing {
            cell.close(self.get(*reg));
        }
        closing.len()
    }
}
