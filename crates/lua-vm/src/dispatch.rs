//! One handler per opcode.
//!
//! Register operands are frame-relative. `RK` operands name a constant when
//! their high bit is set. After a handler returns, the frame's `pc` already
//! points at the following instruction, so jumps are relative to it.

use crate::arith::ArithOp;
use crate::vm::Vm;
use lua_core::instruction::{fb2int, LFIELDS_PER_FLUSH};
use lua_core::{
    Closure, Instruction, LuaClosure, LuaError, LuaResult, LuaTable, LuaValue, OpCode,
};
use std::cell::RefCell;
use std::rc::Rc;

impl Vm {
    pub(crate) fn dispatch(&mut self, op: OpCode, i: Instruction) -> LuaResult<()> {
        match op {
            // ── Loads ─────────────────────────────────────────────────────────
            OpCode::Move => {
                let (a, b, _) = i.abc();
                let v = self.reg(b as usize);
                self.set_reg(a, v);
            }
            OpCode::LoadK => {
                let (a, bx) = i.abx();
                let v = self.constant(bx as usize)?;
                self.set_reg(a, v);
            }
            OpCode::LoadKx => {
                let a = i.a();
                let ax = self.fetch_extra_arg()?;
                let v = self.constant(ax as usize)?;
                self.set_reg(a, v);
            }
            OpCode::LoadBool => {
                let (a, b, c) = i.abc();
                self.set_reg(a, LuaValue::Boolean(b != 0));
                if c != 0 {
                    self.skip();
                }
            }
            OpCode::LoadNil => {
                let (a, b, _) = i.abc();
                for r in a..=a + b as usize {
                    self.set_reg(r, LuaValue::Nil);
                }
            }

            // ── Upvalues ──────────────────────────────────────────────────────
            OpCode::GetUpval => {
                let (a, b, _) = i.abc();
                let v = self.upvalue_get(b as usize)?;
                self.set_reg(a, v);
            }
            OpCode::SetUpval => {
                let (a, b, _) = i.abc();
                let v = self.reg(a);
                self.upvalue_set(b as usize, v)?;
            }
            OpCode::GetTabUp => {
                let (a, b, c) = i.abc();
                let t = self.upvalue_get(b as usize)?;
                let key = self.rk(c)?;
                let v = self.get_table(&t, &key)?;
                self.set_reg(a, v);
            }
            OpCode::SetTabUp => {
                let (a, b, c) = i.abc();
                let t = self.upvalue_get(a)?;
                let key = self.rk(b)?;
                let v = self.rk(c)?;
                self.set_table(t, key, v)?;
            }

            // ── Tables ────────────────────────────────────────────────────────
            OpCode::GetTable => {
                let (a, b, c) = i.abc();
                let t = self.reg(b as usize);
                let key = self.rk(c)?;
                let v = self.get_table(&t, &key)?;
                self.set_reg(a, v);
            }
            OpCode::SetTable => {
                let (a, b, c) = i.abc();
                let t = self.reg(a);
                let key = self.rk(b)?;
                let v = self.rk(c)?;
                self.set_table(t, key, v)?;
            }
            OpCode::NewTable => {
                let (a, b, c) = i.abc();
                let t = LuaTable::with_capacity(fb2int(b), fb2int(c));
                self.set_reg(a, LuaValue::Table(Rc::new(RefCell::new(t))));
            }
            OpCode::SelfOp => {
                let (a, b, c) = i.abc();
                let obj = self.reg(b as usize);
                let key = self.rk(c)?;
                self.set_reg(a + 1, obj.clone());
                let method = self.get_table(&obj, &key)?;
                self.set_reg(a, method);
            }
            OpCode::SetList => self.op_setlist(i)?,

            // ── Arithmetic ────────────────────────────────────────────────────
            OpCode::Add => self.binary_arith(i, ArithOp::Add)?,
            OpCode::Sub => self.binary_arith(i, ArithOp::Sub)?,
            OpCode::Mul => self.binary_arith(i, ArithOp::Mul)?,
            OpCode::Mod => self.binary_arith(i, ArithOp::Mod)?,
            OpCode::Pow => self.binary_arith(i, ArithOp::Pow)?,
            OpCode::Div => self.binary_arith(i, ArithOp::Div)?,
            OpCode::IDiv => self.binary_arith(i, ArithOp::IDiv)?,
            OpCode::BAnd => self.binary_arith(i, ArithOp::BAnd)?,
            OpCode::BOr => self.binary_arith(i, ArithOp::BOr)?,
            OpCode::BXor => self.binary_arith(i, ArithOp::BXor)?,
            OpCode::Shl => self.binary_arith(i, ArithOp::Shl)?,
            OpCode::Shr => self.binary_arith(i, ArithOp::Shr)?,
            OpCode::Unm => self.unary_arith(i, ArithOp::Unm)?,
            OpCode::BNot => self.unary_arith(i, ArithOp::BNot)?,
            OpCode::Not => {
                let (a, b, _) = i.abc();
                let v = self.reg(b as usize);
                self.set_reg(a, LuaValue::Boolean(!v.is_truthy()));
            }
            OpCode::Len => {
                let (a, b, _) = i.abc();
                let v = self.reg(b as usize);
                let n = self.length(&v)?;
                self.set_reg(a, n);
            }
            OpCode::Concat => {
                let (a, b, c) = i.abc();
                let mut acc = self.reg(c as usize);
                for r in (b as usize..c as usize).rev() {
                    let lhs = self.reg(r);
                    acc = self.concat(&lhs, &acc)?;
                }
                self.set_reg(a, acc);
            }

            // ── Comparison and tests ──────────────────────────────────────────
            OpCode::Eq | OpCode::Lt | OpCode::Le => {
                let (a, b, c) = i.abc();
                let lhs = self.rk(b)?;
                let rhs = self.rk(c)?;
                let result = match op {
                    OpCode::Eq => self.equals(&lhs, &rhs)?,
                    OpCode::Lt => self.less_than(&lhs, &rhs)?,
                    _ => self.less_equal(&lhs, &rhs)?,
                };
                if result != (a != 0) {
                    self.skip();
                }
            }
            OpCode::Test => {
                let (a, _, c) = i.abc();
                if self.reg(a).is_truthy() != (c != 0) {
                    self.skip();
                }
            }
            OpCode::TestSet => {
                let (a, b, c) = i.abc();
                let v = self.reg(b as usize);
                if v.is_truthy() == (c != 0) {
                    self.set_reg(a, v);
                } else {
                    self.skip();
                }
            }

            // ── Control flow ──────────────────────────────────────────────────
            OpCode::Jmp => {
                let (a, sbx) = i.asbx();
                self.jump(sbx);
                if a != 0 {
                    self.frame_mut().close_upvalues(a - 1);
                }
            }
            OpCode::ForPrep => self.op_forprep(i)?,
            OpCode::ForLoop => self.op_forloop(i)?,
            OpCode::TForCall => {
                let (a, _, c) = i.abc();
                let func = self.reg(a);
                let args = vec![self.reg(a + 1), self.reg(a + 2)];
                let results = self.call_value(func, args)?;
                self.store_results(a + 3, c as usize + 1, results);
            }
            OpCode::TForLoop => {
                let (a, sbx) = i.asbx();
                let control = self.reg(a + 1);
                if !control.is_nil() {
                    self.set_reg(a, control);
                    self.jump(sbx);
                }
            }

            // ── Function calls ────────────────────────────────────────────────
            // Tail calls run as ordinary calls followed by the RETURN the
            // compiler always emits after them.
            OpCode::Call | OpCode::TailCall => {
                let (a, b, c) = i.abc();
                let func = self.reg(a);
                let args = self.collect_args(a + 1, b);
                let results = self.call_value(func, args)?;
                self.store_results(a, c as usize, results);
            }
            OpCode::Return => {
                let (a, b, _) = i.abc();
                let frame = self.frame_mut();
                let end = if b == 0 { frame.top } else { a + b as usize - 1 };
                let results = (a..end).map(|r| frame.get(r)).collect();
                frame.results = results;
            }
            OpCode::Closure => {
                let (a, bx) = i.abx();
                let proto = self
                    .frame()
                    .proto
                    .protos
                    .get(bx as usize)
                    .cloned()
                    .ok_or_else(|| LuaError::Bytecode(format!("prototype {bx} out of range")))?;
                let upvalues = self.capture_upvalues(&proto)?;
                let closure = Closure::Lua(LuaClosure::new(proto, upvalues));
                self.set_reg(a, LuaValue::Function(Rc::new(closure)));
            }
            OpCode::VarArg => {
                let (a, b, _) = i.abc();
                let frame = self.frame_mut();
                let n = if b == 0 { frame.varargs.len() } else { b as usize - 1 };
                let values: Vec<LuaValue> = (0..n)
                    .map(|k| frame.varargs.get(k).cloned().unwrap_or_default())
                    .collect();
                frame.set_range(a, values);
                if b == 0 {
                    frame.top = a + n;
                }
            }
            OpCode::ExtraArg => {
                return Err(LuaError::Bytecode("EXTRAARG without a preceding opcode".into()));
            }
        }
        Ok(())
    }

    // ── Operand helpers ───────────────────────────────────────────────────────

    /// Skip the next instruction.
    fn skip(&mut self) {
        self.frame_mut().pc += 1;
    }

    fn jump(&mut self, sbx: i32) {
        let frame = self.frame_mut();
        frame.pc = (frame.pc as i64 + sbx as i64) as usize;
    }

    /// Consume the `EXTRAARG` that must follow the current instruction.
    fn fetch_extra_arg(&mut self) -> LuaResult<u32> {
        let frame = self.frame_mut();
        let next = frame.proto.code.get(frame.pc).copied();
        match next {
            Some(inst) if inst.opcode() == Some(OpCode::ExtraArg) => {
                frame.pc += 1;
                Ok(inst.ax())
            }
            _ => Err(LuaError::Bytecode("expected EXTRAARG".into())),
        }
    }

    /// Arguments in registers `base..`: `b - 1` of them, or up to `top` when
    /// `b` is zero.
    fn collect_args(&self, base: usize, b: u32) -> Vec<LuaValue> {
        let frame = self.frame();
        let end = if b == 0 { frame.top } else { base + b as usize - 1 };
        (base..end).map(|r| frame.get(r)).collect()
    }

    /// Place call results at `base`. `want == 0` keeps them all and moves `top`
    /// past the last; otherwise exactly `want - 1` are stored, padded with nil.
    fn store_results(&mut self, base: usize, want: usize, results: Vec<LuaValue>) {
        let frame = self.frame_mut();
        if want == 0 {
            frame.top = base + results.len();
            frame.set_range(base, results);
        } else {
            let n = want - 1;
            let padded = results.into_iter().chain(std::iter::repeat(LuaValue::Nil)).take(n);
            frame.set_range(base, padded);
            frame.top = base + n;
        }
    }

    fn binary_arith(&mut self, i: Instruction, op: ArithOp) -> LuaResult<()> {
        let (a, b, c) = i.abc();
        let lhs = self.rk(b)?;
        let rhs = self.rk(c)?;
        let v = self.arith(op, &lhs, &rhs)?;
        self.set_reg(a, v);
        Ok(())
    }

    fn unary_arith(&mut self, i: Instruction, op: ArithOp) -> LuaResult<()> {
        let (a, b, _) = i.abc();
        let operand = self.reg(b as usize);
        let v = self.arith(op, &operand, &operand)?;
        self.set_reg(a, v);
        Ok(())
    }

    // ── Table construction ────────────────────────────────────────────────────

    fn op_setlist(&mut self, i: Instruction) -> LuaResult<()> {
        let (a, b, c) = i.abc();
        // Batches count from 1 in both C and the EXTRAARG word.
        let batch = match c {
            0 => match self.fetch_extra_arg()?.checked_sub(1) {
                Some(n) => n as usize,
                None => return Err(LuaError::Bytecode("SETLIST batch 0".into())),
            },
            c => c as usize - 1,
        };
        let frame = self.frame();
        let n = if b == 0 {
            frame.top.saturating_sub(a + 1)
        } else {
            b as usize
        };
        let LuaValue::Table(t) = frame.get(a) else {
            return Err(LuaError::Bytecode("SETLIST target is not a table".into()));
        };
        let values: Vec<LuaValue> = (1..=n).map(|j| frame.get(a + j)).collect();
        let base = batch * LFIELDS_PER_FLUSH;
        let mut t = t.borrow_mut();
        for (j, v) in values.into_iter().enumerate() {
            t.set_int((base + j + 1) as i64, v);
        }
        Ok(())
    }

    // ── Numeric for ───────────────────────────────────────────────────────────

    /// Prepare `R(A)`..`R(A+2)` (index, limit, step) and jump to the loop test.
    /// The loop is integral when the initial value and step are integers; its
    /// limit slot then holds the number of iterations left, so the index
    /// never has to step past the limit.
    fn op_forprep(&mut self, i: Instruction) -> LuaResult<()> {
        let (a, sbx) = i.asbx();
        let init = self.reg(a);
        let limit = self.reg(a + 1);
        let step = self.reg(a + 2);
        if let (LuaValue::Integer(init), LuaValue::Integer(step)) = (&init, &step) {
            let (init, step) = (*init, *step);
            if step == 0 {
                return Err(LuaError::Runtime("'for' step is zero".into()));
            }
            let count = for_limit(&limit, step)?.map_or(0, |limit| iteration_count(init, limit, step));
            self.set_reg(a, LuaValue::Integer(init.wrapping_sub(step)));
            self.set_reg(a + 1, LuaValue::Integer(count as i64));
        } else {
            let Some(limit) = limit.to_float() else {
                return Err(LuaError::Runtime("'for' limit must be a number".into()));
            };
            let Some(step) = step.to_float() else {
                return Err(LuaError::Runtime("'for' step must be a number".into()));
            };
            let Some(init) = init.to_float() else {
                return Err(LuaError::Runtime("'for' initial value must be a number".into()));
            };
            if step == 0.0 {
                return Err(LuaError::Runtime("'for' step is zero".into()));
            }
            self.set_reg(a, LuaValue::Float(init - step));
            self.set_reg(a + 1, LuaValue::Float(limit));
            self.set_reg(a + 2, LuaValue::Float(step));
        }
        self.jump(sbx);
        Ok(())
    }

    /// Advance the index; while within the limit, copy it to `R(A+3)` and
    /// jump back into the body.
    fn op_forloop(&mut self, i: Instruction) -> LuaResult<()> {
        let (a, sbx) = i.asbx();
        let next = match (self.reg(a), self.reg(a + 1), self.reg(a + 2)) {
            (LuaValue::Integer(idx), LuaValue::Integer(left), LuaValue::Integer(step)) => {
                // `left` is an unsigned count stored in an integer slot.
                match (left as u64).checked_sub(1) {
                    Some(rest) => {
                        self.set_reg(a + 1, LuaValue::Integer(rest as i64));
                        Some(LuaValue::Integer(idx.wrapping_add(step)))
                    }
                    None => None,
                }
            }
            (LuaValue::Float(idx), LuaValue::Float(limit), LuaValue::Float(step)) => {
                let n = idx + step;
                let continues = if step > 0.0 { n <= limit } else { limit <= n };
                continues.then_some(LuaValue::Float(n))
            }
            _ => return Err(LuaError::Bytecode("FORLOOP without FORPREP".into())),
        };
        if let Some(n) = next {
            self.set_reg(a, n.clone());
            self.set_reg(a + 3, n);
            self.jump(sbx);
        }
        Ok(())
    }
}

/// Integer loop limit: floats are floored (or ceiled for negative steps) and
/// clamped to the integer range. `None` when no integer index can satisfy it.
fn for_limit(limit: &LuaValue, step: i64) -> LuaResult<Option<i64>> {
    if let LuaValue::Integer(n) = limit {
        return Ok(Some(*n));
    }
    let Some(f) = limit.to_float() else {
        return Err(LuaError::Runtime("'for' limit must be a number".into()));
    };
    if f.is_nan() {
        return Ok(None);
    }
    let f = if step > 0 { f.floor() } else { f.ceil() };
    const TWO_63: f64 = 9_223_372_036_854_775_808.0;
    if (step > 0 && f < -TWO_63) || (step < 0 && f >= TWO_63) {
        return Ok(None);
    }
    // `as` saturates out-of-range floats.
    Ok(Some(f as i64))
}

/// How many times an integer loop from `init` to `limit` runs. Saturates for
/// the single loop covering all 2^64 integers.
fn iteration_count(init: i64, limit: i64, step: i64) -> u64 {
    if step > 0 {
        if init > limit {
            return 0;
        }
        ((limit as u64).wrapping_sub(init as u64) / step as u64).saturating_add(1)
    } else {
        if init < limit {
            return 0;
        }
        ((init as u64).wrapping_sub(limit as u64) / step.unsigned_abs()).saturating_add(1)
    }
}
