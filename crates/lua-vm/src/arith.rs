//! Primitive arithmetic and bitwise kernels.
//!
//! These work on plain numbers only; metamethod fallback lives in the VM.

use lua_core::{LuaError, LuaResult, LuaValue};

/// The arithmetic and bitwise operators, in opcode order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Mod,
    Pow,
    Div,
    IDiv,
    BAnd,
    BOr,
    BXor,
    Shl,
    Shr,
    Unm,
    BNot,
}

impl ArithOp {
    /// Metatable key consulted when the operands are not numbers.
    pub fn event(self) -> &'static str {
        match self {
            ArithOp::Add => "__add",
            ArithOp::Sub => "__sub",
            ArithOp::Mul => "__mul",
            ArithOp::Mod => "__mod",
            ArithOp::Pow => "__pow",
            ArithOp::Div => "__div",
            ArithOp::IDiv => "__idiv",
            ArithOp::BAnd => "__band",
            ArithOp::BOr => "__bor",
            ArithOp::BXor => "__bxor",
            ArithOp::Shl => "__shl",
            ArithOp::Shr => "__shr",
            ArithOp::Unm => "__unm",
            ArithOp::BNot => "__bnot",
        }
    }

    pub fn is_bitwise(self) -> bool {
        matches!(
            self,
            ArithOp::BAnd | ArithOp::BOr | ArithOp::BXor | ArithOp::Shl | ArithOp::Shr | ArithOp::BNot
        )
    }
}

// ── Integer kernels ───────────────────────────────────────────────────────────

/// Integer division rounded toward negative infinity. `b` must be non-zero.
pub fn floor_div(a: i64, b: i64) -> i64 {
    let q = a.wrapping_div(b);
    if a.wrapping_rem(b) != 0 && (a < 0) != (b < 0) {
        q - 1
    } else {
        q
    }
}

/// Remainder whose sign follows the divisor. `b` must be non-zero.
pub fn floor_mod(a: i64, b: i64) -> i64 {
    a.wrapping_sub(floor_div(a, b).wrapping_mul(b))
}

/// Logical left shift; negative counts shift right, counts of 64 or more
/// yield zero.
pub fn shift_left(x: i64, n: i64) -> i64 {
    if n <= -64 || n >= 64 {
        0
    } else if n >= 0 {
        ((x as u64) << n) as i64
    } else {
        ((x as u64) >> -n) as i64
    }
}

/// Logical right shift; zero bits come in from the left.
pub fn shift_right(x: i64, n: i64) -> i64 {
    shift_left(x, n.wrapping_neg())
}

// ── Float kernels ─────────────────────────────────────────────────────────────

pub fn float_floor_div(a: f64, b: f64) -> f64 {
    (a / b).floor()
}

/// `a - floor(a / b) * b`; infinities and NaN propagate.
pub fn float_mod(a: f64, b: f64) -> f64 {
    a - (a / b).floor() * b
}

// ── Dispatch ──────────────────────────────────────────────────────────────────

/// Apply `op` to two numeric operands (the second is ignored by unary ops).
///
/// Returns `Ok(None)` when an operand is not convertible to a number, which
/// means the caller should try a metamethod. Integer division or modulo by
/// zero is an error.
pub fn arith(op: ArithOp, a: &LuaValue, b: &LuaValue) -> LuaResult<Option<LuaValue>> {
    use LuaValue::{Float, Integer};

    if op.is_bitwise() {
        return Ok(bitwise(op, a, b));
    }

    if let (Integer(x), Integer(y)) = (a, b) {
        let (x, y) = (*x, *y);
        let n = match op {
            ArithOp::Add => Some(x.wrapping_add(y)),
            ArithOp::Sub => Some(x.wrapping_sub(y)),
            ArithOp::Mul => Some(x.wrapping_mul(y)),
            ArithOp::Unm => Some(x.wrapping_neg()),
            ArithOp::IDiv if y == 0 => {
                return Err(LuaError::Runtime("attempt to perform 'n//0'".into()))
            }
            ArithOp::Mod if y == 0 => {
                return Err(LuaError::Runtime("attempt to perform 'n%0'".into()))
            }
            ArithOp::IDiv => Some(floor_div(x, y)),
            ArithOp::Mod => Some(floor_mod(x, y)),
            _ => None,
        };
        if let Some(n) = n {
            return Ok(Some(Integer(n)));
        }
    }

    let (Some(x), Some(y)) = (a.to_float(), b.to_float()) else {
        return Ok(None);
    };
    let f = match op {
        ArithOp::Add => x + y,
        ArithOp::Sub => x - y,
        ArithOp::Mul => x * y,
        ArithOp::Div => x / y,
        ArithOp::Pow => x.powf(y),
        ArithOp::IDiv => float_floor_div(x, y),
        ArithOp::Mod => float_mod(x, y),
        ArithOp::Unm => -x,
        ArithOp::BAnd | ArithOp::BOr | ArithOp::BXor | ArithOp::Shl | ArithOp::Shr | ArithOp::BNot => {
            return Ok(bitwise(op, a, b))
        }
    };
    Ok(Some(Float(f)))
}

/// Bitwise operators work on integers; floats qualify only with an exact
/// integer value.
fn bitwise(op: ArithOp, a: &LuaValue, b: &LuaValue) -> Option<LuaValue> {
    let (x, y) = (a.to_integer()?, b.to_integer()?);
    let n = match op {
        ArithOp::BAnd => x & y,
        ArithOp::BOr => x | y,
        ArithOp::BXor => x ^ y,
        ArithOp::Shl => shift_left(x, y),
        ArithOp::Shr => shift_right(x, y),
        _ => !x,
    };
    Some(LuaValue::Integer(n))
}
