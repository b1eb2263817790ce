//! Primitive ordering of numbers and strings.
//!
//! Integer/float comparisons are exact: an integer is never rounded to the
//! nearest float before comparing.

use lua_core::LuaValue;
use std::cmp::Ordering;

/// `a < b` without metamethods, or `None` when the operands are not both
/// numbers or both strings.
pub fn raw_lt(a: &LuaValue, b: &LuaValue) -> Option<bool> {
    match (a, b) {
        (LuaValue::LuaString(x), LuaValue::LuaString(y)) => Some(x < y),
        _ => num_cmp(a, b).map(|o| o == Some(Ordering::Less)),
    }
}

/// `a <= b` without metamethods.
pub fn raw_le(a: &LuaValue, b: &LuaValue) -> Option<bool> {
    match (a, b) {
        (LuaValue::LuaString(x), LuaValue::LuaString(y)) => Some(x <= y),
        _ => num_cmp(a, b).map(|o| matches!(o, Some(Ordering::Less | Ordering::Equal))),
    }
}

/// Ordering of two numbers; the inner `None` means unordered (NaN).
fn num_cmp(a: &LuaValue, b: &LuaValue) -> Option<Option<Ordering>> {
    use LuaValue::{Float, Integer};
    let ord = match (a, b) {
        (Integer(x), Integer(y)) => Some(x.cmp(y)),
        (Float(x), Float(y)) => x.partial_cmp(y),
        (Integer(i), Float(f)) => int_float_cmp(*i, *f),
        (Float(f), Integer(i)) => int_float_cmp(*i, *f).map(Ordering::reverse),
        _ => return None,
    };
    Some(ord)
}

/// Exact ordering of an integer against a float.
fn int_float_cmp(i: i64, f: f64) -> Option<Ordering> {
    if f.is_nan() {
        return None;
    }
    // 2^63: every float at or above it exceeds any i64.
    const TWO_63: f64 = 9_223_372_036_854_775_808.0;
    if f >= TWO_63 {
        return Some(Ordering::Less);
    }
    if f < -TWO_63 {
        return Some(Ordering::Greater);
    }
    let floor = f.floor();
    // `floor` is integral and within range, so the cast is exact.
    let fi = floor as i64;
    match i.cmp(&fi) {
        Ordering::Equal if f > floor => Some(Ordering::Less),
        ord => Some(ord),
    }
}
