//! The base library: global functions every chunk can reach through `_ENV`.

use lua_core::{
    Closure, LuaError, LuaResult, LuaValue, NativeFn, NativeFunction, State, TableRef,
};
use std::rc::Rc;

type Builtin = fn(&mut dyn State, Vec<LuaValue>) -> LuaResult<Vec<LuaValue>>;

const BASE: &[(&str, Builtin)] = &[
    ("print", lua_print),
    ("type", lua_type),
    ("tostring", lua_tostring),
    ("tonumber", lua_tonumber),
    ("assert", lua_assert),
    ("error", lua_error),
    ("pcall", lua_pcall),
    ("select", lua_select),
    ("next", lua_next),
    ("pairs", lua_pairs),
    ("ipairs", lua_ipairs),
    ("setmetatable", lua_setmetatable),
    ("getmetatable", lua_getmetatable),
    ("rawget", lua_rawget),
    ("rawset", lua_rawset),
    ("rawequal", lua_rawequal),
    ("rawlen", lua_rawlen),
];

/// Install the base library into the global table of `state`.
pub fn open_base(state: &mut dyn State) {
    for &(name, f) in BASE {
        let func: NativeFn = Rc::new(f);
        state.register(name, func);
    }
}

// ── Argument helpers ──────────────────────────────────────────────────────────

fn arg(args: &[LuaValue], n: usize) -> LuaValue {
    args.get(n).cloned().unwrap_or_default()
}

fn bad_argument(n: usize, fname: &str, msg: impl std::fmt::Display) -> LuaError {
    LuaError::Runtime(format!("bad argument #{} to '{fname}' ({msg})", n + 1))
}

fn check_any(args: &[LuaValue], n: usize, fname: &str) -> LuaResult<LuaValue> {
    args.get(n)
        .cloned()
        .ok_or_else(|| bad_argument(n, fname, "value expected"))
}

fn check_table(args: &[LuaValue], n: usize, fname: &str) -> LuaResult<TableRef> {
    match args.get(n) {
        Some(LuaValue::Table(t)) => Ok(t.clone()),
        other => Err(bad_argument(
            n,
            fname,
            format!(
                "table expected, got {}",
                other.map_or("no value", |v| v.type_name())
            ),
        )),
    }
}

fn builtin(name: &str, f: Builtin) -> LuaValue {
    LuaValue::Function(Rc::new(Closure::Native(NativeFunction::new(name, Rc::new(f)))))
}

/// `tostring` semantics, honouring `__tostring`.
pub fn tostring(state: &mut dyn State, v: &LuaValue) -> LuaResult<String> {
    let mm = state.meta_field(v, "__tostring");
    if mm.is_nil() {
        return Ok(v.to_string());
    }
    match state.call(mm, vec![v.clone()])?.into_iter().next() {
        Some(LuaValue::LuaString(s)) => Ok(s),
        _ => Err(LuaError::Runtime("'__tostring' must return a string".into())),
    }
}

// ── Output and conversion ─────────────────────────────────────────────────────

fn lua_print(state: &mut dyn State, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let parts = args
        .iter()
        .map(|v| tostring(state, v))
        .collect::<LuaResult<Vec<_>>>()?;
    println!("{}", parts.join("\t"));
    Ok(vec![])
}

fn lua_type(_: &mut dyn State, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let v = check_any(&args, 0, "type")?;
    Ok(vec![v.type_name().into()])
}

fn lua_tostring(state: &mut dyn State, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let v = check_any(&args, 0, "tostring")?;
    Ok(vec![tostring(state, &v)?.into()])
}

fn lua_tonumber(_: &mut dyn State, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let v = check_any(&args, 0, "tonumber")?;
    let base = arg(&args, 1);
    if base.is_nil() {
        return Ok(vec![v.to_number().unwrap_or_default()]);
    }
    let base = match base.to_integer() {
        Some(b) if (2..=36).contains(&b) => b as u32,
        _ => return Err(bad_argument(1, "tonumber", "base out of range")),
    };
    let LuaValue::LuaString(s) = &v else {
        return Err(bad_argument(
            0,
            "tonumber",
            format!("string expected, got {}", v.type_name()),
        ));
    };
    Ok(vec![parse_in_base(s, base).map_or(LuaValue::Nil, LuaValue::Integer)])
}

/// Integer literal in `base`, wrapping on overflow.
fn parse_in_base(s: &str, base: u32) -> Option<i64> {
    let s = s.trim();
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    if digits.is_empty() {
        return None;
    }
    let mut n: i64 = 0;
    for c in digits.chars() {
        let d = c.to_digit(base)?;
        n = n.wrapping_mul(base as i64).wrapping_add(d as i64);
    }
    Some(if negative { n.wrapping_neg() } else { n })
}

// ── Errors ────────────────────────────────────────────────────────────────────

fn lua_assert(_: &mut dyn State, mut args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    if arg(&args, 0).is_truthy() {
        return Ok(args);
    }
    if args.len() < 2 {
        return Err(LuaError::Runtime("assertion failed!".into()));
    }
    Err(LuaError::Raised(args.swap_remove(1)))
}

fn lua_error(_: &mut dyn State, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    Err(LuaError::Raised(arg(&args, 0)))
}

fn lua_pcall(state: &mut dyn State, mut args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    if args.is_empty() {
        return Err(bad_argument(0, "pcall", "value expected"));
    }
    let func = args.remove(0);
    match state.call(func, args) {
        Ok(results) => {
            let mut out = Vec::with_capacity(results.len() + 1);
            out.push(LuaValue::Boolean(true));
            out.extend(results);
            Ok(out)
        }
        Err(e) => Ok(vec![LuaValue::Boolean(false), e.to_value()]),
    }
}

// ── Varargs ───────────────────────────────────────────────────────────────────

fn lua_select(_: &mut dyn State, mut args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let selector = check_any(&args, 0, "select")?;
    let count = args.len() as i64 - 1;
    if matches!(&selector, LuaValue::LuaString(s) if s == "#") {
        return Ok(vec![LuaValue::Integer(count)]);
    }
    let n = match selector.to_integer() {
        Some(n) if n < 0 && n >= -count => count + n,
        Some(n) if n > 0 => n - 1,
        _ => return Err(bad_argument(0, "select", "index out of range")),
    };
    let start = (n as usize + 1).min(args.len());
    Ok(args.split_off(start))
}

// ── Iteration ─────────────────────────────────────────────────────────────────

fn lua_next(_: &mut dyn State, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let t = check_table(&args, 0, "next")?;
    let entry = t.borrow_mut().next(&arg(&args, 1))?;
    Ok(match entry {
        Some((k, v)) => vec![k, v],
        None => vec![LuaValue::Nil],
    })
}

fn lua_pairs(state: &mut dyn State, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let v = check_any(&args, 0, "pairs")?;
    let mm = state.meta_field(&v, "__pairs");
    if !mm.is_nil() {
        let mut results = state.call(mm, vec![v])?;
        results.resize(3, LuaValue::Nil);
        return Ok(results);
    }
    check_table(&args, 0, "pairs")?;
    Ok(vec![builtin("next", lua_next), v, LuaValue::Nil])
}

fn ipairs_step(state: &mut dyn State, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let t = arg(&args, 0);
    let i = arg(&args, 1).to_integer().unwrap_or(0).wrapping_add(1);
    let v = match &t {
        LuaValue::Table(tr) if tr.borrow().get_metatable().is_none() => tr.borrow().get_int(i),
        _ => state.index(&t, &LuaValue::Integer(i))?,
    };
    Ok(if v.is_nil() {
        vec![LuaValue::Nil]
    } else {
        vec![LuaValue::Integer(i), v]
    })
}

fn lua_ipairs(_: &mut dyn State, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let t = check_any(&args, 0, "ipairs")?;
    Ok(vec![builtin("ipairs_aux", ipairs_step), t, LuaValue::Integer(0)])
}

// ── Metatables and raw access ─────────────────────────────────────────────────

fn lua_setmetatable(_: &mut dyn State, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let t = check_table(&args, 0, "setmetatable")?;
    let mt = match arg(&args, 1) {
        LuaValue::Nil => None,
        LuaValue::Table(mt) => Some(mt),
        other => {
            return Err(bad_argument(
                1,
                "setmetatable",
                format!("nil or table expected, got {}", other.type_name()),
            ))
        }
    };
    let protected = t
        .borrow()
        .get_metatable()
        .is_some_and(|old| !old.borrow().get(&"__metatable".into()).is_nil());
    if protected {
        return Err(LuaError::Runtime("cannot change a protected metatable".into()));
    }
    t.borrow_mut().set_metatable(mt);
    Ok(vec![LuaValue::Table(t)])
}

fn lua_getmetatable(state: &mut dyn State, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let v = check_any(&args, 0, "getmetatable")?;
    let Some(mt) = state.metatable_of(&v) else {
        return Ok(vec![LuaValue::Nil]);
    };
    let guard = mt.borrow().get(&"__metatable".into());
    if !guard.is_nil() {
        return Ok(vec![guard]);
    }
    Ok(vec![LuaValue::Table(mt)])
}

fn lua_rawget(_: &mut dyn State, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let t = check_table(&args, 0, "rawget")?;
    let v = t.borrow().get(&arg(&args, 1));
    Ok(vec![v])
}

fn lua_rawset(_: &mut dyn State, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let t = check_table(&args, 0, "rawset")?;
    t.borrow_mut().set(arg(&args, 1), arg(&args, 2))?;
    Ok(vec![LuaValue::Table(t)])
}

fn lua_rawequal(_: &mut dyn State, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    let a = check_any(&args, 0, "rawequal")?;
    let b = check_any(&args, 1, "rawequal")?;
    Ok(vec![LuaValue::Boolean(a == b)])
}

fn lua_rawlen(_: &mut dyn State, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
    match arg(&args, 0) {
        LuaValue::Table(t) => Ok(vec![LuaValue::Integer(t.borrow().length())]),
        LuaValue::LuaString(s) => Ok(vec![LuaValue::Integer(s.len() as i64)]),
        _ => Err(bad_argument(0, "rawlen", "table or string expected")),
    }
}
