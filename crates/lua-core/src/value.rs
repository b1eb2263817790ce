use crate::closure::Closure;
use crate::table::{LuaTable, TableRef};
use std::cell::RefCell;
use std::rc::Rc;

/// All Lua value types, mirroring the Lua 5.3 type system.
#[derive(Clone, Default)]
pub enum LuaValue {
    #[default]
    Nil,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    LuaString(String),
    /// A Lua table (array + hash parts, reference-counted + interior mutability).
    Table(TableRef),
    /// A bytecode closure or a host function.
    Function(Rc<Closure>),
}

impl LuaValue {
    /// Returns the Lua type name string as per the reference manual.
    pub fn type_name(&self) -> &'static str {
        match self {
            LuaValue::Nil => "nil",
            LuaValue::Boolean(_) => "boolean",
            LuaValue::Integer(_) => "number",
            LuaValue::Float(_) => "number",
            LuaValue::LuaString(_) => "string",
            LuaValue::Table(_) => "table",
            LuaValue::Function(_) => "function",
        }
    }

    /// Returns `true` if the value is truthy in Lua's sense
    /// (everything except `nil` and `false` is truthy).
    pub fn is_truthy(&self) -> bool {
        !matches!(self, LuaValue::Nil | LuaValue::Boolean(false))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, LuaValue::Nil)
    }

    /// Create a new empty table value.
    pub fn new_table() -> Self {
        LuaValue::Table(Rc::new(RefCell::new(LuaTable::new())))
    }

    /// Numeric view used by float arithmetic: numbers and numeric strings.
    pub fn to_float(&self) -> Option<f64> {
        match self {
            LuaValue::Integer(n) => Some(*n as f64),
            LuaValue::Float(f) => Some(*f),
            LuaValue::LuaString(s) => match parse_number(s)? {
                LuaValue::Integer(n) => Some(n as f64),
                LuaValue::Float(f) => Some(f),
                _ => None,
            },
            _ => None,
        }
    }

    /// Integer view used by bitwise operators: integers, integral floats and
    /// strings holding either.
    pub fn to_integer(&self) -> Option<i64> {
        match self {
            LuaValue::Integer(n) => Some(*n),
            LuaValue::Float(f) => float_to_integer(*f),
            LuaValue::LuaString(s) => parse_number(s)?.to_integer(),
            _ => None,
        }
    }

    /// `tonumber` semantics: numbers unchanged, numeric strings converted.
    pub fn to_number(&self) -> Option<LuaValue> {
        match self {
            LuaValue::Integer(_) | LuaValue::Float(_) => Some(self.clone()),
            LuaValue::LuaString(s) => parse_number(s),
            _ => None,
        }
    }

    /// String view used by concatenation: strings and numbers.
    pub fn to_str_coerce(&self) -> Option<String> {
        match self {
            LuaValue::LuaString(s) => Some(s.clone()),
            LuaValue::Integer(_) | LuaValue::Float(_) => Some(self.to_string()),
            _ => None,
        }
    }
}

/// Exact float → integer conversion; `None` when there is a fractional part
/// or the value lies outside the `i64` range.
pub fn float_to_integer(f: f64) -> Option<i64> {
    if f.fract() == 0.0 && f >= -9_223_372_036_854_775_808.0 && f < 9_223_372_036_854_775_808.0 {
        Some(f as i64)
    } else {
        None
    }
}

/// Parse a Lua numeric literal (decimal integer, hex integer or decimal float),
/// ignoring surrounding whitespace.
pub fn parse_number(s: &str) -> Option<LuaValue> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let (negative, body) = match s.as_bytes()[0] {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };
    if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        // hex integers wrap around, as in the reference lexer
        let n = hex.bytes().fold(0i64, |acc, b| {
            let digit = (b as char).to_digit(16).unwrap_or(0) as i64;
            acc.wrapping_mul(16).wrapping_add(digit)
        });
        return Some(LuaValue::Integer(if negative { n.wrapping_neg() } else { n }));
    }
    if !body
        .bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'))
    {
        return None;
    }
    if let Ok(n) = s.parse::<i64>() {
        return Some(LuaValue::Integer(n));
    }
    s.parse::<f64>().ok().map(LuaValue::Float)
}

/// Format a float the way `%.14g` does, adding `.0` when the result would
/// otherwise read as an integer.
pub fn fmt_float(f: f64) -> String {
    if f.is_nan() {
        return if f.is_sign_negative() { "-nan" } else { "nan" }.into();
    }
    if f.is_infinite() {
        return if f < 0.0 { "-inf" } else { "inf" }.into();
    }
    const PRECISION: i32 = 14;
    let sci = format!("{:.*e}", (PRECISION - 1) as usize, f);
    let (mantissa, exp) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let out = if exp < -4 || exp >= PRECISION {
        let mantissa = trim_fraction(mantissa);
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exp.abs())
    } else {
        let decimals = (PRECISION - 1 - exp).max(0) as usize;
        trim_fraction(&format!("{f:.decimals$}")).to_owned()
    };
    if out.bytes().all(|b| b.is_ascii_digit() || b == b'-') {
        format!("{out}.0")
    } else {
        out
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// Raw equality: no metamethods. Integers and floats compare by mathematical
/// value; tables and functions compare by identity.
impl PartialEq for LuaValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (LuaValue::Nil, LuaValue::Nil) => true,
            (LuaValue::Boolean(a), LuaValue::Boolean(b)) => a == b,
            (LuaValue::Integer(a), LuaValue::Integer(b)) => a == b,
            (LuaValue::Float(a), LuaValue::Float(b)) => a == b,
            (LuaValue::Integer(a), LuaValue::Float(b)) => float_to_integer(*b) == Some(*a),
            (LuaValue::Float(a), LuaValue::Integer(b)) => float_to_integer(*a) == Some(*b),
            (LuaValue::LuaString(a), LuaValue::LuaString(b)) => a == b,
            (LuaValue::Table(a), LuaValue::Table(b)) => Rc::ptr_eq(a, b),
            (LuaValue::Function(a), LuaValue::Function(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl std::fmt::Debug for LuaValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LuaValue::Nil => write!(f, "LuaValue::Nil"),
            LuaValue::Boolean(b) => write!(f, "LuaValue::Boolean({b})"),
            LuaValue::Integer(n) => write!(f, "LuaValue::Integer({n})"),
            LuaValue::Float(n) => write!(f, "LuaValue::Float({n})"),
            LuaValue::LuaString(s) => write!(f, "LuaValue::LuaString({s:?})"),
            LuaValue::Table(t) => write!(f, "LuaValue::Table({:p})", Rc::as_ptr(t)),
            LuaValue::Function(c) => write!(f, "LuaValue::Function({:p})", Rc::as_ptr(c)),
        }
    }
}

impl std::fmt::Display for LuaValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LuaValue::Nil => write!(f, "nil"),
            LuaValue::Boolean(b) => write!(f, "{b}"),
            LuaValue::Integer(n) => write!(f, "{n}"),
            LuaValue::Float(n) => write!(f, "{}", fmt_float(*n)),
            LuaValue::LuaString(s) => write!(f, "{s}"),
            LuaValue::Table(t) => write!(f, "table: {:p}", Rc::as_ptr(t)),
            LuaValue::Function(c) => match &**c {
                Closure::Native(n) => write!(f, "function: builtin '{}'", n.name),
                Closure::Lua(_) => write!(f, "function: {:p}", Rc::as_ptr(c)),
            },
        }
    }
}

impl From<bool> for LuaValue {
    fn from(b: bool) -> Self {
        LuaValue::Boolean(b)
    }
}

impl From<i64> for LuaValue {
    fn from(n: i64) -> Self {
        LuaValue::Integer(n)
    }
}

impl From<f64> for LuaValue {
    fn from(f: f64) -> Self {
        LuaValue::Float(f)
    }
}

impl From<&str> for LuaValue {
    fn from(s: &str) -> Self {
        LuaValue::LuaString(s.to_owned())
    }
}

impl From<String> for LuaValue {
    fn from(s: String) -> Self {
        LuaValue::LuaString(s)
    }
}
