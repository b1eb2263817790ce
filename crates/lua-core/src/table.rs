use crate::closure::Closure;
use crate::error::{LuaError, LuaResult};
use crate::value::{float_to_integer, LuaValue};
use std::cell::RefCell;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// Shared handle to a table; identity is the allocation.
pub type TableRef = Rc<RefCell<LuaTable>>;

/// A Lua table: an associative array keyed by any non-nil, non-NaN value.
///
/// Stores integer keys 1..n in a compact `array` part for fast sequential access;
/// everything else goes into the `hash` part. The array never ends in `nil`,
/// and the hash part never holds the key `array.len() + 1`.
#[derive(Debug, Default)]
pub struct LuaTable {
    array: Vec<LuaValue>, // 1-indexed: array[i-1] = t[i]
    hash: HashMap<HashKey, LuaValue>,
    metatable: Option<TableRef>,
    /// Successor of every key as of the last snapshot (`None` = start / end).
    links: Option<HashMap<Option<HashKey>, Option<HashKey>>>,
    /// Set by every write; `next(nil)` re-snapshots when it is on.
    dirty: bool,
}

/// Keys that can be stored in the hash part of a table.
///
/// Floats with an exact integer value never appear here; they are normalized
/// to `Int` first.
#[derive(Debug, Clone)]
pub enum HashKey {
    Int(i64),
    Float(u64),
    Str(String),
    Bool(bool),
    Table(TableRef),
    Function(Rc<Closure>),
}

impl HashKey {
    /// Normalized key for `v`, or `None` for `nil` and NaN.
    pub fn from_value(v: &LuaValue) -> Option<HashKey> {
        match v {
            LuaValue::Nil => None,
            LuaValue::Integer(n) => Some(HashKey::Int(*n)),
            LuaValue::Float(f) => match float_to_integer(*f) {
                Some(n) => Some(HashKey::Int(n)),
                None if f.is_nan() => None,
                None => Some(HashKey::Float(f.to_bits())),
            },
            LuaValue::LuaString(s) => Some(HashKey::Str(s.clone())),
            LuaValue::Boolean(b) => Some(HashKey::Bool(*b)),
            LuaValue::Table(t) => Some(HashKey::Table(t.clone())),
            LuaValue::Function(c) => Some(HashKey::Function(c.clone())),
        }
    }

    pub fn to_value(&self) -> LuaValue {
        match self {
            HashKey::Int(n) => LuaValue::Integer(*n),
            HashKey::Float(bits) => LuaValue::Float(f64::from_bits(*bits)),
            HashKey::Str(s) => LuaValue::LuaString(s.clone()),
            HashKey::Bool(b) => LuaValue::Boolean(*b),
            HashKey::Table(t) => LuaValue::Table(t.clone()),
            HashKey::Function(c) => LuaValue::Function(c.clone()),
        }
    }
}

impl PartialEq for HashKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (HashKey::Int(a), HashKey::Int(b)) => a == b,
            (HashKey::Float(a), HashKey::Float(b)) => a == b,
            (HashKey::Str(a), HashKey::Str(b)) => a == b,
            (HashKey::Bool(a), HashKey::Bool(b)) => a == b,
            (HashKey::Table(a), HashKey::Table(b)) => Rc::ptr_eq(a, b),
            (HashKey::Function(a), HashKey::Function(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for HashKey {}

impl Hash for HashKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            HashKey::Int(n) => n.hash(state),
            HashKey::Float(bits) => bits.hash(state),
            HashKey::Str(s) => s.hash(state),
            HashKey::Bool(b) => b.hash(state),
            HashKey::Table(t) => (Rc::as_ptr(t) as *const () as usize).hash(state),
            HashKey::Function(c) => (Rc::as_ptr(c) as *const () as usize).hash(state),
        }
    }
}

impl LuaTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table pre-sized for `narr` sequence slots and `nrec` hash entries.
    pub fn with_capacity(narr: usize, nrec: usize) -> Self {
        Self {
            array: Vec::with_capacity(narr),
            hash: HashMap::with_capacity(nrec),
            ..Self::default()
        }
    }

    /// The metatable, created empty on first access.
    pub fn meta(&mut self) -> TableRef {
        self.metatable
            .get_or_insert_with(|| Rc::new(RefCell::new(LuaTable::new())))
            .clone()
    }

    /// The metatable if one has been set or created; never allocates.
    pub fn get_metatable(&self) -> Option<TableRef> {
        self.metatable.clone()
    }

    pub fn set_metatable(&mut self, mt: Option<TableRef>) {
        self.metatable = mt;
    }

    /// Read `t[key]`. Returns `LuaValue::Nil` for missing keys, `nil` and NaN.
    pub fn get(&self, key: &LuaValue) -> LuaValue {
        match key {
            LuaValue::Integer(i) => self.get_int(*i),
            _ => HashKey::from_value(key)
                .map(|hk| self.get_key(&hk))
                .unwrap_or(LuaValue::Nil),
        }
    }

    /// Read `t[i]`.
    pub fn get_int(&self, i: i64) -> LuaValue {
        if i >= 1 && (i as u64) <= self.array.len() as u64 {
            return self.array[(i - 1) as usize].clone();
        }
        self.hash.get(&HashKey::Int(i)).cloned().unwrap_or(LuaValue::Nil)
    }

    fn get_key(&self, key: &HashKey) -> LuaValue {
        match key {
            HashKey::Int(i) => self.get_int(*i),
            _ => self.hash.get(key).cloned().unwrap_or(LuaValue::Nil),
        }
    }

    /// Write `t[key] = val`. Setting to nil deletes the entry.
    pub fn set(&mut self, key: LuaValue, val: LuaValue) -> LuaResult<()> {
        let hk = match &key {
            LuaValue::Nil => return Err(LuaError::NilIndex),
            LuaValue::Float(f) if f.is_nan() => return Err(LuaError::NaNIndex),
            _ => HashKey::from_value(&key).ok_or(LuaError::NilIndex)?,
        };
        self.dirty = true;
        self.set_key(hk, val);
        Ok(())
    }

    /// Write `t[i] = val`.
    pub fn set_int(&mut self, i: i64, val: LuaValue) {
        self.dirty = true;
        self.set_key(HashKey::Int(i), val);
    }

    /// Write `t[key] = val` for a string key, which is always a valid index.
    pub fn set_str(&mut self, key: &str, val: LuaValue) {
        self.dirty = true;
        self.set_key(HashKey::Str(key.to_owned()), val);
    }

    fn set_key(&mut self, key: HashKey, val: LuaValue) {
        if let HashKey::Int(i) = key {
            let len = self.array.len() as u64;
            if i >= 1 && (i as u64) <= len {
                let idx = (i - 1) as usize;
                self.array[idx] = val;
                if idx + 1 == self.array.len() && self.array[idx].is_nil() {
                    self.shrink_array();
                }
                return;
            }
            if i >= 1 && (i as u64) == len + 1 {
                self.hash.remove(&key);
                if !val.is_nil() {
                    self.array.push(val);
                    self.migrate_from_hash();
                }
                return;
            }
        }
        if val.is_nil() {
            self.hash.remove(&key);
        } else {
            self.hash.insert(key, val);
        }
    }

    /// Lua-style length: the size of the array part, which is always a border.
    pub fn length(&self) -> i64 {
        self.array.len() as i64
    }

    /// `true` when the table holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.array.is_empty() && self.hash.is_empty()
    }

    pub fn hash_len(&self) -> usize {
        self.hash.len()
    }

    /// Drop trailing nils left by a deletion at the end of the array.
    fn shrink_array(&mut self) {
        while matches!(self.array.last(), Some(LuaValue::Nil)) {
            self.array.pop();
        }
    }

    /// After a new integer key extends the array part, pull consecutive keys
    /// from the hash part into the array to keep the invariant.
    fn migrate_from_hash(&mut self) {
        loop {
            let next = HashKey::Int(self.array.len() as i64 + 1);
            match self.hash.remove(&next) {
                Some(v) => self.array.push(v),
                None => break,
            }
        }
    }

    /// The entry after `key` in traversal order (`nil` starts a traversal).
    ///
    /// Key order is snapshotted lazily and re-taken only when a traversal
    /// starts after a write. Entries deleted mid-traversal are skipped; keys
    /// inserted mid-traversal are not visited.
    pub fn next(&mut self, key: &LuaValue) -> LuaResult<Option<(LuaValue, LuaValue)>> {
        let start = if key.is_nil() {
            None
        } else {
            Some(HashKey::from_value(key).ok_or_else(invalid_next_key)?)
        };
        if self.links.is_none() || (start.is_none() && self.dirty) {
            self.snapshot_keys();
        }
        let Some(links) = &self.links else {
            return Ok(None);
        };
        let mut cursor = start;
        loop {
            let succ = links.get(&cursor).ok_or_else(invalid_next_key)?;
            match succ {
                None => return Ok(None),
                Some(k) => {
                    let v = self.get_key(k);
                    if !v.is_nil() {
                        return Ok(Some((k.to_value(), v)));
                    }
                    cursor = Some(k.clone());
                }
            }
        }
    }

    /// The array-style successor of `key` for `ipairs`: `(key + 1, value)`
    /// until the first nil.
    pub fn inext(&self, key: &LuaValue) -> Option<(LuaValue, LuaValue)> {
        let i = match key {
            LuaValue::Nil => 0,
            other => other.to_integer()?,
        };
        let n = i.checked_add(1)?;
        let v = self.get_int(n);
        if v.is_nil() {
            None
        } else {
            Some((LuaValue::Integer(n), v))
        }
    }

    fn snapshot_keys(&mut self) {
        let mut links = HashMap::with_capacity(self.array.len() + self.hash.len() + 1);
        let mut prev: Option<HashKey> = None;
        let array_keys = self
            .array
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_nil())
            .map(|(i, _)| HashKey::Int(i as i64 + 1));
        let hash_keys = self
            .hash
            .iter()
            .filter(|(_, v)| !v.is_nil())
            .map(|(k, _)| k.clone());
        for k in array_keys.chain(hash_keys) {
            links.insert(prev, Some(k.clone()));
            prev = Some(k);
        }
        links.insert(prev, None);
        self.links = Some(links);
        self.dirty = false;
    }
}

fn invalid_next_key() -> LuaError {
    LuaError::Runtime("invalid key to 'next'".into())
}
