//! The engine contract seen by embedders and host functions.

use crate::error::LuaResult;
use crate::proto::Proto;
use crate::table::TableRef;
use crate::value::LuaValue;
use std::rc::Rc;

/// A host function: receives the engine and its arguments, returns results.
///
/// Host functions run inline on the engine's thread and may re-enter it (for
/// example to call back into a Lua function through [`State::call`]).
pub type NativeFn = Rc<dyn Fn(&mut dyn State, Vec<LuaValue>) -> LuaResult<Vec<LuaValue>>>;

/// Public surface of an execution engine.
pub trait State {
    /// Install a root closure over `proto` and push its initial frame.
    fn load(&mut self, proto: Rc<Proto>);

    /// Install a host function into the global table under `name`.
    fn register(&mut self, name: &str, func: NativeFn);

    /// Execute the top frame until it returns; yields its results.
    fn run(&mut self) -> LuaResult<Vec<LuaValue>>;

    /// Look up `name` in the global table and call it with `args`.
    fn call_by_param(&mut self, name: &str, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>>;

    /// Call any value, honouring `__call`.
    fn call(&mut self, func: LuaValue, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>>;

    /// `obj[key]`, honouring `__index`.
    fn index(&mut self, obj: &LuaValue, key: &LuaValue) -> LuaResult<LuaValue>;

    /// The global table (`_ENV` of loaded chunks).
    fn globals(&self) -> TableRef;

    /// Metatable consulted for `value`, if any.
    fn metatable_of(&self, value: &LuaValue) -> Option<TableRef>;

    /// Metamethod `event` of `value`, or nil.
    fn meta_field(&self, value: &LuaValue, event: &str) -> LuaValue;
}
