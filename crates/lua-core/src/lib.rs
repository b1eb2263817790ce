//! `lua-core`: foundational types shared across the lua-rust workspace.
//!
//! This crate defines:
//! - [`LuaValue`]: the dynamically-typed Lua value enum
//! - [`LuaTable`]: the hybrid array/hash table
//! - [`Closure`] and [`Upvalue`]: callables and their captured cells
//! - [`Proto`]: immutable function templates, plus [`ProtoBuilder`]
//! - [`Instruction`] and [`OpCode`]: the 32-bit bytecode words
//! - [`LuaError`]: the unified error type
//! - [`State`]: the engine contract host functions program against

pub mod api;
pub mod closure;
pub mod error;
pub mod instruction;
pub mod proto;
pub mod table;
pub mod value;

pub use api::{NativeFn, State};
pub use closure::{Closure, FrameId, LuaClosure, NativeFunction, Upvalue, UpvalueState};
pub use error::{LuaError, LuaResult};
pub use instruction::{Instruction, OpArgMode, OpCode, OpMode};
pub use proto::{Proto, ProtoBuilder, UpvalueDesc};
pub use table::{HashKey, LuaTable, TableRef};
pub use value::LuaValue;
