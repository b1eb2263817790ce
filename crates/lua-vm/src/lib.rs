//! `lua-vm`: register-based virtual machine that executes Lua 5.3 function
//! templates built with `lua-core`.
//!
//! ```ignore
//! let mut vm = Vm::new();
//! vm.load(proto);
//! let results = vm.run()?;
//! ```

pub mod arith;
pub mod compare;
pub mod config;
mod dispatch;
mod frame;
pub mod stdlib;
pub mod vm;

pub use config::VmConfig;
pub use vm::Vm;
