//! Engine limits and tunables.

/// Default maximum nesting of Lua calls, host calls and metamethod calls.
/// Matches the reference implementation's `LUAI_MAXCCALLS`.
pub const MAX_CALL_DEPTH: usize = 200;

/// Minimum register-file size of a new frame.
/// Matches the reference implementation's `LUA_MINSTACK`.
pub const MIN_REGISTERS: usize = 20;

/// Options fixed when a [`Vm`](crate::Vm) is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmConfig {
    /// Calls nested deeper than this fail with a stack-overflow error.
    pub max_call_depth: usize,
    /// Register the base library (`print`, `pairs`, `pcall`, ...) on creation.
    pub open_base_lib: bool,
    /// Floor for a new frame's register count.
    pub min_registers: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_call_depth: MAX_CALL_DEPTH,
            open_base_lib: true,
            min_registers: MIN_REGISTERS,
        }
    }
}

impl VmConfig {
    /// A configuration without the base library: only what the embedder
    /// registers is visible to scripts.
    pub fn bare() -> Self {
        Self {
            open_base_lib: false,
            ..Self::default()
        }
    }

    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }
}
