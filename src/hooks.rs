mod chain;
mod foreign;
mod manager;

pub use chain::*;
pub use foreign::*;
pub use manager::*;

/// Admission regime of a hooked target.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum HookMode {
    /// Only one interceptor may ever sit on the target.
    Exclusive,
    /// Any number of interceptors, ordered by [`Priority`] then registration.
    Shared,
}

/// Tie-break among the interceptors of a shared target.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Priority {
    Earliest,
    Normal,
    Latest,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

/// Identity of one registered interceptor, unique for the lifetime of its manager.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HookId(u64);
