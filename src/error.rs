use core::fmt;
use thiserror::Error;

use crate::Addr;

/// Which pool ran out of memory.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Exhausted {
    /// Every slot of the small pool is in use.
    Small,
    /// The heap source refused to grow the large heap.
    System,
}

impl fmt::Display for Exhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Small => "no free small slot",
            Self::System => "heap growth denied",
        })
    }
}

/// The reason an operation was rejected.
///
/// A rejected operation never mutates the allocator.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The address is outside managed memory, or isn't where a payload of
    /// its pool can start.
    #[error("invalid address {0}")]
    InvalidAddress(Addr),
    /// The address names a slot or block that is currently free (double free
    /// or a stale handle).
    #[error("block at {0} is not in use")]
    NotInUse(Addr),
    /// No size class can represent a request of this many bytes.
    #[error("a request of {0} bytes exceeds every size class")]
    SizeTooLarge(usize),
    #[error("out of memory ({0})")]
    OutOfMemory(Exhausted),
}
