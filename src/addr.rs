//! Addresses handed out to callers and the word arithmetic behind them.
use core::{fmt, ops};

/// The size of a machine word. Headers, size fields and the rounding
/// granularity of block spans are all one word.
pub const WORD: usize = core::mem::size_of::<usize>();

/// The address of the first byte of the arena.
///
/// Offset zero of the arena is mapped here so that the null address and the
/// lowest page never name managed memory.
pub const POOL_BASE: usize = 0x1000;

/// An address inside (or claimed to be inside) a [`SlotHeap`]'s memory.
///
/// Addresses are opaque handles: they are only meaningful to the allocator
/// context that produced them. Interior addresses can be formed with `+`,
/// e.g. `addr + 4` for the second `i32` of a payload.
///
/// [`SlotHeap`]: crate::SlotHeap
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Addr(usize);

impl Addr {
    /// The null address. It is never managed.
    pub const NULL: Self = Self(0);

    #[inline]
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn get(self) -> usize {
        self.0
    }

    #[inline]
    pub(crate) const fn from_offset(offset: usize) -> Self {
        Self(POOL_BASE + offset)
    }

    /// The arena offset this address refers to, if it is not below the base.
    #[inline]
    pub(crate) fn offset(self) -> Option<usize> {
        self.0.checked_sub(POOL_BASE)
    }

    /// `self + bytes`, or `None` on overflow.
    #[inline]
    pub fn checked_add(self, bytes: usize) -> Option<Self> {
        self.0.checked_add(bytes).map(Self)
    }
}

impl ops::Add<usize> for Addr {
    type Output = Self;

    /// Wraps on overflow; a wrapped address is simply out of range.
    #[inline]
    fn add(self, bytes: usize) -> Self {
        Self(self.0.wrapping_add(bytes))
    }
}

impl ops::Sub<usize> for Addr {
    type Output = Self;

    #[inline]
    fn sub(self, bytes: usize) -> Self {
        Self(self.0.wrapping_sub(bytes))
    }
}

impl fmt::Debug for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Addr({:#x})", self.0)
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Round `x` up to a whole number of words. Returns `None` on overflow.
#[inline]
pub(crate) fn round_up_to_word(x: usize) -> Option<usize> {
    Some(x.checked_add(WORD - 1)? & !(WORD - 1))
}
