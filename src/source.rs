//! Where the large heap's memory comes from.
use crate::Init;

/// The memory source backing the large heap. It plays the role of the
/// program break: the heap asks it for more bytes, synchronously, and it
/// either grants the whole request or refuses.
///
/// A grant is only permission. The bytes themselves are reserved from the
/// process allocator afterwards, and a failed reservation is treated like a
/// refusal.
pub trait HeapSource {
    /// Decide whether the arena may grow from `extent` bytes to
    /// `extent + additional` bytes. `extent` includes the slot table.
    fn grant(&mut self, extent: usize, additional: usize) -> bool;
}

/// Grants every request; growth is limited only by the process allocator.
#[derive(Debug, Default, Copy, Clone)]
pub struct Unbounded;

impl Init for Unbounded {
    const INIT: Self = Self;
}

impl HeapSource for Unbounded {
    #[inline]
    fn grant(&mut self, _extent: usize, _additional: usize) -> bool {
        true
    }
}

/// Refuses to let the arena grow past `LIMIT` bytes in total.
#[derive(Debug, Default, Copy, Clone)]
pub struct Capped<const LIMIT: usize>;

impl<const LIMIT: usize> Init for Capped<LIMIT> {
    const INIT: Self = Self;
}

impl<const LIMIT: usize> HeapSource for Capped<LIMIT> {
    #[inline]
    fn grant(&mut self, extent: usize, additional: usize) -> bool {
        extent
            .checked_add(additional)
            .map_or(false, |new_extent| new_extent <= LIMIT)
    }
}

impl<T: HeapSource + ?Sized> HeapSource for &mut T {
    #[inline]
    fn grant(&mut self, extent: usize, additional: usize) -> bool {
        (**self).grant(extent, additional)
    }
}
