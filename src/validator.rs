//! Address classification.
use crate::addr::{Addr, WORD};

/// What an address names, judged by position alone.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AddrClass {
    /// Outside `[POOL_BASE, heap end)`.
    OutOfRange,
    /// The payload start of the small slot at `index`.
    SmallSlot { index: usize },
    /// Inside the large region, far enough from its start that a block
    /// header fits before it.
    LargeBlock,
    /// Managed, but not a place where a payload can start.
    Malformed,
}

/// The fixed layout of the arena: the slot table at offset zero, the large
/// region right after it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct Geometry {
    pub slot_size: usize,
    pub slot_count: usize,
}

impl Geometry {
    /// The usable bytes of one slot.
    #[inline]
    pub const fn slot_payload(&self) -> usize {
        self.slot_size - WORD
    }

    /// The extent of the slot table, which is also where the large region
    /// starts.
    #[inline]
    pub const fn table_len(&self) -> usize {
        self.slot_size * self.slot_count
    }

    #[inline]
    pub const fn slot_offset(&self, index: usize) -> usize {
        self.slot_size * index
    }

    #[inline]
    pub fn is_managed(&self, heap_end: usize, addr: Addr) -> bool {
        addr.offset().map_or(false, |offset| offset < heap_end)
    }

    pub fn classify(&self, heap_end: usize, addr: Addr) -> AddrClass {
        let offset = match addr.offset() {
            Some(offset) if offset < heap_end => offset,
            _ => return AddrClass::OutOfRange,
        };

        if offset < self.table_len() {
            if offset % self.slot_size == WORD {
                AddrClass::SmallSlot {
                    index: offset / self.slot_size,
                }
            } else {
                AddrClass::Malformed
            }
        } else if offset - self.table_len() < 2 * WORD {
            // The header would overlap the slot table
            AddrClass::Malformed
        } else {
            AddrClass::LargeBlock
        }
    }
}
