//! The small-slot pool: `slot_count` slots of `slot_size` bytes at the start
//! of the arena, threaded into a free list through their header words.
use crate::{
    addr::{Addr, WORD},
    arena::Arena,
    error::{AllocError, Exhausted},
    header::Header,
    validator::Geometry,
};

/// Whether a slot is handed out.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SlotState {
    Free,
    Used,
}

#[derive(Debug)]
pub(crate) struct SmallPool {
    /// The arena offset of the first free slot.
    first_free: Option<usize>,
}

impl SmallPool {
    pub const INIT: Self = Self { first_free: None };

    /// Link every slot into one free list in index order.
    pub fn reset(&mut self, arena: &mut Arena, geometry: Geometry) {
        for index in 0..geometry.slot_count {
            let next = if index + 1 < geometry.slot_count {
                Some(geometry.slot_offset(index + 1))
            } else {
                None
            };
            arena.set_header(geometry.slot_offset(index), Header::Free(next));
        }
        self.first_free = if geometry.slot_count > 0 { Some(0) } else { None };
        log::debug!("small pool reset: {} slots", geometry.slot_count);
    }

    /// Take the first free slot. Returns the payload offset.
    pub fn allocate(&mut self, arena: &mut Arena, geometry: Geometry) -> Result<usize, AllocError> {
        let slot = self
            .first_free
            .ok_or(AllocError::OutOfMemory(Exhausted::Small))?;

        match arena.header(slot) {
            Some(Header::Free(next)) => {
                self.first_free = next.filter(|&next| is_slot_start(geometry, next));
            }
            header => {
                // Someone wrote past the end of the previous slot's payload.
                // The list is left as is.
                log::warn!(
                    "small free list head {} has a damaged header ({:?})",
                    Addr::from_offset(slot),
                    header
                );
                return Err(AllocError::OutOfMemory(Exhausted::Small));
            }
        }

        arena.set_header(slot, Header::Live);
        log::trace!("small: allocated slot {}", slot / geometry.slot_size);
        Ok(slot + WORD)
    }

    /// Return the slot at `index` to the free list.
    pub fn free(
        &mut self,
        arena: &mut Arena,
        geometry: Geometry,
        index: usize,
    ) -> Result<(), AllocError> {
        let slot = geometry.slot_offset(index);
        if !Header::is_live(arena.read_word(slot)) {
            return Err(AllocError::NotInUse(Addr::from_offset(slot + WORD)));
        }

        arena.set_header(slot, Header::Free(self.first_free));
        self.first_free = Some(slot);
        log::trace!("small: freed slot {}", index);
        Ok(())
    }

    #[inline]
    pub fn state(&self, arena: &Arena, geometry: Geometry, index: usize) -> SlotState {
        if Header::is_live(arena.read_word(geometry.slot_offset(index))) {
            SlotState::Used
        } else {
            SlotState::Free
        }
    }

    /// Iterate over the free list, yielding slot indices in list order.
    pub fn free_slots<'a>(&self, arena: &'a Arena, geometry: Geometry) -> FreeSlots<'a> {
        FreeSlots {
            arena,
            geometry,
            next: self.first_free,
            budget: geometry.slot_count,
        }
    }
}

#[inline]
fn is_slot_start(geometry: Geometry, offset: usize) -> bool {
    offset < geometry.table_len() && offset % geometry.slot_size == 0
}

/// See [`SmallPool::free_slots`].
pub(crate) struct FreeSlots<'a> {
    arena: &'a Arena,
    geometry: Geometry,
    next: Option<usize>,
    /// Bounds the walk even if a damaged link forms a cycle
    budget: usize,
}

impl Iterator for FreeSlots<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let slot = self.next?;
        if self.budget == 0 {
            return None;
        }
        self.budget -= 1;
        self.next = match self.arena.header(slot) {
            Some(Header::Free(next)) => next.filter(|&next| is_slot_start(self.geometry, next)),
            _ => None,
        };
        Some(slot / self.geometry.slot_size)
    }
}
