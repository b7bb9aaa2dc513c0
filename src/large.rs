//! The large-block heap
use crate::{
    addr::{round_up_to_word, Addr, WORD},
    arena::Arena,
    error::{AllocError, Exhausted},
    header::Header,
    source::HeapSource,
    validator::Geometry,
};

/// The bytes a block spends on its header and size words.
pub(crate) const BLOCK_OVERHEAD: usize = 2 * WORD;

/// The large-block free list.
///
/// Blocks tile the arena from the end of the slot table to the end of the
/// arena. Each block is laid out as follows:
///
/// ```text
///   header        size          payload
///  +-------------+-------------+---------------------------------+
///  | Live |      | total bytes |                                 |
///  | Free(next)  | (incl. both |   size - 2 words                |
///  |             |  words)     |                                 |
///  +-------------+-------------+---------------------------------+
/// ```
///
/// Free blocks are chained through `Free(next)`, most recently freed first.
/// No two physically adjacent blocks are free at the same time because
/// freeing a block absorbs both of its free neighbors.
#[derive(Debug)]
pub(crate) struct LargeHeap {
    /// The arena offset of the first free block's header.
    first_free: Option<usize>,
}

/// A free large block as reported by [`SlotHeap::free_large_blocks`].
///
/// [`SlotHeap::free_large_blocks`]: crate::SlotHeap::free_large_blocks
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FreeBlock {
    /// Where the block's payload would start.
    pub addr: Addr,
    /// The total bytes spanned, including the two header words.
    pub size: usize,
}

/// The total bytes a block needs to hold `size` payload bytes.
///
/// Every block keeps at least one payload word so that its payload start
/// lies inside the block.
#[inline]
pub(crate) fn span_for(size: usize) -> Option<usize> {
    round_up_to_word(size.max(1).checked_add(BLOCK_OVERHEAD)?)
}

#[inline]
fn block_size(arena: &Arena, block: usize) -> usize {
    arena.read_word(block + WORD)
}

#[inline]
fn set_block_size(arena: &mut Arena, block: usize, size: usize) {
    arena.write_word(block + WORD, size);
}

impl LargeHeap {
    pub const INIT: Self = Self { first_free: None };

    /// Make the whole large region one free block. If the region is empty,
    /// grow it by `growth` bytes first; a refusal leaves the heap empty.
    pub fn reset(
        &mut self,
        arena: &mut Arena,
        source: &mut impl HeapSource,
        geometry: Geometry,
        growth: usize,
    ) {
        let start = geometry.table_len();
        if arena.len() == start && arena.grow(source, growth).is_none() {
            log::debug!("large heap starts empty: initial growth refused");
            self.first_free = None;
            return;
        }

        let size = arena.len() - start;
        arena.set_header(start, Header::Free(None));
        set_block_size(arena, start, size);
        self.first_free = Some(start);
        log::debug!("large heap reset: one free block of {} bytes", size);
    }

    /// Whether `block` can be read as a block: its size word is in bounds and
    /// describes an extent that stays inside the arena.
    fn is_plausible(arena: &Arena, geometry: Geometry, block: usize) -> bool {
        let end = arena.len();
        if block < geometry.table_len()
            || (block - geometry.table_len()) % WORD != 0
            || end.saturating_sub(block) < BLOCK_OVERHEAD
        {
            return false;
        }
        let size = block_size(arena, block);
        size >= BLOCK_OVERHEAD && size % WORD == 0 && size <= end - block
    }

    /// The head of the free list.
    #[inline]
    fn first_free(&self, arena: &Arena, geometry: Geometry) -> Option<usize> {
        self.first_free
            .filter(|&block| Self::is_plausible(arena, geometry, block))
    }

    /// The next link of the free block at `block`. Links that can't name a
    /// block end the list.
    fn next_free(arena: &Arena, geometry: Geometry, block: usize) -> Option<usize> {
        match arena.header(block) {
            Some(Header::Free(next)) => {
                next.filter(|&next| Self::is_plausible(arena, geometry, next))
            }
            _ => None,
        }
    }

    /// Point `prev` (or the list head if `None`) at `next`.
    fn relink(&mut self, arena: &mut Arena, prev: Option<usize>, next: Option<usize>) {
        if let Some(prev) = prev {
            arena.set_header(prev, Header::Free(next));
        } else {
            self.first_free = next;
        }
    }

    /// An upper bound on the number of blocks in the heap. Walks stop after
    /// this many steps even if a damaged link forms a cycle.
    fn walk_budget(arena: &Arena, geometry: Geometry) -> usize {
        (arena.len() - geometry.table_len().min(arena.len())) / BLOCK_OVERHEAD + 1
    }

    /// Allocate a block with room for `size` payload bytes using first fit.
    /// Returns the payload offset.
    pub fn allocate(
        &mut self,
        arena: &mut Arena,
        source: &mut impl HeapSource,
        geometry: Geometry,
        size: usize,
    ) -> Result<usize, AllocError> {
        let span = span_for(size).ok_or(AllocError::SizeTooLarge(size))?;

        let mut prev = None;
        let mut cursor = self.first_free(arena, geometry);
        let mut budget = Self::walk_budget(arena, geometry);
        while let Some(block) = cursor {
            if budget == 0 {
                break;
            }
            budget -= 1;

            let block_size = block_size(arena, block);
            let next = Self::next_free(arena, geometry, block);

            if block_size >= span {
                let remainder = block_size - span;
                if remainder < geometry.slot_payload() {
                    // Too small to be useful on its own; hand out the whole
                    // block
                    self.relink(arena, prev, next);
                    arena.set_header(block, Header::Live);
                    log::trace!("large: took whole block {} ({} bytes)", block, block_size);
                    return Ok(block + BLOCK_OVERHEAD);
                }

                // Carve the allocation from the tail. `block` keeps its place
                // in the free list.
                set_block_size(arena, block, remainder);
                let carved = block + remainder;
                arena.set_header(carved, Header::Live);
                set_block_size(arena, carved, span);
                log::trace!(
                    "large: split block {} into {} + {} bytes",
                    block,
                    remainder,
                    span
                );
                return Ok(carved + BLOCK_OVERHEAD);
            }

            prev = Some(block);
            cursor = next;
        }

        let block = arena
            .grow(source, span)
            .ok_or(AllocError::OutOfMemory(Exhausted::System))?;
        arena.set_header(block, Header::Live);
        set_block_size(arena, block, span);
        log::trace!("large: grew the heap by a {}-byte block at {}", span, block);
        Ok(block + BLOCK_OVERHEAD)
    }

    /// Free the live block at `block`.
    pub fn free(
        &mut self,
        arena: &mut Arena,
        geometry: Geometry,
        block: usize,
    ) -> Result<(), AllocError> {
        if !Header::is_live(arena.read_word(block)) {
            return Err(AllocError::NotInUse(Addr::from_offset(block + BLOCK_OVERHEAD)));
        }
        self.release(arena, geometry, block);
        Ok(())
    }

    /// Put a live block back on the free list, merging it with the free
    /// blocks immediately before and after it.
    fn release(&mut self, arena: &mut Arena, geometry: Geometry, block: usize) {
        let mut size = block_size(arena, block);
        let end = block + size;

        // Absorb the block that starts where this one ends
        let mut prev = None;
        let mut cursor = self.first_free(arena, geometry);
        let mut budget = Self::walk_budget(arena, geometry);
        while let (Some(free), true) = (cursor, budget > 0) {
            budget -= 1;
            let next = Self::next_free(arena, geometry, free);
            if free == end {
                size += block_size(arena, free);
                self.relink(arena, prev, next);
                log::trace!("large: {} absorbed its successor {}", block, free);
                break;
            }
            prev = Some(free);
            cursor = next;
        }

        // Let the block that ends where this one starts absorb it
        let mut cursor = self.first_free(arena, geometry);
        let mut budget = Self::walk_budget(arena, geometry);
        while let (Some(free), true) = (cursor, budget > 0) {
            budget -= 1;
            let free_size = block_size(arena, free);
            if free + free_size == block {
                set_block_size(arena, free, free_size + size);
                log::trace!("large: {} absorbed by its predecessor {}", block, free);
                return;
            }
            cursor = Self::next_free(arena, geometry, free);
        }

        let head = self.first_free(arena, geometry);
        set_block_size(arena, block, size);
        arena.set_header(block, Header::Free(head));
        self.first_free = Some(block);
        log::trace!("large: freed block {} ({} bytes)", block, size);
    }

    /// Resize the live block at `block` to hold `size` payload bytes.
    /// Returns the (possibly new) payload offset.
    ///
    /// Shrinking happens in place; a tail big enough to be useful is split
    /// off and freed. Growing moves the payload to a fresh block. If that
    /// allocation fails, `block` is left untouched.
    pub fn reallocate(
        &mut self,
        arena: &mut Arena,
        source: &mut impl HeapSource,
        geometry: Geometry,
        block: usize,
        size: usize,
    ) -> Result<usize, AllocError> {
        debug_assert!(Header::is_live(arena.read_word(block)));
        let span = span_for(size).ok_or(AllocError::SizeTooLarge(size))?;
        let old_size = block_size(arena, block);

        if span <= old_size {
            let remainder = old_size - span;
            if remainder >= geometry.slot_payload() {
                set_block_size(arena, block, span);
                let tail = block + span;
                arena.set_header(tail, Header::Live);
                set_block_size(arena, tail, remainder);
                self.release(arena, geometry, tail);
                log::trace!("large: shrank block {} to {} bytes", block, span);
            }
            return Ok(block + BLOCK_OVERHEAD);
        }

        let payload = self.allocate(arena, source, geometry, size)?;
        let old_payload_len = old_size - BLOCK_OVERHEAD;
        arena.copy_within(block + BLOCK_OVERHEAD, payload, old_payload_len.min(size));
        self.release(arena, geometry, block);
        log::trace!("large: moved block {} to {}", block, payload - BLOCK_OVERHEAD);
        Ok(payload)
    }

    /// Find the block whose extent contains `offset` by walking the blocks in
    /// address order. Returns `None` if `offset` is outside the large region
    /// or a damaged size word interrupts the walk.
    pub fn block_containing(
        &self,
        arena: &Arena,
        geometry: Geometry,
        offset: usize,
    ) -> Option<usize> {
        let end = arena.len();
        let mut block = geometry.table_len();
        while block < end && end - block >= BLOCK_OVERHEAD {
            let size = block_size(arena, block);
            if size < BLOCK_OVERHEAD || size % WORD != 0 || size > end - block {
                log::warn!("large: damaged size word {:#x} at block {}", size, block);
                return None;
            }
            if offset < block + size {
                return (offset >= block).then_some(block);
            }
            block += size;
        }
        None
    }

    /// Find the block whose payload starts exactly at `offset`.
    pub fn block_at_payload(
        &self,
        arena: &Arena,
        geometry: Geometry,
        offset: usize,
    ) -> Result<usize, AllocError> {
        let invalid = AllocError::InvalidAddress(Addr::from_offset(offset));
        let block = offset.checked_sub(BLOCK_OVERHEAD).ok_or(invalid)?;
        match self.block_containing(arena, geometry, offset) {
            Some(found) if found == block => Ok(block),
            _ => Err(invalid),
        }
    }

    /// The payload range of the block at `block`.
    #[inline]
    pub fn payload_range(&self, arena: &Arena, block: usize) -> core::ops::Range<usize> {
        block + BLOCK_OVERHEAD..block + block_size(arena, block)
    }

    /// Iterate over the free list in list order.
    pub fn free_blocks<'a>(&self, arena: &'a Arena, geometry: Geometry) -> FreeBlocks<'a> {
        FreeBlocks {
            arena,
            geometry,
            next: self.first_free(arena, geometry),
            budget: Self::walk_budget(arena, geometry),
        }
    }
}

/// See [`LargeHeap::free_blocks`].
pub(crate) struct FreeBlocks<'a> {
    arena: &'a Arena,
    geometry: Geometry,
    next: Option<usize>,
    budget: usize,
}

impl Iterator for FreeBlocks<'_> {
    type Item = FreeBlock;

    fn next(&mut self) -> Option<FreeBlock> {
        let block = self.next?;
        if self.budget == 0 {
            return None;
        }
        self.budget -= 1;
        self.next = LargeHeap::next_free(self.arena, self.geometry, block);
        Some(FreeBlock {
            addr: Addr::from_offset(block + BLOCK_OVERHEAD),
            size: block_size(self.arena, block),
        })
    }
}
