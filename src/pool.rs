//! The allocator context
use core::ops::Range;

use crate::{
    addr::{Addr, WORD},
    arena::Arena,
    error::{AllocError, Exhausted},
    header::Header,
    large::{FreeBlock, LargeHeap},
    small::{SlotState, SmallPool},
    source::{HeapSource, Unbounded},
    validator::{AddrClass, Geometry},
    Init,
};

mod access;

/// The default slot size in bytes.
pub const DEFAULT_SLOT_SIZE: usize = 128;
/// The default number of slots.
pub const DEFAULT_SLOT_COUNT: usize = 100;
/// The default number of bytes the large heap asks for when it is first
/// formatted.
pub const DEFAULT_GROWTH: usize = 1024;

/// [`SlotHeap`] with the default configuration.
pub type DefaultSlotHeap =
    SlotHeap<Unbounded, DEFAULT_SLOT_SIZE, DEFAULT_SLOT_COUNT, DEFAULT_GROWTH>;

#[cfg_attr(doc, svgbobdoc::transform)]
/// A dual-pool allocator: a fixed table of `SLOT_COUNT` slots of `SLOT_SIZE`
/// bytes for small requests, and a first-fit heap of variable-size blocks
/// for everything else.
///
/// # Memory Layout
///
/// <center>
/// ```svgbob
///   POOL_BASE                  POOL_BASE + SLOT_SIZE * SLOT_COUNT        heap end
///   |                          |                                               |
///   v                          v                                               v
///   +------+------+-----+------+--------+--------+------------+--------+-------+
///   | slot | slot | ... | slot | block  | block  |    ...     | block  |       |
///   |  0   |  1   |     | N-1  |        |        |            |        | grown |
///   +------+------+-----+------+--------+--------+------------+--------+-------+
///   '------------.-------------''------------------------.---------------------'
///                |                                       |
///        small pool (fixed)                     large heap (grows on demand)
///
///   slot:   ,--------+---------------------------,
///           | header |  payload                  |   SLOT_SIZE bytes
///           '--------+---------------------------'
///
///   block:  ,--------+--------+------------------------------------,
///           | header |  size  |  payload                           |   size bytes
///           '--------+--------+------------------------------------'
/// ```
/// </center>
///
/// Requests of up to `SLOT_SIZE - WORD` bytes are served from the slot
/// table and never fall back to the large heap. The large heap grows through
/// the [`HeapSource`] `S` and never gives memory back.
///
/// Both pools are set up lazily on the first allocation or on
/// [`reset`](Self::reset).
///
/// # Addresses
///
/// Every operation takes and returns [`Addr`] handles. Each one is checked
/// before anything is mutated: a bogus, stale or double-freed address is
/// reported as an [`AllocError`] and leaves the allocator untouched.
#[derive(Debug)]
pub struct SlotHeap<S, const SLOT_SIZE: usize, const SLOT_COUNT: usize, const GROWTH: usize> {
    arena: Arena,
    small: SmallPool,
    large: LargeHeap,
    source: S,
    initialized: bool,
}

/// A summary of a [`SlotHeap`]'s occupancy.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Stats {
    /// The number of slots on the small free list.
    pub free_slots: usize,
    /// The number of slots handed out.
    pub used_slots: usize,
    /// The number of blocks on the large free list.
    pub free_blocks: usize,
    /// The total bytes spanned by those blocks, headers included.
    pub free_large_bytes: usize,
    /// The number of bytes granted so far, slot table included.
    pub heap_extent: usize,
}

/// Where a validated payload address lives.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Located {
    /// A slot index.
    Slot(usize),
    /// The arena offset of a block's header.
    Block(usize),
}

impl<S: Init, const SLOT_SIZE: usize, const SLOT_COUNT: usize, const GROWTH: usize> Init
    for SlotHeap<S, SLOT_SIZE, SLOT_COUNT, GROWTH>
{
    const INIT: Self = Self::INIT;
}

impl<S: Init, const SLOT_SIZE: usize, const SLOT_COUNT: usize, const GROWTH: usize> Default
    for SlotHeap<S, SLOT_SIZE, SLOT_COUNT, GROWTH>
{
    #[inline]
    fn default() -> Self {
        Self::INIT
    }
}

impl<S: Init, const SLOT_SIZE: usize, const SLOT_COUNT: usize, const GROWTH: usize>
    SlotHeap<S, SLOT_SIZE, SLOT_COUNT, GROWTH>
{
    /// An uninitialized allocator. Nothing is reserved until the first
    /// allocation.
    pub const INIT: Self = Self::with_source(S::INIT);
}

impl<S, const SLOT_SIZE: usize, const SLOT_COUNT: usize, const GROWTH: usize>
    SlotHeap<S, SLOT_SIZE, SLOT_COUNT, GROWTH>
{
    /// Evaluates successfully if the parameters are valid.
    const VALID: () = {
        if SLOT_SIZE % WORD != 0 {
            panic!("`SLOT_SIZE` must be a multiple of the word size");
        }
        if SLOT_SIZE < 4 * WORD {
            panic!("`SLOT_SIZE` must be at least four words");
        }
        if SLOT_COUNT == 0 {
            panic!("`SLOT_COUNT` must not be zero");
        }
        if SLOT_SIZE.checked_mul(SLOT_COUNT).is_none() {
            panic!("the slot table does not fit in the address space");
        }
        if GROWTH % WORD != 0 || GROWTH < 3 * WORD {
            panic!("`GROWTH` must be a multiple of the word size and at least three words");
        }
    };

    const GEOMETRY: Geometry = Geometry {
        slot_size: SLOT_SIZE,
        slot_count: SLOT_COUNT,
    };

    /// The largest request served by the small pool.
    pub const SLOT_PAYLOAD: usize = SLOT_SIZE - WORD;

    /// Construct an uninitialized allocator that grows through `source`.
    pub const fn with_source(source: S) -> Self {
        let () = Self::VALID;
        Self {
            arena: Arena::INIT,
            small: SmallPool::INIT,
            large: LargeHeap::INIT,
            source,
            initialized: false,
        }
    }

    /// Get a reference to the heap source.
    #[inline]
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Get a mutable reference to the heap source.
    #[inline]
    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Whether `addr` lies in `[POOL_BASE, heap end)`.
    #[inline]
    pub fn is_managed(&self, addr: Addr) -> bool {
        Self::GEOMETRY.is_managed(self.arena.len(), addr)
    }

    /// Classify `addr` by its position.
    ///
    /// This doesn't consult any header: [`AddrClass::LargeBlock`] only says
    /// that a block *could* start there. Operations additionally confirm that
    /// a block's payload starts exactly at `addr`.
    #[inline]
    pub fn classify(&self, addr: Addr) -> AddrClass {
        Self::GEOMETRY.classify(self.arena.len(), addr)
    }

    /// Find the slot or block whose payload starts at `addr`.
    fn locate(&self, addr: Addr) -> Result<Located, AllocError> {
        let invalid = AllocError::InvalidAddress(addr);
        match self.classify(addr) {
            AddrClass::SmallSlot { index } => Ok(Located::Slot(index)),
            AddrClass::LargeBlock => {
                let offset = addr.offset().ok_or(invalid)?;
                self.large
                    .block_at_payload(&self.arena, Self::GEOMETRY, offset)
                    .map(Located::Block)
            }
            AddrClass::OutOfRange | AddrClass::Malformed => Err(invalid),
        }
    }

    /// The arena offset of the header governing `located`.
    #[inline]
    fn header_offset(located: Located) -> usize {
        match located {
            Located::Slot(index) => Self::GEOMETRY.slot_offset(index),
            Located::Block(block) => block,
        }
    }

    /// The payload range of `located`.
    fn payload_range(&self, located: Located) -> Range<usize> {
        match located {
            Located::Slot(index) => {
                let slot = Self::GEOMETRY.slot_offset(index);
                slot + WORD..slot + SLOT_SIZE
            }
            Located::Block(block) => self.large.payload_range(&self.arena, block),
        }
    }

    /// Like [`Self::locate`], but also require the slot or block to be live.
    fn locate_live(&self, addr: Addr) -> Result<Located, AllocError> {
        let located = self.locate(addr)?;
        if Header::is_live(self.arena.read_word(Self::header_offset(located))) {
            Ok(located)
        } else {
            Err(AllocError::NotInUse(addr))
        }
    }

    /// The raw payload bytes of the slot or block whose payload starts at
    /// `addr`, whether it is live or free.
    pub fn block_bytes(&self, addr: Addr) -> Result<&[u8], AllocError> {
        let located = self.locate(addr)?;
        Ok(self.arena.bytes(self.payload_range(located)))
    }

    /// The payload of the live slot or block at `addr`.
    ///
    /// The slice covers the whole payload, which may be longer than the size
    /// originally requested.
    pub fn payload(&self, addr: Addr) -> Result<&[u8], AllocError> {
        self.locate_live(addr)
            .map(|located| self.arena.bytes(self.payload_range(located)))
            .inspect_err(|e| log::warn!("payload({}) rejected: {}", addr, e))
    }

    /// The mutable counterpart of [`Self::payload`].
    pub fn payload_mut(&mut self, addr: Addr) -> Result<&mut [u8], AllocError> {
        match self.locate_live(addr) {
            Ok(located) => {
                let range = self.payload_range(located);
                Ok(self.arena.bytes_mut(range))
            }
            Err(e) => {
                log::warn!("payload_mut({}) rejected: {}", addr, e);
                Err(e)
            }
        }
    }

    /// Iterate over every slot with its state, in index order.
    ///
    /// Before the first allocation every slot is reported as free.
    pub fn slot_occupancy(&self) -> impl Iterator<Item = (usize, SlotState)> + '_ {
        (0..SLOT_COUNT).map(move |index| {
            let state = if self.initialized {
                self.small.state(&self.arena, Self::GEOMETRY, index)
            } else {
                SlotState::Free
            };
            (index, state)
        })
    }

    /// Iterate over the large free list in list order (most recently freed
    /// first).
    pub fn free_large_blocks(&self) -> impl Iterator<Item = FreeBlock> + '_ {
        self.large.free_blocks(&self.arena, Self::GEOMETRY)
    }

    /// Summarize the current occupancy.
    pub fn stats(&self) -> Stats {
        let mut stats = Stats {
            heap_extent: self.arena.len(),
            ..Stats::default()
        };
        if self.initialized {
            stats.free_slots = self.small.free_slots(&self.arena, Self::GEOMETRY).count();
            stats.used_slots = self
                .slot_occupancy()
                .filter(|&(_, state)| state == SlotState::Used)
                .count();
        }
        for block in self.free_large_blocks() {
            stats.free_blocks += 1;
            stats.free_large_bytes += block.size;
        }
        stats
    }
}

impl<S: HeapSource, const SLOT_SIZE: usize, const SLOT_COUNT: usize, const GROWTH: usize>
    SlotHeap<S, SLOT_SIZE, SLOT_COUNT, GROWTH>
{
    /// Format both pools if that hasn't happened yet.
    fn ensure_init(&mut self) -> Result<(), AllocError> {
        if self.initialized {
            return Ok(());
        }

        self.arena
            .reserve_fixed(Self::GEOMETRY.table_len())
            .ok_or(AllocError::OutOfMemory(Exhausted::System))?;
        self.small.reset(&mut self.arena, Self::GEOMETRY);
        self.large
            .reset(&mut self.arena, &mut self.source, Self::GEOMETRY, GROWTH);
        self.initialized = true;
        Ok(())
    }

    /// Allocate `size` bytes.
    ///
    /// Requests of up to [`SLOT_PAYLOAD`](Self::SLOT_PAYLOAD) bytes always
    /// come from the small pool, and fail with
    /// `OutOfMemory(Exhausted::Small)` once every slot is taken.
    pub fn allocate(&mut self, size: usize) -> Result<Addr, AllocError> {
        self.allocate_inner(size)
            .inspect(|addr| log::trace!("allocate({}) = {}", size, addr))
            .inspect_err(|e| log::warn!("allocate({}) failed: {}", size, e))
    }

    fn allocate_inner(&mut self, size: usize) -> Result<Addr, AllocError> {
        self.ensure_init()?;
        let offset = if size <= Self::SLOT_PAYLOAD {
            self.small.allocate(&mut self.arena, Self::GEOMETRY)?
        } else {
            self.large
                .allocate(&mut self.arena, &mut self.source, Self::GEOMETRY, size)?
        };
        Ok(Addr::from_offset(offset))
    }

    /// Release the slot or block whose payload starts at `addr`.
    pub fn free(&mut self, addr: Addr) -> Result<(), AllocError> {
        self.free_inner(addr)
            .inspect(|()| log::trace!("free({})", addr))
            .inspect_err(|e| log::warn!("free({}) rejected: {}", addr, e))
    }

    fn free_inner(&mut self, addr: Addr) -> Result<(), AllocError> {
        match self.locate(addr)? {
            Located::Slot(index) => self.small.free(&mut self.arena, Self::GEOMETRY, index),
            Located::Block(block) => self.large.free(&mut self.arena, Self::GEOMETRY, block),
        }
    }

    /// Resize the allocation at `addr` to hold `size` bytes, preserving its
    /// contents up to the smaller of the two sizes.
    ///
    /// The returned address may differ from `addr`, in which case `addr` has
    /// been freed. A slot only ever moves when it outgrows its payload; a
    /// large block that shrinks into the small range stays where it is. On
    /// failure the original allocation is left intact.
    pub fn reallocate(&mut self, addr: Addr, size: usize) -> Result<Addr, AllocError> {
        self.reallocate_inner(addr, size)
            .inspect(|new_addr| log::trace!("reallocate({}, {}) = {}", addr, size, new_addr))
            .inspect_err(|e| log::warn!("reallocate({}, {}) failed: {}", addr, size, e))
    }

    fn reallocate_inner(&mut self, addr: Addr, size: usize) -> Result<Addr, AllocError> {
        match self.locate_live(addr)? {
            Located::Slot(_) if size <= Self::SLOT_PAYLOAD => Ok(addr),
            Located::Slot(index) => {
                let new_payload = self.large.allocate(
                    &mut self.arena,
                    &mut self.source,
                    Self::GEOMETRY,
                    size,
                )?;
                let old_payload = Self::GEOMETRY.slot_offset(index) + WORD;
                self.arena
                    .copy_within(old_payload, new_payload, Self::SLOT_PAYLOAD);
                self.small.free(&mut self.arena, Self::GEOMETRY, index)?;
                Ok(Addr::from_offset(new_payload))
            }
            Located::Block(block) => self
                .large
                .reallocate(
                    &mut self.arena,
                    &mut self.source,
                    Self::GEOMETRY,
                    block,
                    size,
                )
                .map(Addr::from_offset),
        }
    }

    /// Return every slot and block to its free list.
    ///
    /// The large region keeps its extent and becomes one free block. All
    /// previously returned addresses are invalidated. Before the first
    /// allocation this performs the initial setup instead.
    pub fn reset(&mut self) -> Result<(), AllocError> {
        if !self.initialized {
            return self
                .ensure_init()
                .inspect_err(|e| log::warn!("reset failed: {}", e));
        }

        self.small.reset(&mut self.arena, Self::GEOMETRY);
        self.large
            .reset(&mut self.arena, &mut self.source, Self::GEOMETRY, GROWTH);
        log::debug!("reset: heap extent is {} bytes", self.arena.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests;
