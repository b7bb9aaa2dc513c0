//! Checked reads and writes of scalars at arbitrary payload addresses.
use core::ops::Range;

use super::SlotHeap;
use crate::{
    addr::{Addr, WORD},
    error::AllocError,
    header::Header,
    large::BLOCK_OVERHEAD,
    scalar::Scalar,
};

impl<S, const SLOT_SIZE: usize, const SLOT_COUNT: usize, const GROWTH: usize>
    SlotHeap<S, SLOT_SIZE, SLOT_COUNT, GROWTH>
{
    /// Validate an access of `width` bytes at `addr` and return the arena
    /// range it covers.
    ///
    /// `addr` may point anywhere inside a payload. The access is bounded by
    /// the heap end but not by the payload's length, so a wide access near
    /// the end of a payload can reach into the next slot or block.
    fn checked_range(&self, addr: Addr, width: usize) -> Result<Range<usize>, AllocError> {
        let invalid = AllocError::InvalidAddress(addr);
        let heap_end = self.arena.len();

        let start = addr
            .offset()
            .filter(|&offset| offset < heap_end)
            .ok_or(invalid)?;
        let end = start
            .checked_add(width)
            .filter(|&end| end <= heap_end)
            .ok_or(invalid)?;

        let (header, payload_start) = if start < Self::GEOMETRY.table_len() {
            let slot = start - start % SLOT_SIZE;
            (slot, slot + WORD)
        } else {
            let block = self
                .large
                .block_containing(&self.arena, Self::GEOMETRY, start)
                .ok_or(invalid)?;
            (block, block + BLOCK_OVERHEAD)
        };

        // Header words aren't payload
        if start < payload_start {
            return Err(invalid);
        }
        if !Header::is_live(self.arena.read_word(header)) {
            return Err(AllocError::NotInUse(addr));
        }
        Ok(start..end)
    }

    /// Read a `T` stored at `addr`, which may be anywhere inside a live
    /// payload.
    pub fn read_scalar<T: Scalar>(&self, addr: Addr) -> Result<T, AllocError> {
        self.checked_range(addr, T::WIDTH)
            .map(|range| T::from_bytes(self.arena.bytes(range)))
            .inspect_err(|e| log::warn!("read of {} bytes at {} rejected: {}", T::WIDTH, addr, e))
    }

    /// Store `value` at `addr`, which may be anywhere inside a live payload.
    pub fn write_scalar<T: Scalar>(&mut self, addr: Addr, value: T) -> Result<(), AllocError> {
        match self.checked_range(addr, T::WIDTH) {
            Ok(range) => {
                value.store(self.arena.bytes_mut(range));
                Ok(())
            }
            Err(e) => {
                log::warn!("write of {} bytes at {} rejected: {}", T::WIDTH, addr, e);
                Err(e)
            }
        }
    }

    #[inline]
    pub fn read_int(&self, addr: Addr) -> Result<i32, AllocError> {
        self.read_scalar(addr)
    }

    #[inline]
    pub fn write_int(&mut self, addr: Addr, value: i32) -> Result<(), AllocError> {
        self.write_scalar(addr, value)
    }

    #[inline]
    pub fn read_byte(&self, addr: Addr) -> Result<u8, AllocError> {
        self.read_scalar(addr)
    }

    #[inline]
    pub fn write_byte(&mut self, addr: Addr, value: u8) -> Result<(), AllocError> {
        self.write_scalar(addr, value)
    }
}
