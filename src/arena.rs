//! The byte buffer holding both pools.
use alloc::vec::Vec;
use core::ops::Range;

use crate::{addr::WORD, header::Header, source::HeapSource};

/// The arena never grows past this many bytes, which keeps every offset
/// representable in a tagged header link.
pub(crate) const MAX_EXTENT: usize = usize::MAX >> 2;

/// A growable, offset-addressed byte buffer. It only ever grows.
///
/// Word accessors take offsets that the caller has already validated; an
/// out-of-bounds offset is a bug in this crate and panics.
#[derive(Debug)]
pub(crate) struct Arena {
    bytes: Vec<u8>,
}

impl Arena {
    pub const INIT: Self = Self { bytes: Vec::new() };

    /// The current extent in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn read_word(&self, offset: usize) -> usize {
        let mut buf = [0u8; WORD];
        buf.copy_from_slice(&self.bytes[offset..offset + WORD]);
        usize::from_ne_bytes(buf)
    }

    #[inline]
    pub fn write_word(&mut self, offset: usize, value: usize) {
        self.bytes[offset..offset + WORD].copy_from_slice(&value.to_ne_bytes());
    }

    /// Decode the header word at `offset`.
    #[inline]
    pub fn header(&self, offset: usize) -> Option<Header> {
        Header::decode(self.read_word(offset))
    }

    #[inline]
    pub fn set_header(&mut self, offset: usize, header: Header) {
        self.write_word(offset, header.encode());
    }

    #[inline]
    pub fn bytes(&self, range: Range<usize>) -> &[u8] {
        &self.bytes[range]
    }

    #[inline]
    pub fn bytes_mut(&mut self, range: Range<usize>) -> &mut [u8] {
        &mut self.bytes[range]
    }

    /// Copy `len` bytes from `src` to `dst`. The ranges may overlap.
    #[inline]
    pub fn copy_within(&mut self, src: usize, dst: usize, len: usize) {
        self.bytes.copy_within(src..src + len, dst);
    }

    /// Extend the arena by `additional` zeroed bytes without consulting a
    /// heap source. Used once, for the slot table.
    pub fn reserve_fixed(&mut self, additional: usize) -> Option<usize> {
        self.extend(additional)
    }

    /// Ask `source` for `additional` bytes and append them. Returns the old
    /// extent (the offset of the first new byte) on success.
    pub fn grow(&mut self, source: &mut impl HeapSource, additional: usize) -> Option<usize> {
        let extent = self.len();
        if !source.grant(extent, additional) {
            log::debug!("heap source refused {} bytes at extent {}", additional, extent);
            return None;
        }
        self.extend(additional)
    }

    fn extend(&mut self, additional: usize) -> Option<usize> {
        let extent = self.len();
        let new_extent = extent.checked_add(additional)?;
        if new_extent > MAX_EXTENT {
            return None;
        }
        if self.bytes.try_reserve_exact(additional).is_err() {
            log::debug!("could not reserve {} bytes at extent {}", additional, extent);
            return None;
        }
        self.bytes.resize(new_extent, 0);
        log::debug!("arena grown: {} -> {} bytes", extent, new_extent);
        Some(extent)
    }
}
