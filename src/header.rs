//! The header word shared by slots and blocks.
//!
//! A header is either [`Header::Live`] or [`Header::Free`] carrying the next
//! free element of the same pool. The word encoding keeps the tag in the two
//! low bits and the link (an arena offset) above them, so decoding never
//! depends on the alignment of the stored offset.

/// The state of a slot or block.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Header {
    /// In use by a caller.
    Live,
    /// On the free list. The payload is the arena offset of the next free
    /// element, or `None` at the end of the list.
    Free(Option<usize>),
}

// `0b00` is never produced by `encode`, so a zeroed word is garbage.
const TAG_MASK: usize = 0b11;
const TAG_LIVE: usize = 0b01;
const TAG_FREE_END: usize = 0b10;
const TAG_FREE_NEXT: usize = 0b11;
const LINK_SHIFT: u32 = 2;

impl Header {
    /// Encode the header into a word.
    ///
    /// Links always fit because the arena never grows past
    /// [`MAX_EXTENT`](crate::arena::MAX_EXTENT).
    #[inline]
    pub fn encode(self) -> usize {
        match self {
            Self::Live => TAG_LIVE,
            Self::Free(None) => TAG_FREE_END,
            Self::Free(Some(next)) => {
                debug_assert!(next <= crate::arena::MAX_EXTENT);
                (next << LINK_SHIFT) | TAG_FREE_NEXT
            }
        }
    }

    /// Decode a header word. Returns `None` if the word was not produced by
    /// [`Self::encode`] (for example, because a caller scribbled over it).
    #[inline]
    pub fn decode(word: usize) -> Option<Self> {
        match word & TAG_MASK {
            TAG_LIVE if word == TAG_LIVE => Some(Self::Live),
            TAG_FREE_END if word == TAG_FREE_END => Some(Self::Free(None)),
            TAG_FREE_NEXT => Some(Self::Free(Some(word >> LINK_SHIFT))),
            _ => None,
        }
    }

    #[inline]
    pub fn is_live(word: usize) -> bool {
        Self::decode(word) == Some(Self::Live)
    }
}
