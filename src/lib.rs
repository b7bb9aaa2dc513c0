//! An inspectable dual-pool memory allocator.
//!
//!  - **Small requests go to a fixed slot table.** `SLOT_COUNT` uniformly
//!    sized slots are threaded into an intrusive free list. Allocation and
//!    deallocation are constant time, and freed slots are reused LIFO.
//!
//!  - **Everything else goes to a block heap.** Variable-size blocks are
//!    managed with first-fit allocation, tail splitting and immediate
//!    coalescing with free neighbors. The heap grows on demand through a
//!    [`HeapSource`] and never shrinks.
//!
//!  - **Every address is checked.** Callers deal in opaque [`Addr`] handles.
//!    Frees, reallocations and the scalar accessors validate the address
//!    (range, grid position, liveness) before touching anything, and report
//!    misuse as an [`AllocError`] instead of corrupting the heap.
//!
//!  - **The state is inspectable.** Slot occupancy, the large free list and
//!    raw payload bytes can be queried at any time.
//!
//! # Examples
//!
//! ```rust
//! use slotheap::{AddrClass, AllocError, DefaultSlotHeap};
//!
//! let mut heap = DefaultSlotHeap::INIT;
//!
//! let small = heap.allocate(40).unwrap();
//! let large = heap.allocate(500).unwrap();
//! assert!(matches!(heap.classify(small), AddrClass::SmallSlot { .. }));
//! assert_eq!(heap.classify(large), AddrClass::LargeBlock);
//!
//! heap.write_int(small + 4, 42).unwrap();
//! assert_eq!(heap.read_int(small + 4), Ok(42));
//!
//! let large = heap.reallocate(large, 2000).unwrap();
//! heap.free(small).unwrap();
//! heap.free(large).unwrap();
//! assert_eq!(heap.free(small), Err(AllocError::NotInUse(small)));
//! ```
//!
//! With the `global` feature (enabled by default), a process-wide instance
//! is available:
//!
//! ```rust
//! # #[cfg(feature = "global")] {
//! let addr = slotheap::global::allocate(16).unwrap();
//! slotheap::global::write_scalar(addr, 7u16).unwrap();
//! assert_eq!(slotheap::global::read_scalar::<u16>(addr), Ok(7));
//! slotheap::global::free(addr).unwrap();
//! # }
//! ```
#![no_std]
#![cfg_attr(feature = "doc_cfg", feature(doc_cfg))]

extern crate alloc;

mod addr;
mod arena;
mod error;
mod header;
mod init;
mod large;
mod pool;
mod scalar;
mod small;
mod source;
mod validator;
pub use self::{
    addr::{Addr, POOL_BASE, WORD},
    error::{AllocError, Exhausted},
    init::*,
    large::FreeBlock,
    pool::{
        DefaultSlotHeap, SlotHeap, Stats, DEFAULT_GROWTH, DEFAULT_SLOT_COUNT, DEFAULT_SLOT_SIZE,
    },
    scalar::Scalar,
    small::SlotState,
    source::{Capped, HeapSource, Unbounded},
    validator::AddrClass,
};

cfg_if::cfg_if! {
    if #[cfg(feature = "global")] {
        pub mod global;
        pub use self::global::{GlobalSlotHeap, GLOBAL};
    }
}

#[cfg(test)]
extern crate std;
