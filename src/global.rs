//! A process-wide allocator context.
use parking_lot::{const_mutex, Mutex};

use crate::{AllocError, Addr, DefaultSlotHeap, Init, Scalar, Stats};

/// [`DefaultSlotHeap`] behind a lock, usable from a `static`.
///
/// Each method holds the lock for the duration of one operation. Use
/// [`with_heap`](Self::with_heap) to run several operations atomically or
/// to reach the introspection queries.
#[cfg_attr(feature = "doc_cfg", doc(cfg(feature = "global")))]
pub struct GlobalSlotHeap {
    inner: Mutex<DefaultSlotHeap>,
}

impl Init for GlobalSlotHeap {
    const INIT: Self = Self::INIT;
}

impl GlobalSlotHeap {
    /// The initializer.
    pub const INIT: Self = Self {
        inner: const_mutex(DefaultSlotHeap::INIT),
    };

    /// Run `f` with exclusive access to the underlying context.
    #[inline]
    pub fn with_heap<R>(&self, f: impl FnOnce(&mut DefaultSlotHeap) -> R) -> R {
        f(&mut self.inner.lock())
    }

    #[inline]
    pub fn allocate(&self, size: usize) -> Result<Addr, AllocError> {
        self.inner.lock().allocate(size)
    }

    #[inline]
    pub fn free(&self, addr: Addr) -> Result<(), AllocError> {
        self.inner.lock().free(addr)
    }

    #[inline]
    pub fn reallocate(&self, addr: Addr, size: usize) -> Result<Addr, AllocError> {
        self.inner.lock().reallocate(addr, size)
    }

    #[inline]
    pub fn read_scalar<T: Scalar>(&self, addr: Addr) -> Result<T, AllocError> {
        self.inner.lock().read_scalar(addr)
    }

    #[inline]
    pub fn write_scalar<T: Scalar>(&self, addr: Addr, value: T) -> Result<(), AllocError> {
        self.inner.lock().write_scalar(addr, value)
    }

    #[inline]
    pub fn reset(&self) -> Result<(), AllocError> {
        self.inner.lock().reset()
    }

    #[inline]
    pub fn stats(&self) -> Stats {
        self.inner.lock().stats()
    }
}

/// The process-wide instance used by the free functions of this module.
#[cfg_attr(feature = "doc_cfg", doc(cfg(feature = "global")))]
pub static GLOBAL: GlobalSlotHeap = GlobalSlotHeap::INIT;

/// [`SlotHeap::allocate`] on [`GLOBAL`].
///
/// [`SlotHeap::allocate`]: crate::SlotHeap::allocate
#[inline]
pub fn allocate(size: usize) -> Result<Addr, AllocError> {
    GLOBAL.allocate(size)
}

/// [`SlotHeap::free`] on [`GLOBAL`].
///
/// [`SlotHeap::free`]: crate::SlotHeap::free
#[inline]
pub fn free(addr: Addr) -> Result<(), AllocError> {
    GLOBAL.free(addr)
}

/// [`SlotHeap::reallocate`] on [`GLOBAL`].
///
/// [`SlotHeap::reallocate`]: crate::SlotHeap::reallocate
#[inline]
pub fn reallocate(addr: Addr, size: usize) -> Result<Addr, AllocError> {
    GLOBAL.reallocate(addr, size)
}

#[inline]
pub fn read_scalar<T: Scalar>(addr: Addr) -> Result<T, AllocError> {
    GLOBAL.read_scalar(addr)
}

#[inline]
pub fn write_scalar<T: Scalar>(addr: Addr, value: T) -> Result<(), AllocError> {
    GLOBAL.write_scalar(addr, value)
}

/// Reset [`GLOBAL`]. Every address handed out so far becomes invalid.
#[inline]
pub fn reset() -> Result<(), AllocError> {
    GLOBAL.reset()
}
