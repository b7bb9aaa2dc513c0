//! Fixed-width values accepted by the checked accessors.
use core::mem::size_of;

mod sealed {
    pub trait Sealed {}
}

/// A fixed-width integer that can be read from or written to managed memory
/// in native byte order.
///
/// This trait is sealed and implemented for the primitive integer types.
pub trait Scalar: Copy + sealed::Sealed {
    /// The width in bytes.
    const WIDTH: usize;

    /// Decode from exactly `WIDTH` bytes.
    fn from_bytes(bytes: &[u8]) -> Self;

    /// Encode into exactly `WIDTH` bytes.
    fn store(self, bytes: &mut [u8]);
}

macro_rules! impl_scalar {
    ($($ty:ty),*) => {$(
        impl sealed::Sealed for $ty {}

        impl Scalar for $ty {
            const WIDTH: usize = size_of::<$ty>();

            #[inline]
            fn from_bytes(bytes: &[u8]) -> Self {
                let mut buf = [0u8; size_of::<$ty>()];
                buf.copy_from_slice(bytes);
                <$ty>::from_ne_bytes(buf)
            }

            #[inline]
            fn store(self, bytes: &mut [u8]) {
                bytes.copy_from_slice(&self.to_ne_bytes());
            }
        }
    )*};
}

impl_scalar!(u8, i8, u16, i16, u32, i32, u64, i64, usize, isize);
