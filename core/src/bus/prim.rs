
use std::fmt;
use std::mem;

/// Size of the real-mode address space.
pub const ADDRESS_SPACE: u32 = 0x0010_0000;
/// Mask applied to every linear address (no A20 gate on an XT).
pub const ADDRESS_MASK: u32 = ADDRESS_SPACE - 1;

/// Helper functions implemented on numeric primitives.
///
/// These let us easily convert between numeric primitives and little-endian
/// byte slices, which is how the guest lays out every multi-byte value.
pub trait AccessWidth: Sized + Copy {
    fn from_le_slice(data: &[u8]) -> Self;
    fn write_le_slice(self, dst: &mut [u8]);
    fn width() -> usize { mem::size_of::<Self>() }
}

/// Macro to make implementing AccessWidth a bit less verbose.
macro_rules! impl_accesswidth {
    ($type:ident) => {
        impl AccessWidth for $type {
            fn from_le_slice(data: &[u8]) -> Self {
                let mut buf = [0u8; mem::size_of::<$type>()];
                buf.copy_from_slice(&data[..mem::size_of::<$type>()]);
                Self::from_le_bytes(buf)
            }
            fn write_le_slice(self, dst: &mut [u8]) {
                dst[..mem::size_of::<$type>()].copy_from_slice(&self.to_le_bytes());
            }
        }
    };
}

// Implement AccessWidth for the supported numeric primitives.
impl_accesswidth!(u32);
impl_accesswidth!(u16);
impl_accesswidth!(u8);


/// A linear guest address.
///
/// Segment:offset pairs are resolved into a [Pointer] exactly once, when the
/// guest hands one to us; everything past that point only sees linear
/// addresses.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Pointer(u32);
impl Pointer {
    /// Resolve a real-mode `segment:offset` pair.
    pub const fn far(seg: u16, off: u16) -> Self {
        Pointer((((seg as u32) << 4) + off as u32) & ADDRESS_MASK)
    }

    pub const fn linear(addr: u32) -> Self {
        Pointer(addr & ADDRESS_MASK)
    }

    /// Offset this pointer by some number of bytes, wrapping at 1MiB.
    pub const fn add(self, n: usize) -> Self {
        Pointer((self.0.wrapping_add(n as u32)) & ADDRESS_MASK)
    }

    pub const fn addr(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pointer({:05x})", self.0)
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:05x}", self.0)
    }
}
