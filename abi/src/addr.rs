//! Physical and virtual address types.
//!
//! Task address spaces are 32 bits wide (addresses travel in `u32`
//! registers); physical memory handed out by the page allocator may lie
//! anywhere in a 64-bit space. The newtypes keep the two from being mixed up
//! when a pipe's backing memory is mapped into a slot.

/// A physical memory address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct PhysAddr(pub u64);

/// A virtual address inside a TaskSlot's address space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct VirtAddr(pub u32);

pub const PAGE_SIZE: u32 = 4096;

// =============================================================================
// PhysAddr implementation
// =============================================================================

impl PhysAddr {
    pub const NULL: Self = Self(0);

    #[inline]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn offset(self, bytes: u64) -> Self {
        Self(self.0 + bytes)
    }
}

// =============================================================================
// VirtAddr implementation
// =============================================================================

impl VirtAddr {
    pub const NULL: Self = Self(0);

    #[inline]
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Offset by `bytes`, wrapping within the 32-bit space.
    #[inline]
    pub const fn offset(self, bytes: u32) -> Self {
        Self(self.0.wrapping_add(bytes))
    }

    /// Round up to `align` (a power of two). `None` when the result would
    /// leave the 32-bit space.
    #[inline]
    pub const fn align_up(self, align: u32) -> Option<Self> {
        match self.0.checked_add(align - 1) {
            Some(v) => Some(Self(v & !(align - 1))),
            None => None,
        }
    }
}
