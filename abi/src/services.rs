//! Collaborator interfaces - the only way the core reaches outside itself.
//!
//! These traits live in `abi` (no dependencies) so that:
//! - the core depends on `abi` and calls through trait objects
//! - memory managers, interrupt controllers and consoles implement them
//! - boot code wires concrete implementations into the kernel
//!
//! Page tables, the page allocator and device drivers stay on the far side.

use crate::addr::{PhysAddr, VirtAddr};
use crate::task::SlotHandle;

/// Physical memory and address-space control.
pub trait MemoryServices: Send + Sync {
    /// Allocate `size` bytes of physically contiguous memory aligned to
    /// `alignment`. `None` when memory is exhausted.
    fn allocate_pages(&self, size: u32, alignment: u32) -> Option<PhysAddr>;

    fn free_pages(&self, base: PhysAddr, size: u32);

    /// Make `slot`'s address space the active one on `core`.
    fn switch_to_map(&self, core: usize, slot: SlotHandle);

    /// Privileged mapping of `size` bytes of `physical` at `virt` in `slot`.
    fn map_at(&self, slot: SlotHandle, virt: VirtAddr, physical: PhysAddr, size: u32) -> bool;

    fn unmap(&self, slot: SlotHandle, virt: VirtAddr, size: u32);

    /// Copy task memory into `buf`. `false` when any byte is unmapped.
    fn read_user(&self, slot: SlotHandle, virt: VirtAddr, buf: &mut [u8]) -> bool;

    fn clean_cache(&self, slot: SlotHandle, virt: VirtAddr, len: u32);
}

/// Per-core interrupt source masking.
pub trait InterruptController: Send + Sync {
    fn mask(&self, core: usize, source: u32);
    fn unmask(&self, core: usize, source: u32);
}

/// Sink for `DebugString` / `DebugNumber`.
pub trait DebugConsole: Send + Sync {
    fn write(&self, bytes: &[u8]);
}
