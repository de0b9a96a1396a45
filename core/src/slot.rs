//! TaskSlots: address spaces that own a privileged stack and their tasks.
//!
//! Lock order inside a slot: `waiting_for_slot_stack` guard, then a core's
//! running list, then task state. The slot `state` lock is taken before
//! `waiting_for_lock` and before any running list.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use baton_abi::{
    BankedRegisters, ErrorCode, HANDLER_KINDS, KernelResult, PhysAddr, Psr, SlotHandle,
    SystemCall, TaskHandle, VirtAddr,
};
use spin::Mutex;

use crate::pool::{Pool, PoolEntry, PoolHeader, SlotIndex, TaskIndex};
use crate::task::TaskQueue;

pub const MAX_SLOTS: usize = 32;
pub const MAX_REGIONS: usize = 16;
pub const MAX_SLOT_LOCKS: usize = 16;

pub type SlotPool = Pool<Slot, SlotIndex, MAX_SLOTS>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub virt: VirtAddr,
    pub phys: PhysAddr,
    pub size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HandlerDescriptor {
    pub code: u32,
    pub workspace: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserLock {
    pub address: u32,
    pub owner: TaskIndex,
}

/// The privileged call in flight on a slot stack.
///
/// Stored in the slot while a task owns the stack, so ownership can pass
/// between tasks without copying stack contents. `depth` counts nested
/// calls made by the handler; ownership is released when the outermost
/// call completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SvcContinuation {
    pub owner: TaskHandle,
    pub call: SystemCall,
    pub return_pc: u32,
    pub psr: Psr,
    pub user: BankedRegisters,
    pub depth: u32,
}

pub struct SlotState {
    pub regions: [Option<MemoryRegion>; MAX_REGIONS],
    pub handlers: [HandlerDescriptor; HANDLER_KINDS],
    pub locks: [Option<UserLock>; MAX_SLOT_LOCKS],
    /// Next free address in the pipe window.
    pub pipe_window_next: VirtAddr,
    pub creator: Option<SlotHandle>,
    pub tasks: u32,
}

impl SlotState {
    const fn new() -> Self {
        Self {
            regions: [None; MAX_REGIONS],
            handlers: [HandlerDescriptor {
                code: 0,
                workspace: 0,
            }; HANDLER_KINDS],
            locks: [None; MAX_SLOT_LOCKS],
            pipe_window_next: VirtAddr::new(0),
            creator: None,
            tasks: 0,
        }
    }

    pub fn free_regions(&self) -> usize {
        self.regions.iter().filter(|r| r.is_none()).count()
    }

    pub fn add_region(&mut self, region: MemoryRegion) -> KernelResult<()> {
        let entry = self
            .regions
            .iter_mut()
            .find(|r| r.is_none())
            .ok_or(ErrorCode::NoFreeRegion)?;
        *entry = Some(region);
        Ok(())
    }

    pub fn remove_region(&mut self, virt: VirtAddr) -> Option<MemoryRegion> {
        self.regions
            .iter_mut()
            .find(|r| r.is_some_and(|region| region.virt == virt))
            .and_then(Option::take)
    }

    pub fn lock_entry(&mut self, address: u32) -> Option<&mut Option<UserLock>> {
        self.locks
            .iter_mut()
            .find(|l| l.is_some_and(|lock| lock.address == address))
    }

    pub fn free_lock_entry(&mut self) -> Option<&mut Option<UserLock>> {
        self.locks.iter_mut().find(|l| l.is_none())
    }
}

pub struct Slot {
    header: PoolHeader,
    /// Raw handle of the task owning the slot stack, 0 when unowned.
    pub(crate) svc_stack_owner: AtomicU32,
    pub(crate) callback_requested: AtomicBool,
    pub(crate) waiting_for_slot_stack: TaskQueue,
    pub(crate) waiting_for_lock: TaskQueue,
    pub(crate) continuation: Mutex<Option<SvcContinuation>>,
    pub(crate) state: Mutex<SlotState>,
}

impl Slot {
    pub fn stack_owner(&self) -> Option<TaskHandle> {
        match self.svc_stack_owner.load(Ordering::Acquire) {
            0 => None,
            raw => Some(TaskHandle::from_raw(raw)),
        }
    }

    pub fn continuation(&self) -> Option<SvcContinuation> {
        *self.continuation.lock()
    }

    pub(crate) fn prepare(&self, creator: Option<SlotHandle>, window_base: VirtAddr) {
        debug_assert!(self.waiting_for_slot_stack.is_empty());
        debug_assert!(self.waiting_for_lock.is_empty());
        self.svc_stack_owner.store(0, Ordering::Relaxed);
        self.callback_requested.store(false, Ordering::Relaxed);
        *self.continuation.lock() = None;
        let mut state = self.state.lock();
        *state = SlotState::new();
        state.pipe_window_next = window_base;
        state.creator = creator;
    }
}

impl PoolEntry for Slot {
    fn empty() -> Self {
        Self {
            header: PoolHeader::new(),
            svc_stack_owner: AtomicU32::new(0),
            callback_requested: AtomicBool::new(false),
            waiting_for_slot_stack: TaskQueue::new(),
            waiting_for_lock: TaskQueue::new(),
            continuation: Mutex::new(None),
            state: Mutex::new(SlotState::new()),
        }
    }

    #[inline]
    fn header(&self) -> &PoolHeader {
        &self.header
    }
}
