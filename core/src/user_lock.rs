//! Slot-wide user locks, keyed by an address in the slot.
//!
//! A contended claim parks the caller on the slot's `waiting_for_lock`
//! queue; release hands the lock straight to the oldest waiter for the
//! same address, so a released lock is never up for grabs while someone
//! waits for it.

use core::sync::atomic::Ordering;

use baton_abi::{ErrorCode, KernelResult, SyscallOutput};
use baton_lib::klog_trace;

use crate::kernel::Kernel;
use crate::pool::{SlotIndex, TaskIndex};
use crate::scheduler::Placement;
use crate::slot::{MAX_SLOT_LOCKS, SlotState, UserLock};
use crate::syscall::{SvcContext, SyscallDisposition};
use crate::task::{Residence, Unqueued};

impl Kernel {
    /// Give the lock at `address` to its oldest waiter, or free it.
    fn pass_lock(&self, slot: SlotIndex, state: &mut SlotState, address: u32) -> Option<Unqueued> {
        let entry = state.lock_entry(address)?;
        let waiter = self.slot(slot).waiting_for_lock.remove_where(&self.tasks, |task| {
            self.task(task).waiting_lock.load(Ordering::Acquire) == address
        });
        match &waiter {
            Some(token) => {
                *entry = Some(UserLock {
                    address,
                    owner: token.first(),
                });
            }
            None => *entry = None,
        }
        waiter
    }

    /// Run a waiter that has just been handed its lock.
    fn wake_lock_waiter(&self, token: Unqueued) {
        let task = token.first();
        {
            let mut state = self.task(task).state.lock();
            state.leave();
            state.context.r[0] = 0;
            state.context.clear_error();
        }
        self.task(task).waiting_lock.store(0, Ordering::Release);
        klog_trace!("baton: lock handed to task {}", task.index());
        self.make_runnable(token, Placement::AfterHead);
    }

    /// Release every lock `task` holds in `slot`. Used when a task ends.
    pub(crate) fn release_locks_of(&self, slot: SlotIndex, task: TaskIndex) {
        let mut woken: [Option<Unqueued>; MAX_SLOT_LOCKS] = [const { None }; MAX_SLOT_LOCKS];
        {
            let mut state = self.slot(slot).state.lock();
            let mut held = [0u32; MAX_SLOT_LOCKS];
            let mut count = 0;
            for lock in state.locks.iter().flatten() {
                if lock.owner == task {
                    held[count] = lock.address;
                    count += 1;
                }
            }
            for (address, out) in held[..count].iter().zip(woken.iter_mut()) {
                *out = self.pass_lock(slot, &mut state, *address);
            }
        }
        for token in woken.into_iter().flatten() {
            self.wake_lock_waiter(token);
        }
    }
}

/// `r0` = lock address. Returns `r0` = 0 once the lock is taken, or 1 if
/// the caller already held it. Blocks while another task holds it.
pub fn syscall_lock_claim(ctx: &mut SvcContext<'_>) -> KernelResult<SyscallDisposition> {
    let kernel = ctx.kernel();
    let address = ctx.arg(0);
    if address == 0 {
        return Err(ErrorCode::InvalidArgument);
    }
    let me = ctx.task_index();
    let slot_index = ctx.slot_index();
    let slot = ctx.slot();
    let mut state = slot.state.lock();

    let owner = state.lock_entry(address).and_then(|entry| *entry).map(|lock| lock.owner);
    match owner {
        None => {
            let entry = state.free_lock_entry().ok_or(ErrorCode::TooManyLocks)?;
            *entry = Some(UserLock { address, owner: me });
            Ok(SyscallDisposition::Complete(SyscallOutput::r0(0)))
        }
        Some(owner) if owner == me => Ok(SyscallDisposition::Complete(SyscallOutput::r0(1))),
        Some(_) => {
            ctx.ensure_may_block()?;
            let task = ctx.task();
            task.waiting_lock.store(address, Ordering::Release);
            let token = kernel.detach_running(ctx.core(), me);
            task.state
                .lock()
                .enter(me, Residence::WaitingForLock(slot_index));
            slot.waiting_for_lock.push_back(&kernel.tasks, token);
            klog_trace!("baton: task {} waits for lock {:#x}", me.index(), address);
            Ok(SyscallDisposition::Blocked)
        }
    }
}

/// `r0` = lock address held by the caller.
pub fn syscall_lock_release(ctx: &mut SvcContext<'_>) -> KernelResult<SyscallDisposition> {
    let kernel = ctx.kernel();
    let address = ctx.arg(0);
    let me = ctx.task_index();
    let woken = {
        let mut state = ctx.slot().state.lock();
        let held = state
            .lock_entry(address)
            .and_then(|entry| *entry)
            .is_some_and(|lock| lock.owner == me);
        if !held {
            return Err(ErrorCode::NotLockOwner);
        }
        kernel.pass_lock(ctx.slot_index(), &mut state, address)
    };
    if let Some(token) = woken {
        kernel.wake_lock_waiter(token);
    }
    Ok(SyscallDisposition::Complete(SyscallOutput::none()))
}
