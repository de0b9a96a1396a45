//! Run queue operations.
//!
//! The head of a core's running ring is the task that runs next. Yielding
//! rotates the ring; blocking unlinks the head and hands its [`Unqueued`]
//! token to whatever it waits on; waking links the token back in. Only the
//! home core unlinks from its own ring, other cores only insert behind the
//! head.

use core::sync::atomic::Ordering;

use baton_abi::{CpuFrame, ErrorCode, KernelResult, SlotHandle, TaskHandle};
use baton_lib::{klog_debug, klog_error, klog_info, klog_trace};

use crate::config::WakePlacement;
use crate::kernel::Kernel;
use crate::pool::{SlotIndex, TaskIndex};
use crate::scheduler::per_cpu::CoreStats;
use crate::task::{Residence, TaskSpec, Unqueued};

/// Where a woken or new ring joins a running list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Becomes the head; runs at the next kernel exit.
    Head,
    /// Right behind the head; the head keeps running.
    AfterHead,
    Tail,
}

impl From<WakePlacement> for Placement {
    fn from(placement: WakePlacement) -> Self {
        match placement {
            WakePlacement::Head => Placement::Head,
            WakePlacement::Tail => Placement::Tail,
        }
    }
}

impl Kernel {
    // =========================================================================
    // Linking and unlinking
    // =========================================================================

    /// Link a detached ring into its home core's running list.
    pub(crate) fn make_runnable(&self, token: Unqueued, placement: Placement) {
        let core = self.task(token.first()).home_core();
        for task in token.ring(&self.tasks) {
            self.task(task)
                .state
                .lock()
                .enter(task, Residence::Running(core));
        }
        let running = &self.cpu(core).running;
        match placement {
            Placement::Head => running.push_front(&self.tasks, token),
            Placement::AfterHead => running.insert_after_head(&self.tasks, token),
            Placement::Tail => running.push_back(&self.tasks, token),
        }
    }

    /// Unlink the head of `core`'s running list, which must be `task`.
    pub(crate) fn detach_running(&self, core: usize, task: TaskIndex) -> Unqueued {
        let token = {
            let mut running = self.cpu(core).running.lock(&self.tasks);
            if running.head() != Some(task) {
                klog_error!(
                    "baton: task {} blocked on core {} without running there",
                    task.index(),
                    core
                );
                panic!("blocking task is not at the head of its running list");
            }
            running.remove(task)
        };
        let previous = self.task(task).state.lock().leave();
        debug_assert_eq!(previous, Residence::Running(core));
        token
    }

    // =========================================================================
    // Task creation and teardown
    // =========================================================================

    pub(crate) fn create_slot(&self, creator: Option<SlotHandle>) -> KernelResult<SlotIndex> {
        let index = self.slots.allocate().ok_or(ErrorCode::OutOfSlots)?;
        self.slot(index).prepare(creator, self.config.pipe_window_base);
        Ok(index)
    }

    pub(crate) fn create_task(
        &self,
        core: usize,
        slot: SlotIndex,
        spec: &TaskSpec,
    ) -> KernelResult<Unqueued> {
        let index = self.tasks.allocate().ok_or(ErrorCode::OutOfTasks)?;
        let (context, banked) = spec.context();
        self.task(index).prepare(core, slot, context, banked, spec.name);
        self.slot(slot).state.lock().tasks += 1;
        klog_debug!(
            "baton: task {:#x} '{}' in slot {:#x} on core {}",
            self.tasks.handle_raw(index),
            spec.name,
            self.slots.handle_raw(slot),
            core
        );
        Ok(Unqueued::new(index))
    }

    /// Create a task from outside any task context, in `slot` or in a fresh
    /// slot created by the boot slot. It joins the tail of `core`'s running
    /// list.
    pub fn spawn(
        &self,
        core: usize,
        spec: TaskSpec,
        slot: Option<SlotHandle>,
    ) -> KernelResult<(TaskHandle, SlotHandle)> {
        self.booted_cpu(core)?;
        let (slot, fresh) = match slot {
            Some(handle) => (self.resolve_slot(handle)?, false),
            None => (self.create_slot(Some(self.boot_slot()))?, true),
        };
        let token = match self.create_task(core, slot, &spec) {
            Ok(token) => token,
            Err(err) => {
                if fresh {
                    self.slots.release(slot);
                }
                return Err(err);
            }
        };
        let task = token.first();
        self.make_runnable(token, Placement::Tail);
        Ok((self.task_handle(task), self.slot_handle(slot)))
    }

    /// Bring `core` online. The registers in `frame` become the core's idle
    /// task, which lives in the boot slot and never blocks.
    pub fn boot_core(&self, core: usize, frame: &mut CpuFrame) -> KernelResult<TaskHandle> {
        if core >= self.config.cores {
            return Err(ErrorCode::InvalidCore);
        }
        let cpu = &self.cores[core];
        if !cpu.claim_boot() {
            return Err(ErrorCode::InvalidCore);
        }

        let Some(index) = self.tasks.allocate() else {
            cpu.abandon_boot();
            return Err(ErrorCode::OutOfTasks);
        };
        self.task(index)
            .prepare(core, self.boot_slot, frame.context, frame.banked, "idle");
        self.slot(self.boot_slot).state.lock().tasks += 1;
        self.make_runnable(Unqueued::new(index), Placement::Head);

        cpu.mark_booted(index, self.boot_slot);
        self.platform
            .memory
            .switch_to_map(core, self.slot_handle(self.boot_slot));

        let handle = self.task_handle(index);
        klog_info!("baton: core {} online, idle task {:#x}", core, handle.raw());
        Ok(handle)
    }

    /// Unlink and free the running task. The last task of a slot other than
    /// the boot slot takes the slot with it.
    pub(crate) fn end_task(&self, core: usize, task: TaskIndex) {
        let handle = self.task_handle(task);
        let token = self.detach_running(core, task);
        let slot = self.task(task).slot();

        self.close_pipe_ends_of(task);
        self.release_locks_of(slot, task);

        {
            let mut state = self.task(task).state.lock();
            state.residence = Residence::Free;
            state.parked = None;
            state.pending = None;
        }
        self.tasks.release(token.first());

        let remaining = {
            let mut state = self.slot(slot).state.lock();
            state.tasks -= 1;
            state.tasks
        };
        klog_debug!("baton: task {:#x} ended", handle.raw());
        if remaining == 0 && slot != self.boot_slot {
            klog_debug!("baton: slot {:#x} released", self.slots.handle_raw(slot));
            self.slots.release(slot);
        }
    }

    // =========================================================================
    // Sleep
    // =========================================================================

    pub(crate) fn yield_current(&self, core: usize) {
        let cpu = self.cpu(core);
        cpu.running.lock(&self.tasks).rotate();
        CoreStats::bump(&cpu.stats.yields);
    }

    /// Move the running `task` onto the delta-ordered sleep list.
    pub(crate) fn sleep(&self, core: usize, task: TaskIndex, ticks: u32) {
        debug_assert!(ticks > 0);
        let token = self.detach_running(core, task);
        self.task(task)
            .state
            .lock()
            .enter(task, Residence::Sleeping(core));

        let mut sleeping = self.cpu(core).sleeping.lock(&self.tasks);
        let mut remaining = ticks;
        let mut before = None;
        for other in sleeping.iter() {
            let delta = self.task(other).sleep_delta.load(Ordering::Relaxed);
            if remaining < delta {
                before = Some((other, delta));
                break;
            }
            remaining -= delta;
        }
        self.task(task).sleep_delta.store(remaining, Ordering::Relaxed);
        match before {
            Some((other, delta)) => {
                self.task(other)
                    .sleep_delta
                    .store(delta - remaining, Ordering::Relaxed);
                sleeping.insert_before(other, token);
            }
            None => sleeping.push_back(token),
        }
        klog_trace!("baton: task {} sleeps {} ticks", task.index(), ticks);
    }

    /// Count down the first sleeper and splice out every sleeper that is
    /// now due, as one ring.
    pub(crate) fn expire_sleepers(&self, core: usize) -> Option<Unqueued> {
        let batch = {
            let mut sleeping = self.cpu(core).sleeping.lock(&self.tasks);
            let head = sleeping.head()?;
            let delta = &self.task(head).sleep_delta;
            let left = delta.load(Ordering::Relaxed).saturating_sub(1);
            delta.store(left, Ordering::Relaxed);
            if left > 0 {
                return None;
            }
            let due = sleeping
                .iter()
                .take_while(|t| self.task(*t).sleep_delta.load(Ordering::Relaxed) == 0)
                .count();
            sleeping.split_front(due)?
        };
        for task in batch.ring(&self.tasks) {
            let previous = self.task(task).state.lock().leave();
            debug_assert_eq!(previous, Residence::Sleeping(core));
        }
        Some(batch)
    }

    // =========================================================================
    // WaitUntilWoken / Resume
    // =========================================================================

    /// Block the running `task` unless a `Resume` is already banked.
    ///
    /// The task leaves the running list before the counter is touched, so a
    /// `Resume` on another core that sees the counter go negative always
    /// finds the parked token.
    pub(crate) fn wait_until_woken(&self, core: usize, task: TaskIndex) {
        let token = self.detach_running(core, task);
        {
            let mut state = self.task(task).state.lock();
            state.context.clear_error();
            state.enter(task, Residence::WaitingForResume);
            state.parked = Some(token);
        }
        let previous = self.task(task).resumes.fetch_sub(1, Ordering::AcqRel);
        if previous > 0 {
            let token = {
                let mut state = self.task(task).state.lock();
                state.leave();
                state.parked.take()
            };
            if let Some(token) = token {
                self.make_runnable(token, Placement::Head);
            }
        } else {
            klog_trace!("baton: task {} waits to be woken", task.index());
        }
    }

    /// Bank one wake for `task`. Returns `true` if it was blocked and has
    /// been made runnable.
    pub(crate) fn resume(&self, task: TaskIndex) -> bool {
        let previous = self.task(task).resumes.fetch_add(1, Ordering::AcqRel);
        if previous >= 0 {
            return false;
        }
        let token = {
            let mut state = self.task(task).state.lock();
            let token = state.parked.take();
            if token.is_some() {
                state.leave();
            }
            token
        };
        match token {
            Some(token) => {
                self.make_runnable(token, Placement::AfterHead);
                true
            }
            None => {
                klog_error!(
                    "baton: task {} had a negative resume count but was not parked",
                    task.index()
                );
                panic!("resume count out of step with task state");
            }
        }
    }
}
