//! Kernel entry and exit.
//!
//! Every entry point saves the core's frame into the current task, does
//! its work on the queues, then loads the head of the running ring back
//! into the frame. Switching tasks is nothing more than the exit loading a
//! different head than the entry saved.

use core::sync::atomic::Ordering;

use baton_abi::{CpuFrame, HandlerKind, ProcessorMode, TaskContext};
use baton_lib::{klog_error, klog_trace};

use crate::kernel::Kernel;
use crate::pool::TaskIndex;
use crate::scheduler::per_cpu::CoreStats;

impl Kernel {
    /// Save `frame` into the task the core was running.
    pub(crate) fn enter(&self, core: usize, frame: &CpuFrame) -> TaskIndex {
        let cpu = self.cpu(core);
        let Some(current) = cpu.current() else {
            klog_error!("baton: kernel entry on core {} before boot", core);
            panic!("core {} entered the kernel before boot_core", core);
        };
        debug_assert_eq!(cpu.running.head(), Some(current));

        let mut state = self.task(current).state.lock();
        state.context = frame.context;
        if frame.context.is_user() {
            state.banked = frame.banked;
        }
        current
    }

    /// Pick the task to run, replaying any call it left waiting for its
    /// slot stack, and load it into `frame`.
    pub(crate) fn exit(&self, core: usize, frame: &mut CpuFrame) {
        let next = loop {
            let head = self.pick_head(core);
            let pending = self.task(head).state.lock().pending.take();
            match pending {
                Some(call) => self.replay(core, head, call),
                None => break head,
            }
        };
        self.deliver_callback(next);
        self.load(core, next, frame);
    }

    /// The head of the running ring, rotating the idle task out of the way
    /// when anything else is runnable.
    fn pick_head(&self, core: usize) -> TaskIndex {
        let cpu = self.cpu(core);
        let mut running = cpu.running.lock(&self.tasks);
        let Some(head) = running.head() else {
            klog_error!("baton: core {} has an empty running list", core);
            panic!("running list lost its idle task");
        };
        let next = running.next(head);
        if cpu.is_idle(head) && next != head {
            running.rotate();
            return next;
        }
        head
    }

    /// Divert a task returning to user mode into its slot's callback
    /// handler, keeping the interrupted frame for `CallbackReturn`.
    fn deliver_callback(&self, task: TaskIndex) {
        let slot = self.slot(self.task(task).slot());
        if !slot.callback_requested.load(Ordering::Acquire) || slot.stack_owner().is_some() {
            return;
        }
        let handler = slot.state.lock().handlers[HandlerKind::Callback as usize];
        if handler.code == 0 {
            return;
        }

        let mut state = self.task(task).state.lock();
        if !state.context.is_user() || state.callback_saved.is_some() {
            return;
        }
        if !slot.callback_requested.swap(false, Ordering::AcqRel) {
            return;
        }
        state.callback_saved = Some(CpuFrame {
            context: state.context,
            banked: state.banked,
        });
        let mut context = TaskContext::entering(handler.code, ProcessorMode::Svc);
        context.r[0] = handler.workspace;
        context.r[12] = handler.workspace;
        state.context = context;
        klog_trace!("baton: callback into {:#x} for task {}", handler.code, task.index());
    }

    fn load(&self, core: usize, task: TaskIndex, frame: &mut CpuFrame) {
        let cpu = self.cpu(core);
        {
            let state = self.task(task).state.lock();
            frame.context = state.context;
            if state.context.is_user() {
                frame.banked = state.banked;
            }
        }

        let slot = self.task(task).slot();
        if cpu.set_mapped_slot(slot) {
            self.platform
                .memory
                .switch_to_map(core, self.slot_handle(slot));
        }
        if cpu.set_current(task) {
            CoreStats::bump(&cpu.stats.switches);
            klog_trace!("baton: core {} switches to task {}", core, task.index());
        }
    }

    // =========================================================================
    // Entry points
    // =========================================================================

    /// Re-run the scheduling decision without any other work, for code that
    /// changed the running list from outside a task.
    pub fn reschedule(&self, core: usize, frame: &mut CpuFrame) {
        self.enter(core, frame);
        self.exit(core, frame);
    }

    /// Periodic timer interrupt: count down the first sleeper and wake
    /// every sleeper that is due, as one batch.
    pub fn timer_tick(&self, core: usize, frame: &mut CpuFrame) {
        self.enter(core, frame);
        CoreStats::bump(&self.cpu(core).stats.ticks);
        if let Some(batch) = self.expire_sleepers(core) {
            self.make_runnable(batch, self.config.wake_placement.into());
        }
        self.exit(core, frame);
    }
}
