//! The SWI trampoline and slot stack ownership.
//!
//! Calls marked interrupt-safe run straight away on the core's own stack.
//! Every other call needs its slot's privileged stack: the caller either
//! takes ownership with a single CAS, or parks on the slot's
//! `waiting_for_slot_stack` queue with the call kept in its task state.
//! When the owning call finishes, ownership goes to the first waiter
//! (the baton pass) and that waiter replays its call the next time its
//! core leaves the kernel with it at the head.

use core::sync::atomic::Ordering;

use baton_abi::{CpuFrame, ErrorCode, KernelResult, SystemCall, complete_call};
use baton_lib::{klog_debug, klog_trace};

use super::context::SvcContext;
use super::{Route, SyscallDisposition, route};
use crate::kernel::Kernel;
use crate::pool::{SlotIndex, TaskIndex};
use crate::scheduler::Placement;
use crate::scheduler::per_cpu::CoreStats;
use crate::slot::SvcContinuation;
use crate::task::Residence;

impl Kernel {
    /// Software interrupt entry. `frame` holds the caller's registers on
    /// entry and the registers of the task to run on return.
    pub fn swi(&self, core: usize, frame: &mut CpuFrame) {
        let task = self.enter(core, frame);
        CoreStats::bump(&self.cpu(core).stats.swis);
        let call = SystemCall::from_context(&frame.context);
        self.dispatch(core, task, call);
        self.exit(core, frame);
    }

    fn dispatch(&self, core: usize, task: TaskIndex, call: SystemCall) {
        let Some(route) = route(self, call.number) else {
            self.finish(task, Err(ErrorCode::UnknownSwi), call.number);
            return;
        };

        if route.interrupt_safe() {
            let mut ctx = SvcContext::new(self, core, task, call, false);
            let result = route.invoke(&mut ctx);
            self.finish(task, result, call.number);
            return;
        }

        match self.claim_stack(core, task, call, route.name()) {
            Ok(true) => self.run_owned(core, task, call, route),
            Ok(false) => {}
            Err(err) => self.finish(task, Err(err), call.number),
        }
    }

    /// Take the slot stack for `task`, or park it with `call` pending.
    /// Returns `Ok(true)` when the caller now owns the stack.
    fn claim_stack(
        &self,
        core: usize,
        task: TaskIndex,
        call: SystemCall,
        name: &str,
    ) -> KernelResult<bool> {
        let slot_index = self.task(task).slot();
        let slot = self.slot(slot_index);
        let me = self.tasks.handle_raw(task);

        let mut waiters = slot.waiting_for_slot_stack.lock(&self.tasks);
        match slot
            .svc_stack_owner
            .compare_exchange(0, me, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => return Ok(true),
            Err(owner) if owner == me => return Ok(true),
            Err(_) => {}
        }
        if self.cpu(core).is_idle(task) {
            return Err(ErrorCode::IdleTaskCannotBlock);
        }

        let token = self.detach_running(core, task);
        {
            let mut state = self.task(task).state.lock();
            state.pending = Some(call);
            state.enter(task, Residence::WaitingForStack(slot_index));
        }
        waiters.push_back(token);
        klog_trace!(
            "baton: task {} waits for slot stack ({})",
            task.index(),
            name
        );
        Ok(false)
    }

    /// Run `call` for the stack owner `task`, then pass the stack on.
    fn run_owned(&self, core: usize, task: TaskIndex, call: SystemCall, route: Route) {
        let slot_index = self.task(task).slot();
        let slot = self.slot(slot_index);
        {
            let (return_pc, psr, user) = {
                let state = self.task(task).state.lock();
                (state.context.pc, state.context.psr, state.banked)
            };
            let mut continuation = slot.continuation.lock();
            debug_assert!(continuation.is_none(), "slot stack already has a call in flight");
            *continuation = Some(SvcContinuation {
                owner: self.task_handle(task),
                call,
                return_pc,
                psr,
                user,
                depth: 0,
            });
        }

        let mut ctx = SvcContext::new(self, core, task, call, true);
        let result = route.invoke(&mut ctx);

        *slot.continuation.lock() = None;
        self.finish(task, result, call.number);
        self.release_stack(slot_index);
    }

    /// Replay the call `task` made before it was handed the slot stack.
    pub(crate) fn replay(&self, core: usize, task: TaskIndex, call: SystemCall) {
        debug_assert_eq!(
            self.slot(self.task(task).slot()).stack_owner(),
            Some(self.task_handle(task))
        );
        match route(self, call.number) {
            Some(route) => self.run_owned(core, task, call, route),
            None => {
                self.finish(task, Err(ErrorCode::UnknownSwi), call.number);
                self.release_stack(self.task(task).slot());
            }
        }
    }

    /// Pass the slot stack to the first waiter, or mark it unowned.
    fn release_stack(&self, slot_index: SlotIndex) {
        let slot = self.slot(slot_index);
        let next = {
            let mut waiters = slot.waiting_for_slot_stack.lock(&self.tasks);
            let next = waiters.pop_front();
            let owner = next
                .as_ref()
                .map_or(0, |token| self.tasks.handle_raw(token.first()));
            slot.svc_stack_owner.store(owner, Ordering::Release);
            next
        };

        if let Some(token) = next {
            let task = token.first();
            let previous = self.task(task).state.lock().leave();
            debug_assert_eq!(previous, Residence::WaitingForStack(slot_index));
            klog_trace!("baton: slot stack passed to task {}", task.index());
            self.make_runnable(token, Placement::AfterHead);
        }
    }

    /// Write a handler's result into the caller's saved registers.
    fn finish(&self, task: TaskIndex, result: KernelResult<SyscallDisposition>, number: u32) {
        let result = match result {
            Ok(SyscallDisposition::Complete(output)) => Ok(output),
            Ok(SyscallDisposition::Blocked | SyscallDisposition::Replaced) => return,
            Err(code) => {
                klog_debug!(
                    "baton: swi {:#x} failed for task {}: {}",
                    number,
                    task.index(),
                    code
                );
                Err(code)
            }
        };
        complete_call(&mut self.task(task).state.lock().context, result);
    }
}
