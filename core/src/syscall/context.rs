use baton_abi::{
    ErrorCode, KernelResult, SlotHandle, SyscallArgs, SyscallOutput, SystemCall, TaskHandle,
};
use baton_lib::klog_error;

use super::{SyscallDisposition, route};
use crate::kernel::Kernel;
use crate::pool::{SlotIndex, TaskIndex};
use crate::slot::Slot;
use crate::task::{Task, TaskState};

/// Everything a SWI handler may touch: the kernel, the core it runs on,
/// the calling task and the decoded call.
pub struct SvcContext<'k> {
    kernel: &'k Kernel,
    core: usize,
    task: TaskIndex,
    call: SystemCall,
    owns_stack: bool,
}

impl<'k> SvcContext<'k> {
    pub(crate) fn new(
        kernel: &'k Kernel,
        core: usize,
        task: TaskIndex,
        call: SystemCall,
        owns_stack: bool,
    ) -> Self {
        Self {
            kernel,
            core,
            task,
            call,
            owns_stack,
        }
    }

    #[inline]
    pub fn kernel(&self) -> &'k Kernel {
        self.kernel
    }

    #[inline]
    pub fn core(&self) -> usize {
        self.core
    }

    #[inline]
    pub fn call(&self) -> &SystemCall {
        &self.call
    }

    #[inline]
    pub fn args(&self) -> &SyscallArgs {
        &self.call.args
    }

    #[inline]
    pub fn arg(&self, index: usize) -> u32 {
        self.call.args.get(index)
    }

    pub fn task_handle(&self) -> TaskHandle {
        self.kernel.task_handle(self.task)
    }

    pub fn slot_handle(&self) -> SlotHandle {
        self.kernel.slot_handle(self.slot_index())
    }

    /// `true` while the handler runs on the slot stack it owns.
    #[inline]
    pub fn owns_stack(&self) -> bool {
        self.owns_stack
    }

    #[inline]
    pub(crate) fn task_index(&self) -> TaskIndex {
        self.task
    }

    #[inline]
    pub(crate) fn slot_index(&self) -> SlotIndex {
        self.task().slot()
    }

    #[inline]
    pub(crate) fn task(&self) -> &'k Task {
        self.kernel.task(self.task)
    }

    #[inline]
    pub(crate) fn slot(&self) -> &'k Slot {
        self.kernel.slot(self.slot_index())
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.kernel.cpu(self.core).is_idle(self.task)
    }

    /// Refuse to block the caller when it holds the slot stack or is the
    /// idle task.
    pub(crate) fn ensure_may_block(&self) -> KernelResult<()> {
        if self.owns_stack {
            klog_error!(
                "baton: task {:#x} tried to block while owning its slot stack (swi {:#x})",
                self.task_handle().raw(),
                self.call.number
            );
            return Err(ErrorCode::OwnerOfStackTriedToSleep);
        }
        if self.is_idle() {
            return Err(ErrorCode::IdleTaskCannotBlock);
        }
        Ok(())
    }

    /// Run `f` on the caller's saved state.
    pub(crate) fn with_caller<R>(&self, f: impl FnOnce(&mut TaskState) -> R) -> R {
        f(&mut self.task().state.lock())
    }

    /// Issue another SWI from inside a handler that owns the slot stack.
    ///
    /// The nested call runs with ownership retained and may not block;
    /// calls that would have blocked fail with `OwnerOfStackTriedToSleep`.
    pub fn nested(&mut self, call: SystemCall) -> KernelResult<SyscallOutput> {
        if !self.owns_stack {
            return Err(ErrorCode::InvalidArgument);
        }
        let route = route(self.kernel, call.number).ok_or(ErrorCode::UnknownSwi)?;
        let slot = self.slot();
        if let Some(continuation) = slot.continuation.lock().as_mut() {
            continuation.depth += 1;
        }
        let mut inner = SvcContext::new(self.kernel, self.core, self.task, call, true);
        let result = route.invoke(&mut inner);
        if let Some(continuation) = slot.continuation.lock().as_mut() {
            continuation.depth -= 1;
        }
        match result? {
            SyscallDisposition::Complete(output) => Ok(output),
            SyscallDisposition::Blocked | SyscallDisposition::Replaced => {
                Ok(SyscallOutput::none())
            }
        }
    }
}
