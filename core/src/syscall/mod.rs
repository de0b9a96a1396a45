//! SWI dispatch: the built-in table, registered privileged handlers and the
//! slot stack trampoline.

pub mod context;
pub mod handlers;
pub mod trampoline;


use baton_abi::{
    ErrorCode, FIRST_MODULE_SWI, KernelResult, MAX_MODULE_SWIS, SWI_TABLE_SIZE, SwiNumber,
    SyscallOutput,
};
use baton_lib::klog_info;

pub use context::SvcContext;

use self::handlers::*;
use crate::irq::{
    syscall_interrupt_is_off, syscall_number_of_interrupt_sources, syscall_wait_for_interrupt,
};
use crate::kernel::Kernel;
use crate::pipe::{
    syscall_pipe_create, syscall_pipe_data_consumed, syscall_pipe_no_more_data,
    syscall_pipe_not_listening, syscall_pipe_passing_off, syscall_pipe_passing_over,
    syscall_pipe_space_filled, syscall_pipe_unread_data, syscall_pipe_wait_for_data,
    syscall_pipe_wait_for_space,
};
use crate::user_lock::{syscall_lock_claim, syscall_lock_release};

/// What a handler did with its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallDisposition {
    /// Write these outputs into the caller and clear `V`.
    Complete(SyscallOutput),
    /// The caller left the running list; whoever wakes it writes its
    /// results.
    Blocked,
    /// The caller's whole context was replaced (`CallbackReturn`).
    Replaced,
}

pub type SwiHandler = fn(&mut SvcContext<'_>) -> KernelResult<SyscallDisposition>;

/// Privileged extension handler. Always runs owning the slot stack and
/// never blocks its caller.
pub type ModuleHandler = fn(&mut SvcContext<'_>) -> KernelResult<SyscallOutput>;

#[derive(Copy, Clone)]
pub struct SwiEntry {
    pub handler: Option<SwiHandler>,
    pub name: &'static str,
    /// Runs on the core stack without slot stack ownership.
    pub interrupt_safe: bool,
}

impl SwiEntry {
    const EMPTY: Self = Self {
        handler: None,
        name: "",
        interrupt_safe: false,
    };

    const fn direct(handler: SwiHandler, name: &'static str) -> Self {
        Self {
            handler: Some(handler),
            name,
            interrupt_safe: true,
        }
    }

    const fn owned(handler: SwiHandler, name: &'static str) -> Self {
        Self {
            handler: Some(handler),
            name,
            interrupt_safe: false,
        }
    }
}

#[derive(Copy, Clone)]
pub struct ModuleSwi {
    pub handler: ModuleHandler,
    pub name: &'static str,
}

static SWI_TABLE: [SwiEntry; SWI_TABLE_SIZE] = {
    use SwiNumber::*;
    let mut table = [SwiEntry::EMPTY; SWI_TABLE_SIZE];
    table[Start as usize] = SwiEntry::owned(syscall_start, "start");
    table[RunFree as usize] = SwiEntry::owned(syscall_run_free, "run_free");
    table[EndTask as usize] = SwiEntry::direct(syscall_end_task, "end_task");
    table[Sleep as usize] = SwiEntry::direct(syscall_sleep, "sleep");
    table[WaitUntilWoken as usize] = SwiEntry::direct(syscall_wait_until_woken, "wait_until_woken");
    table[Resume as usize] = SwiEntry::direct(syscall_resume, "resume");
    table[LockClaim as usize] = SwiEntry::direct(syscall_lock_claim, "lock_claim");
    table[LockRelease as usize] = SwiEntry::direct(syscall_lock_release, "lock_release");
    table[WaitForInterrupt as usize] =
        SwiEntry::direct(syscall_wait_for_interrupt, "wait_for_interrupt");
    table[InterruptIsOff as usize] = SwiEntry::direct(syscall_interrupt_is_off, "interrupt_is_off");
    table[NumberOfInterruptSources as usize] =
        SwiEntry::owned(syscall_number_of_interrupt_sources, "number_of_interrupt_sources");
    table[DebugString as usize] = SwiEntry::owned(syscall_debug_string, "debug_string");
    table[DebugNumber as usize] = SwiEntry::owned(syscall_debug_number, "debug_number");
    table[CoreNumber as usize] = SwiEntry::direct(syscall_core_number, "core_number");
    table[GetHandle as usize] = SwiEntry::direct(syscall_get_handle, "get_handle");
    table[IntOn as usize] = SwiEntry::direct(syscall_int_on, "int_on");
    table[IntOff as usize] = SwiEntry::direct(syscall_int_off, "int_off");
    table[CacheClean as usize] = SwiEntry::direct(syscall_cache_clean, "cache_clean");
    table[SetHandler as usize] = SwiEntry::owned(syscall_set_handler, "set_handler");
    table[RequestCallback as usize] = SwiEntry::owned(syscall_request_callback, "request_callback");
    table[CallbackReturn as usize] = SwiEntry::direct(syscall_callback_return, "callback_return");

    table[PipeCreate as usize] = SwiEntry::direct(syscall_pipe_create, "pipe_create");
    table[PipeWaitForSpace as usize] =
        SwiEntry::direct(syscall_pipe_wait_for_space, "pipe_wait_for_space");
    table[PipeSpaceFilled as usize] = SwiEntry::direct(syscall_pipe_space_filled, "pipe_space_filled");
    table[PipePassingOver as usize] = SwiEntry::direct(syscall_pipe_passing_over, "pipe_passing_over");
    table[PipeUnreadData as usize] = SwiEntry::direct(syscall_pipe_unread_data, "pipe_unread_data");
    table[PipeNoMoreData as usize] = SwiEntry::direct(syscall_pipe_no_more_data, "pipe_no_more_data");
    table[PipeWaitForData as usize] =
        SwiEntry::direct(syscall_pipe_wait_for_data, "pipe_wait_for_data");
    table[PipeDataConsumed as usize] =
        SwiEntry::direct(syscall_pipe_data_consumed, "pipe_data_consumed");
    table[PipePassingOff as usize] = SwiEntry::direct(syscall_pipe_passing_off, "pipe_passing_off");
    table[PipeNotListening as usize] =
        SwiEntry::direct(syscall_pipe_not_listening, "pipe_not_listening");
    table
};

/// A resolved SWI number.
#[derive(Copy, Clone)]
pub(crate) enum Route {
    Builtin(SwiEntry),
    Module(ModuleSwi),
}

impl Route {
    pub(crate) fn interrupt_safe(&self) -> bool {
        match self {
            Route::Builtin(entry) => entry.interrupt_safe,
            Route::Module(_) => false,
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            Route::Builtin(entry) => entry.name,
            Route::Module(module) => module.name,
        }
    }

    pub(crate) fn invoke(&self, ctx: &mut SvcContext<'_>) -> KernelResult<SyscallDisposition> {
        match self {
            Route::Builtin(entry) => match entry.handler {
                Some(handler) => handler(ctx),
                None => Err(ErrorCode::UnknownSwi),
            },
            Route::Module(module) => (module.handler)(ctx).map(SyscallDisposition::Complete),
        }
    }
}

pub(crate) fn route(kernel: &Kernel, number: u32) -> Option<Route> {
    if let Some(entry) = SWI_TABLE.get(number as usize) {
        return entry.handler.map(|_| Route::Builtin(*entry));
    }
    let slot = number.checked_sub(FIRST_MODULE_SWI)? as usize;
    let modules = kernel.module_swis.read();
    modules.get(slot).copied().flatten().map(Route::Module)
}

/// Name of a built-in SWI, for diagnostics.
pub fn swi_name(number: u32) -> Option<&'static str> {
    SWI_TABLE
        .get(number as usize)
        .filter(|entry| entry.handler.is_some())
        .map(|entry| entry.name)
}

impl Kernel {
    /// Install a privileged handler for SWI `number`
    /// (`FIRST_MODULE_SWI..FIRST_MODULE_SWI + MAX_MODULE_SWIS`).
    pub fn register_swi_handler(
        &self,
        number: u32,
        name: &'static str,
        handler: ModuleHandler,
    ) -> KernelResult<()> {
        let index = number
            .checked_sub(FIRST_MODULE_SWI)
            .map(|n| n as usize)
            .filter(|n| *n < MAX_MODULE_SWIS)
            .ok_or(ErrorCode::InvalidArgument)?;
        let mut modules = self.module_swis.write();
        if modules[index].is_some() {
            return Err(ErrorCode::InvalidArgument);
        }
        modules[index] = Some(ModuleSwi { handler, name });
        klog_info!("baton: swi {:#x} '{}' registered", number, name);
        Ok(())
    }
}
