//! Built-in SWI handlers for tasks, slots and the debug console.
//!
//! Interrupt, pipe and user lock handlers live with their subsystems.

use core::sync::atomic::Ordering;

use baton_abi::{
    CpuFrame, ErrorCode, HandlerKind, KernelResult, ProcessorMode, Psr, SyscallOutput, TaskHandle,
    VirtAddr,
};
use baton_lib::numfmt::{HEX_U32_LEN, u32_to_hex};
use baton_lib::klog_debug;

use super::SyscallDisposition;
use super::context::SvcContext;
use crate::scheduler::Placement;
use crate::slot::HandlerDescriptor;
use crate::task::TaskSpec;

const DEBUG_CHUNK: usize = 64;

fn complete(output: SyscallOutput) -> KernelResult<SyscallDisposition> {
    Ok(SyscallDisposition::Complete(output))
}

/// Task spec for `Start`/`RunFree`: `r0` entry, `r1` stack, `r2`/`r3`
/// become the new task's `r0`/`r1`. The new task runs in the caller's mode.
fn spec_from_args(ctx: &SvcContext<'_>) -> TaskSpec {
    let mode = ctx
        .with_caller(|state| state.context.psr.mode())
        .unwrap_or(ProcessorMode::User);
    TaskSpec {
        entry: ctx.arg(0),
        stack: ctx.arg(1),
        args: [ctx.arg(2), ctx.arg(3), 0, 0],
        mode,
        name: "task",
    }
}

// =============================================================================
// Task lifecycle
// =============================================================================

pub fn syscall_start(ctx: &mut SvcContext<'_>) -> KernelResult<SyscallDisposition> {
    let kernel = ctx.kernel();
    let spec = spec_from_args(ctx);
    let token = kernel.create_task(ctx.core(), ctx.slot_index(), &spec)?;
    let task = token.first();
    kernel.make_runnable(token, Placement::AfterHead);
    complete(SyscallOutput::r0(kernel.task_handle(task).raw()))
}

pub fn syscall_run_free(ctx: &mut SvcContext<'_>) -> KernelResult<SyscallDisposition> {
    let kernel = ctx.kernel();
    let spec = spec_from_args(ctx);
    let slot = kernel.create_slot(Some(ctx.slot_handle()))?;
    let token = match kernel.create_task(ctx.core(), slot, &spec) {
        Ok(token) => token,
        Err(err) => {
            kernel.slots.release(slot);
            return Err(err);
        }
    };
    let task = token.first();
    kernel.make_runnable(token, Placement::AfterHead);
    complete(
        SyscallOutput::r0(kernel.task_handle(task).raw()).with(1, kernel.slot_handle(slot).raw()),
    )
}

pub fn syscall_end_task(ctx: &mut SvcContext<'_>) -> KernelResult<SyscallDisposition> {
    ctx.ensure_may_block()?;
    ctx.kernel().end_task(ctx.core(), ctx.task_index());
    Ok(SyscallDisposition::Blocked)
}

// =============================================================================
// Sleep and wake
// =============================================================================

pub fn syscall_sleep(ctx: &mut SvcContext<'_>) -> KernelResult<SyscallDisposition> {
    let kernel = ctx.kernel();
    let ticks = ctx.arg(0);
    if ticks == 0 {
        kernel.yield_current(ctx.core());
        return complete(SyscallOutput::none());
    }
    ctx.ensure_may_block()?;
    ctx.with_caller(|state| state.context.clear_error());
    kernel.sleep(ctx.core(), ctx.task_index(), ticks);
    Ok(SyscallDisposition::Blocked)
}

pub fn syscall_wait_until_woken(ctx: &mut SvcContext<'_>) -> KernelResult<SyscallDisposition> {
    if ctx.owns_stack() {
        // A banked resume can be consumed without blocking.
        let consumed = ctx
            .task()
            .resumes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n > 0).then(|| n - 1))
            .is_ok();
        if consumed {
            return complete(SyscallOutput::none());
        }
    }
    ctx.ensure_may_block()?;
    ctx.kernel().wait_until_woken(ctx.core(), ctx.task_index());
    Ok(SyscallDisposition::Blocked)
}

pub fn syscall_resume(ctx: &mut SvcContext<'_>) -> KernelResult<SyscallDisposition> {
    let kernel = ctx.kernel();
    let target = kernel.resolve_task(TaskHandle::from_raw(ctx.arg(0)))?;
    if kernel.resume(target) {
        klog_debug!("baton: task {} resumed task {}", ctx.task_index().index(), target.index());
    }
    complete(SyscallOutput::none())
}

// =============================================================================
// Debug output and identity
// =============================================================================

pub fn syscall_debug_string(ctx: &mut SvcContext<'_>) -> KernelResult<SyscallDisposition> {
    let platform = ctx.kernel().platform();
    let slot = ctx.slot_handle();
    let start = ctx.arg(0);
    let len = ctx.arg(1);
    start.checked_add(len).ok_or(ErrorCode::BadAddress)?;

    let mut buf = [0u8; DEBUG_CHUNK];
    let mut offset = 0u32;
    while offset < len {
        let take = ((len - offset) as usize).min(DEBUG_CHUNK);
        let chunk = &mut buf[..take];
        if !platform
            .memory
            .read_user(slot, VirtAddr::new(start + offset), chunk)
        {
            return Err(ErrorCode::BadAddress);
        }
        platform.console.write(chunk);
        offset += take as u32;
    }
    complete(SyscallOutput::none())
}

pub fn syscall_debug_number(ctx: &mut SvcContext<'_>) -> KernelResult<SyscallDisposition> {
    let mut buf = [0u8; HEX_U32_LEN];
    ctx.kernel()
        .platform()
        .console
        .write(u32_to_hex(ctx.arg(0), &mut buf));
    complete(SyscallOutput::none())
}

pub fn syscall_core_number(ctx: &mut SvcContext<'_>) -> KernelResult<SyscallDisposition> {
    complete(SyscallOutput::r0(ctx.core() as u32))
}

pub fn syscall_get_handle(ctx: &mut SvcContext<'_>) -> KernelResult<SyscallDisposition> {
    complete(SyscallOutput::r0(ctx.task_handle().raw()).with(1, ctx.slot_handle().raw()))
}

// =============================================================================
// Processor state
// =============================================================================

/// Set or clear `I` in the caller's saved status word. `r0` returns 1 when
/// interrupts were disabled before the call.
fn set_interrupts_disabled(ctx: &SvcContext<'_>, disabled: bool) -> KernelResult<SyscallDisposition> {
    let was_disabled = ctx.with_caller(|state| {
        let was = state.context.psr.contains(Psr::I);
        state.context.psr.set(Psr::I, disabled);
        was
    });
    complete(SyscallOutput::r0(was_disabled as u32))
}

pub fn syscall_int_on(ctx: &mut SvcContext<'_>) -> KernelResult<SyscallDisposition> {
    set_interrupts_disabled(ctx, false)
}

pub fn syscall_int_off(ctx: &mut SvcContext<'_>) -> KernelResult<SyscallDisposition> {
    set_interrupts_disabled(ctx, true)
}

pub fn syscall_cache_clean(ctx: &mut SvcContext<'_>) -> KernelResult<SyscallDisposition> {
    ctx.kernel()
        .platform()
        .memory
        .clean_cache(ctx.slot_handle(), VirtAddr::new(ctx.arg(0)), ctx.arg(1));
    complete(SyscallOutput::none())
}

// =============================================================================
// Slot handlers and callbacks
// =============================================================================

/// `r0` kind, `r1` code, `r2` workspace. Returns the previous code and
/// workspace in `r1`/`r2`.
pub fn syscall_set_handler(ctx: &mut SvcContext<'_>) -> KernelResult<SyscallDisposition> {
    let kind = HandlerKind::from_raw(ctx.arg(0)).ok_or(ErrorCode::InvalidArgument)?;
    let new = HandlerDescriptor {
        code: ctx.arg(1),
        workspace: ctx.arg(2),
    };
    let old = core::mem::replace(&mut ctx.slot().state.lock().handlers[kind as usize], new);
    complete(
        SyscallOutput::none()
            .with(1, old.code)
            .with(2, old.workspace),
    )
}

pub fn syscall_request_callback(ctx: &mut SvcContext<'_>) -> KernelResult<SyscallDisposition> {
    ctx.slot().callback_requested.store(true, Ordering::Release);
    complete(SyscallOutput::none())
}

/// Leave a callback handler: the user state it interrupted comes back
/// whole.
pub fn syscall_callback_return(ctx: &mut SvcContext<'_>) -> KernelResult<SyscallDisposition> {
    ctx.with_caller(|state| {
        let CpuFrame { context, banked } =
            state.callback_saved.take().ok_or(ErrorCode::NoCallbackInProgress)?;
        state.context = context;
        state.banked = banked;
        Ok(SyscallDisposition::Replaced)
    })
}
