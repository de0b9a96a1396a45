//! Interrupt sources and the tasks waiting on them.
//!
//! Each core routes its own sources. A task arms a source with
//! `WaitForInterrupt` and leaves the running list; when the source fires,
//! the source is masked, the registration is cleared and the task goes to
//! the head of the running list so it runs before the interrupted task.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU32, Ordering};

use baton_abi::{CpuFrame, ErrorCode, KernelResult, SyscallOutput};
use baton_lib::{Spinlock, klog_debug, klog_error, klog_trace};

use crate::kernel::Kernel;
use crate::scheduler::Placement;
use crate::scheduler::per_cpu::CoreStats;
use crate::syscall::{SvcContext, SyscallDisposition};
use crate::task::{Residence, Unqueued};

pub const MAX_INTERRUPT_SOURCES: usize = 64;

struct IrqEntry {
    waiting: Option<Unqueued>,
    count: u64,
    /// Declared quiet by `InterruptIsOff`; firings are spurious.
    off: bool,
}

impl IrqEntry {
    const fn new() -> Self {
        Self {
            waiting: None,
            count: 0,
            off: false,
        }
    }
}

/// Per-core routing table from interrupt source to waiting task.
pub struct IrqTable {
    lock: Spinlock,
    /// Fixed by the first `NumberOfInterruptSources`; 0 until then.
    sources: AtomicU32,
    entries: UnsafeCell<[IrqEntry; MAX_INTERRUPT_SOURCES]>,
}

// SAFETY: `entries` is only reached through `with_entries`, which holds
// `lock` with interrupts disabled.
unsafe impl Sync for IrqTable {}

impl IrqTable {
    pub const fn new() -> Self {
        Self {
            lock: Spinlock::new(),
            sources: AtomicU32::new(0),
            entries: UnsafeCell::new([const { IrqEntry::new() }; MAX_INTERRUPT_SOURCES]),
        }
    }

    #[inline]
    pub fn sources(&self) -> u32 {
        self.sources.load(Ordering::Acquire)
    }

    fn with_entries<R>(&self, f: impl FnOnce(&mut [IrqEntry; MAX_INTERRUPT_SOURCES]) -> R) -> R {
        let flags = self.lock.lock_irqsave();
        // SAFETY: the lock is held for the lifetime of the borrow.
        let res = f(unsafe { &mut *self.entries.get() });
        self.lock.unlock_irqrestore(flags);
        res
    }

    fn check_source(&self, source: u32) -> KernelResult<usize> {
        if source < self.sources() {
            Ok(source as usize)
        } else {
            Err(ErrorCode::InterruptSourceOutOfRange)
        }
    }
}

impl Default for IrqTable {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// SWI handlers
// =============================================================================

/// `r0` = number of sources. The first non-zero call fixes the table size;
/// `r0` = 0 only asks. Returns the size in effect.
pub fn syscall_number_of_interrupt_sources(
    ctx: &mut SvcContext<'_>,
) -> KernelResult<SyscallDisposition> {
    let requested = ctx.arg(0);
    if requested as usize > MAX_INTERRUPT_SOURCES {
        return Err(ErrorCode::InvalidArgument);
    }
    let table = &ctx.kernel().cpu(ctx.core()).irq;
    let in_effect = if requested == 0 {
        table.sources()
    } else {
        match table
            .sources
            .compare_exchange(0, requested, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                klog_debug!("baton: core {} routes {} interrupt sources", ctx.core(), requested);
                requested
            }
            Err(existing) => existing,
        }
    };
    Ok(SyscallDisposition::Complete(SyscallOutput::r0(in_effect)))
}

/// `r0` = source. Blocks until the source fires; returns with `r0` = source.
pub fn syscall_wait_for_interrupt(ctx: &mut SvcContext<'_>) -> KernelResult<SyscallDisposition> {
    ctx.ensure_may_block()?;
    let kernel = ctx.kernel();
    let core = ctx.core();
    let task = ctx.task_index();
    let source = ctx.arg(0);
    let table = &kernel.cpu(core).irq;
    let index = table.check_source(source)?;

    ctx.with_caller(|state| state.context.clear_error());
    table.with_entries(|entries| {
        let entry = &mut entries[index];
        if entry.waiting.is_some() {
            return Err(ErrorCode::InterruptSourceClaimed);
        }
        let token = kernel.detach_running(core, task);
        kernel
            .task(task)
            .state
            .lock()
            .enter(task, Residence::Interrupt(core, source));
        entry.waiting = Some(token);
        entry.off = false;
        Ok(())
    })?;
    kernel.platform().interrupts.unmask(core, source);
    klog_trace!("baton: task {} waits for interrupt {}", task.index(), source);
    Ok(SyscallDisposition::Blocked)
}

/// `r0` = source. Masks a source whose device has gone quiet and returns
/// how often it has fired in `r0`.
pub fn syscall_interrupt_is_off(ctx: &mut SvcContext<'_>) -> KernelResult<SyscallDisposition> {
    let kernel = ctx.kernel();
    let core = ctx.core();
    let source = ctx.arg(0);
    let table = &kernel.cpu(core).irq;
    let index = table.check_source(source)?;

    let count = table.with_entries(|entries| {
        let entry = &mut entries[index];
        if entry.waiting.is_some() {
            return Err(ErrorCode::InterruptSourceClaimed);
        }
        entry.off = true;
        Ok(entry.count)
    })?;
    kernel.platform().interrupts.mask(core, source);
    Ok(SyscallDisposition::Complete(SyscallOutput::r0(count as u32)))
}

// =============================================================================
// Hardware entry
// =============================================================================

impl Kernel {
    /// Hardware interrupt entry. `source` is `None` when the controller
    /// could not identify one.
    pub fn interrupt(&self, core: usize, source: Option<u32>, frame: &mut CpuFrame) {
        self.enter(core, frame);
        let cpu = self.cpu(core);
        match source {
            None => CoreStats::bump(&cpu.stats.spurious),
            Some(source) => self.route_interrupt(core, source),
        }
        self.exit(core, frame);
    }

    fn route_interrupt(&self, core: usize, source: u32) {
        let cpu = self.cpu(core);
        let Ok(index) = cpu.irq.check_source(source) else {
            klog_error!("baton: interrupt from unrouted source {} on core {}", source, core);
            panic!("interrupt source {} out of range", source);
        };

        enum Outcome {
            Wake(Unqueued),
            Spurious,
            Unclaimed,
        }

        let outcome = cpu.irq.with_entries(|entries| {
            let entry = &mut entries[index];
            if entry.off {
                return Outcome::Spurious;
            }
            match entry.waiting.take() {
                Some(token) => {
                    entry.count += 1;
                    Outcome::Wake(token)
                }
                None => Outcome::Unclaimed,
            }
        });

        match outcome {
            Outcome::Spurious => CoreStats::bump(&cpu.stats.spurious),
            Outcome::Unclaimed => {
                klog_error!("baton: interrupt {} on core {} with no waiting task", source, core);
                panic!("interrupt {} has no waiting task", source);
            }
            Outcome::Wake(token) => {
                self.platform.interrupts.mask(core, source);
                let task = token.first();
                {
                    let mut state = self.task(task).state.lock();
                    let previous = state.leave();
                    debug_assert_eq!(previous, Residence::Interrupt(core, source));
                    state.context.r[0] = source;
                    state.context.clear_error();
                }
                self.make_runnable(token, Placement::Head);
                CoreStats::bump(&cpu.stats.interrupts);
                klog_trace!("baton: interrupt {} wakes task {}", source, task.index());
            }
        }
    }

    /// Times `source` has woken a task on `core`.
    pub fn interrupt_count(&self, core: usize, source: u32) -> KernelResult<u64> {
        let cpu = self.booted_cpu(core)?;
        let index = cpu.irq.check_source(source)?;
        Ok(cpu.irq.with_entries(|entries| entries[index].count))
    }

    pub fn interrupt_sources(&self, core: usize) -> KernelResult<u32> {
        Ok(self.booted_cpu(core)?.irq.sources())
    }
}
