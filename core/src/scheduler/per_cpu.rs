//! Per-core scheduler state.
//!
//! Each core has its own running ring, sleep list and interrupt routing
//! table. Nothing here migrates between cores: a task is only ever linked
//! into its home core's lists, and only the home core changes which task is
//! at the head of its running ring.

use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use baton_lib::InitFlag;

use crate::irq::IrqTable;
use crate::pool::{SlotIndex, TaskIndex};
use crate::task::TaskQueue;

const NONE: usize = usize::MAX;

#[derive(Default)]
pub struct CoreStats {
    pub switches: AtomicU64,
    pub ticks: AtomicU64,
    pub yields: AtomicU64,
    pub swis: AtomicU64,
    pub interrupts: AtomicU64,
    pub spurious: AtomicU64,
}

impl CoreStats {
    const fn new() -> Self {
        Self {
            switches: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
            yields: AtomicU64::new(0),
            swis: AtomicU64::new(0),
            interrupts: AtomicU64::new(0),
            spurious: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CoreStatsSnapshot {
        CoreStatsSnapshot {
            switches: self.switches.load(Ordering::Relaxed),
            ticks: self.ticks.load(Ordering::Relaxed),
            yields: self.yields.load(Ordering::Relaxed),
            swis: self.swis.load(Ordering::Relaxed),
            interrupts: self.interrupts.load(Ordering::Relaxed),
            spurious: self.spurious.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoreStatsSnapshot {
    pub switches: u64,
    pub ticks: u64,
    pub yields: u64,
    pub swis: u64,
    pub interrupts: u64,
    pub spurious: u64,
}

#[repr(C, align(64))]
pub struct CoreState {
    /// Head is the task that runs when this core leaves the kernel.
    pub(crate) running: TaskQueue,
    /// Delta-ordered sleepers.
    pub(crate) sleeping: TaskQueue,
    idle: AtomicUsize,
    /// Task whose registers were last loaded into the CPU frame.
    current: AtomicUsize,
    mapped_slot: AtomicUsize,
    pub(crate) irq: IrqTable,
    pub(crate) stats: CoreStats,
    booted: InitFlag,
}

impl CoreState {
    pub const fn new() -> Self {
        Self {
            running: TaskQueue::new(),
            sleeping: TaskQueue::new(),
            idle: AtomicUsize::new(NONE),
            current: AtomicUsize::new(NONE),
            mapped_slot: AtomicUsize::new(NONE),
            irq: IrqTable::new(),
            stats: CoreStats::new(),
            booted: InitFlag::new(),
        }
    }

    #[inline]
    pub fn is_booted(&self) -> bool {
        self.booted.is_set()
    }

    /// Returns `true` for the one caller that gets to boot this core.
    pub(crate) fn claim_boot(&self) -> bool {
        self.booted.claim()
    }

    pub(crate) fn abandon_boot(&self) {
        self.booted.abandon();
    }

    pub(crate) fn mark_booted(&self, idle: TaskIndex, slot: SlotIndex) {
        self.idle.store(idle.index(), Ordering::Relaxed);
        self.current.store(idle.index(), Ordering::Relaxed);
        self.mapped_slot.store(slot.index(), Ordering::Relaxed);
        self.booted.publish();
    }

    #[inline]
    pub fn idle(&self) -> Option<TaskIndex> {
        load_index(&self.idle)
    }

    #[inline]
    pub fn current(&self) -> Option<TaskIndex> {
        load_index(&self.current)
    }

    /// Record `task` as loaded. Returns `true` if it differs from the
    /// previous one.
    pub(crate) fn set_current(&self, task: TaskIndex) -> bool {
        self.current.swap(task.index(), Ordering::Relaxed) != task.index()
    }

    /// Record `slot` as the mapped address space. Returns `true` if it
    /// differs from the previous one.
    pub(crate) fn set_mapped_slot(&self, slot: SlotIndex) -> bool {
        self.mapped_slot.swap(slot.index(), Ordering::Relaxed) != slot.index()
    }

    #[inline]
    pub fn is_idle(&self, task: TaskIndex) -> bool {
        self.idle() == Some(task)
    }
}

impl Default for CoreState {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn load_index(cell: &AtomicUsize) -> Option<TaskIndex> {
    match cell.load(Ordering::Relaxed) {
        NONE => None,
        index => Some(TaskIndex::new(index)),
    }
}
