//! Tasks, their saved state and the queues they move between.
//!
//! A task is always a member of exactly one circular ring. While it sits in
//! a list (a core's running or sleeping list, a slot's wait queues) the ring
//! is that list; while it waits on something without a list (a pipe end, an
//! interrupt source, `WaitUntilWoken`) it is a ring of one and the
//! [`Unqueued`] token that proves it is not linked anywhere is held by the
//! structure it waits on.

use core::sync::atomic::{AtomicI32, AtomicU16, AtomicU32, AtomicUsize, Ordering};

use baton_abi::{BankedRegisters, CpuFrame, SystemCall, TaskContext};
use baton_lib::clist::RingIter;
use baton_lib::{klog_error, ConcurrentList, ListGuard};
use spin::Mutex;

use crate::pool::{PipeIndex, Pool, PoolEntry, PoolHeader, SlotIndex, TaskIndex};

pub const MAX_TASKS: usize = 128;

pub type TaskPool = Pool<Task, TaskIndex, MAX_TASKS>;

/// Where a task currently lives. Exactly one place at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residence {
    Free,
    /// Unlinked; whoever holds its [`Unqueued`] token decides what happens
    /// next.
    Detached,
    Running(usize),
    Sleeping(usize),
    WaitingForStack(SlotIndex),
    WaitingForLock(SlotIndex),
    PipeSender(PipeIndex),
    PipeReceiver(PipeIndex),
    WaitingForResume,
    Interrupt(usize, u32),
}

/// The right to link a detached ring of tasks into a queue.
///
/// Produced only by detaching tasks from a queue or allocating a new task,
/// consumed by every insertion. Not `Clone`, so a task cannot be queued
/// twice.
#[must_use = "a detached task is lost unless it is queued again"]
#[derive(Debug, PartialEq, Eq)]
pub struct Unqueued {
    first: TaskIndex,
}

impl Unqueued {
    #[inline]
    pub(crate) fn new(first: TaskIndex) -> Self {
        Self { first }
    }

    #[inline]
    pub fn first(&self) -> TaskIndex {
        self.first
    }

    /// Every task in the detached ring, starting with [`Self::first`].
    pub fn ring<'a>(&self, tasks: &'a TaskPool) -> RingIter<'a, TaskIndex, TaskPool> {
        RingIter::over(tasks, self.first)
    }

    #[inline]
    fn into_ring(self) -> TaskIndex {
        self.first
    }
}

// =============================================================================
// Task
// =============================================================================

/// Mutable per-task state, guarded by the task's own lock.
///
/// Lock order: queue guards are taken before a task's state lock, never
/// after.
pub struct TaskState {
    pub context: TaskContext,
    /// User sp/lr. Only meaningful while the task is not current.
    pub banked: BankedRegisters,
    pub residence: Residence,
    /// A SWI waiting for the slot stack, replayed once ownership arrives.
    pub pending: Option<SystemCall>,
    /// Own token while blocked in `WaitUntilWoken`.
    pub parked: Option<Unqueued>,
    /// User state interrupted by a callback handler.
    pub callback_saved: Option<CpuFrame>,
    pub name: &'static str,
}

impl TaskState {
    const fn new() -> Self {
        Self {
            context: TaskContext::zero(),
            banked: BankedRegisters { sp: 0, lr: 0 },
            residence: Residence::Free,
            pending: None,
            parked: None,
            callback_saved: None,
            name: "",
        }
    }

    /// Record that the task was linked into `residence`.
    pub(crate) fn enter(&mut self, task: TaskIndex, residence: Residence) {
        if self.residence != Residence::Detached {
            klog_error!(
                "baton: task {} queued as {:?} while {:?}",
                task.index(),
                residence,
                self.residence
            );
            panic!("task queued while already resident");
        }
        self.residence = residence;
    }

    pub(crate) fn leave(&mut self) -> Residence {
        core::mem::replace(&mut self.residence, Residence::Detached)
    }
}

pub struct Task {
    header: PoolHeader,
    /// Pending wake count. Negative while the task is blocked in
    /// `WaitUntilWoken`.
    pub(crate) resumes: AtomicI32,
    /// Ticks after the previous sleeper in the delta list.
    pub(crate) sleep_delta: AtomicU32,
    /// User lock address being waited for.
    pub(crate) waiting_lock: AtomicU32,
    home: AtomicUsize,
    slot: AtomicU16,
    pub(crate) state: Mutex<TaskState>,
}

impl Task {
    #[inline]
    pub fn home_core(&self) -> usize {
        self.home.load(Ordering::Acquire)
    }

    #[inline]
    pub fn slot(&self) -> SlotIndex {
        SlotIndex::new(self.slot.load(Ordering::Acquire) as usize)
    }

    #[inline]
    pub fn resumes(&self) -> i32 {
        self.resumes.load(Ordering::Acquire)
    }

    /// Initialise a freshly allocated entry. The task starts detached.
    pub(crate) fn prepare(
        &self,
        core: usize,
        slot: SlotIndex,
        context: TaskContext,
        banked: BankedRegisters,
        name: &'static str,
    ) {
        self.resumes.store(0, Ordering::Relaxed);
        self.sleep_delta.store(0, Ordering::Relaxed);
        self.waiting_lock.store(0, Ordering::Relaxed);
        self.home.store(core, Ordering::Relaxed);
        self.slot.store(slot.index() as u16, Ordering::Relaxed);
        let mut state = self.state.lock();
        *state = TaskState::new();
        state.context = context;
        state.banked = banked;
        state.residence = Residence::Detached;
        state.name = name;
    }
}

impl PoolEntry for Task {
    fn empty() -> Self {
        Self {
            header: PoolHeader::new(),
            resumes: AtomicI32::new(0),
            sleep_delta: AtomicU32::new(0),
            waiting_lock: AtomicU32::new(0),
            home: AtomicUsize::new(0),
            slot: AtomicU16::new(0),
            state: Mutex::new(TaskState::new()),
        }
    }

    #[inline]
    fn header(&self) -> &PoolHeader {
        &self.header
    }
}

/// Creation parameters for a task started by boot code or `Start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskSpec {
    pub entry: u32,
    pub stack: u32,
    /// Initial `r0`-`r3`.
    pub args: [u32; 4],
    pub mode: baton_abi::ProcessorMode,
    pub name: &'static str,
}

impl TaskSpec {
    pub const fn user(entry: u32, stack: u32, name: &'static str) -> Self {
        Self {
            entry,
            stack,
            args: [0; 4],
            mode: baton_abi::ProcessorMode::User,
            name,
        }
    }

    pub const fn with_args(mut self, args: [u32; 4]) -> Self {
        self.args = args;
        self
    }

    pub(crate) fn context(&self) -> (TaskContext, BankedRegisters) {
        let mut context = TaskContext::entering(self.entry, self.mode);
        context.r[..4].copy_from_slice(&self.args);
        let banked = BankedRegisters {
            sp: self.stack,
            lr: 0,
        };
        (context, banked)
    }
}

// =============================================================================
// TaskQueue - typed queue of tasks
// =============================================================================

/// A concurrent list of tasks that takes and hands out [`Unqueued`] tokens.
pub struct TaskQueue {
    list: ConcurrentList<TaskIndex>,
}

impl TaskQueue {
    pub const fn new() -> Self {
        Self {
            list: ConcurrentList::new(),
        }
    }

    pub fn lock<'a>(&'a self, tasks: &'a TaskPool) -> QueueGuard<'a> {
        QueueGuard {
            inner: self.list.lock(tasks),
        }
    }

    #[inline]
    pub fn head(&self) -> Option<TaskIndex> {
        self.list.head()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn len(&self, tasks: &TaskPool) -> usize {
        self.list.len(tasks)
    }

    pub fn push_back(&self, tasks: &TaskPool, token: Unqueued) {
        self.list.insert_at_tail(tasks, token.into_ring());
    }

    pub fn push_front(&self, tasks: &TaskPool, token: Unqueued) {
        self.list.insert_at_head(tasks, token.into_ring());
    }

    pub fn insert_after_head(&self, tasks: &TaskPool, token: Unqueued) {
        self.list.insert_after_head(tasks, token.into_ring());
    }

    pub fn remove_where<F>(&self, tasks: &TaskPool, pred: F) -> Option<Unqueued>
    where
        F: FnMut(TaskIndex) -> bool,
    {
        self.list.find_and_remove(tasks, pred).map(Unqueued::new)
    }

    pub fn take_all(&self) -> Option<Unqueued> {
        self.list.detach_all().map(Unqueued::new)
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive access to a locked [`TaskQueue`].
pub struct QueueGuard<'a> {
    inner: ListGuard<'a, TaskIndex, TaskPool>,
}

impl<'a> QueueGuard<'a> {
    #[inline]
    pub fn head(&self) -> Option<TaskIndex> {
        self.inner.head()
    }

    #[inline]
    pub fn next(&self, task: TaskIndex) -> TaskIndex {
        self.inner.next(task)
    }

    pub fn iter(&self) -> RingIter<'_, TaskIndex, TaskPool> {
        self.inner.iter()
    }

    pub fn contains(&self, task: TaskIndex) -> bool {
        self.inner.contains(task)
    }

    pub fn rotate(&mut self) {
        self.inner.rotate();
    }

    pub fn push_back(&mut self, token: Unqueued) {
        self.inner.push_back(token.into_ring());
    }

    pub fn push_front(&mut self, token: Unqueued) {
        self.inner.push_front(token.into_ring());
    }

    pub fn insert_after_head(&mut self, token: Unqueued) {
        self.inner.insert_after_head(token.into_ring());
    }

    pub fn insert_before(&mut self, pos: TaskIndex, token: Unqueued) {
        self.inner.insert_before(pos, token.into_ring());
    }

    pub fn pop_front(&mut self) -> Option<Unqueued> {
        self.inner.pop_front().map(Unqueued::new)
    }

    /// Unlink a member.
    pub fn remove(&mut self, task: TaskIndex) -> Unqueued {
        debug_assert!(self.inner.contains(task), "removing a task from a queue it is not in");
        self.inner.remove(task);
        Unqueued::new(task)
    }

    pub fn split_front(&mut self, count: usize) -> Option<Unqueued> {
        self.inner.split_front(count).map(Unqueued::new)
    }
}
