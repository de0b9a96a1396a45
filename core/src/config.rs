//! Boot-time kernel configuration.

use core::mem::size_of;

use baton_abi::{ErrorCode, KernelResult, VirtAddr};
use baton_lib::MAX_CPUS;

use crate::pipe::MAX_PIPES;
use crate::slot::{MAX_SLOTS, Slot};
use crate::task::{MAX_TASKS, Task};

/// Where a batch of sleepers woken by one timer tick joins the running
/// list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakePlacement {
    /// Ahead of every already-runnable task; the batch runs first.
    Head,
    /// Behind every already-runnable task.
    Tail,
}

#[derive(Debug, Clone, Copy)]
pub struct KernelConfig {
    pub cores: usize,
    /// Memory set aside for the task pool.
    pub task_pool_bytes: usize,
    /// Memory set aside for the TaskSlot pool.
    pub slot_pool_bytes: usize,
    pub pipe_pool_entries: usize,
    /// Per-slot virtual window where pipe ends are mapped.
    pub pipe_window_base: VirtAddr,
    pub pipe_window_size: u32,
    pub wake_placement: WakePlacement,
}

impl KernelConfig {
    pub const fn new() -> Self {
        Self {
            cores: 1,
            task_pool_bytes: MAX_TASKS * size_of::<Task>(),
            slot_pool_bytes: MAX_SLOTS * size_of::<Slot>(),
            pipe_pool_entries: MAX_PIPES,
            pipe_window_base: VirtAddr::new(0xc000_0000),
            pipe_window_size: 0x1000_0000,
            wake_placement: WakePlacement::Head,
        }
    }

    pub const fn with_cores(mut self, cores: usize) -> Self {
        self.cores = cores;
        self
    }

    pub const fn with_task_capacity(mut self, tasks: usize) -> Self {
        self.task_pool_bytes = tasks * size_of::<Task>();
        self
    }

    pub const fn with_slot_capacity(mut self, slots: usize) -> Self {
        self.slot_pool_bytes = slots * size_of::<Slot>();
        self
    }

    pub const fn with_pipe_capacity(mut self, pipes: usize) -> Self {
        self.pipe_pool_entries = pipes;
        self
    }

    pub const fn with_wake_placement(mut self, placement: WakePlacement) -> Self {
        self.wake_placement = placement;
        self
    }

    pub const fn with_pipe_window(mut self, base: VirtAddr, size: u32) -> Self {
        self.pipe_window_base = base;
        self.pipe_window_size = size;
        self
    }

    pub const fn task_capacity(&self) -> usize {
        min(self.task_pool_bytes / size_of::<Task>(), MAX_TASKS)
    }

    pub const fn slot_capacity(&self) -> usize {
        min(self.slot_pool_bytes / size_of::<Slot>(), MAX_SLOTS)
    }

    pub const fn pipe_capacity(&self) -> usize {
        min(self.pipe_pool_entries, MAX_PIPES)
    }

    pub fn validate(&self) -> KernelResult<()> {
        if self.cores == 0 || self.cores > MAX_CPUS {
            return Err(ErrorCode::InvalidConfig);
        }
        // Every core needs an idle task, and the boot slot is always taken.
        if self.task_capacity() < self.cores || self.slot_capacity() == 0 {
            return Err(ErrorCode::InvalidConfig);
        }
        if self.pipe_capacity() == 0 || self.pipe_window_size == 0 {
            return Err(ErrorCode::InvalidConfig);
        }
        if self
            .pipe_window_base
            .as_u32()
            .checked_add(self.pipe_window_size - 1)
            .is_none()
        {
            return Err(ErrorCode::InvalidConfig);
        }
        Ok(())
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::new()
    }
}

const fn min(a: usize, b: usize) -> usize {
    if a < b { a } else { b }
}
