//! The kernel object.
//!
//! One `Kernel` owns every pool and every core's scheduler state. Entry
//! points (`swi`, `interrupt`, `timer_tick`, `reschedule`) take the number
//! of the core they run on and that core's register frame; nothing is
//! looked up through globals.

use baton_abi::{
    BankedRegisters, CpuFrame, ErrorCode, KernelResult, MAX_MODULE_SWIS, SlotHandle,
    TaskContext, TaskHandle,
};
use baton_lib::{klog_info, klog_warn, MAX_CPUS};
use spin::RwLock;

use crate::config::KernelConfig;
use crate::pipe::PipePool;
use crate::platform::Platform;
use crate::pool::{SlotIndex, TaskIndex};
use crate::scheduler::per_cpu::{CoreState, CoreStatsSnapshot};
use crate::slot::{MemoryRegion, Slot, SlotPool, SvcContinuation, MAX_REGIONS};
use crate::syscall::ModuleSwi;
use crate::task::{Residence, Task, TaskPool};

pub struct Kernel {
    pub(crate) config: KernelConfig,
    pub(crate) platform: Platform,
    pub(crate) tasks: TaskPool,
    pub(crate) slots: SlotPool,
    pub(crate) pipes: PipePool,
    pub(crate) cores: [CoreState; MAX_CPUS],
    pub(crate) boot_slot: SlotIndex,
    pub(crate) module_swis: RwLock<[Option<ModuleSwi>; MAX_MODULE_SWIS]>,
}

impl Kernel {
    /// Build the pools and the boot slot. Cores come online one by one
    /// through [`Kernel::boot_core`].
    pub fn new(config: KernelConfig, platform: Platform) -> KernelResult<Self> {
        if let Err(err) = config.validate() {
            klog_warn!("baton: rejected configuration {:?}", config);
            return Err(err);
        }

        let tasks = TaskPool::new(config.task_capacity());
        let slots = SlotPool::new(config.slot_capacity());
        let pipes = PipePool::new(config.pipe_capacity());

        let boot_slot = slots.allocate().ok_or(ErrorCode::OutOfSlots)?;
        slots.get(boot_slot).prepare(None, config.pipe_window_base);

        klog_info!(
            "baton: {} cores, {} tasks, {} slots, {} pipes",
            config.cores,
            tasks.capacity(),
            slots.capacity(),
            pipes.capacity()
        );

        Ok(Self {
            config,
            platform,
            tasks,
            slots,
            pipes,
            cores: [const { CoreState::new() }; MAX_CPUS],
            boot_slot,
            module_swis: RwLock::new([None; MAX_MODULE_SWIS]),
        })
    }

    #[inline]
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    #[inline]
    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// State of `core`. Entry points on an unknown core are a wiring bug.
    pub(crate) fn cpu(&self, core: usize) -> &CoreState {
        if core >= self.config.cores {
            baton_lib::klog_error!("baton: entry on unconfigured core {}", core);
            panic!("core {} is not configured", core);
        }
        &self.cores[core]
    }

    pub(crate) fn booted_cpu(&self, core: usize) -> KernelResult<&CoreState> {
        match self.cores.get(core) {
            Some(cpu) if core < self.config.cores && cpu.is_booted() => Ok(cpu),
            _ => Err(ErrorCode::InvalidCore),
        }
    }

    #[inline]
    pub(crate) fn task(&self, index: TaskIndex) -> &Task {
        self.tasks.get(index)
    }

    #[inline]
    pub(crate) fn slot(&self, index: SlotIndex) -> &Slot {
        self.slots.get(index)
    }

    #[inline]
    pub(crate) fn task_handle(&self, index: TaskIndex) -> TaskHandle {
        TaskHandle::from_raw(self.tasks.handle_raw(index))
    }

    #[inline]
    pub(crate) fn slot_handle(&self, index: SlotIndex) -> SlotHandle {
        SlotHandle::from_raw(self.slots.handle_raw(index))
    }

    #[inline]
    pub(crate) fn resolve_task(&self, handle: TaskHandle) -> KernelResult<TaskIndex> {
        self.tasks.resolve_raw(handle.raw())
    }

    #[inline]
    pub(crate) fn resolve_slot(&self, handle: SlotHandle) -> KernelResult<SlotIndex> {
        self.slots.resolve_raw(handle.raw())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn boot_slot(&self) -> SlotHandle {
        self.slot_handle(self.boot_slot)
    }

    /// Task whose registers the core's frame holds.
    pub fn current_task(&self, core: usize) -> Option<TaskHandle> {
        let cpu = self.booted_cpu(core).ok()?;
        cpu.current().map(|task| self.task_handle(task))
    }

    pub fn idle_task(&self, core: usize) -> Option<TaskHandle> {
        let cpu = self.booted_cpu(core).ok()?;
        cpu.idle().map(|task| self.task_handle(task))
    }

    /// Saved registers of a task that is not current.
    pub fn task_context(&self, task: TaskHandle) -> KernelResult<TaskContext> {
        let index = self.resolve_task(task)?;
        Ok(self.task(index).state.lock().context)
    }

    pub fn task_banked(&self, task: TaskHandle) -> KernelResult<BankedRegisters> {
        let index = self.resolve_task(task)?;
        Ok(self.task(index).state.lock().banked)
    }

    pub fn task_residence(&self, task: TaskHandle) -> KernelResult<Residence> {
        let index = self.resolve_task(task)?;
        Ok(self.task(index).state.lock().residence)
    }

    pub fn task_slot(&self, task: TaskHandle) -> KernelResult<SlotHandle> {
        let index = self.resolve_task(task)?;
        Ok(self.slot_handle(self.task(index).slot()))
    }

    pub fn task_resumes(&self, task: TaskHandle) -> KernelResult<i32> {
        let index = self.resolve_task(task)?;
        Ok(self.task(index).resumes())
    }

    /// User state saved while the task runs its slot's callback handler.
    pub fn callback_frame(&self, task: TaskHandle) -> KernelResult<Option<CpuFrame>> {
        let index = self.resolve_task(task)?;
        Ok(self.task(index).state.lock().callback_saved)
    }

    pub fn stack_owner(&self, slot: SlotHandle) -> KernelResult<Option<TaskHandle>> {
        let index = self.resolve_slot(slot)?;
        Ok(self.slot(index).stack_owner())
    }

    pub fn slot_continuation(&self, slot: SlotHandle) -> KernelResult<Option<SvcContinuation>> {
        let index = self.resolve_slot(slot)?;
        Ok(self.slot(index).continuation())
    }

    pub fn slot_creator(&self, slot: SlotHandle) -> KernelResult<Option<SlotHandle>> {
        let index = self.resolve_slot(slot)?;
        Ok(self.slot(index).state.lock().creator)
    }

    pub fn slot_regions(&self, slot: SlotHandle) -> KernelResult<[Option<MemoryRegion>; MAX_REGIONS]> {
        let index = self.resolve_slot(slot)?;
        Ok(self.slot(index).state.lock().regions)
    }

    pub fn stack_waiters(&self, slot: SlotHandle) -> KernelResult<usize> {
        let index = self.resolve_slot(slot)?;
        Ok(self.slot(index).waiting_for_slot_stack.len(&self.tasks))
    }

    /// Visit the running ring of `core` from its head.
    pub fn for_each_running<F: FnMut(TaskHandle)>(&self, core: usize, mut f: F) {
        let Ok(cpu) = self.booted_cpu(core) else {
            return;
        };
        let running = cpu.running.lock(&self.tasks);
        for task in running.iter() {
            f(self.task_handle(task));
        }
    }

    /// Visit the sleepers of `core` with their delta from the previous one.
    pub fn for_each_sleeping<F: FnMut(TaskHandle, u32)>(&self, core: usize, mut f: F) {
        let Ok(cpu) = self.booted_cpu(core) else {
            return;
        };
        let sleeping = cpu.sleeping.lock(&self.tasks);
        for task in sleeping.iter() {
            let delta = self.task(task).sleep_delta.load(core::sync::atomic::Ordering::Relaxed);
            f(self.task_handle(task), delta);
        }
    }

    pub fn core_stats(&self, core: usize) -> KernelResult<CoreStatsSnapshot> {
        Ok(self.booted_cpu(core)?.stats.snapshot())
    }

    pub fn free_tasks(&self) -> usize {
        self.tasks.free_count()
    }

    pub fn free_slots(&self) -> usize {
        self.slots.free_count()
    }

    pub fn free_pipes(&self) -> usize {
        self.pipes.free_count()
    }
}
