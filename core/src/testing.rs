//! In-memory collaborators and fixtures for driving a kernel from tests.
//!
//! Each simulated core is a `CpuFrame`: tests put a task's SWI registers
//! into the frame, call an entry point, and read back whatever task the
//! kernel loaded.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use baton_abi::{
    CpuFrame, DebugConsole, ErrorCode, InterruptController, MemoryServices, PhysAddr,
    ProcessorMode, SWI_NUMBER_REGISTER, SlotHandle, SwiNumber, TaskContext, TaskHandle, VirtAddr,
};
use baton_lib::testing::{FixtureKind, TestFixture};
use baton_lib::{KlogSink, klog_attach_sink};

use crate::{Kernel, KernelConfig, Platform, TaskSpec};

// =============================================================================
// Collaborators
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Mapping {
    virt: u32,
    phys: u64,
    size: u32,
}

#[derive(Default)]
struct MemoryInner {
    next_phys: u64,
    /// Allocation base -> backing bytes.
    pages: HashMap<u64, Vec<u8>>,
    mappings: HashMap<u32, Vec<Mapping>>,
    switches: Vec<(usize, SlotHandle)>,
    cleaned: Vec<(SlotHandle, u32, u32)>,
    refuse_allocations: bool,
}

/// Byte-addressable physical memory with per-slot mappings.
pub struct FakeMemory {
    inner: Mutex<MemoryInner>,
}

impl FakeMemory {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                next_phys: 0x10_0000,
                ..Default::default()
            }),
        }
    }

    fn translate(inner: &MemoryInner, slot: SlotHandle, virt: u32) -> Option<u64> {
        inner
            .mappings
            .get(&slot.raw())?
            .iter()
            .find(|m| virt >= m.virt && (virt as u64) < m.virt as u64 + m.size as u64)
            .map(|m| m.phys + (virt - m.virt) as u64)
    }

    fn byte_mut(inner: &mut MemoryInner, phys: u64) -> Option<&mut u8> {
        inner
            .pages
            .iter_mut()
            .find(|(base, bytes)| phys >= **base && phys < **base + bytes.len() as u64)
            .map(|(base, bytes)| &mut bytes[(phys - *base) as usize])
    }

    /// Write task memory. `false` when any byte is unmapped.
    pub fn write_user(&self, slot: SlotHandle, virt: u32, data: &[u8]) -> bool {
        let mut inner = self.inner.lock().unwrap();
        for (i, byte) in data.iter().enumerate() {
            let Some(phys) = Self::translate(&inner, slot, virt + i as u32) else {
                return false;
            };
            match Self::byte_mut(&mut inner, phys) {
                Some(b) => *b = *byte,
                None => return false,
            }
        }
        true
    }

    pub fn read_bytes(&self, slot: SlotHandle, virt: u32, len: usize) -> Option<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_user(slot, VirtAddr::new(virt), &mut buf).then_some(buf)
    }

    /// Back `virt..virt + len` of `slot` with fresh zeroed memory.
    pub fn map_scratch(&self, slot: SlotHandle, virt: u32, len: u32) {
        let phys = self
            .allocate_pages(len, 4096)
            .expect("scratch allocation");
        assert!(self.map_at(slot, VirtAddr::new(virt), phys, len));
    }

    pub fn is_mapped(&self, slot: SlotHandle, virt: u32) -> bool {
        let inner = self.inner.lock().unwrap();
        Self::translate(&inner, slot, virt).is_some()
    }

    pub fn allocated_bytes(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.pages.values().map(Vec::len).sum()
    }

    pub fn switches(&self) -> Vec<(usize, SlotHandle)> {
        self.inner.lock().unwrap().switches.clone()
    }

    pub fn cleaned(&self) -> Vec<(SlotHandle, u32, u32)> {
        self.inner.lock().unwrap().cleaned.clone()
    }

    pub fn refuse_allocations(&self, refuse: bool) {
        self.inner.lock().unwrap().refuse_allocations = refuse;
    }
}

impl MemoryServices for FakeMemory {
    fn allocate_pages(&self, size: u32, alignment: u32) -> Option<PhysAddr> {
        let mut inner = self.inner.lock().unwrap();
        if inner.refuse_allocations {
            return None;
        }
        let align = alignment.max(1) as u64;
        let base = inner.next_phys.div_ceil(align) * align;
        inner.next_phys = base + size as u64;
        inner.pages.insert(base, vec![0; size as usize]);
        Some(PhysAddr::new(base))
    }

    fn free_pages(&self, base: PhysAddr, size: u32) {
        let mut inner = self.inner.lock().unwrap();
        let freed = inner.pages.remove(&base.as_u64());
        assert_eq!(freed.map(|b| b.len()), Some(size as usize), "bad free");
    }

    fn switch_to_map(&self, core: usize, slot: SlotHandle) {
        self.inner.lock().unwrap().switches.push((core, slot));
    }

    fn map_at(&self, slot: SlotHandle, virt: VirtAddr, physical: PhysAddr, size: u32) -> bool {
        let mut inner = self.inner.lock().unwrap();
        inner.mappings.entry(slot.raw()).or_default().push(Mapping {
            virt: virt.as_u32(),
            phys: physical.as_u64(),
            size,
        });
        true
    }

    fn unmap(&self, slot: SlotHandle, virt: VirtAddr, size: u32) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(list) = inner.mappings.get_mut(&slot.raw()) {
            list.retain(|m| !(m.virt == virt.as_u32() && m.size == size));
        }
    }

    fn read_user(&self, slot: SlotHandle, virt: VirtAddr, buf: &mut [u8]) -> bool {
        let mut inner = self.inner.lock().unwrap();
        for (i, out) in buf.iter_mut().enumerate() {
            let Some(phys) = Self::translate(&inner, slot, virt.as_u32() + i as u32) else {
                return false;
            };
            match Self::byte_mut(&mut inner, phys) {
                Some(b) => *out = *b,
                None => return false,
            }
        }
        true
    }

    fn clean_cache(&self, slot: SlotHandle, virt: VirtAddr, len: u32) {
        self.inner
            .lock()
            .unwrap()
            .cleaned
            .push((slot, virt.as_u32(), len));
    }
}

#[derive(Default)]
pub struct FakeInterrupts {
    unmasked: Mutex<HashSet<(usize, u32)>>,
}

impl FakeInterrupts {
    pub fn is_unmasked(&self, core: usize, source: u32) -> bool {
        self.unmasked.lock().unwrap().contains(&(core, source))
    }
}

impl InterruptController for FakeInterrupts {
    fn mask(&self, core: usize, source: u32) {
        self.unmasked.lock().unwrap().remove(&(core, source));
    }

    fn unmask(&self, core: usize, source: u32) {
        self.unmasked.lock().unwrap().insert((core, source));
    }
}

#[derive(Default)]
pub struct FakeConsole {
    output: Mutex<Vec<u8>>,
}

impl FakeConsole {
    pub fn take(&self) -> String {
        let bytes = std::mem::take(&mut *self.output.lock().unwrap());
        String::from_utf8(bytes).expect("console output is utf-8")
    }
}

impl DebugConsole for FakeConsole {
    fn write(&self, bytes: &[u8]) {
        self.output.lock().unwrap().extend_from_slice(bytes);
    }
}

fn stdout_sink(bytes: &[u8]) {
    print!("{}", String::from_utf8_lossy(bytes));
}

static STDOUT_SINK: KlogSink = KlogSink { write: stdout_sink };

// =============================================================================
// Fixtures
// =============================================================================

pub const IDLE_PC: u32 = 0xffff_0000;
pub const USER_STACK: u32 = 0x0010_0000;

/// A kernel over fresh fakes with every configured core booted.
pub struct KernelFixture {
    pub kernel: Kernel,
    pub memory: &'static FakeMemory,
    pub interrupts: &'static FakeInterrupts,
    pub console: &'static FakeConsole,
    pub frames: Vec<CpuFrame>,
    spawned: u32,
}

impl KernelFixture {
    pub fn with_config(config: KernelConfig) -> Self {
        klog_attach_sink(&STDOUT_SINK);
        let memory: &'static FakeMemory = Box::leak(Box::new(FakeMemory::new()));
        let interrupts: &'static FakeInterrupts = Box::leak(Box::default());
        let console: &'static FakeConsole = Box::leak(Box::default());
        let kernel = Kernel::new(config, Platform::new(memory, interrupts, console))
            .expect("kernel configuration");

        let mut frames = Vec::new();
        for core in 0..config.cores {
            let mut frame = CpuFrame {
                context: TaskContext::entering(IDLE_PC, ProcessorMode::System),
                banked: Default::default(),
            };
            kernel.boot_core(core, &mut frame).expect("boot core");
            frames.push(frame);
        }
        Self {
            kernel,
            memory,
            interrupts,
            console,
            frames,
            spawned: 0,
        }
    }

    pub fn new() -> Self {
        Self::with_config(KernelConfig::new())
    }

    fn next_spec(&mut self, name: &'static str) -> TaskSpec {
        self.spawned += 1;
        TaskSpec::user(0x8000 + self.spawned * 0x100, USER_STACK + self.spawned * 0x1000, name)
            .with_args([self.spawned, 0, 0, 0])
    }

    /// New task in a fresh slot at the tail of `core`'s running list.
    pub fn spawn(&mut self, core: usize, name: &'static str) -> (TaskHandle, SlotHandle) {
        let spec = self.next_spec(name);
        self.kernel.spawn(core, spec, None).expect("spawn")
    }

    pub fn spawn_in(&mut self, core: usize, slot: SlotHandle, name: &'static str) -> TaskHandle {
        let spec = self.next_spec(name);
        self.kernel.spawn(core, spec, Some(slot)).expect("spawn").0
    }

    pub fn run(&mut self, core: usize) {
        self.kernel.reschedule(core, &mut self.frames[core]);
    }

    pub fn current(&self, core: usize) -> TaskHandle {
        self.kernel.current_task(core).expect("core is booted")
    }

    /// Issue SWI `number` from whatever task the core is running.
    pub fn swi_raw(&mut self, core: usize, number: u32, args: &[u32]) {
        let frame = &mut self.frames[core];
        frame.context.r[..args.len()].copy_from_slice(args);
        frame.context.r[SWI_NUMBER_REGISTER] = number;
        self.kernel.swi(core, frame);
    }

    /// A call that returns to its caller. Yields `r0`-`r3` or the error.
    pub fn call(&mut self, core: usize, swi: SwiNumber, args: &[u32]) -> Result<[u32; 4], ErrorCode> {
        let caller = self.current(core);
        self.swi_raw(core, swi.raw(), args);
        assert_eq!(self.current(core), caller, "{:?} switched tasks", swi);
        self.last_result(core)
    }

    /// Result registers of the call the current task just made.
    pub fn last_result(&self, core: usize) -> Result<[u32; 4], ErrorCode> {
        Self::outcome(&self.frames[core].context)
    }

    /// A call that blocks its caller. Returns the task that runs instead.
    pub fn call_blocking(&mut self, core: usize, swi: SwiNumber, args: &[u32]) -> TaskHandle {
        let caller = self.current(core);
        self.swi_raw(core, swi.raw(), args);
        let now = self.current(core);
        assert_ne!(now, caller, "{:?} did not block", swi);
        now
    }

    /// The result a blocked or descheduled task will see when it next runs.
    pub fn saved_result(&self, task: TaskHandle) -> Result<[u32; 4], ErrorCode> {
        Self::outcome(&self.kernel.task_context(task).expect("live task"))
    }

    fn outcome(context: &TaskContext) -> Result<[u32; 4], ErrorCode> {
        match context.failed() {
            Some(code) => Err(code),
            None => Ok([context.r[0], context.r[1], context.r[2], context.r[3]]),
        }
    }

    /// Yield with `Sleep(0)` until `target` runs on `core`.
    pub fn yield_to(&mut self, core: usize, target: TaskHandle) {
        for _ in 0..64 {
            if self.current(core) == target {
                return;
            }
            self.swi_raw(core, SwiNumber::Sleep.raw(), &[0]);
        }
        panic!("task {:#x} never became current", target.raw());
    }

    pub fn fire(&mut self, core: usize, source: Option<u32>) {
        self.kernel.interrupt(core, source, &mut self.frames[core]);
    }

    pub fn tick(&mut self, core: usize) {
        self.kernel.timer_tick(core, &mut self.frames[core]);
    }

    pub fn running(&self, core: usize) -> Vec<TaskHandle> {
        let mut tasks = Vec::new();
        self.kernel.for_each_running(core, |task| tasks.push(task));
        tasks
    }

    pub fn sleeping(&self, core: usize) -> Vec<(TaskHandle, u32)> {
        let mut tasks = Vec::new();
        self.kernel
            .for_each_sleeping(core, |task, delta| tasks.push((task, delta)));
        tasks
    }
}

impl TestFixture for KernelFixture {
    const KIND: FixtureKind = FixtureKind::Kernel;

    fn setup() -> Result<Self, &'static str> {
        Ok(Self::new())
    }

    fn teardown(&mut self) {
        self.console.take();
    }
}

impl Drop for KernelFixture {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Two booted cores, for tests that drive each core from its own thread.
pub struct SmpFixture {
    pub inner: KernelFixture,
}

impl SmpFixture {
    pub const CORES: usize = 2;
}

impl TestFixture for SmpFixture {
    const KIND: FixtureKind = FixtureKind::Smp;

    fn setup() -> Result<Self, &'static str> {
        Ok(Self {
            inner: KernelFixture::with_config(KernelConfig::new().with_cores(Self::CORES)),
        })
    }

    fn teardown(&mut self) {
        self.inner.teardown();
    }
}

/// A view of one core that a test thread can own: the shared kernel plus
/// that core's frame.
pub struct CoreDriver<'k> {
    pub kernel: &'k Kernel,
    pub core: usize,
    pub frame: CpuFrame,
}

impl<'k> CoreDriver<'k> {
    pub fn new(kernel: &'k Kernel, core: usize, frame: CpuFrame) -> Self {
        Self {
            kernel,
            core,
            frame,
        }
    }

    pub fn current(&self) -> TaskHandle {
        self.kernel.current_task(self.core).expect("core is booted")
    }

    pub fn swi(&mut self, swi: SwiNumber, args: &[u32]) {
        self.swi_raw(swi.raw(), args);
    }

    pub fn swi_raw(&mut self, number: u32, args: &[u32]) {
        self.frame.context.r[..args.len()].copy_from_slice(args);
        self.frame.context.r[SWI_NUMBER_REGISTER] = number;
        self.kernel.swi(self.core, &mut self.frame);
    }

    pub fn run(&mut self) {
        self.kernel.reschedule(self.core, &mut self.frame);
    }
}
