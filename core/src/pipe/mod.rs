//! Pipes: bounded byte streams between one sending and one receiving task.
//!
//! A pipe's backing memory is a power-of-two ring (`span`) mapped twice
//! back to back into the slot of each end, so any block of up to
//! `capacity` bytes starting at `index % span` is contiguous for the task.
//! `write_index` and `read_index` only ever move forward and wrap at 2^32;
//! the bytes queued are their difference.
//!
//! Lock order: pipe state, then slot state, then a running list, then task
//! state. Wakes happen after the pipe lock is dropped.


use core::sync::atomic::{AtomicU32, Ordering};

use baton_abi::{
    ErrorCode, KernelResult, PAGE_SIZE, PhysAddr, PipeHandle, SyscallOutput, TaskHandle, VirtAddr,
    complete_call,
};
use baton_lib::{IrqMutex, klog_debug, klog_error, klog_trace};

use crate::kernel::Kernel;
use crate::pool::{PipeIndex, Pool, PoolEntry, PoolHeader, SlotIndex, TaskIndex};
use crate::scheduler::Placement;
use crate::slot::MemoryRegion;
use crate::syscall::{SvcContext, SyscallDisposition};
use crate::task::{Residence, Unqueued};

pub const MAX_PIPES: usize = 32;

pub type PipePool = Pool<Pipe, PipeIndex, MAX_PIPES>;

/// One end of a pipe, mapped into the slot of the task holding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeEnd {
    pub task: TaskIndex,
    pub slot: SlotIndex,
    /// Start of the doubled mapping.
    pub virt: VirtAddr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Sender,
    Receiver,
}

impl Side {
    fn other(self) -> Self {
        match self {
            Side::Sender => Side::Receiver,
            Side::Receiver => Side::Sender,
        }
    }
}

struct Waiter {
    token: Unqueued,
    threshold: u32,
}

pub struct PipeState {
    capacity: u32,
    span: u32,
    phys: PhysAddr,
    creator: TaskHandle,
    sender: Option<PipeEnd>,
    receiver: Option<PipeEnd>,
    sender_waiting: Option<Waiter>,
    receiver_waiting: Option<Waiter>,
    sender_closed: bool,
    receiver_closed: bool,
}

impl PipeState {
    const fn new() -> Self {
        Self {
            capacity: 0,
            span: 0,
            phys: PhysAddr::NULL,
            creator: TaskHandle::NONE,
            sender: None,
            receiver: None,
            sender_waiting: None,
            receiver_waiting: None,
            sender_closed: false,
            receiver_closed: false,
        }
    }

    fn end(&self, side: Side) -> Option<PipeEnd> {
        match side {
            Side::Sender => self.sender,
            Side::Receiver => self.receiver,
        }
    }

    fn end_mut(&mut self, side: Side) -> &mut Option<PipeEnd> {
        match side {
            Side::Sender => &mut self.sender,
            Side::Receiver => &mut self.receiver,
        }
    }

    fn closed(&self, side: Side) -> bool {
        match side {
            Side::Sender => self.sender_closed,
            Side::Receiver => self.receiver_closed,
        }
    }

    /// The end on `side` if `task` holds it.
    fn held_by(&self, side: Side, task: TaskIndex) -> KernelResult<PipeEnd> {
        self.end(side)
            .filter(|end| end.task == task)
            .ok_or(ErrorCode::NotYourPipe)
    }
}

pub struct Pipe {
    header: PoolHeader,
    pub(crate) write_index: AtomicU32,
    pub(crate) read_index: AtomicU32,
    pub(crate) state: IrqMutex<PipeState>,
}

impl Pipe {
    fn prepare(&self, capacity: u32, span: u32, phys: PhysAddr, creator: TaskHandle) {
        self.write_index.store(0, Ordering::Relaxed);
        self.read_index.store(0, Ordering::Relaxed);
        let mut state = self.state.lock();
        *state = PipeState::new();
        state.capacity = capacity;
        state.span = span;
        state.phys = phys;
        state.creator = creator;
    }

    /// Bytes written and not yet consumed.
    fn available(&self, capacity: u32) -> u32 {
        let write = self.write_index.load(Ordering::Acquire);
        let read = self.read_index.load(Ordering::Acquire);
        let queued = write.wrapping_sub(read);
        if queued > capacity {
            klog_error!(
                "baton: pipe holds {} bytes with capacity {} (w={:#x} r={:#x})",
                queued,
                capacity,
                write,
                read
            );
            panic!("pipe indices out of bounds");
        }
        queued
    }

    fn free(&self, capacity: u32) -> u32 {
        capacity - self.available(capacity)
    }

    fn write_location(&self, end: PipeEnd, span: u32) -> u32 {
        end.virt.as_u32() + self.write_index.load(Ordering::Acquire) % span
    }

    fn read_location(&self, end: PipeEnd, span: u32) -> u32 {
        end.virt.as_u32() + self.read_index.load(Ordering::Acquire) % span
    }

    /// `r1` = free bytes, `r2` = where to write them.
    fn space_output(&self, state: &PipeState, end: PipeEnd) -> SyscallOutput {
        SyscallOutput::none()
            .with(1, self.free(state.capacity))
            .with(2, self.write_location(end, state.span))
    }

    /// `r1` = queued bytes, `r2` = where to read them.
    fn data_output(&self, state: &PipeState, end: PipeEnd) -> SyscallOutput {
        SyscallOutput::none()
            .with(1, self.available(state.capacity))
            .with(2, self.read_location(end, state.span))
    }

    /// The blocked receiver, if what it waits for has arrived.
    fn ready_receiver(&self, state: &mut PipeState) -> Option<(Unqueued, SyscallOutput)> {
        let waiter = state.receiver_waiting.as_ref()?;
        if self.available(state.capacity) < waiter.threshold && !state.sender_closed {
            return None;
        }
        let end = state.receiver?;
        let waiter = state.receiver_waiting.take()?;
        Some((waiter.token, self.data_output(state, end)))
    }

    /// The blocked sender, if enough space has been freed.
    fn ready_sender(&self, state: &mut PipeState) -> Option<(Unqueued, SyscallOutput)> {
        let waiter = state.sender_waiting.as_ref()?;
        if self.free(state.capacity) < waiter.threshold {
            return None;
        }
        let end = state.sender?;
        let waiter = state.sender_waiting.take()?;
        Some((waiter.token, self.space_output(state, end)))
    }
}

impl PoolEntry for Pipe {
    fn empty() -> Self {
        Self {
            header: PoolHeader::new(),
            write_index: AtomicU32::new(0),
            read_index: AtomicU32::new(0),
            state: IrqMutex::new(PipeState::new()),
        }
    }

    #[inline]
    fn header(&self) -> &PoolHeader {
        &self.header
    }
}

// =============================================================================
// Kernel plumbing
// =============================================================================

impl Kernel {
    #[inline]
    pub(crate) fn pipe(&self, index: PipeIndex) -> &Pipe {
        self.pipes.get(index)
    }

    #[inline]
    pub(crate) fn resolve_pipe(&self, raw: u32) -> KernelResult<PipeIndex> {
        self.pipes.resolve_raw(raw)
    }

    /// Map `span` bytes at `phys` twice, back to back, into `slot`'s pipe
    /// window.
    fn map_pipe(&self, slot: SlotIndex, phys: PhysAddr, span: u32) -> KernelResult<VirtAddr> {
        let handle = self.slot_handle(slot);
        let memory = self.platform.memory;
        let mut state = self.slot(slot).state.lock();
        if state.free_regions() < 2 {
            return Err(ErrorCode::NoFreeRegion);
        }

        // TODO: reuse window space released by closed ends; the bump
        // pointer only moves forward.
        let base = state
            .pipe_window_next
            .align_up(span)
            .ok_or(ErrorCode::OutOfMemory)?;
        let window_end =
            self.config.pipe_window_base.as_u32() as u64 + self.config.pipe_window_size as u64;
        let mapping_end = base.as_u32() as u64 + 2 * span as u64;
        if mapping_end > window_end {
            return Err(ErrorCode::OutOfMemory);
        }

        let upper = base.offset(span);
        if !memory.map_at(handle, base, phys, span) {
            return Err(ErrorCode::OutOfMemory);
        }
        if !memory.map_at(handle, upper, phys, span) {
            memory.unmap(handle, base, span);
            return Err(ErrorCode::OutOfMemory);
        }
        state.add_region(MemoryRegion {
            virt: base,
            phys,
            size: span,
        })?;
        state.add_region(MemoryRegion {
            virt: upper,
            phys,
            size: span,
        })?;
        state.pipe_window_next = VirtAddr::new(mapping_end.min(u32::MAX as u64) as u32);
        Ok(base)
    }

    fn unmap_pipe(&self, end: PipeEnd, span: u32) {
        let handle = self.slot_handle(end.slot);
        let upper = end.virt.offset(span);
        self.platform.memory.unmap(handle, end.virt, span);
        self.platform.memory.unmap(handle, upper, span);
        let mut state = self.slot(end.slot).state.lock();
        state.remove_region(end.virt);
        state.remove_region(upper);
    }

    /// The end on `side` for `task`, claiming and mapping it if nobody
    /// holds it yet.
    fn claim_end(&self, state: &mut PipeState, side: Side, task: TaskIndex) -> KernelResult<PipeEnd> {
        if let Some(end) = state.end(side) {
            return if end.task == task {
                Ok(end)
            } else {
                Err(ErrorCode::NotYourPipe)
            };
        }
        let slot = self.task(task).slot();
        let virt = self.map_pipe(slot, state.phys, state.span)?;
        let end = PipeEnd { task, slot, virt };
        *state.end_mut(side) = Some(end);
        klog_trace!("baton: task {} claims {:?} end at {:#x}", task.index(), side, virt.as_u32());
        Ok(end)
    }

    /// Unlink the caller and park it on `side` of the pipe.
    fn park_on_pipe(
        &self,
        ctx: &SvcContext<'_>,
        state: &mut PipeState,
        index: PipeIndex,
        side: Side,
        threshold: u32,
    ) -> KernelResult<SyscallDisposition> {
        ctx.ensure_may_block()?;
        let task = ctx.task_index();
        ctx.with_caller(|caller| caller.context.clear_error());
        let token = self.detach_running(ctx.core(), task);
        let residence = match side {
            Side::Sender => Residence::PipeSender(index),
            Side::Receiver => Residence::PipeReceiver(index),
        };
        self.task(task).state.lock().enter(task, residence);
        let waiter = Some(Waiter { token, threshold });
        match side {
            Side::Sender => state.sender_waiting = waiter,
            Side::Receiver => state.receiver_waiting = waiter,
        }
        Ok(SyscallDisposition::Blocked)
    }

    /// Hand a parked pipe task its result and put it back to work.
    fn wake_pipe_waiter(&self, token: Unqueued, result: KernelResult<SyscallOutput>) {
        {
            let mut state = self.task(token.first()).state.lock();
            state.leave();
            complete_call(&mut state.context, result);
        }
        self.make_runnable(token, Placement::AfterHead);
    }

    /// Close `side` of a pipe: unmap it, release the task on the other
    /// side if that is now pointless to wait for, and free the pipe once
    /// both sides are closed.
    fn close_side(&self, index: PipeIndex, side: Side) {
        let pipe = self.pipe(index);
        let (unmapped, woken, release, span) = {
            let mut state = pipe.state.lock();
            match side {
                Side::Sender => state.sender_closed = true,
                Side::Receiver => state.receiver_closed = true,
            }
            let unmapped = state.end_mut(side).take();
            let woken = match side {
                Side::Sender => pipe
                    .ready_receiver(&mut state)
                    .map(|(token, output)| (token, Ok(output))),
                Side::Receiver => state
                    .sender_waiting
                    .take()
                    .map(|waiter| (waiter.token, Err(ErrorCode::PipeClosed))),
            };
            let release = (state.sender_closed && state.receiver_closed).then_some(state.phys);
            (unmapped, woken, release, state.span)
        };

        if let Some(end) = unmapped {
            self.unmap_pipe(end, span);
        }
        if let Some((token, result)) = woken {
            self.wake_pipe_waiter(token, result);
        }
        if let Some(phys) = release {
            self.platform.memory.free_pages(phys, span);
            self.pipes.release(index);
            klog_debug!("baton: pipe {} released", index.index());
        }
    }

    /// Close every pipe end `task` holds. Used when a task ends.
    pub(crate) fn close_pipe_ends_of(&self, task: TaskIndex) {
        for index in self.pipes.live() {
            let (sending, receiving) = {
                let state = self.pipe(index).state.lock();
                (
                    state.sender.is_some_and(|end| end.task == task),
                    state.receiver.is_some_and(|end| end.task == task),
                )
            };
            if sending {
                self.close_side(index, Side::Sender);
            }
            if receiving {
                self.close_side(index, Side::Receiver);
            }
        }
    }

    /// `(write_index, read_index, capacity)` of a live pipe.
    pub fn pipe_indices(&self, pipe: PipeHandle) -> KernelResult<(u32, u32, u32)> {
        let index = self.resolve_pipe(pipe.raw())?;
        let pipe = self.pipe(index);
        let capacity = pipe.state.lock().capacity;
        Ok((
            pipe.write_index.load(Ordering::Acquire),
            pipe.read_index.load(Ordering::Acquire),
            capacity,
        ))
    }

    /// Virtual address of a task's end of a pipe, if it holds one.
    pub fn pipe_end_address(&self, pipe: PipeHandle, task: TaskHandle) -> KernelResult<Option<VirtAddr>> {
        let index = self.resolve_pipe(pipe.raw())?;
        let task = self.resolve_task(task)?;
        let state = self.pipe(index).state.lock();
        Ok([state.sender, state.receiver]
            .into_iter()
            .flatten()
            .find(|end| end.task == task)
            .map(|end| end.virt))
    }
}

// =============================================================================
// SWI handlers
// =============================================================================

fn complete(output: SyscallOutput) -> KernelResult<SyscallDisposition> {
    Ok(SyscallDisposition::Complete(output))
}

/// `r0` = largest block the pipe must carry. Returns the handle in `r0`.
pub fn syscall_pipe_create(ctx: &mut SvcContext<'_>) -> KernelResult<SyscallDisposition> {
    let kernel = ctx.kernel();
    let capacity = ctx.arg(0);
    if capacity == 0 {
        return Err(ErrorCode::InvalidArgument);
    }
    let span = capacity
        .max(PAGE_SIZE)
        .checked_next_power_of_two()
        .ok_or(ErrorCode::InvalidArgument)?;

    let index = kernel.pipes.allocate().ok_or(ErrorCode::OutOfPipes)?;
    let Some(phys) = kernel.platform().memory.allocate_pages(span, span) else {
        kernel.pipes.release(index);
        return Err(ErrorCode::OutOfMemory);
    };
    kernel.pipe(index).prepare(capacity, span, phys, ctx.task_handle());
    let handle = kernel.pipes.handle_raw(index);
    klog_debug!(
        "baton: pipe {:#x} created, {} bytes in a {} byte ring",
        handle,
        capacity,
        span
    );
    complete(SyscallOutput::r0(handle))
}

/// `r0` = pipe, `r1` = bytes wanted. Returns free bytes in `r1` and the
/// write address in `r2`, blocking until `r1` bytes are free.
pub fn syscall_pipe_wait_for_space(ctx: &mut SvcContext<'_>) -> KernelResult<SyscallDisposition> {
    let kernel = ctx.kernel();
    let index = kernel.resolve_pipe(ctx.arg(0))?;
    let wanted = ctx.arg(1);
    let pipe = kernel.pipe(index);
    let mut state = pipe.state.lock();

    if wanted > state.capacity {
        return Err(ErrorCode::PipeRequestTooLarge);
    }
    if state.sender_closed || state.receiver_closed {
        return Err(ErrorCode::PipeClosed);
    }
    let end = kernel.claim_end(&mut state, Side::Sender, ctx.task_index())?;
    if pipe.free(state.capacity) >= wanted {
        return complete(pipe.space_output(&state, end));
    }
    kernel.park_on_pipe(ctx, &mut state, index, Side::Sender, wanted)
}

/// `r0` = pipe, `r1` = bytes written at the write address.
pub fn syscall_pipe_space_filled(ctx: &mut SvcContext<'_>) -> KernelResult<SyscallDisposition> {
    let kernel = ctx.kernel();
    let index = kernel.resolve_pipe(ctx.arg(0))?;
    let filled = ctx.arg(1);
    let pipe = kernel.pipe(index);

    let woken = {
        let mut state = pipe.state.lock();
        state.held_by(Side::Sender, ctx.task_index())?;
        if state.receiver_closed {
            return Err(ErrorCode::PipeClosed);
        }
        if filled > pipe.free(state.capacity) {
            return Err(ErrorCode::PipeOverrun);
        }
        pipe.write_index.fetch_add(filled, Ordering::AcqRel);
        pipe.ready_receiver(&mut state)
    };
    if let Some((token, output)) = woken {
        kernel.wake_pipe_waiter(token, Ok(output));
    }
    complete(SyscallOutput::none())
}

/// `r0` = pipe, `r1` = bytes wanted. Returns queued bytes in `r1` and the
/// read address in `r2`, blocking until `r1` bytes are queued or the
/// sender has closed.
pub fn syscall_pipe_wait_for_data(ctx: &mut SvcContext<'_>) -> KernelResult<SyscallDisposition> {
    let kernel = ctx.kernel();
    let index = kernel.resolve_pipe(ctx.arg(0))?;
    let wanted = ctx.arg(1);
    let pipe = kernel.pipe(index);
    let mut state = pipe.state.lock();

    if wanted > state.capacity {
        return Err(ErrorCode::PipeRequestTooLarge);
    }
    if state.receiver_closed {
        return Err(ErrorCode::PipeClosed);
    }
    let end = kernel.claim_end(&mut state, Side::Receiver, ctx.task_index())?;
    if pipe.available(state.capacity) >= wanted || state.sender_closed {
        return complete(pipe.data_output(&state, end));
    }
    kernel.park_on_pipe(ctx, &mut state, index, Side::Receiver, wanted)
}

/// `r0` = pipe, `r1` = bytes read from the read address.
pub fn syscall_pipe_data_consumed(ctx: &mut SvcContext<'_>) -> KernelResult<SyscallDisposition> {
    let kernel = ctx.kernel();
    let index = kernel.resolve_pipe(ctx.arg(0))?;
    let consumed = ctx.arg(1);
    let pipe = kernel.pipe(index);

    let woken = {
        let mut state = pipe.state.lock();
        state.held_by(Side::Receiver, ctx.task_index())?;
        if consumed > pipe.available(state.capacity) {
            return Err(ErrorCode::PipeOverrun);
        }
        pipe.read_index.fetch_add(consumed, Ordering::AcqRel);
        pipe.ready_sender(&mut state)
    };
    if let Some((token, output)) = woken {
        kernel.wake_pipe_waiter(token, Ok(output));
    }
    complete(SyscallOutput::none())
}

/// `r0` = pipe. Returns queued bytes in `r1`.
pub fn syscall_pipe_unread_data(ctx: &mut SvcContext<'_>) -> KernelResult<SyscallDisposition> {
    let kernel = ctx.kernel();
    let pipe = kernel.pipe(kernel.resolve_pipe(ctx.arg(0))?);
    let capacity = pipe.state.lock().capacity;
    complete(SyscallOutput::none().with(1, pipe.available(capacity)))
}

/// Close one side. A claimed side may only be closed by its holder; a side
/// nobody has claimed yet by the pipe's creator or the holder of the other
/// end.
fn close_by_caller(ctx: &SvcContext<'_>, side: Side) -> KernelResult<SyscallDisposition> {
    let kernel = ctx.kernel();
    let index = kernel.resolve_pipe(ctx.arg(0))?;
    {
        let state = kernel.pipe(index).state.lock();
        if state.closed(side) {
            return Err(ErrorCode::PipeClosed);
        }
        if state.end(side).is_some() {
            state.held_by(side, ctx.task_index())?;
        } else if state.creator != ctx.task_handle()
            && state.held_by(side.other(), ctx.task_index()).is_err()
        {
            return Err(ErrorCode::NotYourPipe);
        }
    }
    kernel.close_side(index, side);
    complete(SyscallOutput::none())
}

/// The sender is done: the receiver drains what is left.
pub fn syscall_pipe_no_more_data(ctx: &mut SvcContext<'_>) -> KernelResult<SyscallDisposition> {
    close_by_caller(ctx, Side::Sender)
}

/// The receiver is gone: the sender gets `PipeClosed` from now on.
pub fn syscall_pipe_not_listening(ctx: &mut SvcContext<'_>) -> KernelResult<SyscallDisposition> {
    close_by_caller(ctx, Side::Receiver)
}

/// Give the caller's end of the pipe to another task, remapping it into
/// that task's slot when it lives elsewhere.
fn pass_end(ctx: &SvcContext<'_>, side: Side) -> KernelResult<SyscallDisposition> {
    let kernel = ctx.kernel();
    let index = kernel.resolve_pipe(ctx.arg(0))?;
    let target = kernel.resolve_task(TaskHandle::from_raw(ctx.arg(1)))?;
    let mut state = kernel.pipe(index).state.lock();
    let end = state.held_by(side, ctx.task_index())?;

    let target_slot = kernel.task(target).slot();
    let moved = if target_slot == end.slot {
        PipeEnd { task: target, ..end }
    } else {
        let virt = kernel.map_pipe(target_slot, state.phys, state.span)?;
        kernel.unmap_pipe(end, state.span);
        PipeEnd {
            task: target,
            slot: target_slot,
            virt,
        }
    };
    *state.end_mut(side) = Some(moved);
    klog_trace!(
        "baton: pipe {} {:?} end passed to task {}",
        index.index(),
        side,
        target.index()
    );
    complete(SyscallOutput::none())
}

/// `r0` = pipe, `r1` = task to receive the sending end.
pub fn syscall_pipe_passing_over(ctx: &mut SvcContext<'_>) -> KernelResult<SyscallDisposition> {
    pass_end(ctx, Side::Sender)
}

/// `r0` = pipe, `r1` = task to receive the receiving end.
pub fn syscall_pipe_passing_off(ctx: &mut SvcContext<'_>) -> KernelResult<SyscallDisposition> {
    pass_end(ctx, Side::Receiver)
}
