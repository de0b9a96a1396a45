//! SWI numbers and the `SystemCall` boundary type.
//!
//! Registers `r0`-`r9` carry up to ten in/out parameters, `r12` carries the
//! SWI number and the saved `pc` is the return address. Numbers are stable:
//! task code is built against them.

use crate::error::ErrorCode;
use crate::task::TaskContext;

pub const SWI_PARAMETER_REGISTERS: usize = 10;
pub const SWI_NUMBER_REGISTER: usize = 12;

/// First number available to privileged handlers registered at run time.
pub const FIRST_MODULE_SWI: u32 = 0x100;
pub const MAX_MODULE_SWIS: usize = 32;

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwiNumber {
    Start = 0x00,
    RunFree = 0x01,
    EndTask = 0x02,
    Sleep = 0x03,
    WaitUntilWoken = 0x04,
    Resume = 0x05,
    LockClaim = 0x06,
    LockRelease = 0x07,
    WaitForInterrupt = 0x08,
    InterruptIsOff = 0x09,
    NumberOfInterruptSources = 0x0a,
    DebugString = 0x0b,
    DebugNumber = 0x0c,
    CoreNumber = 0x0d,
    GetHandle = 0x0e,
    IntOn = 0x0f,
    IntOff = 0x10,
    CacheClean = 0x11,
    SetHandler = 0x12,
    RequestCallback = 0x13,
    CallbackReturn = 0x14,

    PipeCreate = 0x20,
    PipeWaitForSpace = 0x21,
    PipeSpaceFilled = 0x22,
    PipePassingOver = 0x23,
    PipeUnreadData = 0x24,
    PipeNoMoreData = 0x25,
    PipeWaitForData = 0x26,
    PipeDataConsumed = 0x27,
    PipePassingOff = 0x28,
    PipeNotListening = 0x29,
}

/// Size of the built-in dispatch table; every [`SwiNumber`] is below it.
pub const SWI_TABLE_SIZE: usize = 0x40;

impl SwiNumber {
    pub const fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0x00 => Self::Start,
            0x01 => Self::RunFree,
            0x02 => Self::EndTask,
            0x03 => Self::Sleep,
            0x04 => Self::WaitUntilWoken,
            0x05 => Self::Resume,
            0x06 => Self::LockClaim,
            0x07 => Self::LockRelease,
            0x08 => Self::WaitForInterrupt,
            0x09 => Self::InterruptIsOff,
            0x0a => Self::NumberOfInterruptSources,
            0x0b => Self::DebugString,
            0x0c => Self::DebugNumber,
            0x0d => Self::CoreNumber,
            0x0e => Self::GetHandle,
            0x0f => Self::IntOn,
            0x10 => Self::IntOff,
            0x11 => Self::CacheClean,
            0x12 => Self::SetHandler,
            0x13 => Self::RequestCallback,
            0x14 => Self::CallbackReturn,
            0x20 => Self::PipeCreate,
            0x21 => Self::PipeWaitForSpace,
            0x22 => Self::PipeSpaceFilled,
            0x23 => Self::PipePassingOver,
            0x24 => Self::PipeUnreadData,
            0x25 => Self::PipeNoMoreData,
            0x26 => Self::PipeWaitForData,
            0x27 => Self::PipeDataConsumed,
            0x28 => Self::PipePassingOff,
            0x29 => Self::PipeNotListening,
            _ => return None,
        })
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self as u32
    }
}

// =============================================================================
// Arguments and results
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyscallArgs(pub [u32; SWI_PARAMETER_REGISTERS]);

impl SyscallArgs {
    pub const fn new(regs: [u32; SWI_PARAMETER_REGISTERS]) -> Self {
        Self(regs)
    }

    #[inline]
    pub const fn get(&self, index: usize) -> u32 {
        self.0[index]
    }
}

/// A SWI as seen at the task/kernel boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemCall {
    pub number: u32,
    pub args: SyscallArgs,
}

impl SystemCall {
    pub const fn new(number: u32, args: SyscallArgs) -> Self {
        Self { number, args }
    }

    pub fn with_args(number: SwiNumber, args: &[u32]) -> Self {
        let mut regs = [0u32; SWI_PARAMETER_REGISTERS];
        for (dst, src) in regs.iter_mut().zip(args) {
            *dst = *src;
        }
        Self::new(number.raw(), SyscallArgs(regs))
    }

    /// Decode the call a task made from its saved registers.
    pub fn from_context(context: &TaskContext) -> Self {
        let mut regs = [0u32; SWI_PARAMETER_REGISTERS];
        regs.copy_from_slice(&context.r[..SWI_PARAMETER_REGISTERS]);
        Self::new(context.r[SWI_NUMBER_REGISTER], SyscallArgs(regs))
    }
}

/// Output registers of a completed call. `None` leaves the caller's
/// register untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyscallOutput {
    pub regs: [Option<u32>; SWI_PARAMETER_REGISTERS],
}

impl SyscallOutput {
    pub const fn none() -> Self {
        Self {
            regs: [None; SWI_PARAMETER_REGISTERS],
        }
    }

    #[inline]
    pub const fn with(mut self, reg: usize, value: u32) -> Self {
        self.regs[reg] = Some(value);
        self
    }

    #[inline]
    pub const fn r0(value: u32) -> Self {
        Self::none().with(0, value)
    }

    #[inline]
    pub const fn get(&self, reg: usize) -> Option<u32> {
        self.regs[reg]
    }

    /// Write the outputs into a saved context and clear `V`.
    pub fn apply(&self, context: &mut TaskContext) {
        for (reg, value) in self.regs.iter().enumerate() {
            if let Some(v) = value {
                context.r[reg] = *v;
            }
        }
        context.clear_error();
    }
}

/// Write a call's result into the caller's saved registers.
pub fn complete_call(context: &mut TaskContext, result: Result<SyscallOutput, ErrorCode>) {
    match result {
        Ok(output) => output.apply(context),
        Err(code) => context.set_error(code),
    }
}

// =============================================================================
// Slot handlers
// =============================================================================

/// Handler kinds a TaskSlot can register with `SetHandler`.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Callback = 0,
    Error = 1,
    Exit = 2,
    UpCall = 3,
}

pub const HANDLER_KINDS: usize = 4;

impl HandlerKind {
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Callback),
            1 => Some(Self::Error),
            2 => Some(Self::Exit),
            3 => Some(Self::UpCall),
            _ => None,
        }
    }
}
