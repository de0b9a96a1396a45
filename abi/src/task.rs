//! Task register state and handle encodings.
//!
//! The saved register file mirrors the SWI calling convention: thirteen
//! general registers, the return address and the processor status word.
//! User-mode stack pointer and link register are banked; they live outside
//! the context and are only meaningful while the task is not current.

use bitflags::bitflags;

use crate::error::ErrorCode;

// =============================================================================
// Handles
// =============================================================================

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(pub u32);

        impl $name {
            /// Never a valid handle.
            pub const NONE: Self = Self(0);

            /// Encode an arena index and generation tag.
            #[inline]
            pub const fn new(index: usize, generation: u16) -> Self {
                Self(((generation as u32) << 16) | (index as u32 + 1))
            }

            #[inline]
            pub const fn from_raw(raw: u32) -> Self {
                Self(raw)
            }

            #[inline]
            pub const fn raw(self) -> u32 {
                self.0
            }

            #[inline]
            pub const fn is_none(self) -> bool {
                self.0 & 0xffff == 0
            }

            #[inline]
            pub const fn index(self) -> Option<usize> {
                match self.0 & 0xffff {
                    0 => None,
                    low => Some(low as usize - 1),
                }
            }

            #[inline]
            pub const fn generation(self) -> u16 {
                (self.0 >> 16) as u16
            }
        }
    };
}

define_handle!(
    /// Generation-tagged reference to a Task.
    TaskHandle
);
define_handle!(
    /// Generation-tagged reference to a TaskSlot.
    SlotHandle
);
define_handle!(
    /// Generation-tagged reference to a pipe.
    PipeHandle
);

// =============================================================================
// Processor status
// =============================================================================

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorMode {
    User = 0x10,
    Fiq = 0x11,
    Irq = 0x12,
    Svc = 0x13,
    Abort = 0x17,
    Undefined = 0x1b,
    System = 0x1f,
}

impl ProcessorMode {
    pub const MASK: u32 = 0x1f;

    pub const fn from_bits(bits: u32) -> Option<Self> {
        match bits & Self::MASK {
            0x10 => Some(Self::User),
            0x11 => Some(Self::Fiq),
            0x12 => Some(Self::Irq),
            0x13 => Some(Self::Svc),
            0x17 => Some(Self::Abort),
            0x1b => Some(Self::Undefined),
            0x1f => Some(Self::System),
            _ => None,
        }
    }
}

bitflags! {
    /// Processor status word. The low five bits hold the [`ProcessorMode`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Psr: u32 {
        const N = 1 << 31;
        const Z = 1 << 30;
        const C = 1 << 29;
        /// Set on return from a failed SWI.
        const V = 1 << 28;
        /// IRQs disabled.
        const I = 1 << 7;
        /// FIQs disabled.
        const F = 1 << 6;
        const T = 1 << 5;

        const _ = !0;
    }
}

impl Psr {
    #[inline]
    pub const fn from_mode(mode: ProcessorMode) -> Self {
        Self::from_bits_retain(mode as u32)
    }

    #[inline]
    pub const fn mode(self) -> Option<ProcessorMode> {
        ProcessorMode::from_bits(self.bits())
    }

    #[inline]
    pub const fn with_mode(self, mode: ProcessorMode) -> Self {
        Self::from_bits_retain((self.bits() & !ProcessorMode::MASK) | mode as u32)
    }

    #[inline]
    pub const fn is_user(self) -> bool {
        self.bits() & ProcessorMode::MASK == ProcessorMode::User as u32
    }
}

// =============================================================================
// TaskContext - saved register file
// =============================================================================

pub const GENERAL_REGISTERS: usize = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskContext {
    pub r: [u32; GENERAL_REGISTERS],
    /// Return address (the link value at SWI entry).
    pub pc: u32,
    pub psr: Psr,
}

impl TaskContext {
    pub const fn zero() -> Self {
        Self {
            r: [0; GENERAL_REGISTERS],
            pc: 0,
            psr: Psr::from_mode(ProcessorMode::User),
        }
    }

    /// Fresh context entering `entry` in `mode` with interrupts enabled.
    pub const fn entering(entry: u32, mode: ProcessorMode) -> Self {
        Self {
            r: [0; GENERAL_REGISTERS],
            pc: entry,
            psr: Psr::from_mode(mode),
        }
    }

    #[inline]
    pub const fn is_user(&self) -> bool {
        self.psr.is_user()
    }

    /// Mark a failed call: `V` set, code in `r0`.
    #[inline]
    pub fn set_error(&mut self, code: ErrorCode) {
        self.r[0] = code.as_raw();
        self.psr.insert(Psr::V);
    }

    #[inline]
    pub fn clear_error(&mut self) {
        self.psr.remove(Psr::V);
    }

    #[inline]
    pub fn failed(&self) -> Option<ErrorCode> {
        if self.psr.contains(Psr::V) {
            Some(ErrorCode::from_raw(self.r[0]))
        } else {
            None
        }
    }
}

impl Default for TaskContext {
    fn default() -> Self {
        Self::zero()
    }
}

/// User-mode banked registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BankedRegisters {
    pub sp: u32,
    pub lr: u32,
}

/// Register state of a core at a kernel entry or exit.
///
/// On entry it holds the interrupted task's registers; on exit the kernel
/// has loaded the registers of the task that runs next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuFrame {
    pub context: TaskContext,
    pub banked: BankedRegisters,
}
