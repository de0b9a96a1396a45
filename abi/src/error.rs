//! Error codes returned across the SWI boundary.
//!
//! A failed call sets the `V` flag of the caller's saved status register and
//! leaves the error code in `r0`. The code indexes a static `ErrorBlock`
//! (`{code, description}`), so task code that wants the text looks it up
//! with [`ErrorCode::block`] instead of chasing a pointer into kernel memory.

/// Implement raw conversions and error-record lookups for an error enum.
///
/// Generates `as_raw()`, `from_raw()`, `description()` and `block()` for a
/// `#[repr(u32)]` enum. Unknown raw values map to the `fallback` variant.
macro_rules! impl_kernel_error {
    ($ty:ty, fallback: $fallback:ident, variants: { $($val:literal => $variant:ident : $text:literal),* $(,)? }) => {
        impl $ty {
            /// Raw value placed in `r0`.
            #[inline]
            pub const fn as_raw(self) -> u32 {
                self as u32
            }

            #[inline]
            pub const fn from_raw(val: u32) -> Self {
                match val {
                    $($val => Self::$variant,)*
                    _ => Self::$fallback,
                }
            }

            pub const fn description(self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)*
                }
            }

            #[inline]
            pub const fn block(self) -> ErrorBlock {
                ErrorBlock {
                    code: self.as_raw(),
                    description: self.description(),
                }
            }
        }

        impl core::fmt::Display for $ty {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(self.description())
            }
        }
    };
}

/// Structured error record handed back to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorBlock {
    pub code: u32,
    pub description: &'static str,
}

/// Result type used by every kernel operation.
pub type KernelResult<T> = Result<T, ErrorCode>;

/// Errors surfaced to the immediate caller of a SWI.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// SWI number has no handler
    UnknownSwi = 0x100,
    /// Stale or out-of-range task, slot or pipe handle
    InvalidHandle = 0x101,
    /// Argument outside the accepted range
    InvalidArgument = 0x102,
    /// Task pool exhausted
    OutOfTasks = 0x103,
    /// TaskSlot pool exhausted
    OutOfSlots = 0x104,
    /// Pipe pool exhausted
    OutOfPipes = 0x105,
    /// Page allocation or pipe window exhausted
    OutOfMemory = 0x106,
    /// Caller does not hold the pipe end it is operating on
    NotYourPipe = 0x107,
    /// Request larger than the pipe's capacity; can never be satisfied
    PipeRequestTooLarge = 0x108,
    /// More bytes released than are available
    PipeOverrun = 0x109,
    /// The other end of the pipe has gone away
    PipeClosed = 0x10a,
    /// Interrupt source index beyond this core's routing table
    InterruptSourceOutOfRange = 0x10b,
    /// Another task is already waiting on this interrupt source
    InterruptSourceClaimed = 0x10c,
    /// LockRelease by a task that does not hold the lock
    NotLockOwner = 0x10d,
    /// Per-slot lock table is full
    TooManyLocks = 0x10e,
    /// A call that blocks was made while owning the slot stack
    OwnerOfStackTriedToSleep = 0x10f,
    /// The idle task may never leave the running list
    IdleTaskCannotBlock = 0x110,
    /// CallbackReturn outside a callback handler
    NoCallbackInProgress = 0x111,
    /// Address not mapped in the caller's slot
    BadAddress = 0x112,
    /// Slot memory region table is full
    NoFreeRegion = 0x113,
    /// Kernel configuration rejected at boot
    InvalidConfig = 0x114,
    /// Core number outside the configured range
    InvalidCore = 0x115,
}

impl_kernel_error!(ErrorCode, fallback: UnknownSwi, variants: {
    0x100 => UnknownSwi: "Unknown SWI",
    0x101 => InvalidHandle: "Invalid handle",
    0x102 => InvalidArgument: "Invalid argument",
    0x103 => OutOfTasks: "Task pool exhausted",
    0x104 => OutOfSlots: "TaskSlot pool exhausted",
    0x105 => OutOfPipes: "Pipe pool exhausted",
    0x106 => OutOfMemory: "Out of memory",
    0x107 => NotYourPipe: "Not your pipe",
    0x108 => PipeRequestTooLarge: "Request exceeds pipe capacity",
    0x109 => PipeOverrun: "More bytes released than available",
    0x10a => PipeClosed: "Other end of pipe has closed",
    0x10b => InterruptSourceOutOfRange: "Interrupt source out of range",
    0x10c => InterruptSourceClaimed: "Interrupt source already claimed",
    0x10d => NotLockOwner: "Not the owner of the lock",
    0x10e => TooManyLocks: "Too many locks in slot",
    0x10f => OwnerOfStackTriedToSleep: "Owner of stack tried to sleep",
    0x110 => IdleTaskCannotBlock: "Idle task cannot block",
    0x111 => NoCallbackInProgress: "No callback in progress",
    0x112 => BadAddress: "Address not mapped",
    0x113 => NoFreeRegion: "No free memory region",
    0x114 => InvalidConfig: "Invalid kernel configuration",
    0x115 => InvalidCore: "Invalid core number",
});
