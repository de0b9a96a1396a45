//! Baton kernel core
//!
//! Per-core run queues, TaskSlot stack ownership, the SWI trampoline,
//! pipes and interrupt tasks. Everything hangs off one [`Kernel`]; boot
//! code builds it from a [`KernelConfig`] and a [`Platform`], brings each
//! core online with [`Kernel::boot_core`] and then drives it through the
//! entry points [`Kernel::swi`], [`Kernel::interrupt`],
//! [`Kernel::timer_tick`] and [`Kernel::reschedule`], each taking the
//! core's number and register frame.

#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod irq;
pub mod kernel;
pub mod pipe;
pub mod platform;
pub mod pool;
pub mod scheduler;
pub mod slot;
pub mod syscall;
pub mod task;
mod user_lock;

#[cfg(test)]
mod irq_tests;
#[cfg(test)]
mod lock_tests;
#[cfg(test)]
mod testing;

pub use config::{KernelConfig, WakePlacement};
pub use irq::MAX_INTERRUPT_SOURCES;
pub use kernel::Kernel;
pub use pipe::{MAX_PIPES, PipeEnd};
pub use platform::Platform;
pub use scheduler::{CoreStatsSnapshot, Placement};
pub use slot::{HandlerDescriptor, MAX_REGIONS, MAX_SLOTS, MemoryRegion, SvcContinuation};
pub use syscall::{ModuleHandler, SvcContext, SyscallDisposition, swi_name};
pub use task::{MAX_TASKS, Residence, TaskSpec};
