#![cfg_attr(not(test), no_std)]

pub mod clist;
pub mod cpu;
pub mod init_flag;
pub mod klog;
pub mod numfmt;
pub mod service_cell;
pub mod spinlock;
pub mod testing;

pub use clist::{ConcurrentList, ListGuard, ListItem, ListLinks};
pub use init_flag::InitFlag;
pub use klog::{
    klog_attach_sink, klog_get_level, klog_init, klog_is_enabled, klog_set_level, KlogLevel,
    KlogSink,
};
pub use service_cell::ServiceCell;
pub use spinlock::{IrqMutex, IrqMutexGuard, Spinlock};

/// Upper bound on cores a kernel instance can drive.
pub const MAX_CPUS: usize = 8;
