//! Baton task-facing ABI types
//!
//! This crate holds the definitions shared between the kernel core and the
//! code that talks to it across the SWI boundary: the saved register file,
//! processor status flags, SWI numbers, error records, handle encodings and
//! the collaborator traits the core is driven through.
//!
//! It has no knowledge of scheduling or pipes; `baton-core` depends on it,
//! never the other way round.

#![no_std]
#![forbid(unsafe_code)]

pub mod addr;
pub mod error;
pub mod services;
pub mod syscall;
pub mod task;

pub use addr::*;
pub use error::*;
pub use services::*;
pub use syscall::*;
pub use task::*;
