//! Collaborators the kernel is driven through.
//!
//! Boot code builds a `Platform` from its memory manager, interrupt
//! controller and debug console and hands it to [`crate::Kernel::new`].

use baton_abi::{DebugConsole, InterruptController, MemoryServices};

#[derive(Clone, Copy)]
pub struct Platform {
    pub memory: &'static dyn MemoryServices,
    pub interrupts: &'static dyn InterruptController,
    pub console: &'static dyn DebugConsole,
}

impl Platform {
    pub const fn new(
        memory: &'static dyn MemoryServices,
        interrupts: &'static dyn InterruptController,
        console: &'static dyn DebugConsole,
    ) -> Self {
        Self {
            memory,
            interrupts,
            console,
        }
    }
}
