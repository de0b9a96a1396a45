//! Interrupt-flag control for the executing core.
//!
//! On a bare-metal x86_64 build these go straight to the hardware through
//! the `x86_64` crate. Hosted builds (unit tests, simulators) have no
//! interrupt flag to touch, so the calls are no-ops that report interrupts
//! as enabled.

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
mod imp {
    use x86_64::instructions::interrupts;

    #[inline(always)]
    pub fn are_enabled() -> bool {
        interrupts::are_enabled()
    }

    #[inline(always)]
    pub fn enable() {
        interrupts::enable();
    }

    #[inline(always)]
    pub fn disable() {
        interrupts::disable();
    }
}

#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
mod imp {
    #[inline(always)]
    pub fn are_enabled() -> bool {
        true
    }

    #[inline(always)]
    pub fn enable() {}

    #[inline(always)]
    pub fn disable() {}
}

/// Disable interrupts, returning whether they were enabled before.
#[inline(always)]
pub fn save_and_disable() -> bool {
    let was_enabled = imp::are_enabled();
    imp::disable();
    was_enabled
}

#[inline(always)]
pub fn restore(was_enabled: bool) {
    if was_enabled {
        imp::enable();
    }
}
