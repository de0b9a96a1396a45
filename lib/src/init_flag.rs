//! Two-phase init latch.
//!
//! `claim` admits exactly one initializer. Its work becomes visible to
//! `is_set` readers on other cores once it calls `publish`; an initializer
//! that fails part way calls `abandon` so a later attempt can claim again.

use core::sync::atomic::{AtomicU8, Ordering};

const UNSET: u8 = 0;
const CLAIMED: u8 = 1;
const SET: u8 = 2;

#[repr(transparent)]
pub struct InitFlag {
    state: AtomicU8,
}

impl InitFlag {
    #[inline]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(UNSET),
        }
    }

    /// Returns `true` for the one caller allowed to initialize.
    #[inline]
    pub fn claim(&self) -> bool {
        self.state
            .compare_exchange(UNSET, CLAIMED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[inline]
    pub fn publish(&self) {
        debug_assert_eq!(self.state.load(Ordering::Relaxed), CLAIMED);
        self.state.store(SET, Ordering::Release);
    }

    #[inline]
    pub fn abandon(&self) {
        let _ = self
            .state
            .compare_exchange(CLAIMED, UNSET, Ordering::AcqRel, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.state.load(Ordering::Acquire) == SET
    }
}

impl Default for InitFlag {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_one_claim_succeeds() {
        let flag = InitFlag::new();
        assert!(flag.claim());
        assert!(!flag.claim());
        assert!(!flag.is_set());
        flag.publish();
        assert!(flag.is_set());
        assert!(!flag.claim());
    }

    #[test]
    fn abandoned_claim_can_be_retried() {
        let flag = InitFlag::new();
        assert!(flag.claim());
        flag.abandon();
        assert!(!flag.is_set());
        assert!(flag.claim());
    }

    #[test]
    fn racing_claims_admit_one() {
        let flag = InitFlag::new();
        let winners: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4).map(|_| s.spawn(|| flag.claim() as usize)).collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });
        assert_eq!(winners, 1);
    }
}
