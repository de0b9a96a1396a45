//! Slot-wide user locks.

use baton_abi::{ErrorCode, SwiNumber, TaskHandle};
use baton_lib::testing::TestFixture;

use crate::Residence;
use crate::testing::KernelFixture;

const LOCK: u32 = 0x0002_0000;

/// Two tasks sharing one slot, the first of them running.
fn pair() -> (KernelFixture, TaskHandle, TaskHandle) {
    let mut fx = KernelFixture::setup().expect("kernel fixture");
    let (a, slot) = fx.spawn(0, "a");
    let b = fx.spawn_in(0, slot, "b");
    fx.run(0);
    (fx, a, b)
}

#[test]
fn claim_is_reentrant_for_the_owner() {
    let (mut fx, _, _) = pair();
    assert_eq!(fx.call(0, SwiNumber::LockClaim, &[LOCK]).unwrap()[0], 0);
    assert_eq!(fx.call(0, SwiNumber::LockClaim, &[LOCK]).unwrap()[0], 1);
    assert_eq!(
        fx.call(0, SwiNumber::LockClaim, &[0]),
        Err(ErrorCode::InvalidArgument)
    );
}

#[test]
fn release_hands_the_lock_to_the_waiter() {
    let (mut fx, a, b) = pair();
    fx.call(0, SwiNumber::LockClaim, &[LOCK]).unwrap();
    fx.yield_to(0, b);

    assert_eq!(fx.call_blocking(0, SwiNumber::LockClaim, &[LOCK]), a);
    assert!(matches!(
        fx.kernel.task_residence(b),
        Ok(Residence::WaitingForLock(_))
    ));

    fx.call(0, SwiNumber::LockRelease, &[LOCK]).unwrap();
    assert_eq!(fx.running(0)[..2], [a, b]);
    assert_eq!(fx.saved_result(b).unwrap()[0], 0);

    // The lock went straight to b.
    assert_eq!(
        fx.call(0, SwiNumber::LockRelease, &[LOCK]),
        Err(ErrorCode::NotLockOwner)
    );
    fx.yield_to(0, b);
    assert_eq!(fx.call(0, SwiNumber::LockClaim, &[LOCK]).unwrap()[0], 1);
    fx.call(0, SwiNumber::LockRelease, &[LOCK]).unwrap();
}

#[test]
fn ending_a_holder_releases_its_locks() {
    let (mut fx, _, b) = pair();
    fx.call(0, SwiNumber::LockClaim, &[LOCK]).unwrap();
    fx.call(0, SwiNumber::LockClaim, &[LOCK + 4]).unwrap();
    fx.yield_to(0, b);
    fx.call_blocking(0, SwiNumber::LockClaim, &[LOCK + 4]);

    assert_eq!(fx.call_blocking(0, SwiNumber::EndTask, &[]), b);
    assert_eq!(fx.last_result(0).unwrap()[0], 0);
    assert_eq!(fx.call(0, SwiNumber::LockClaim, &[LOCK]).unwrap()[0], 0);
}

#[test]
fn locks_are_per_slot() {
    let mut fx = KernelFixture::setup().expect("kernel fixture");
    fx.spawn(0, "a");
    let (b, _) = fx.spawn(0, "b");
    fx.run(0);

    fx.call(0, SwiNumber::LockClaim, &[LOCK]).unwrap();
    fx.yield_to(0, b);
    assert_eq!(fx.call(0, SwiNumber::LockClaim, &[LOCK]).unwrap()[0], 0);
}

#[test]
fn lock_table_is_bounded() {
    let (mut fx, _, _) = pair();
    for i in 0..crate::slot::MAX_SLOT_LOCKS as u32 {
        fx.call(0, SwiNumber::LockClaim, &[LOCK + 4 * i]).unwrap();
    }
    assert_eq!(
        fx.call(0, SwiNumber::LockClaim, &[LOCK + 0x1000]),
        Err(ErrorCode::TooManyLocks)
    );
    fx.call(0, SwiNumber::LockRelease, &[LOCK]).unwrap();
    fx.call(0, SwiNumber::LockClaim, &[LOCK + 0x1000]).unwrap();
}

#[test]
fn only_the_holder_may_release() {
    let (mut fx, _, b) = pair();
    fx.call(0, SwiNumber::LockClaim, &[LOCK]).unwrap();
    fx.yield_to(0, b);
    assert_eq!(
        fx.call(0, SwiNumber::LockRelease, &[LOCK]),
        Err(ErrorCode::NotLockOwner)
    );
    assert_eq!(
        fx.call(0, SwiNumber::LockRelease, &[LOCK + 8]),
        Err(ErrorCode::NotLockOwner)
    );
}
