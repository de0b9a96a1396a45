//! Run queue, sleep list and wake-up tests.
//!
//! These drive whole cores through the SWI and timer entry points and
//! check which task each core ends up running.

use baton_abi::{ErrorCode, SwiNumber, TaskHandle};
use baton_lib::testing::TestFixture;

use crate::testing::{KernelFixture, USER_STACK};
use crate::{KernelConfig, Residence, WakePlacement};

fn fixture() -> KernelFixture {
    KernelFixture::setup().expect("kernel fixture")
}

// =============================================================================
// Creation and first dispatch
// =============================================================================

#[test]
fn spawned_task_runs_at_next_exit() {
    let mut fx = fixture();
    let idle = fx.current(0);
    let (a, _) = fx.spawn(0, "a");

    assert_eq!(fx.current(0), idle, "spawn must not switch by itself");
    assert_eq!(fx.running(0), vec![idle, a]);

    fx.run(0);
    assert_eq!(fx.current(0), a);
    assert_eq!(fx.frames[0].context.pc, 0x8100);
    assert_eq!(fx.frames[0].context.r[0], 1);
    assert_eq!(fx.frames[0].banked.sp, USER_STACK + 0x1000);
    assert!(fx.frames[0].context.is_user());
}

#[test]
fn idle_task_steps_aside_for_runnable_work() {
    let mut fx = fixture();
    let idle = fx.current(0);
    let (a, _) = fx.spawn(0, "a");
    let (b, _) = fx.spawn(0, "b");
    fx.run(0);

    assert_eq!(fx.running(0), vec![a, b, idle]);
    fx.swi_raw(0, SwiNumber::Sleep.raw(), &[0]);
    assert_eq!(fx.current(0), b);
    fx.swi_raw(0, SwiNumber::Sleep.raw(), &[0]);
    // Idle came round but a is runnable, so a runs.
    assert_eq!(fx.current(0), a);
    assert_eq!(fx.kernel.core_stats(0).unwrap().yields, 2);
}

#[test]
fn start_shares_the_callers_slot_and_runs_next() {
    let mut fx = fixture();
    let (a, slot) = fx.spawn(0, "a");
    fx.run(0);

    let out = fx
        .call(0, SwiNumber::Start, &[0x9000, 0x20_0000, 7, 8])
        .expect("start");
    let child = TaskHandle::from_raw(out[0]);

    assert_eq!(fx.kernel.task_slot(child).unwrap(), slot);
    assert_eq!(fx.running(0)[..2], [a, child]);
    let context = fx.kernel.task_context(child).unwrap();
    assert_eq!(context.pc, 0x9000);
    assert_eq!(context.r[0], 7);
    assert_eq!(context.r[1], 8);
    assert!(context.is_user());
    assert_eq!(fx.kernel.task_banked(child).unwrap().sp, 0x20_0000);
    assert_eq!(fx.kernel.stack_owner(slot).unwrap(), None);
}

#[test]
fn run_free_creates_a_slot_owned_by_the_caller() {
    let mut fx = fixture();
    let (_, slot) = fx.spawn(0, "a");
    fx.run(0);
    let free_slots = fx.kernel.free_slots();

    let out = fx
        .call(0, SwiNumber::RunFree, &[0x9000, 0x20_0000, 0, 0])
        .expect("run free");
    let child = TaskHandle::from_raw(out[0]);
    let child_slot = fx.kernel.task_slot(child).unwrap();

    assert_eq!(child_slot.raw(), out[1]);
    assert_ne!(child_slot, slot);
    assert_eq!(fx.kernel.slot_creator(child_slot).unwrap(), Some(slot));
    assert_eq!(fx.kernel.free_slots(), free_slots - 1);
}

// =============================================================================
// Sleep
// =============================================================================

#[test]
fn sleepers_are_kept_as_deltas() {
    let mut fx = fixture();
    let (a, _) = fx.spawn(0, "a");
    let (b, _) = fx.spawn(0, "b");
    let (c, _) = fx.spawn(0, "c");
    fx.run(0);

    fx.call_blocking(0, SwiNumber::Sleep, &[5]);
    fx.call_blocking(0, SwiNumber::Sleep, &[2]);
    fx.call_blocking(0, SwiNumber::Sleep, &[7]);

    assert_eq!(fx.sleeping(0), vec![(b, 2), (a, 3), (c, 2)]);
    assert_eq!(fx.kernel.task_residence(a).unwrap(), Residence::Sleeping(0));
}

#[test]
fn sleepers_wake_on_their_tick() {
    let mut fx = fixture();
    let idle = fx.current(0);
    let (a, _) = fx.spawn(0, "a");
    let (b, _) = fx.spawn(0, "b");
    let (c, _) = fx.spawn(0, "c");
    fx.run(0);
    fx.call_blocking(0, SwiNumber::Sleep, &[5]);
    fx.call_blocking(0, SwiNumber::Sleep, &[2]);
    fx.call_blocking(0, SwiNumber::Sleep, &[7]);
    assert_eq!(fx.current(0), idle);

    let mut woken_at = Vec::new();
    for tick in 1..=7 {
        let before = fx.current(0);
        fx.tick(0);
        if fx.current(0) != before {
            woken_at.push((tick, fx.current(0)));
        }
    }
    assert_eq!(woken_at, vec![(2, b), (5, a), (7, c)]);
    assert!(fx.sleeping(0).is_empty());
    assert_eq!(fx.saved_result(b), Ok([2, 0, 0, 0]));
    assert_eq!(fx.kernel.core_stats(0).unwrap().ticks, 7);
}

#[test]
fn equal_deadlines_wake_as_one_batch() {
    let mut fx = fixture();
    let idle = fx.current(0);
    let (a, _) = fx.spawn(0, "a");
    let (b, _) = fx.spawn(0, "b");
    fx.run(0);
    fx.call_blocking(0, SwiNumber::Sleep, &[3]);
    fx.call_blocking(0, SwiNumber::Sleep, &[3]);
    assert_eq!(fx.sleeping(0), vec![(a, 3), (b, 0)]);

    for _ in 0..3 {
        fx.tick(0);
    }
    assert_eq!(fx.running(0), vec![a, b, idle]);
    assert_eq!(fx.current(0), a);
}

#[test]
fn head_placement_preempts_the_running_task() {
    let mut fx = fixture();
    let (a, _) = fx.spawn(0, "a");
    let (b, _) = fx.spawn(0, "b");
    fx.run(0);
    fx.call_blocking(0, SwiNumber::Sleep, &[1]);
    assert_eq!(fx.current(0), b);

    fx.tick(0);
    assert_eq!(fx.current(0), a);
}

#[test]
fn tail_placement_leaves_the_running_task_alone() {
    let mut fx =
        KernelFixture::with_config(KernelConfig::new().with_wake_placement(WakePlacement::Tail));
    let idle = fx.current(0);
    let (a, _) = fx.spawn(0, "a");
    let (b, _) = fx.spawn(0, "b");
    fx.run(0);
    fx.call_blocking(0, SwiNumber::Sleep, &[1]);

    fx.tick(0);
    assert_eq!(fx.current(0), b);
    assert_eq!(fx.running(0), vec![b, idle, a]);
}

// =============================================================================
// WaitUntilWoken / Resume
// =============================================================================

#[test]
fn resume_before_wait_is_banked() {
    let mut fx = fixture();
    let (_, _) = fx.spawn(0, "a");
    let (b, _) = fx.spawn(0, "b");
    fx.run(0);

    fx.call(0, SwiNumber::Resume, &[b.raw()]).expect("resume");
    assert_eq!(fx.kernel.task_resumes(b).unwrap(), 1);

    fx.yield_to(0, b);
    fx.call(0, SwiNumber::WaitUntilWoken, &[]).expect("banked wake");
    assert_eq!(fx.current(0), b);
    assert_eq!(fx.kernel.task_resumes(b).unwrap(), 0);
}

#[test]
fn each_resume_wakes_at_most_once() {
    let mut fx = fixture();
    let idle = fx.current(0);
    let (a, _) = fx.spawn(0, "a");
    let (b, _) = fx.spawn(0, "b");
    fx.run(0);
    fx.yield_to(0, b);

    let next = fx.call_blocking(0, SwiNumber::WaitUntilWoken, &[]);
    assert_eq!(next, a);
    assert_eq!(fx.kernel.task_resumes(b).unwrap(), -1);
    assert_eq!(
        fx.kernel.task_residence(b).unwrap(),
        Residence::WaitingForResume
    );

    fx.call(0, SwiNumber::Resume, &[b.raw()]).expect("first resume");
    fx.call(0, SwiNumber::Resume, &[b.raw()]).expect("second resume");

    assert_eq!(fx.running(0), vec![a, b, idle]);
    assert_eq!(fx.kernel.task_resumes(b).unwrap(), 1);
    assert!(fx.saved_result(b).is_ok());
}

#[test]
fn resume_of_ended_task_is_rejected() {
    let mut fx = fixture();
    let (_, _) = fx.spawn(0, "a");
    let (b, _) = fx.spawn(0, "b");
    fx.run(0);
    fx.yield_to(0, b);
    let free_tasks = fx.kernel.free_tasks();
    let free_slots = fx.kernel.free_slots();

    fx.call_blocking(0, SwiNumber::EndTask, &[]);

    assert_eq!(fx.kernel.free_tasks(), free_tasks + 1);
    assert_eq!(fx.kernel.free_slots(), free_slots + 1);
    assert_eq!(
        fx.call(0, SwiNumber::Resume, &[b.raw()]),
        Err(ErrorCode::InvalidHandle)
    );
    assert_eq!(fx.kernel.task_context(b), Err(ErrorCode::InvalidHandle));
}

#[test]
fn slot_outlives_all_but_its_last_task() {
    let mut fx = fixture();
    let (a, slot) = fx.spawn(0, "a");
    let b = fx.spawn_in(0, slot, "b");
    fx.run(0);
    let free_slots = fx.kernel.free_slots();

    assert_eq!(fx.call_blocking(0, SwiNumber::EndTask, &[]), b);
    assert_eq!(fx.kernel.free_slots(), free_slots);
    assert!(fx.kernel.task_slot(a).is_err());

    fx.call_blocking(0, SwiNumber::EndTask, &[]);
    assert_eq!(fx.kernel.free_slots(), free_slots + 1);
    assert_eq!(fx.kernel.stack_owner(slot), Err(ErrorCode::InvalidHandle));
}

// =============================================================================
// Refusals and exhaustion
// =============================================================================

#[test]
fn idle_task_cannot_block() {
    let mut fx = fixture();
    let idle = fx.current(0);

    assert_eq!(
        fx.call(0, SwiNumber::Sleep, &[3]),
        Err(ErrorCode::IdleTaskCannotBlock)
    );
    assert_eq!(
        fx.call(0, SwiNumber::WaitUntilWoken, &[]),
        Err(ErrorCode::IdleTaskCannotBlock)
    );
    assert_eq!(
        fx.call(0, SwiNumber::EndTask, &[]),
        Err(ErrorCode::IdleTaskCannotBlock)
    );
    // Yielding with nothing else runnable keeps idle on the core.
    fx.call(0, SwiNumber::Sleep, &[0]).expect("yield");
    assert_eq!(fx.current(0), idle);
}

#[test]
fn task_pool_exhaustion_is_reported() {
    let mut fx = KernelFixture::with_config(KernelConfig::new().with_task_capacity(3));
    fx.spawn(0, "a");
    fx.spawn(0, "b");
    fx.run(0);
    let free_slots = fx.kernel.free_slots();

    assert_eq!(
        fx.call(0, SwiNumber::Start, &[0x9000, 0x20_0000, 0, 0]),
        Err(ErrorCode::OutOfTasks)
    );
    assert_eq!(
        fx.call(0, SwiNumber::RunFree, &[0x9000, 0x20_0000, 0, 0]),
        Err(ErrorCode::OutOfTasks)
    );
    assert_eq!(fx.kernel.free_slots(), free_slots);
}

#[test]
fn slot_pool_exhaustion_is_reported() {
    let mut fx = KernelFixture::with_config(KernelConfig::new().with_slot_capacity(2));
    fx.spawn(0, "a");
    fx.run(0);

    assert_eq!(
        fx.call(0, SwiNumber::RunFree, &[0x9000, 0x20_0000, 0, 0]),
        Err(ErrorCode::OutOfSlots)
    );
    assert!(fx.kernel.spawn(0, crate::TaskSpec::user(0x9000, 0, "b"), None).is_err());
}

#[test]
fn bad_configurations_are_refused() {
    assert_eq!(
        KernelConfig::new().with_cores(0).validate(),
        Err(ErrorCode::InvalidConfig)
    );
    assert_eq!(
        KernelConfig::new().with_cores(2).with_task_capacity(1).validate(),
        Err(ErrorCode::InvalidConfig)
    );
    assert_eq!(
        KernelConfig::new().with_pipe_capacity(0).validate(),
        Err(ErrorCode::InvalidConfig)
    );
}

#[test]
fn cores_boot_once() {
    let mut fx = fixture();
    let mut frame = fx.frames[0];
    assert_eq!(
        fx.kernel.boot_core(0, &mut frame),
        Err(ErrorCode::InvalidCore)
    );
    assert_eq!(
        fx.kernel.boot_core(1, &mut frame),
        Err(ErrorCode::InvalidCore)
    );
    assert!(fx.kernel.current_task(1).is_none());
    fx.run(0);
}
