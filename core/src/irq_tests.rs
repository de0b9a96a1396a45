//! Interrupt source registration, routing and the quiet-source path.

use baton_abi::{ErrorCode, SwiNumber};
use baton_lib::testing::TestFixture;

use crate::testing::KernelFixture;
use crate::{MAX_INTERRUPT_SOURCES, Residence};

/// One user task running on core 0 with `sources` interrupt sources.
fn routed(sources: u32) -> KernelFixture {
    let mut fx = KernelFixture::setup().expect("kernel fixture");
    fx.spawn(0, "driver");
    fx.spawn(0, "other");
    fx.run(0);
    let out = fx
        .call(0, SwiNumber::NumberOfInterruptSources, &[sources])
        .expect("route sources");
    assert_eq!(out[0], sources);
    fx
}

#[test]
fn source_count_is_fixed_once() {
    let mut fx = KernelFixture::setup().expect("kernel fixture");
    assert_eq!(
        fx.call(0, SwiNumber::NumberOfInterruptSources, &[0]),
        Ok([0, 0, 0, 0])
    );
    assert_eq!(
        fx.call(
            0,
            SwiNumber::NumberOfInterruptSources,
            &[MAX_INTERRUPT_SOURCES as u32 + 1]
        ),
        Err(ErrorCode::InvalidArgument)
    );
    assert_eq!(
        fx.call(0, SwiNumber::NumberOfInterruptSources, &[4]).unwrap()[0],
        4
    );
    assert_eq!(
        fx.call(0, SwiNumber::NumberOfInterruptSources, &[8]).unwrap()[0],
        4
    );
    assert_eq!(fx.kernel.interrupt_sources(0), Ok(4));
}

#[test]
fn sources_outside_the_table_are_refused() {
    let mut fx = routed(4);
    assert_eq!(
        fx.call(0, SwiNumber::WaitForInterrupt, &[4]),
        Err(ErrorCode::InterruptSourceOutOfRange)
    );
    assert_eq!(
        fx.call(0, SwiNumber::InterruptIsOff, &[9]),
        Err(ErrorCode::InterruptSourceOutOfRange)
    );
    assert_eq!(
        fx.kernel.interrupt_count(0, 4),
        Err(ErrorCode::InterruptSourceOutOfRange)
    );
}

#[test]
fn one_task_per_source() {
    let mut fx = routed(4);
    let driver = fx.current(0);
    let other = fx.call_blocking(0, SwiNumber::WaitForInterrupt, &[2]);
    assert_eq!(
        fx.kernel.task_residence(driver),
        Ok(Residence::Interrupt(0, 2))
    );

    assert_eq!(fx.current(0), other);
    assert_eq!(
        fx.call(0, SwiNumber::WaitForInterrupt, &[2]),
        Err(ErrorCode::InterruptSourceClaimed)
    );
    assert_eq!(
        fx.call(0, SwiNumber::InterruptIsOff, &[2]),
        Err(ErrorCode::InterruptSourceClaimed)
    );
}

#[test]
fn idle_task_cannot_wait_for_interrupts() {
    let mut fx = KernelFixture::setup().expect("kernel fixture");
    fx.call(0, SwiNumber::NumberOfInterruptSources, &[2]).unwrap();
    assert_eq!(
        fx.call(0, SwiNumber::WaitForInterrupt, &[0]),
        Err(ErrorCode::IdleTaskCannotBlock)
    );
}

#[test]
fn quiet_source_reports_its_count() {
    let mut fx = routed(2);
    let driver = fx.current(0);

    for _ in 0..3 {
        fx.yield_to(0, driver);
        fx.call_blocking(0, SwiNumber::WaitForInterrupt, &[1]);
        fx.fire(0, Some(1));
        assert_eq!(fx.current(0), driver);
    }
    assert!(!fx.interrupts.is_unmasked(0, 1));

    let out = fx.call(0, SwiNumber::InterruptIsOff, &[1]).unwrap();
    assert_eq!(out[0], 3);
    assert!(!fx.interrupts.is_unmasked(0, 1));

    // A straggler from the quiet device is dropped.
    fx.fire(0, Some(1));
    assert_eq!(fx.current(0), driver);
    fx.fire(0, None);

    let stats = fx.kernel.core_stats(0).unwrap();
    assert_eq!(stats.interrupts, 3);
    assert_eq!(stats.spurious, 2);
    assert_eq!(fx.kernel.interrupt_count(0, 1), Ok(3));
}

#[test]
fn rearming_a_quiet_source_routes_it_again() {
    let mut fx = routed(2);
    let driver = fx.current(0);
    fx.call(0, SwiNumber::InterruptIsOff, &[0]).unwrap();

    fx.call_blocking(0, SwiNumber::WaitForInterrupt, &[0]);
    assert!(fx.interrupts.is_unmasked(0, 0));
    fx.fire(0, Some(0));
    assert_eq!(fx.current(0), driver);
    assert_eq!(fx.last_result(0).unwrap()[0], 0);
}

#[test]
#[should_panic(expected = "has no waiting task")]
fn unclaimed_interrupt_is_fatal() {
    let mut fx = routed(2);
    fx.fire(0, Some(0));
}

#[test]
#[should_panic(expected = "out of range")]
fn unrouted_interrupt_is_fatal() {
    let mut fx = routed(2);
    fx.fire(0, Some(5));
}
