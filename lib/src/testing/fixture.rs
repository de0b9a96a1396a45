//! Fixtures that build a kernel for one test and clean up after it.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FixtureKind {
    /// One booted core over in-memory collaborators
    Kernel,
    /// Several booted cores, driven from one thread each
    Smp,
}

/// Setup returns the ready fixture; implementors call `teardown` from
/// `Drop` so a failing assertion still cleans up.
pub trait TestFixture: Sized {
    const KIND: FixtureKind;

    fn setup() -> Result<Self, &'static str>;

    /// Release whatever the fixture captured (console output, sinks).
    fn teardown(&mut self);
}
