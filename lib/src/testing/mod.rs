//! Shared test support: fixtures with RAII teardown.

mod fixture;

pub use fixture::{FixtureKind, TestFixture};
