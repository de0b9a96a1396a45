pub mod per_cpu;
#[allow(clippy::module_inception)]
pub mod scheduler;
pub mod switch;

#[cfg(test)]
mod sched_tests;

pub use per_cpu::{CoreState, CoreStats, CoreStatsSnapshot};
pub use scheduler::Placement;
