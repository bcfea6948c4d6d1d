//! Job orchestration.

mod orchestrator;
mod stats;

pub use orchestrator::DatasetDriver;
pub use stats::JobStats;
