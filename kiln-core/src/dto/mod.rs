//! Data Transfer Objects for inter-service communication
//!
//! Run requests flow from event sources (the CLI, the tag poller, fan-out
//! triggers) into the runner; run reports flow back out to reporters.

pub mod run;

pub use run::{RunReport, RunRequest, StepReport};
