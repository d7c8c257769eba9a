//! Service layer
//!
//! Services contain the runner's business logic: pipeline execution and the
//! collaborators it drives (processes, source checkout, artifact transfer,
//! review reporting).
//!
//! All services are trait-based to enable testing and dependency injection.

mod execution;
mod fetch;
mod process;
mod review;
mod transfer;

// Re-export traits
pub use execution::{ExecutionService, TriggerSink};
pub use process::ProcessRunner;
pub use review::StatusReporter;

// Re-export implementations
pub use execution::{ExecutorSettings, StandardExecutionService};
pub use fetch::GitFetcher;
pub use process::LocalProcessRunner;
#[cfg(test)]
pub use process::ProcessOutput;
pub use review::GerritReporter;
pub use transfer::StoreTransfer;
