//! Scheduler layer for the runner
//!
//! This layer decides when runs start: the dispatcher executes queued runs
//! with bounded parallelism, and the tag poller queues a tarball run for
//! every new or moved tag.

pub mod dispatcher;
pub mod tag_poller;

pub use dispatcher::{DispatchHandle, Dispatcher};
pub use tag_poller::TagPoller;
