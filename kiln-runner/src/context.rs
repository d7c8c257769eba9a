//! Execution context for pipeline runs
//!
//! Contains the state a run carries from step to step:
//! - Log buffer for collecting step output and status lines
//! - Workspace path of the run's builder
//! - Cancellation flag

use kiln_core::domain::log::{LogEntry, LogLevel};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::watch;
use uuid::Uuid;

/// Execution context shared across one run's steps
pub struct RunContext {
    pub run_id: Uuid,

    /// Builder workspace; step working directories are relative to it
    workspace: PathBuf,

    /// Log buffer with entries
    log_buffer: Mutex<Vec<LogEntry>>,

    cancel: watch::Receiver<bool>,
}

impl RunContext {
    /// Creates a new run context
    ///
    /// # Arguments
    /// * `run_id` - The run ID
    /// * `builder` - The builder name; runs of one builder share a workspace
    /// * `workspace_base` - Base directory for workspaces
    /// * `cancel` - Flips to `true` when the run should stop
    pub fn new(
        run_id: Uuid,
        builder: &str,
        workspace_base: &Path,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            run_id,
            workspace: workspace_base.join(builder),
            log_buffer: Mutex::new(Vec::new()),
            cancel,
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Resolves a step's working directory
    ///
    /// `"."` and `""` name the workspace itself.
    pub fn workdir(&self, relative: &str) -> PathBuf {
        match relative {
            "" | "." => self.workspace.clone(),
            relative => self.workspace.join(relative),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolves once the run is cancelled; never resolves if it cannot be
    pub async fn cancelled(&self) {
        let mut cancel = self.cancel.clone();
        if cancel.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Adds a log entry to the buffer
    pub fn add_log(&self, entry: LogEntry) {
        let mut buffer = self.log_buffer.lock().unwrap();
        buffer.push(entry);
    }

    /// Logs a debug message
    pub fn log_debug(&self, message: String) {
        self.add_log(LogEntry::now(LogLevel::Debug, message));
    }

    /// Logs an info message
    pub fn log_info(&self, message: String) {
        self.add_log(LogEntry::now(LogLevel::Info, message));
    }

    /// Logs a warning message
    pub fn log_warning(&self, message: String) {
        self.add_log(LogEntry::now(LogLevel::Warning, message));
    }

    /// Logs an error message
    pub fn log_error(&self, message: String) {
        self.add_log(LogEntry::now(LogLevel::Error, message));
    }

    /// Logs each non-empty line of process output
    pub fn log_output(&self, output: &str, level: LogLevel) {
        for line in output.lines().map(str::trim_end).filter(|l| !l.is_empty()) {
            self.add_log(LogEntry::now(level, line));
        }
    }

    /// Drains all log entries from the buffer
    pub fn drain_logs(&self) -> Vec<LogEntry> {
        let mut buffer = self.log_buffer.lock().unwrap();
        buffer.drain(..).collect()
    }
}
