//! Process service
//!
//! Runs a command in a working directory and captures its output. A process
//! still running at its timeout is killed.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Captured result of one process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was killed by a signal or timed out
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Service trait for running external commands
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Runs `args[0]` with the remaining arguments in `workdir`
    ///
    /// Errors only when the process cannot be started; a non-zero exit or a
    /// timeout is reported through `ProcessOutput`.
    async fn run(&self, args: &[String], workdir: &Path, timeout: Duration) -> Result<ProcessOutput>;
}

/// Runs commands directly on the worker
pub struct LocalProcessRunner;

#[async_trait]
impl ProcessRunner for LocalProcessRunner {
    async fn run(&self, args: &[String], workdir: &Path, timeout: Duration) -> Result<ProcessOutput> {
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| anyhow::anyhow!("empty command"))?;

        debug!("Executing process: {} {:?} in {}", program, rest, workdir.display());

        let child = Command::new(program)
            .args(rest)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start '{}'", program))?;

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => {
                let output = output.with_context(|| format!("Failed to wait for '{}'", program))?;
                Ok(ProcessOutput {
                    exit_code: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    timed_out: false,
                })
            }
            // dropping the child kills it
            Err(_) => Ok(ProcessOutput {
                timed_out: true,
                ..ProcessOutput::default()
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_captures_output_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let output = LocalProcessRunner
            .run(
                &args(&["sh", "-c", "echo out; echo err >&2; exit 2"]),
                dir.path(),
                Duration::from_secs(10),
            )
            .await
            .unwrap();

        assert_eq!(output.exit_code, Some(2));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
        assert!(!output.success());
    }

    #[tokio::test]
    async fn test_runs_in_workdir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker"), "").unwrap();

        let output = LocalProcessRunner
            .run(&args(&["ls"]), dir.path(), Duration::from_secs(10))
            .await
            .unwrap();
        assert!(output.success());
        assert!(output.stdout.contains("marker"));
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let output = LocalProcessRunner
            .run(&args(&["sleep", "5"]), dir.path(), Duration::from_millis(50))
            .await
            .unwrap();

        assert!(output.timed_out);
        assert_eq!(output.exit_code, None);
    }

    #[tokio::test]
    async fn test_missing_program_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = LocalProcessRunner
            .run(&args(&["kiln-no-such-program"]), dir.path(), Duration::from_secs(1))
            .await;
        assert!(result.is_err());

        let result = LocalProcessRunner.run(&[], dir.path(), Duration::from_secs(1)).await;
        assert!(result.is_err());
    }
}
