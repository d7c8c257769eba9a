//! Source fetch service
//!
//! Materializes the repository at a run's ref in a working directory. A single
//! call is one attempt; retries are applied by the executor.

use anyhow::Result;
use async_trait::async_trait;
use kiln_core::domain::step::FetchMode;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::service::process::ProcessRunner;

/// What to check out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    pub repo_url: String,
    /// Ref to fetch, e.g. `refs/changes/23/123/4` or `refs/tags/2.12.0`
    pub branch: Option<String>,
    /// Exact commit; the fetched ref's head when unset
    pub revision: Option<String>,
}

/// Service trait for materializing sources
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(
        &self,
        source: &SourceRef,
        mode: FetchMode,
        dest: &Path,
        timeout: Duration,
    ) -> Result<()>;
}

/// Fetches with the `git` command line
pub struct GitFetcher {
    processes: Arc<dyn ProcessRunner>,
}

impl GitFetcher {
    pub fn new(processes: Arc<dyn ProcessRunner>) -> Self {
        Self { processes }
    }

    async fn git(&self, args: &[&str], dir: &Path, timeout: Duration) -> Result<()> {
        let mut argv = vec!["git".to_string()];
        argv.extend(args.iter().map(|a| a.to_string()));

        let output = self.processes.run(&argv, dir, timeout).await?;
        if output.timed_out {
            anyhow::bail!("git {} timed out", args.join(" "));
        }
        if !output.success() {
            anyhow::bail!("git {} failed: {}", args.join(" "), output.stderr.trim());
        }
        Ok(())
    }
}

#[async_trait]
impl SourceFetcher for GitFetcher {
    async fn fetch(
        &self,
        source: &SourceRef,
        mode: FetchMode,
        dest: &Path,
        timeout: Duration,
    ) -> Result<()> {
        let reusable = mode == FetchMode::Fresh && dest.join(".git").is_dir();

        if !reusable {
            match tokio::fs::remove_dir_all(dest).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            tokio::fs::create_dir_all(dest).await?;
            self.git(&["clone", &source.repo_url, "."], dest, timeout)
                .await?;
        }

        let branch = source.branch.as_deref().unwrap_or("HEAD");
        self.git(&["fetch", &source.repo_url, branch], dest, timeout)
            .await?;

        let revision = source.revision.as_deref().unwrap_or("FETCH_HEAD");
        self.git(&["checkout", "-f", revision], dest, timeout)
            .await?;

        if reusable {
            self.git(&["clean", "-f", "-f", "-d", "-x"], dest, timeout)
                .await?;
        }

        Ok(())
    }
}
