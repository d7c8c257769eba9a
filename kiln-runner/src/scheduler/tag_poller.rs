//! Tag poller
//!
//! Watches the source repository's tags and starts a tarball run for every
//! tag that appears or moves to another commit.

use anyhow::{Context, Result};
use kiln_core::domain::category::TAG_SCHEDULER;
use kiln_core::domain::pipeline::PipelineKind;
use kiln_core::dto::RunRequest;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{debug, error, info};

use crate::service::{ProcessRunner, TriggerSink};

const LS_REMOTE_TIMEOUT: Duration = Duration::from_secs(120);

/// Tag ref to the commit it points at
pub type TagMap = BTreeMap<String, String>;

/// Parses `git ls-remote --tags` output
///
/// Peeled entries (`^{}`) and refs outside `refs/tags/` are ignored.
pub fn parse_ls_remote(output: &str) -> TagMap {
    output
        .lines()
        .filter_map(|line| {
            let (sha, name) = line.split_once('\t')?;
            let name = name.trim();
            if !name.starts_with("refs/tags/") || name.ends_with("^{}") {
                return None;
            }
            Some((name.to_string(), sha.trim().to_string()))
        })
        .collect()
}

/// Tags that are new or whose commit changed since the previous listing
///
/// The first listing only establishes the baseline and reports nothing.
pub fn diff_tags(previous: Option<&TagMap>, current: &TagMap) -> Vec<(String, String)> {
    let Some(previous) = previous else {
        return Vec::new();
    };

    current
        .iter()
        .filter(|(name, sha)| previous.get(*name) != Some(*sha))
        .map(|(name, sha)| (name.clone(), sha.clone()))
        .collect()
}

/// The tarball run for one tag
pub fn tag_request(builder: &str, tag_ref: &str, revision: &str) -> RunRequest {
    let properties = BTreeMap::from([
        ("scheduler".to_string(), TAG_SCHEDULER.to_string()),
        ("branch".to_string(), tag_ref.to_string()),
        ("revision".to_string(), revision.to_string()),
    ]);
    RunRequest::new(PipelineKind::Tarball, builder, properties)
}

pub struct TagPoller {
    repo_url: String,
    builder: String,
    interval: Duration,
    workdir: PathBuf,
    processes: Arc<dyn ProcessRunner>,
    sink: Arc<dyn TriggerSink>,
    known: Option<TagMap>,
}

impl TagPoller {
    pub fn new(
        repo_url: String,
        builder: String,
        interval: Duration,
        workdir: PathBuf,
        processes: Arc<dyn ProcessRunner>,
        sink: Arc<dyn TriggerSink>,
    ) -> Self {
        Self {
            repo_url,
            builder,
            interval,
            workdir,
            processes,
            sink,
            known: None,
        }
    }

    /// Starts the polling loop
    pub async fn run(mut self) {
        info!(
            "Starting tag poller for {} (interval: {:?})",
            self.repo_url, self.interval
        );

        let mut interval = time::interval(self.interval);

        loop {
            interval.tick().await;

            debug!("Polling tags");

            match self.poll_once().await {
                Ok(started) => {
                    if started > 0 {
                        info!("Started {} tag run(s) this cycle", started);
                    }
                }
                Err(e) => {
                    error!("Error during tag poll: {:#}", e);
                }
            }
        }
    }

    /// Lists tags once and submits a run per new or moved tag
    pub async fn poll_once(&mut self) -> Result<usize> {
        let args: Vec<String> = ["git", "ls-remote", "--tags", self.repo_url.as_str()]
            .iter()
            .map(|a| a.to_string())
            .collect();

        tokio::fs::create_dir_all(&self.workdir)
            .await
            .with_context(|| format!("Failed to create {}", self.workdir.display()))?;
        let output = self
            .processes
            .run(&args, &self.workdir, LS_REMOTE_TIMEOUT)
            .await
            .context("Failed to list remote tags")?;
        if !output.success() {
            anyhow::bail!("git ls-remote failed: {}", output.stderr.trim());
        }

        let current = parse_ls_remote(&output.stdout);
        let changed = diff_tags(self.known.as_ref(), &current);
        if self.known.is_none() {
            info!("Recorded {} existing tag(s)", current.len());
        }
        self.known = Some(current);

        for (tag_ref, revision) in &changed {
            info!("Tag {} now at {}", tag_ref, revision);
            // the poller does not wait on tag runs
            drop(self.sink.submit(tag_request(&self.builder, tag_ref, revision)));
        }

        Ok(changed.len())
    }
}
