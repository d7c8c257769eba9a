//! Runner configuration
//!
//! Defines all configurable parameters for the runner: where the artifact
//! store and helper scripts live, which repository is built, the target
//! environment matrix, and the optional tag poller and review reporter.

use anyhow::Context;
use kiln_core::domain::target::TargetEnvironment;
use std::path::PathBuf;
use std::time::Duration;

/// Review server connection for status reporting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GerritConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub project: String,
}

/// Runner configuration
///
/// Every target must build a distinct distro/distrover pair. Package runs
/// upload into a store subtree keyed by change, patchset, distro and
/// distrover, and the store never overwrites a file. Two targets sharing a
/// pair (for example two arches of one distro version) would both upload
/// `SRPM/` and the repository descriptor there, and the second run would
/// fail, so such matrices are rejected up front.
#[derive(Debug, Clone)]
pub struct Config {
    /// Unique identifier for this worker
    pub worker_id: String,

    /// Artifact store base URL (e.g., "http://localhost:8010")
    pub store_url: String,

    /// Base URL of the remote helper scripts, ending with `/`
    pub script_base_url: String,

    /// Source repository built by the tarball pipeline
    pub repo_url: String,

    /// Directory holding one workspace per builder
    pub workspace_base: PathBuf,

    /// Max runs executing at once on this worker
    pub max_parallel_runs: usize,

    /// Package builders started by each tarball run
    pub targets: Vec<TargetEnvironment>,

    /// Whether to watch the repository for new or moved tags
    pub poll_tags: bool,

    pub tag_poll_interval: Duration,

    /// Review reporting; disabled when unset
    pub gerrit: Option<GerritConfig>,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(worker_id: String, store_url: String) -> Self {
        Self {
            worker_id,
            store_url,
            script_base_url: "http://localhost:8010/scripts/".to_string(),
            repo_url: "https://git.whamcloud.com/fs/lustre-release.git".to_string(),
            workspace_base: std::env::temp_dir().join("kiln"),
            max_parallel_runs: 2,
            targets: TargetEnvironment::default_targets(),
            poll_tags: false,
            tag_poll_interval: Duration::from_secs(300),
            gerrit: None,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Returns `None` when neither WORKER_ID nor STORE_URL is set. Once either
    /// is set, any missing or malformed setting is an error.
    ///
    /// Expected environment variables:
    /// - WORKER_ID (required)
    /// - STORE_URL (required)
    /// - SCRIPT_BASE_URL (optional)
    /// - REPO_URL (optional)
    /// - WORKSPACE_BASE (optional, default: $TMPDIR/kiln)
    /// - MAX_PARALLEL_RUNS (optional, default: 2)
    /// - TARGETS_FILE (optional, JSON list of target environments)
    /// - POLL_TAGS (optional, "yes" to enable)
    /// - TAG_POLL_INTERVAL (optional, seconds, default: 300)
    /// - GERRIT_HOST, GERRIT_PORT, GERRIT_USER, GERRIT_PROJECT (optional)
    pub fn from_env() -> anyhow::Result<Option<Self>> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Option<Self>> {
        let (worker_id, store_url) = match (var("WORKER_ID"), var("STORE_URL")) {
            (None, None) => return Ok(None),
            (Some(worker_id), Some(store_url)) => (worker_id, store_url),
            (None, Some(_)) => anyhow::bail!("WORKER_ID environment variable not set"),
            (Some(_), None) => anyhow::bail!("STORE_URL environment variable not set"),
        };

        let mut config = Self::new(worker_id, store_url);

        if let Some(url) = var("SCRIPT_BASE_URL") {
            config.script_base_url = url;
        }

        if let Some(url) = var("REPO_URL") {
            config.repo_url = url;
        }

        if let Some(path) = var("WORKSPACE_BASE") {
            config.workspace_base = PathBuf::from(path);
        }

        if let Some(value) = var("MAX_PARALLEL_RUNS") {
            config.max_parallel_runs = value
                .parse()
                .with_context(|| format!("Invalid MAX_PARALLEL_RUNS {:?}", value))?;
        }

        if let Some(path) = var("TARGETS_FILE") {
            config.targets = load_targets(&PathBuf::from(path))?;
        }

        config.poll_tags = var("POLL_TAGS").is_some_and(|v| v == "yes");

        if let Some(value) = var("TAG_POLL_INTERVAL") {
            let secs: u64 = value
                .parse()
                .with_context(|| format!("Invalid TAG_POLL_INTERVAL {:?}", value))?;
            config.tag_poll_interval = Duration::from_secs(secs);
        }

        config.gerrit = gerrit_from_vars(&var)?;

        Ok(Some(config))
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.worker_id.is_empty() {
            anyhow::bail!("worker_id cannot be empty");
        }

        if !self.store_url.starts_with("http://") && !self.store_url.starts_with("https://") {
            anyhow::bail!("store_url must start with http:// or https://");
        }

        if !self.script_base_url.ends_with('/') {
            anyhow::bail!("script_base_url must end with '/'");
        }

        if self.repo_url.is_empty() {
            anyhow::bail!("repo_url cannot be empty");
        }

        if self.max_parallel_runs == 0 {
            anyhow::bail!("max_parallel_runs must be greater than 0");
        }

        if self.poll_tags && self.tag_poll_interval.as_secs() == 0 {
            anyhow::bail!("tag_poll_interval must be greater than 0");
        }

        let mut builders: Vec<&str> = self.targets.iter().map(|t| t.builder.as_str()).collect();
        builders.sort_unstable();
        if builders.windows(2).any(|pair| pair[0] == pair[1]) {
            anyhow::bail!("target builder names must be unique");
        }

        // Concurrent package runs must write to disjoint store subtrees
        let mut outputs: Vec<(&str, &str)> = self
            .targets
            .iter()
            .map(|t| (t.distro.as_str(), t.distrover.as_str()))
            .collect();
        outputs.sort_unstable();
        if outputs.windows(2).any(|pair| pair[0] == pair[1]) {
            anyhow::bail!("each target needs a distinct distro/distrover pair");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(
            uuid::Uuid::new_v4().to_string(),
            "http://localhost:8010".to_string(),
        )
    }
}

fn load_targets(path: &PathBuf) -> anyhow::Result<Vec<TargetEnvironment>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read targets file {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse targets file {}", path.display()))
}

fn gerrit_from_vars(var: &impl Fn(&str) -> Option<String>) -> anyhow::Result<Option<GerritConfig>> {
    let Some(host) = var("GERRIT_HOST") else {
        return Ok(None);
    };
    let port = match var("GERRIT_PORT") {
        Some(value) => value
            .parse()
            .with_context(|| format!("Invalid GERRIT_PORT {:?}", value))?,
        None => 29418,
    };
    Ok(Some(GerritConfig {
        host,
        port,
        user: var("GERRIT_USER").unwrap_or_else(|| "kiln".to_string()),
        project: var("GERRIT_PROJECT").unwrap_or_else(|| "fs/lustre-release".to_string()),
    }))
}
