//! Kiln Runner
//!
//! A build worker that executes tarball and package pipelines.
//!
//! Architecture:
//! - Configuration: Load settings from environment or defaults
//! - Services: Business logic (execution, processes, source fetch, artifact
//!   transfer, review reporting)
//! - Scheduler: Run dispatch and tag polling
//!
//! Runs are read as JSON run requests from the files named on the command
//! line, or as JSON lines on stdin. With `POLL_TAGS=yes` the runner instead
//! stays up and starts a tarball run for every new or moved tag.

mod config;
mod context;
mod scheduler;
mod service;

use anyhow::{Context, Result};
use kiln_core::dto::RunRequest;
use kiln_core::templates::{TemplateConfig, TemplateRegistry};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::scheduler::{DispatchHandle, Dispatcher, TagPoller};
use crate::service::{
    ExecutionService, ExecutorSettings, GerritReporter, GitFetcher, LocalProcessRunner,
    ProcessRunner, StandardExecutionService, StatusReporter, StoreTransfer, TriggerSink,
};
use kiln_client::StoreClient;

/// Builder name used for runs started by the tag poller
const TARBALL_BUILDER: &str = "tarball";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kiln_runner=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Kiln Runner");

    // Load configuration
    let config = load_config()?;
    info!(
        "Loaded configuration: worker_id={}, store_url={}, targets={}",
        config.worker_id,
        config.store_url,
        config.targets.len()
    );

    tokio::fs::create_dir_all(&config.workspace_base)
        .await
        .with_context(|| format!("Failed to create {}", config.workspace_base.display()))?;

    // Initialize services
    let processes: Arc<dyn ProcessRunner> = Arc::new(LocalProcessRunner);
    let templates = Arc::new(TemplateRegistry::new(&TemplateConfig {
        repo_url: config.repo_url.clone(),
        targets: config.targets.clone(),
    }));

    let (handle, queue) = DispatchHandle::channel();

    let executor: Arc<dyn ExecutionService> = Arc::new(StandardExecutionService::new(
        ExecutorSettings {
            workspace_base: config.workspace_base.clone(),
            script_base_url: config.script_base_url.clone(),
            store_public_url: config.store_url.clone(),
        },
        templates,
        Arc::clone(&processes),
        Arc::new(GitFetcher::new(Arc::clone(&processes))),
        Arc::new(StoreTransfer::new(StoreClient::new(config.store_url.clone()))),
        Arc::new(handle.clone()),
    ));

    let reporter: Option<Arc<dyn StatusReporter>> = config.gerrit.clone().map(|gerrit| {
        info!("Reporting patchset results to {}", gerrit.host);
        Arc::new(GerritReporter::new(
            gerrit,
            Arc::clone(&processes),
            config.workspace_base.clone(),
        )) as Arc<dyn StatusReporter>
    });

    info!("Services initialized");

    let dispatcher = Dispatcher::new(
        executor,
        reporter,
        config.max_parallel_runs,
        handle.clone(),
        queue,
    );
    tokio::spawn(dispatcher.run());

    if config.poll_tags {
        let poller = TagPoller::new(
            config.repo_url.clone(),
            TARBALL_BUILDER.to_string(),
            config.tag_poll_interval,
            config.workspace_base.join(".tags"),
            Arc::clone(&processes),
            Arc::new(handle.clone()),
        );
        tokio::spawn(poller.run());
    }

    let files: Vec<String> = std::env::args().skip(1).collect();
    let submitted = if !files.is_empty() {
        submit_files(&handle, &files).await?
    } else if !config.poll_tags {
        submit_stdin(&handle).await?
    } else {
        0
    };
    info!("Submitted {} run(s)", submitted);

    if config.poll_tags {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for ctrl-c")?;
        info!("Shutting down");
        handle.cancel_all();
        handle.wait_idle().await;
        return Ok(());
    }

    tokio::select! {
        _ = handle.wait_idle() => {
            info!("All runs finished");
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for ctrl-c")?;
            warn!("Interrupted, cancelling {} run(s)", handle.in_flight());
            handle.cancel_all();
            handle.wait_idle().await;
        }
    }

    Ok(())
}

/// Loads configuration from environment variables, or defaults when none are set
fn load_config() -> Result<Config> {
    let config = match Config::from_env().context("Invalid configuration")? {
        Some(config) => config,
        None => {
            info!("WORKER_ID and STORE_URL not set, using defaults");
            Config::default()
        }
    };
    config.validate()?;
    Ok(config)
}

/// Parses one JSON document holding a run request or a list of them
fn parse_requests(text: &str) -> Result<Vec<RunRequest>> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    if value.is_array() {
        Ok(serde_json::from_value(value)?)
    } else {
        Ok(vec![serde_json::from_value(value)?])
    }
}

async fn submit_files(handle: &DispatchHandle, files: &[String]) -> Result<usize> {
    let mut submitted = 0;
    for file in files {
        let path = Path::new(file);
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let requests = parse_requests(&text)
            .with_context(|| format!("Failed to parse run requests in {}", path.display()))?;

        for request in requests {
            queue_run(handle, request);
            submitted += 1;
        }
    }
    Ok(submitted)
}

async fn submit_stdin(handle: &DispatchHandle) -> Result<usize> {
    info!("Reading run requests from stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut submitted = 0;

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<RunRequest>(&line) {
            Ok(request) => {
                queue_run(handle, request);
                submitted += 1;
            }
            Err(e) => error!("Ignoring malformed run request: {}", e),
        }
    }
    Ok(submitted)
}

/// Queues a run and logs its outcome when it finishes
fn queue_run(handle: &DispatchHandle, request: RunRequest) {
    info!(
        "Submitting {} run {} for {}",
        request.pipeline, request.id, request.builder
    );
    let receiver = handle.submit(request);
    tokio::spawn(async move {
        match receiver.await {
            Ok(report) => {
                let failed: Vec<&str> = report
                    .visible_steps()
                    .filter(|s| s.result.is_failure())
                    .map(|s| s.name.as_str())
                    .collect();
                if report.succeeded() {
                    info!("Run {} on {}: {}", report.run_id, report.builder, report.result);
                } else {
                    error!(
                        "Run {} on {}: {} (failed: {})",
                        report.run_id,
                        report.builder,
                        report.result,
                        failed.join(", ")
                    );
                }
            }
            Err(_) => warn!("Run dropped before completion"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::domain::pipeline::PipelineKind;

    #[test]
    fn test_parse_single_request() {
        let requests = parse_requests(
            r#"{"pipeline": "package", "builder": "el7-x86_64", "properties": {"distro": "el7"}}"#,
        )
        .unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].pipeline, PipelineKind::Package);
        assert_eq!(requests[0].properties.get("distro").unwrap(), "el7");
    }

    #[test]
    fn test_parse_request_list() {
        let requests = parse_requests(
            r#"[{"pipeline": "tarball", "builder": "tarball"},
                {"pipeline": "package", "builder": "el7-x86_64"}]"#,
        )
        .unwrap();
        assert_eq!(requests.len(), 2);
        assert_ne!(requests[0].id, requests[1].id);
    }

    #[test]
    fn test_parse_rejects_unknown_pipeline() {
        assert!(parse_requests(r#"{"pipeline": "deploy", "builder": "x"}"#).is_err());
    }
}
