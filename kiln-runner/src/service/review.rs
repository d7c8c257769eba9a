//! Review status reporting
//!
//! Posts a finished patchset run's verdict to the code-review server over its
//! ssh command interface. Tag runs have no review to report to.

use anyhow::Result;
use async_trait::async_trait;
use kiln_core::domain::category::ArtifactCategory;
use kiln_core::domain::pipeline::PipelineKind;
use kiln_core::domain::properties::BuildProperties;
use kiln_core::dto::RunReport;
use kiln_core::router;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::GerritConfig;
use crate::service::process::ProcessRunner;

const REVIEW_TIMEOUT: Duration = Duration::from_secs(60);

/// Service trait for publishing run outcomes
#[async_trait]
pub trait StatusReporter: Send + Sync {
    async fn report(&self, report: &RunReport) -> Result<()>;
}

pub struct GerritReporter {
    config: GerritConfig,
    processes: Arc<dyn ProcessRunner>,
    workdir: PathBuf,
}

impl GerritReporter {
    pub fn new(config: GerritConfig, processes: Arc<dyn ProcessRunner>, workdir: PathBuf) -> Self {
        Self {
            config,
            processes,
            workdir,
        }
    }
}

#[async_trait]
impl StatusReporter for GerritReporter {
    async fn report(&self, report: &RunReport) -> Result<()> {
        let Some(command) = review_command(&self.config, report) else {
            debug!("Run {} has no review to report to", report.run_id);
            return Ok(());
        };

        let output = self.processes.run(&command, &self.workdir, REVIEW_TIMEOUT).await?;
        if !output.success() {
            anyhow::bail!("gerrit review failed: {}", output.stderr.trim());
        }

        info!("Reported run {} ({}) to review", report.run_id, report.result);
        Ok(())
    }
}

/// The ssh review command for a finished run
///
/// `None` for runs outside the patchset category or without a revision.
pub fn review_command(config: &GerritConfig, report: &RunReport) -> Option<Vec<String>> {
    let props = match BuildProperties::from_pairs(&report.properties) {
        Ok(props) => props,
        Err(e) => {
            warn!("Run {} has unreadable properties: {}", report.run_id, e);
            return None;
        }
    };

    if props.resolve_category().ok()? != ArtifactCategory::Patchset {
        return None;
    }
    let revision = props.revision.clone()?;

    let verified = if report.succeeded() { "+1" } else { "-1" };
    let message = review_message(report, &props).replace('\'', "\"");

    Some(vec![
        "ssh".to_string(),
        "-p".to_string(),
        config.port.to_string(),
        format!("{}@{}", config.user, config.host),
        "gerrit".to_string(),
        "review".to_string(),
        "--project".to_string(),
        config.project.clone(),
        "--notify".to_string(),
        "OWNER".to_string(),
        "--message".to_string(),
        format!("'{}'", message),
        "--label".to_string(),
        format!("Verified={}", verified),
        revision,
    ])
}

fn review_message(report: &RunReport, props: &BuildProperties) -> String {
    let mut message = format!("Build '{}' finished: {}.", report.builder, report.result);

    let location = match report.pipeline {
        PipelineKind::Tarball => router::tarball_location(props),
        PipelineKind::Package => router::repo_location(props),
    };
    if report.succeeded() {
        if let Ok(location) = location {
            message.push_str(&format!(" Artifacts: {}", location.url()));
        }
    } else if let Some(step) = report.steps.iter().find(|s| s.result.is_failure()) {
        message.push_str(&format!(" Failed step: {}.", step.name));
    }

    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use kiln_core::domain::pipeline::RunState;
    use kiln_core::domain::step::StepResult;
    use kiln_core::dto::StepReport;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn config() -> GerritConfig {
        GerritConfig {
            host: "review.example.org".to_string(),
            port: 29418,
            user: "kiln".to_string(),
            project: "fs/lustre-release".to_string(),
        }
    }

    fn report(result: StepResult, pairs: &[(&str, &str)]) -> RunReport {
        let now = Utc::now();
        RunReport {
            run_id: Uuid::new_v4(),
            parent: None,
            builder: "el7-x86_64".to_string(),
            pipeline: PipelineKind::Package,
            result,
            state: RunState::Completed,
            steps: vec![StepReport {
                name: "make".to_string(),
                result,
                hidden: false,
                command: None,
                started_at: now,
                finished_at: now,
            }],
            properties: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            logs: Vec::new(),
            started_at: now,
            completed_at: now,
        }
    }

    const PATCHSET: &[(&str, &str)] = &[
        ("category", "patchset"),
        ("change", "123"),
        ("patchset", "4"),
        ("revision", "abc123"),
        ("distro", "el7"),
        ("distrover", "7"),
        ("bbmaster", "build.example.org"),
    ];

    #[test]
    fn test_success_votes_plus_one() {
        let cmd = review_command(&config(), &report(StepResult::Success, PATCHSET)).unwrap();
        assert_eq!(&cmd[..4], &["ssh", "-p", "29418", "kiln@review.example.org"]);
        assert!(cmd.contains(&"Verified=+1".to_string()));
        assert_eq!(cmd.last().unwrap(), "abc123");

        let message = &cmd[cmd.iter().position(|a| a == "--message").unwrap() + 1];
        assert!(message.starts_with('\'') && message.ends_with('\''));
        assert!(message.contains("http://build.example.org/buildproducts/123/4/el7/7/"));
        // only the outer quotes are single quotes
        assert_eq!(message.matches('\'').count(), 2);
    }

    #[test]
    fn test_failure_votes_minus_one() {
        let cmd = review_command(&config(), &report(StepResult::Failure, PATCHSET)).unwrap();
        assert!(cmd.contains(&"Verified=-1".to_string()));
        assert!(cmd.iter().any(|a| a.contains("Failed step: make")));
    }

    #[test]
    fn test_tag_runs_are_not_reported() {
        let pairs = [
            ("scheduler", "tag-changes"),
            ("branch", "refs/tags/2.12.0"),
            ("revision", "abc123"),
        ];
        assert!(review_command(&config(), &report(StepResult::Success, &pairs)).is_none());
    }

    #[test]
    fn test_missing_revision_is_not_reported() {
        let pairs = [("category", "patchset"), ("change", "1"), ("patchset", "1")];
        assert!(review_command(&config(), &report(StepResult::Success, &pairs)).is_none());
    }
}
