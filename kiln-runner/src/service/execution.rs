//! Execution service
//!
//! Runs one pipeline instance on this worker:
//! - Resolving and validating the run's properties before any step
//! - Executing steps strictly in declaration order
//! - Enforcing halt-on-failure and always-run semantics
//! - Honoring cancellation at step boundaries
//!
//! This service contains the core business logic for running pipelines.

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use kiln_core::condition::{is_hidden, should_run};
use kiln_core::domain::log::LogLevel;
use kiln_core::domain::pipeline::{Pipeline, RunState};
use kiln_core::domain::properties::BuildProperties;
use kiln_core::domain::step::{
    FetchSpec, PipelineStep, StepAction, StepCommand, StepResult, TriggerSpec, decode_exit_code,
};
use kiln_core::dto::{RunReport, RunRequest, StepReport};
use kiln_core::fanout;
use kiln_core::templates::TemplateRegistry;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::context::RunContext;
use crate::service::fetch::{SourceFetcher, SourceRef};
use crate::service::process::ProcessRunner;
use crate::service::transfer::ArtifactTransfer;

/// Service trait for executing pipeline runs
#[async_trait]
pub trait ExecutionService: Send + Sync {
    /// Executes a run to completion and returns its report
    ///
    /// Never fails: every problem is recorded in the report's step results.
    async fn execute(&self, request: RunRequest, cancel: watch::Receiver<bool>) -> RunReport;
}

/// Starts downstream runs
pub trait TriggerSink: Send + Sync {
    /// Queues a run; the receiver yields its report once it finishes
    fn submit(&self, request: RunRequest) -> oneshot::Receiver<RunReport>;
}

/// Worker-wide values every run needs
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub workspace_base: PathBuf,
    /// Default for the `bburl` property
    pub script_base_url: String,
    /// Default for the `bbmaster` property
    pub store_public_url: String,
}

/// Standard implementation of ExecutionService
pub struct StandardExecutionService {
    settings: ExecutorSettings,
    templates: Arc<TemplateRegistry>,
    processes: Arc<dyn ProcessRunner>,
    fetcher: Arc<dyn SourceFetcher>,
    transfer: Arc<dyn ArtifactTransfer>,
    trigger: Arc<dyn TriggerSink>,
}

/// Result of one executed step
struct StepOutcome {
    result: StepResult,
    command: Option<Vec<String>>,
}

impl StepOutcome {
    fn of(result: StepResult) -> Self {
        Self {
            result,
            command: None,
        }
    }
}

impl StandardExecutionService {
    pub fn new(
        settings: ExecutorSettings,
        templates: Arc<TemplateRegistry>,
        processes: Arc<dyn ProcessRunner>,
        fetcher: Arc<dyn SourceFetcher>,
        transfer: Arc<dyn ArtifactTransfer>,
        trigger: Arc<dyn TriggerSink>,
    ) -> Self {
        Self {
            settings,
            templates,
            processes,
            fetcher,
            transfer,
            trigger,
        }
    }

    /// Parses the request's properties and fills worker defaults
    fn prepare_properties(&self, request: &RunRequest) -> kiln_core::Result<BuildProperties> {
        let mut props = request.build_properties()?;
        props.set_default("bburl", &self.settings.script_base_url)?;
        props.set_default("bbmaster", &self.settings.store_public_url)?;
        props.validate()?;
        Ok(props)
    }

    async fn run_steps(
        &self,
        ctx: &RunContext,
        pipeline: &Pipeline,
        props: &mut BuildProperties,
    ) -> (RunState, StepResult, Vec<StepReport>) {
        let mut state = RunState::Pending;
        let mut overall = StepResult::Success;
        let mut reports = Vec::new();

        for (index, step) in pipeline.steps.iter().enumerate() {
            if ctx.is_cancelled() && state != RunState::HaltedFailed {
                warn!("Run {} cancelled before step '{}'", ctx.run_id, step.name);
                ctx.log_warning(format!("Run cancelled before step '{}'", step.name));
                state = state.halt();
                overall = overall.worst(StepResult::Cancelled);
            }

            if !state.admits(step) {
                debug!("Step '{}' not admitted in state {:?}", step.name, state);
                continue;
            }
            if state != RunState::HaltedFailed {
                state = RunState::Running(index);
            }

            let started_at = Utc::now();
            let outcome = if should_run(props, step) {
                info!("Run {}: starting step '{}'", ctx.run_id, step.description);
                ctx.log_info(format!("Starting step: {}", step.description));
                self.run_step_cancellable(ctx, step, props).await
            } else {
                debug!("Run {}: skipping step '{}'", ctx.run_id, step.name);
                StepOutcome::of(StepResult::Skipped)
            };

            ctx.log_info(format!("Step '{}' finished: {}", step.name, outcome.result));
            if outcome.result != StepResult::Skipped {
                overall = overall.worst(outcome.result);
            }

            reports.push(StepReport {
                name: step.name.clone(),
                result: outcome.result,
                hidden: is_hidden(outcome.result, step),
                command: outcome.command,
                started_at,
                finished_at: Utc::now(),
            });

            state = state.after_step(index, step, outcome.result);
        }

        (state.finish(), overall, reports)
    }

    /// Runs a step, abandoning it if the run is cancelled meanwhile
    ///
    /// Always-run steps are not interrupted.
    async fn run_step_cancellable(
        &self,
        ctx: &RunContext,
        step: &PipelineStep,
        props: &mut BuildProperties,
    ) -> StepOutcome {
        if step.always_run {
            return self.run_step(ctx, step, props).await;
        }

        tokio::select! {
            outcome = self.run_step(ctx, step, props) => outcome,
            _ = ctx.cancelled() => {
                ctx.log_warning(format!("Step '{}' interrupted by cancellation", step.name));
                StepOutcome::of(StepResult::Cancelled)
            }
        }
    }

    async fn run_step(
        &self,
        ctx: &RunContext,
        step: &PipelineStep,
        props: &mut BuildProperties,
    ) -> StepOutcome {
        let workdir = ctx.workdir(&step.workdir);
        if !matches!(step.action, StepAction::RemoveDirectory { .. }) {
            if let Err(e) = tokio::fs::create_dir_all(&workdir).await {
                ctx.log_error(format!("Cannot create {}: {}", workdir.display(), e));
                return StepOutcome::of(StepResult::Exception);
            }
        }

        match &step.action {
            StepAction::Shell(render) => match render(props) {
                StepCommand::Invalid(reason) => {
                    StepOutcome::of(failed(ctx, format!("Cannot build command: {}", reason)))
                }
                command => {
                    let args = command.args().to_vec();
                    let result = self.shell(ctx, step, &args, &workdir).await;
                    StepOutcome {
                        result,
                        command: Some(args),
                    }
                }
            },
            StepAction::ClassifyCategory => StepOutcome::of(classify(ctx, props)),
            StepAction::FetchSource(spec) => {
                StepOutcome::of(self.fetch(ctx, step, spec, props, &workdir).await)
            }
            StepAction::SetPropertyFromGlob { pattern, property } => {
                StepOutcome::of(set_from_glob(ctx, props, &workdir, pattern, property))
            }
            StepAction::UploadFile {
                source,
                destination,
            } => {
                let result = match (source(props), destination(props)) {
                    (Some(name), Ok(location)) => {
                        match self.transfer.upload_file(&workdir.join(&name), &location).await {
                            Ok(()) => {
                                ctx.log_info(format!("Uploaded {} to {}", name, location.url()));
                                StepResult::Success
                            }
                            Err(e) => failed(ctx, format!("{:#}", e)),
                        }
                    }
                    (None, _) => failed(ctx, "No file to upload".to_string()),
                    (_, Err(e)) => failed(ctx, format!("Cannot route upload: {}", e)),
                };
                StepOutcome::of(result)
            }
            StepAction::UploadDirectory {
                source,
                destination,
                required,
            } => {
                let local = workdir.join(source);
                let result = if !local.is_dir() && required(props) {
                    failed(ctx, format!("Nothing to upload: {} does not exist", local.display()))
                } else if !local.is_dir() {
                    ctx.log_info(format!("Nothing to upload: {} does not exist", local.display()));
                    StepResult::Skipped
                } else {
                    match destination(props) {
                        Ok(location) => match self.transfer.upload_directory(&local, &location).await {
                            Ok(count) => {
                                ctx.log_info(format!("Uploaded {} file(s) to {}", count, location.url()));
                                StepResult::Success
                            }
                            Err(e) => failed(ctx, format!("{:#}", e)),
                        },
                        Err(e) => failed(ctx, format!("Cannot route upload: {}", e)),
                    }
                };
                StepOutcome::of(result)
            }
            StepAction::DownloadFile {
                source,
                destination,
            } => {
                let result = match (source(props), destination(props)) {
                    (Ok(location), Some(name)) => {
                        match self.transfer.download_file(&location, &workdir.join(&name)).await {
                            Ok(bytes) => {
                                ctx.log_info(format!("Downloaded {} ({} bytes)", location.url(), bytes));
                                StepResult::Success
                            }
                            Err(e) => failed(ctx, format!("{:#}", e)),
                        }
                    }
                    (Err(e), _) => failed(ctx, format!("Cannot route download: {}", e)),
                    (_, None) => failed(ctx, "No local file name for download".to_string()),
                };
                StepOutcome::of(result)
            }
            StepAction::Trigger(spec) => StepOutcome::of(self.fan_out(ctx, spec, props).await),
            StepAction::RemoveDirectory { path } => {
                let target = ctx.workspace().join(path);
                let result = match tokio::fs::remove_dir_all(&target).await {
                    Ok(()) => StepResult::Success,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => StepResult::Success,
                    Err(e) => failed(ctx, format!("Cannot remove {}: {}", target.display(), e)),
                };
                StepOutcome::of(result)
            }
        }
    }

    async fn shell(
        &self,
        ctx: &RunContext,
        step: &PipelineStep,
        args: &[String],
        workdir: &Path,
    ) -> StepResult {
        ctx.log_debug(format!("$ {}", args.join(" ")));

        let output = match self.processes.run(args, workdir, step.timeout).await {
            Ok(output) => output,
            Err(e) => {
                error!("Step '{}' could not start: {:#}", step.name, e);
                ctx.log_error(format!("{:#}", e));
                return StepResult::Exception;
            }
        };

        ctx.log_output(&output.stdout, LogLevel::Info);
        ctx.log_output(&output.stderr, LogLevel::Error);

        if output.timed_out {
            return failed(ctx, format!("Timed out after {:?}", step.timeout));
        }

        match output.exit_code {
            Some(code) => decode_exit_code(step.decode.as_ref(), code),
            None => failed(ctx, "Process killed by signal".to_string()),
        }
    }

    /// One checkout attempt plus the configured retries
    ///
    /// The step timeout bounds each attempt as a whole.
    async fn fetch(
        &self,
        ctx: &RunContext,
        step: &PipelineStep,
        spec: &FetchSpec,
        props: &BuildProperties,
        workdir: &Path,
    ) -> StepResult {
        let source = SourceRef {
            repo_url: spec.repo_url.clone(),
            branch: props.branch.clone(),
            revision: props.revision.clone(),
        };

        let attempts = spec.retry.retries + 1;
        for attempt in 1..=attempts {
            let checkout = self.fetcher.fetch(&source, spec.mode, workdir, step.timeout);
            let outcome = tokio::time::timeout(step.timeout, checkout)
                .await
                .unwrap_or_else(|_| Err(anyhow::anyhow!("timed out after {:?}", step.timeout)));

            match outcome {
                Ok(()) => {
                    ctx.log_info(format!("Checked out {}", source.revision.as_deref().unwrap_or("HEAD")));
                    return StepResult::Success;
                }
                Err(e) => {
                    warn!("Fetch attempt {}/{} failed: {:#}", attempt, attempts, e);
                    ctx.log_warning(format!("Fetch attempt {}/{} failed: {:#}", attempt, attempts, e));
                    if attempt < attempts {
                        tokio::time::sleep(spec.retry.backoff).await;
                    }
                }
            }
        }

        failed(ctx, format!("Source fetch failed after {} attempt(s)", attempts))
    }

    /// Starts one downstream run per target without waiting for them
    async fn fan_out(&self, ctx: &RunContext, spec: &TriggerSpec, props: &BuildProperties) -> StepResult {
        let requests = match fanout::downstream_requests(props, &spec.targets, ctx.run_id) {
            Ok(requests) => requests,
            Err(e) => return failed(ctx, format!("Cannot start package builds: {}", e)),
        };

        for request in requests {
            ctx.log_info(format!("Triggered {} run {}", request.builder, request.id));
            let builder = request.builder.clone();
            let receiver = self.trigger.submit(request);
            tokio::spawn(watch_downstream(ctx.run_id, builder, receiver));
        }
        StepResult::Success
    }

    fn failed_report(
        &self,
        request: &RunRequest,
        ctx: &RunContext,
        started_at: chrono::DateTime<Utc>,
    ) -> RunReport {
        RunReport {
            run_id: request.id,
            parent: request.parent,
            builder: request.builder.clone(),
            pipeline: request.pipeline,
            result: StepResult::Failure,
            state: RunState::HaltedFailed,
            steps: Vec::new(),
            properties: request.properties.clone(),
            logs: ctx.drain_logs(),
            started_at,
            completed_at: Utc::now(),
        }
    }
}

#[async_trait]
impl ExecutionService for StandardExecutionService {
    async fn execute(&self, request: RunRequest, cancel: watch::Receiver<bool>) -> RunReport {
        let started_at = Utc::now();
        let ctx = RunContext::new(request.id, &request.builder, &self.settings.workspace_base, cancel);
        let pipeline = self.templates.get(request.pipeline);

        info!(
            "Starting {} run {} on builder {}",
            request.pipeline, request.id, request.builder
        );
        ctx.log_info(format!("Starting {} pipeline", request.pipeline));

        let mut props = match self.prepare_properties(&request) {
            Ok(props) => props,
            Err(e) => {
                error!("Run {} rejected: {}", request.id, e);
                ctx.log_error(format!("Invalid run properties: {}", e));
                return self.failed_report(&request, &ctx, started_at);
            }
        };

        let (state, result, steps) = self.run_steps(&ctx, &pipeline, &mut props).await;

        info!("Run {} finished: {} ({:?})", request.id, result, state);
        ctx.log_info(format!("Pipeline finished: {}", result));

        RunReport {
            run_id: request.id,
            parent: request.parent,
            builder: request.builder,
            pipeline: request.pipeline,
            result,
            state,
            steps,
            properties: props.to_pairs(),
            logs: ctx.drain_logs(),
            started_at,
            completed_at: Utc::now(),
        }
    }
}

fn failed(ctx: &RunContext, message: String) -> StepResult {
    ctx.log_error(message);
    StepResult::Failure
}

fn classify(ctx: &RunContext, props: &mut BuildProperties) -> StepResult {
    match props.resolve_category() {
        Ok(category) => {
            props.category = Some(category);
            ctx.log_info(format!("Category: {}", category));
            StepResult::Success
        }
        Err(e) => failed(ctx, format!("Cannot classify run: {}", e)),
    }
}

/// Sets `property` to the name of the single file matching `pattern`
fn set_from_glob(
    ctx: &RunContext,
    props: &mut BuildProperties,
    workdir: &Path,
    pattern: &str,
    property: &str,
) -> StepResult {
    let full = workdir.join(pattern);
    let matches: Vec<String> = match glob::glob(&full.to_string_lossy()) {
        Ok(paths) => paths
            .filter_map(|entry| entry.ok())
            .filter(|path| path.is_file())
            .filter_map(|path| path.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect(),
        Err(e) => return failed(ctx, format!("Bad pattern {}: {}", pattern, e)),
    };

    match matches.as_slice() {
        [single] => match props.set(property, single) {
            Ok(()) => {
                ctx.log_info(format!("{} = {}", property, single));
                StepResult::Success
            }
            Err(e) => failed(ctx, format!("Cannot set {}: {}", property, e)),
        },
        [] => failed(ctx, format!("No file matches {}", pattern)),
        many => failed(ctx, format!("{} files match {}: {}", many.len(), pattern, many.join(", "))),
    }
}

/// Logs a downstream run's outcome; the parent's result never depends on it
async fn watch_downstream(
    parent: uuid::Uuid,
    builder: String,
    receiver: oneshot::Receiver<RunReport>,
) {
    match receiver.await.context("downstream run dropped") {
        Ok(report) => info!(
            "Downstream run {} ({}) of {} finished: {}",
            report.run_id, builder, parent, report.result
        ),
        Err(e) => warn!("Downstream run on {} of {}: {:#}", builder, parent, e),
    }
}
