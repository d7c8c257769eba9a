//! Pipeline command handlers
//!
//! Shows the pipeline templates and what each step would do for a given
//! property set, without running anything.

use anyhow::Result;
use colored::*;
use kiln_core::condition::should_run;
use kiln_core::domain::pipeline::{Pipeline, PipelineKind};
use kiln_core::domain::properties::BuildProperties;
use kiln_core::domain::step::{PipelineStep, RunCondition, StepAction, StepCommand};
use kiln_core::domain::target::TargetEnvironment;
use kiln_core::router::ArtifactLocation;
use kiln_core::templates::{TemplateConfig, TemplateRegistry};
use serde::Serialize;

use crate::commands::run_properties;
use crate::config::Config;

/// What a step would do for one property set
#[derive(Debug, Serialize)]
struct RenderedStep {
    name: String,
    action: &'static str,
    runs: bool,
    /// Argument vector of a shell step
    #[serde(skip_serializing_if = "Option::is_none")]
    command: Option<Vec<String>>,
    /// Store path, glob or target list of a non-shell step
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

fn registry(config: &Config) -> TemplateRegistry {
    TemplateRegistry::new(&TemplateConfig {
        repo_url: config.repo_url.clone(),
        targets: TargetEnvironment::default_targets(),
    })
}

/// List both templates with their step policies
pub fn list_pipelines(config: &Config) -> Result<()> {
    for pipeline in registry(config).all() {
        print_pipeline(&pipeline);
    }
    Ok(())
}

/// Render every step of a template against the given properties
pub fn render_pipeline(
    config: &Config,
    kind: PipelineKind,
    params: Vec<(String, String)>,
    json: bool,
) -> Result<()> {
    let props = run_properties(config, params)?;
    let pipeline = registry(config).get(kind);
    let steps = render_steps(&pipeline, &props);

    if json {
        println!("{}", serde_json::to_string_pretty(&steps)?);
        return Ok(());
    }

    if let Err(e) = props.validate() {
        println!("{} {}", "⚠".yellow(), format!("A worker would reject this run: {}", e).yellow());
    }

    println!("{}", format!("{} pipeline:", kind).bold());
    for step in &steps {
        let marker = if step.runs { "▸".cyan() } else { "·".dimmed() };
        println!("  {} {} {}", marker, step.name.bold(), format!("[{}]", step.action).dimmed());

        if !step.runs {
            println!("      {}", "skip".dimmed());
        } else if let Some(command) = &step.command {
            println!("      {}", command.join(" "));
        } else if let Some(detail) = &step.detail {
            println!("      {}", detail);
        }
    }

    Ok(())
}

fn render_steps(pipeline: &Pipeline, props: &BuildProperties) -> Vec<RenderedStep> {
    pipeline
        .steps
        .iter()
        .map(|step| {
            let runs = should_run(props, step);
            let (command, detail) = match &step.action {
                StepAction::Shell(render) if runs => match render(props) {
                    StepCommand::Invalid(reason) => (None, Some(format!("fails: {}", reason))),
                    command => (Some(command.args().to_vec()), None),
                },
                action => (None, describe(action, props)),
            };
            RenderedStep {
                name: step.name.clone(),
                action: step.action.kind(),
                runs,
                command,
                detail,
            }
        })
        .collect()
}

fn describe(action: &StepAction, props: &BuildProperties) -> Option<String> {
    match action {
        StepAction::Shell(_) => None,
        StepAction::ClassifyCategory => Some(match props.resolve_category() {
            Ok(category) => format!("category = {}", category),
            Err(e) => format!("unclassifiable: {}", e),
        }),
        StepAction::FetchSource(spec) => Some(format!(
            "{} @ {} ({:?}, {} retries)",
            spec.repo_url,
            props.branch.as_deref().unwrap_or("HEAD"),
            spec.mode,
            spec.retry.retries
        )),
        StepAction::SetPropertyFromGlob { pattern, property } => {
            Some(format!("{} = <single match of {}>", property, pattern))
        }
        StepAction::UploadFile { destination, .. } => Some(located(destination(props))),
        StepAction::UploadDirectory {
            source,
            destination,
            ..
        } => Some(format!("{}/ -> {}", source, located(destination(props)))),
        StepAction::DownloadFile { source, .. } => Some(located(source(props))),
        StepAction::Trigger(spec) => Some(
            spec.targets
                .iter()
                .map(|t| t.builder.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        ),
        StepAction::RemoveDirectory { path } => Some(path.to_string()),
    }
}

fn located(result: kiln_core::Result<ArtifactLocation>) -> String {
    match result {
        Ok(location) => location.path(),
        Err(e) => format!("unroutable: {}", e),
    }
}

fn print_pipeline(pipeline: &Pipeline) {
    println!(
        "{}",
        format!("{} ({} steps)", pipeline.kind, pipeline.steps.len()).bold()
    );
    for step in &pipeline.steps {
        println!(
            "  {} {} {}",
            "▸".cyan(),
            step.name.bold(),
            format!("[{}]", step.action.kind()).dimmed()
        );
        let policies = policies(step);
        if !policies.is_empty() {
            println!("      {}", policies.join(", ").dimmed());
        }
    }
    println!();
}

fn policies(step: &PipelineStep) -> Vec<String> {
    let mut policies = Vec::new();
    match &step.run_if {
        RunCondition::Always => {}
        RunCondition::PropertyIs { key, value } => policies.push(format!("if {}={}", key, value)),
        RunCondition::PropertyIn { key, values } => {
            policies.push(format!("if {} in [{}]", key, values.join(", ")))
        }
    }
    if step.halt_on_failure {
        policies.push("halts on failure".to_string());
    }
    if step.always_run {
        policies.push("always runs".to_string());
    }
    if step.decode.is_some() {
        policies.push("helper exit codes".to_string());
    }
    policies.push(format!("timeout {}s", step.timeout.as_secs()));
    policies
}
