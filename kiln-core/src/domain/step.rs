//! Pipeline step types
//!
//! A step is one unit of pipeline work: what it does (`StepAction`), whether
//! it runs (`RunCondition`), whether its result is shown (`HideWhen`) and how
//! its failure affects the rest of the run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::domain::properties::BuildProperties;
use crate::domain::target::TargetEnvironment;
use crate::error::Result;
use crate::router::ArtifactLocation;

/// Default timeout for a step's process
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(1200);

/// Outcome of a single step (and, aggregated, of a run)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepResult {
    Success,
    Warnings,
    Failure,
    Skipped,
    /// Infrastructure error: the step could not be carried out at all
    Exception,
    Cancelled,
}

impl StepResult {
    /// Whether this result stops a run when the step halts on failure
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            StepResult::Failure | StepResult::Exception | StepResult::Cancelled
        )
    }

    /// Ordering used to aggregate step results into a run result
    fn severity(self) -> u8 {
        match self {
            StepResult::Success => 0,
            StepResult::Skipped => 1,
            StepResult::Warnings => 2,
            StepResult::Failure => 3,
            StepResult::Exception => 4,
            StepResult::Cancelled => 5,
        }
    }

    /// Returns the worse of two results
    pub fn worst(self, other: StepResult) -> StepResult {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepResult::Success => "success",
            StepResult::Warnings => "warnings",
            StepResult::Failure => "failure",
            StepResult::Skipped => "skipped",
            StepResult::Exception => "exception",
            StepResult::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for StepResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Explicit process exit code table
///
/// Codes missing from the table are failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitCodeMap(BTreeMap<i32, StepResult>);

impl ExitCodeMap {
    pub fn new(entries: impl IntoIterator<Item = (i32, StepResult)>) -> Self {
        Self(entries.into_iter().collect())
    }

    /// The helper-script convention: 0 success, 1 failure, 2 warnings, 3 skipped
    pub fn helper_scripts() -> Self {
        Self::new([
            (0, StepResult::Success),
            (1, StepResult::Failure),
            (2, StepResult::Warnings),
            (3, StepResult::Skipped),
        ])
    }

    pub fn decode(&self, exit_code: i32) -> StepResult {
        self.0
            .get(&exit_code)
            .copied()
            .unwrap_or(StepResult::Failure)
    }
}

/// Maps an exit code through an optional table, falling back to success/failure
pub fn decode_exit_code(map: Option<&ExitCodeMap>, exit_code: i32) -> StepResult {
    match map {
        Some(map) => map.decode(exit_code),
        None if exit_code == 0 => StepResult::Success,
        None => StepResult::Failure,
    }
}

/// A rendered command: run these arguments, skip the step, or fail it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepCommand {
    Run(Vec<String>),
    Skip,
    /// A property the command needs is missing or unusable
    Invalid(String),
}

impl StepCommand {
    /// Wraps an argument vector; an empty vector means skip
    pub fn from_args(args: Vec<String>) -> Self {
        if args.is_empty() {
            StepCommand::Skip
        } else {
            StepCommand::Run(args)
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, StepCommand::Skip)
    }

    pub fn args(&self) -> &[String] {
        match self {
            StepCommand::Run(args) => args,
            StepCommand::Skip | StepCommand::Invalid(_) => &[],
        }
    }
}

/// Produces a step's command from the run's properties
pub type CommandFn = fn(&BuildProperties) -> StepCommand;

/// Computes an artifact store location from the run's properties
pub type LocateFn = fn(&BuildProperties) -> Result<ArtifactLocation>;

/// Names a file in the step's working directory from the run's properties
pub type LocalFileFn = fn(&BuildProperties) -> Option<String>;

/// Decides a per-run policy from the run's properties
pub type PropertyPredicate = fn(&BuildProperties) -> bool;

/// When a step executes
///
/// Conditions compare a property's string form for exact equality. An unset
/// property never matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunCondition {
    Always,
    PropertyIs {
        key: &'static str,
        value: &'static str,
    },
    PropertyIn {
        key: &'static str,
        values: &'static [&'static str],
    },
}

/// When a step's result is hidden from status displays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HideWhen {
    #[default]
    Never,
    Skipped,
    /// Hidden unless something went wrong
    UnlessSuccessOrSkipped,
}

/// How a source checkout treats an existing working directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    /// Reuse the directory, removing untracked and ignored files
    Fresh,
    /// Remove the directory and clone again
    Clobber,
}

/// Bounded retry for transient infrastructure failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub const NONE: RetryPolicy = RetryPolicy {
        retries: 0,
        backoff: Duration::ZERO,
    };
}

/// Source checkout parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSpec {
    pub repo_url: String,
    pub mode: FetchMode,
    pub retry: RetryPolicy,
}

/// Downstream pipeline start parameters
///
/// Downstream runs are started and never awaited by the triggering run.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerSpec {
    pub targets: Vec<TargetEnvironment>,
}

/// The work a step performs
#[derive(Debug, Clone)]
pub enum StepAction {
    /// Run a rendered command
    Shell(CommandFn),
    /// Derive `category` from the scheduler name
    ClassifyCategory,
    /// Materialize the source at the run's ref
    FetchSource(FetchSpec),
    /// Set a property to the single file matching a glob
    SetPropertyFromGlob {
        pattern: &'static str,
        property: &'static str,
    },
    UploadFile {
        source: LocalFileFn,
        destination: LocateFn,
    },
    /// Recursive upload preserving relative structure
    ///
    /// A missing source directory skips the step unless `required` holds.
    UploadDirectory {
        source: &'static str,
        destination: LocateFn,
        required: PropertyPredicate,
    },
    DownloadFile {
        source: LocateFn,
        destination: LocalFileFn,
    },
    /// Start downstream runs
    Trigger(TriggerSpec),
    RemoveDirectory { path: &'static str },
}

impl StepAction {
    pub fn kind(&self) -> &'static str {
        match self {
            StepAction::Shell(_) => "shell",
            StepAction::ClassifyCategory => "classify",
            StepAction::FetchSource(_) => "fetch",
            StepAction::SetPropertyFromGlob { .. } => "set-property",
            StepAction::UploadFile { .. } => "upload",
            StepAction::UploadDirectory { .. } => "upload-dir",
            StepAction::DownloadFile { .. } => "download",
            StepAction::Trigger(_) => "trigger",
            StepAction::RemoveDirectory { .. } => "remove-dir",
        }
    }
}

/// One step of a pipeline template
#[derive(Debug, Clone)]
pub struct PipelineStep {
    pub name: String,
    pub description: String,
    pub action: StepAction,
    pub run_if: RunCondition,
    pub hide: HideWhen,
    pub halt_on_failure: bool,
    pub always_run: bool,
    /// Working directory relative to the run's workspace
    pub workdir: String,
    pub timeout: Duration,
    /// Exit code table; `None` means zero/non-zero
    pub decode: Option<ExitCodeMap>,
}

impl PipelineStep {
    pub fn new(name: impl Into<String>, action: StepAction) -> Self {
        let name = name.into();
        Self {
            description: name.clone(),
            name,
            action,
            run_if: RunCondition::Always,
            hide: HideWhen::Never,
            halt_on_failure: false,
            always_run: false,
            workdir: String::from("build"),
            timeout: DEFAULT_STEP_TIMEOUT,
            decode: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn run_if(mut self, condition: RunCondition) -> Self {
        self.run_if = condition;
        self
    }

    pub fn hide(mut self, hide: HideWhen) -> Self {
        self.hide = hide;
        self
    }

    pub fn halt_on_failure(mut self) -> Self {
        self.halt_on_failure = true;
        self
    }

    pub fn always_run(mut self) -> Self {
        self.always_run = true;
        self
    }

    pub fn workdir(mut self, workdir: impl Into<String>) -> Self {
        self.workdir = workdir.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn decode(mut self, map: ExitCodeMap) -> Self {
        self.decode = Some(map);
        self
    }
}
