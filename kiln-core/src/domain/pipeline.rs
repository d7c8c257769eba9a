//! Pipeline domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::step::{PipelineStep, StepResult};
use crate::error::CoreError;

/// The two pipeline shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineKind {
    /// Fetches source, produces and uploads the tarball, fans out
    Tarball,
    /// Builds packages for one target environment from an uploaded tarball
    Package,
}

impl PipelineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineKind::Tarball => "tarball",
            PipelineKind::Package => "package",
        }
    }
}

impl FromStr for PipelineKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tarball" => Ok(PipelineKind::Tarball),
            "package" => Ok(PipelineKind::Package),
            other => Err(CoreError::UnknownPipeline(other.to_string())),
        }
    }
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable ordered sequence of steps
///
/// Built once at configuration time and shared read-only by every run.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub kind: PipelineKind,
    pub steps: Vec<PipelineStep>,
}

impl Pipeline {
    pub fn new(kind: PipelineKind, steps: Vec<PipelineStep>) -> Self {
        Self { kind, steps }
    }

    pub fn step(&self, name: &str) -> Option<&PipelineStep> {
        self.steps.iter().find(|step| step.name == name)
    }
}

/// Per-run state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Pending,
    /// Executing the step at this index
    Running(usize),
    /// A halting step failed; only always-run steps still execute
    HaltedFailed,
    Completed,
}

impl RunState {
    /// Whether a step is allowed to execute in this state
    pub fn admits(&self, step: &PipelineStep) -> bool {
        match self {
            RunState::HaltedFailed => step.always_run,
            RunState::Completed => false,
            RunState::Pending | RunState::Running(_) => true,
        }
    }

    /// State after the step at `index` finished with `result`
    pub fn after_step(self, index: usize, step: &PipelineStep, result: StepResult) -> RunState {
        match self {
            RunState::HaltedFailed | RunState::Completed => self,
            RunState::Pending | RunState::Running(_) => {
                if step.halt_on_failure && result.is_failure() {
                    RunState::HaltedFailed
                } else {
                    RunState::Running(index + 1)
                }
            }
        }
    }

    /// Halts the run without a step result (cancellation)
    pub fn halt(self) -> RunState {
        match self {
            RunState::Completed => self,
            _ => RunState::HaltedFailed,
        }
    }

    /// Terminal state once every step has been visited
    pub fn finish(self) -> RunState {
        match self {
            RunState::HaltedFailed => RunState::HaltedFailed,
            _ => RunState::Completed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::step::StepAction;

    fn step(halt: bool, always: bool) -> PipelineStep {
        let mut step = PipelineStep::new("s", StepAction::RemoveDirectory { path: "build" });
        step.halt_on_failure = halt;
        step.always_run = always;
        step
    }

    #[test]
    fn test_halting_failure_halts() {
        let state = RunState::Running(2).after_step(2, &step(true, false), StepResult::Failure);
        assert_eq!(state, RunState::HaltedFailed);
    }

    #[test]
    fn test_tolerant_failure_advances() {
        let state = RunState::Running(2).after_step(2, &step(false, false), StepResult::Failure);
        assert_eq!(state, RunState::Running(3));
    }

    #[test]
    fn test_warnings_and_skips_never_halt() {
        for result in [StepResult::Warnings, StepResult::Skipped] {
            let state = RunState::Pending.after_step(0, &step(true, false), result);
            assert_eq!(state, RunState::Running(1));
        }
    }

    #[test]
    fn test_halted_run_admits_only_always_run_steps() {
        let halted = RunState::HaltedFailed;
        assert!(!halted.admits(&step(false, false)));
        assert!(halted.admits(&step(false, true)));
        assert_eq!(
            halted.after_step(5, &step(false, true), StepResult::Success),
            RunState::HaltedFailed
        );
        assert_eq!(halted.finish(), RunState::HaltedFailed);
    }

    #[test]
    fn test_finish_completes_running_run() {
        assert_eq!(RunState::Running(9).finish(), RunState::Completed);
        assert_eq!(RunState::Running(3).halt(), RunState::HaltedFailed);
    }

    #[test]
    fn test_pipeline_kind_parse() {
        assert_eq!("tarball".parse::<PipelineKind>(), Ok(PipelineKind::Tarball));
        assert_eq!("package".parse::<PipelineKind>(), Ok(PipelineKind::Package));
        assert!("deploy".parse::<PipelineKind>().is_err());
    }
}
