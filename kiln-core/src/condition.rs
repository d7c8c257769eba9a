//! Step conditions
//!
//! Decides whether a step runs and whether its result is shown. Missing
//! properties are falsy, never errors.

use crate::domain::properties::BuildProperties;
use crate::domain::step::{HideWhen, PipelineStep, RunCondition, StepAction, StepResult};

impl RunCondition {
    pub fn evaluate(&self, props: &BuildProperties) -> bool {
        match self {
            RunCondition::Always => true,
            RunCondition::PropertyIs { key, value } => {
                props.get(key).is_some_and(|actual| actual == *value)
            }
            RunCondition::PropertyIn { key, values } => props
                .get(key)
                .is_some_and(|actual| values.iter().any(|value| actual == *value)),
        }
    }
}

/// Whether `step` should execute for this run
///
/// A shell step whose command renders as a skip is treated like a false
/// predicate even when the step declares no condition.
pub fn should_run(props: &BuildProperties, step: &PipelineStep) -> bool {
    if !step.run_if.evaluate(props) {
        return false;
    }

    match step.action {
        StepAction::Shell(render) => !render(props).is_skip(),
        _ => true,
    }
}

/// Whether a finished step's result is hidden from status displays
pub fn is_hidden(result: StepResult, step: &PipelineStep) -> bool {
    match step.hide {
        HideWhen::Never => false,
        HideWhen::Skipped => result == StepResult::Skipped,
        HideWhen::UnlessSuccessOrSkipped => {
            matches!(result, StepResult::Success | StepResult::Skipped)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{collect_command, make_command, zfs_command};

    fn props(pairs: &[(&str, &str)]) -> BuildProperties {
        BuildProperties::from_pairs(pairs.iter().copied()).unwrap()
    }

    fn zfs_step() -> PipelineStep {
        PipelineStep::new("build zfs", StepAction::Shell(zfs_command)).run_if(
            RunCondition::PropertyIs {
                key: "buildzfs",
                value: "yes",
            },
        )
    }

    #[test]
    fn test_zfs_step_runs_only_for_exact_yes() {
        assert!(should_run(&props(&[("buildzfs", "yes")]), &zfs_step()));
        for value in ["no", "YES", "true", ""] {
            assert!(!should_run(&props(&[("buildzfs", value)]), &zfs_step()));
        }
        assert!(!should_run(&props(&[]), &zfs_step()));
    }

    #[test]
    fn test_property_in_condition() {
        let condition = RunCondition::PropertyIn {
            key: "buildstyle",
            values: &["rpm", "deb"],
        };
        assert!(condition.evaluate(&props(&[("buildstyle", "rpm")])));
        assert!(condition.evaluate(&props(&[("buildstyle", "deb")])));
        assert!(!condition.evaluate(&props(&[("buildstyle", "srpm")])));
        assert!(!condition.evaluate(&props(&[])));
    }

    #[test]
    fn test_skip_command_suppresses_step_without_condition() {
        let collect = PipelineStep::new("collect", StepAction::Shell(collect_command));
        assert!(!should_run(&props(&[("buildstyle", "srpm")]), &collect));

        let make = PipelineStep::new("make", StepAction::Shell(make_command));
        assert!(should_run(&props(&[]), &make));
    }

    #[test]
    fn test_visibility_policies() {
        let hide_skipped = zfs_step().hide(HideWhen::Skipped);
        assert!(is_hidden(StepResult::Skipped, &hide_skipped));
        assert!(!is_hidden(StepResult::Success, &hide_skipped));
        assert!(!is_hidden(StepResult::Failure, &hide_skipped));

        let hide_ok = zfs_step().hide(HideWhen::UnlessSuccessOrSkipped);
        assert!(is_hidden(StepResult::Success, &hide_ok));
        assert!(is_hidden(StepResult::Skipped, &hide_ok));
        assert!(!is_hidden(StepResult::Warnings, &hide_ok));
        assert!(!is_hidden(StepResult::Failure, &hide_ok));

        assert!(!is_hidden(StepResult::Skipped, &zfs_step()));
    }
}
