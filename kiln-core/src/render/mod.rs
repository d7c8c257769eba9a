//! Command rendering
//!
//! Pure functions mapping a run's properties to the argument vector of a
//! step. Rendering never panics: a missing optional property drops the flag
//! it would have produced, a step with nothing to do renders as
//! `StepCommand::Skip`, and a missing required one renders as
//! `StepCommand::Invalid`.
//!
//! Style-dependent arguments come from the style's strategy (see
//! [`strategy::StyleStrategy`]).

pub mod strategy;

use crate::domain::properties::BuildProperties;
use crate::domain::step::StepCommand;

pub use strategy::StyleStrategy;

/// Directory the collect step gathers packages into
pub const DELIVERABLES_DIR: &str = "deliverables";

/// Repository descriptor written by the repository-metadata step
pub const REPO_DESCRIPTOR: &str = "kiln.repo";

pub const DEFAULT_MAKE_JOBS: u32 = 4;

const DEPENDENCY_SCRIPT: &str = "bb-dependencies.sh";
const ZFS_SCRIPT: &str = "bb-build-zfs-pkg.sh";

/// Installs build dependencies through the remote helper script
pub fn dependency_command(props: &BuildProperties) -> StepCommand {
    StepCommand::Run(vec![
        "runurl".to_string(),
        remote_script(props, DEPENDENCY_SCRIPT),
    ])
}

/// Builds the spl and zfs kernel modules, optionally at specific tags
pub fn zfs_command(props: &BuildProperties) -> StepCommand {
    let mut args = vec!["runurl".to_string(), remote_script(props, ZFS_SCRIPT)];

    if let Some(spltag) = non_empty(props.spltag.as_deref()) {
        args.extend(["-s".to_string(), spltag.to_string()]);
    }

    if let Some(zfstag) = non_empty(props.zfstag.as_deref()) {
        args.extend(["-z".to_string(), zfstag.to_string()]);
    }

    StepCommand::Run(args)
}

pub fn configure_command(props: &BuildProperties) -> StepCommand {
    let mut args = vec!["./configure".to_string()];
    args.extend(props.buildstyle.strategy().configure_args(props));
    StepCommand::Run(args)
}

/// Parallel make with the style's target
pub fn make_command(props: &BuildProperties) -> StepCommand {
    let jobs = props.jobs.unwrap_or(DEFAULT_MAKE_JOBS).max(1);
    let mut args = vec!["make".to_string(), format!("-j{}", jobs)];
    if let Some(target) = props.buildstyle.strategy().make_target() {
        args.push(target.to_string());
    }
    StepCommand::Run(args)
}

pub fn collect_command(props: &BuildProperties) -> StepCommand {
    props.buildstyle.strategy().collect_command(props)
}

pub fn repo_command(props: &BuildProperties) -> StepCommand {
    props.buildstyle.strategy().repo_command(props)
}

/// Whether the run must leave packages to upload
pub fn deliverables_expected(props: &BuildProperties) -> bool {
    props.buildstyle.strategy().collects()
}

pub fn autogen_command(_props: &BuildProperties) -> StepCommand {
    StepCommand::Run(vec!["sh".to_string(), "./autogen.sh".to_string()])
}

pub fn dist_configure_command(_props: &BuildProperties) -> StepCommand {
    StepCommand::Run(vec![
        "./configure".to_string(),
        "--enable-dist".to_string(),
    ])
}

pub fn dist_command(_props: &BuildProperties) -> StepCommand {
    StepCommand::Run(vec!["make".to_string(), "dist".to_string()])
}

/// Unpacks the downloaded tarball into the working directory
pub fn extract_command(props: &BuildProperties) -> StepCommand {
    match tarball_file(props) {
        Some(tarball) => StepCommand::Run(vec![
            "tar".to_string(),
            "--strip-components=1".to_string(),
            "-xzf".to_string(),
            tarball,
        ]),
        None => StepCommand::Skip,
    }
}

/// The tarball's file name in the working directory
pub fn tarball_file(props: &BuildProperties) -> Option<String> {
    non_empty(props.tarball.as_deref()).map(str::to_string)
}

fn remote_script(props: &BuildProperties, script: &str) -> String {
    format!("{}{}", props.bburl.as_deref().unwrap_or_default(), script)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// Quotes a string for `sh -c`
pub(crate) fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r#"'\''"#))
}
