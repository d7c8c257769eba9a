//! Pipeline templates
//!
//! Composes steps into the two pipeline shapes. Templates are built once at
//! configuration time and shared read-only by every run.
//!
//! Tarball pipeline:
//! classify -> fetch source -> autogen -> configure -> make dist ->
//! find tarball -> upload tarball -> trigger package builders
//!
//! Package pipeline:
//! download tarball -> extract -> install dependencies -> build zfs ->
//! configure -> make -> collect packages -> build repository ->
//! upload packages -> cleanup

use std::sync::Arc;
use std::time::Duration;

use crate::domain::pipeline::{Pipeline, PipelineKind};
use crate::domain::step::{
    ExitCodeMap, FetchMode, FetchSpec, HideWhen, PipelineStep, RetryPolicy, RunCondition,
    StepAction, TriggerSpec,
};
use crate::domain::target::TargetEnvironment;
use crate::render::{self, DELIVERABLES_DIR};
use crate::router;

/// Worker-side build directory, removed by the package pipeline's cleanup
pub const BUILD_DIR: &str = "build";

/// Where the source tree is materialized
pub const SOURCE_DIR: &str = "build/source";

pub const FETCH_TIMEOUT: Duration = Duration::from_secs(3600);

pub const FETCH_RETRY: RetryPolicy = RetryPolicy {
    retries: 2,
    backoff: Duration::from_secs(60),
};

/// Glob matching the tarball `make dist` produces
pub const TARBALL_PATTERN: &str = "*.tar.gz";

/// Inputs needed to instantiate the templates
#[derive(Debug, Clone)]
pub struct TemplateConfig {
    pub repo_url: String,
    /// Package builders started after each tarball upload
    pub targets: Vec<TargetEnvironment>,
}

/// Builds the tarball-producer pipeline
pub fn tarball_pipeline(config: &TemplateConfig) -> Pipeline {
    let steps = vec![
        PipelineStep::new("classify", StepAction::ClassifyCategory)
            .description("classifying build category")
            .hide(HideWhen::UnlessSuccessOrSkipped)
            .halt_on_failure(),
        PipelineStep::new(
            "fetch source",
            StepAction::FetchSource(FetchSpec {
                repo_url: config.repo_url.clone(),
                mode: FetchMode::Fresh,
                retry: FETCH_RETRY,
            }),
        )
        .description("cloning")
        .workdir(SOURCE_DIR)
        .timeout(FETCH_TIMEOUT)
        .halt_on_failure(),
        PipelineStep::new("autogen", StepAction::Shell(render::autogen_command))
            .workdir(SOURCE_DIR)
            .halt_on_failure(),
        PipelineStep::new("configure", StepAction::Shell(render::dist_configure_command))
            .description("configuring for dist")
            .workdir(SOURCE_DIR)
            .halt_on_failure(),
        PipelineStep::new("make dist", StepAction::Shell(render::dist_command))
            .description("making dist")
            .workdir(SOURCE_DIR)
            .halt_on_failure(),
        PipelineStep::new(
            "find tarball",
            StepAction::SetPropertyFromGlob {
                pattern: TARBALL_PATTERN,
                property: "tarball",
            },
        )
        .workdir(SOURCE_DIR)
        .hide(HideWhen::UnlessSuccessOrSkipped)
        .halt_on_failure(),
        PipelineStep::new(
            "upload tarball",
            StepAction::UploadFile {
                source: render::tarball_file,
                destination: router::tarball_location,
            },
        )
        .description("uploading tarball")
        .workdir(SOURCE_DIR)
        .halt_on_failure(),
        PipelineStep::new(
            "trigger packages",
            StepAction::Trigger(TriggerSpec {
                targets: config.targets.clone(),
            }),
        )
        .description("starting package builders"),
    ];

    Pipeline::new(PipelineKind::Tarball, steps)
}

/// Builds the package-builder pipeline
pub fn package_pipeline() -> Pipeline {
    let steps = vec![
        PipelineStep::new(
            "download tarball",
            StepAction::DownloadFile {
                source: router::tarball_location,
                destination: render::tarball_file,
            },
        )
        .workdir(SOURCE_DIR)
        .halt_on_failure(),
        PipelineStep::new("extract", StepAction::Shell(render::extract_command))
            .description("extracting tarball")
            .workdir(SOURCE_DIR)
            .halt_on_failure(),
        PipelineStep::new(
            "install dependencies",
            StepAction::Shell(render::dependency_command),
        )
        .run_if(RunCondition::PropertyIs {
            key: "installdeps",
            value: "yes",
        })
        .decode(ExitCodeMap::helper_scripts())
        .hide(HideWhen::Skipped)
        .halt_on_failure(),
        PipelineStep::new("build zfs", StepAction::Shell(render::zfs_command))
            .description("building spl and zfs")
            .run_if(RunCondition::PropertyIs {
                key: "buildzfs",
                value: "yes",
            })
            .decode(ExitCodeMap::helper_scripts())
            .hide(HideWhen::Skipped)
            .halt_on_failure(),
        PipelineStep::new("configure", StepAction::Shell(render::configure_command))
            .workdir(SOURCE_DIR)
            .halt_on_failure(),
        PipelineStep::new("make", StepAction::Shell(render::make_command))
            .description("building packages")
            .workdir(SOURCE_DIR)
            .decode(ExitCodeMap::helper_scripts())
            .hide(HideWhen::Skipped)
            .halt_on_failure(),
        PipelineStep::new(
            "collect packages",
            StepAction::Shell(render::collect_command),
        )
        .run_if(RunCondition::PropertyIn {
            key: "buildstyle",
            values: &["rpm", "deb"],
        })
        .workdir(SOURCE_DIR)
        .hide(HideWhen::Skipped)
        .halt_on_failure(),
        PipelineStep::new("build repository", StepAction::Shell(render::repo_command))
            .run_if(RunCondition::PropertyIs {
                key: "buildstyle",
                value: "rpm",
            })
            .workdir(SOURCE_DIR)
            .hide(HideWhen::Skipped)
            .halt_on_failure(),
        PipelineStep::new(
            "upload packages",
            StepAction::UploadDirectory {
                source: DELIVERABLES_DIR,
                destination: router::repo_location,
                required: render::deliverables_expected,
            },
        )
        .workdir(SOURCE_DIR)
        .halt_on_failure(),
        PipelineStep::new("cleanup", StepAction::RemoveDirectory { path: BUILD_DIR })
            .description("removing build directory")
            .workdir(".")
            .always_run(),
    ];

    Pipeline::new(PipelineKind::Package, steps)
}

/// Both templates, instantiated once
#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    tarball: Arc<Pipeline>,
    package: Arc<Pipeline>,
}

impl TemplateRegistry {
    pub fn new(config: &TemplateConfig) -> Self {
        Self {
            tarball: Arc::new(tarball_pipeline(config)),
            package: Arc::new(package_pipeline()),
        }
    }

    pub fn get(&self, kind: PipelineKind) -> Arc<Pipeline> {
        match kind {
            PipelineKind::Tarball => Arc::clone(&self.tarball),
            PipelineKind::Package => Arc::clone(&self.package),
        }
    }

    pub fn all(&self) -> [Arc<Pipeline>; 2] {
        [Arc::clone(&self.tarball), Arc::clone(&self.package)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::should_run;
    use crate::domain::properties::BuildProperties;

    fn config() -> TemplateConfig {
        TemplateConfig {
            repo_url: "https://git.example.org/fs/lustre-release".to_string(),
            targets: TargetEnvironment::default_targets(),
        }
    }

    fn names(pipeline: &Pipeline) -> Vec<&str> {
        pipeline.steps.iter().map(|s| s.name.as_str()).collect()
    }

    fn running_steps<'a>(pipeline: &'a Pipeline, props: &BuildProperties) -> Vec<&'a str> {
        pipeline
            .steps
            .iter()
            .filter(|step| should_run(props, step))
            .map(|step| step.name.as_str())
            .collect()
    }

    #[test]
    fn test_tarball_pipeline_shape() {
        let pipeline = tarball_pipeline(&config());
        assert_eq!(
            names(&pipeline),
            vec![
                "classify",
                "fetch source",
                "autogen",
                "configure",
                "make dist",
                "find tarball",
                "upload tarball",
                "trigger packages"
            ]
        );
    }

    #[test]
    fn test_fetch_retries_twice_with_backoff() {
        let pipeline = tarball_pipeline(&config());
        let fetch = pipeline.step("fetch source").unwrap();
        assert!(fetch.halt_on_failure);
        assert_eq!(fetch.timeout, Duration::from_secs(3600));
        match &fetch.action {
            StepAction::FetchSource(spec) => {
                assert_eq!(spec.retry.retries, 2);
                assert_eq!(spec.retry.backoff, Duration::from_secs(60));
                assert_eq!(spec.mode, FetchMode::Fresh);
            }
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn test_trigger_is_last_step() {
        let pipeline = tarball_pipeline(&config());
        let last = pipeline.steps.last().unwrap();
        match &last.action {
            StepAction::Trigger(spec) => assert_eq!(spec.targets.len(), 2),
            other => panic!("unexpected action {:?}", other),
        }

        let upload = pipeline
            .steps
            .iter()
            .position(|s| s.name == "upload tarball")
            .unwrap();
        assert_eq!(upload + 1, pipeline.steps.len() - 1);
    }

    #[test]
    fn test_package_pipeline_shape_and_cleanup() {
        let pipeline = package_pipeline();
        assert_eq!(
            names(&pipeline),
            vec![
                "download tarball",
                "extract",
                "install dependencies",
                "build zfs",
                "configure",
                "make",
                "collect packages",
                "build repository",
                "upload packages",
                "cleanup"
            ]
        );

        let cleanup = pipeline.steps.last().unwrap();
        assert!(cleanup.always_run);
        assert!(pipeline.steps[..pipeline.steps.len() - 1]
            .iter()
            .all(|s| !s.always_run));
    }

    #[test]
    fn test_rpm_run_executes_every_step() {
        let props = BuildProperties::from_pairs([
            ("buildstyle", "rpm"),
            ("withzfs", "yes"),
            ("withldiskfs", "yes"),
            ("buildzfs", "yes"),
            ("installdeps", "yes"),
            ("arch", "x86_64"),
            ("distro", "el7"),
            ("distrover", "7"),
            ("category", "patchset"),
            ("change", "123"),
            ("patchset", "4"),
            ("tarball", "lustre-2.10.tar.gz"),
            ("bbmaster", "build.example.org"),
        ])
        .unwrap();

        let pipeline = package_pipeline();
        assert_eq!(running_steps(&pipeline, &props), names(&pipeline));
    }

    #[test]
    fn test_deb_run_skips_zfs_and_repository() {
        let props = BuildProperties::from_pairs([("buildstyle", "deb")]).unwrap();

        let pipeline = package_pipeline();
        let running = running_steps(&pipeline, &props);
        assert!(!running.contains(&"build zfs"));
        assert!(!running.contains(&"install dependencies"));
        assert!(!running.contains(&"build repository"));
        assert!(running.contains(&"collect packages"));
        assert!(running.contains(&"upload packages"));
        assert!(running.contains(&"cleanup"));
    }

    #[test]
    fn test_registry_shares_templates() {
        let registry = TemplateRegistry::new(&config());
        let a = registry.get(PipelineKind::Package);
        let b = registry.get(PipelineKind::Package);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.get(PipelineKind::Tarball).kind, PipelineKind::Tarball);
    }
}
