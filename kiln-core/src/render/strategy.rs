//! Per-style command strategies
//!
//! Each build style contributes configure flags, a make target, and the
//! commands that gather packages and index them. Styles that build no
//! packages skip the gathering steps; styles that do fail them when a
//! property the command needs is unusable.

use crate::domain::properties::BuildProperties;
use crate::domain::step::StepCommand;
use crate::domain::style::BuildStyle;
use crate::render::{DELIVERABLES_DIR, REPO_DESCRIPTOR, shell_quote};
use crate::router::{self, ArtifactLocation};

pub trait StyleStrategy: Send + Sync {
    fn configure_args(&self, props: &BuildProperties) -> Vec<String>;

    fn make_target(&self) -> Option<&'static str>;

    /// Whether the style leaves packages in the deliverables directory
    fn collects(&self) -> bool {
        false
    }

    fn collect_command(&self, _props: &BuildProperties) -> StepCommand {
        StepCommand::Skip
    }

    fn repo_command(&self, _props: &BuildProperties) -> StepCommand {
        StepCommand::Skip
    }
}

impl BuildStyle {
    pub fn strategy(self) -> &'static dyn StyleStrategy {
        match self {
            BuildStyle::Tarball => &TarballStyle,
            BuildStyle::Srpm => &SrpmStyle,
            BuildStyle::Rpm => &RpmStyle,
            BuildStyle::Deb => &DebStyle,
            BuildStyle::Default => &DefaultStyle,
        }
    }
}

struct TarballStyle;
struct SrpmStyle;
struct RpmStyle;
struct DebStyle;
struct DefaultStyle;

impl StyleStrategy for TarballStyle {
    fn configure_args(&self, _props: &BuildProperties) -> Vec<String> {
        Vec::new()
    }

    fn make_target(&self) -> Option<&'static str> {
        None
    }
}

impl StyleStrategy for DefaultStyle {
    fn configure_args(&self, _props: &BuildProperties) -> Vec<String> {
        Vec::new()
    }

    fn make_target(&self) -> Option<&'static str> {
        None
    }
}

impl StyleStrategy for SrpmStyle {
    fn configure_args(&self, _props: &BuildProperties) -> Vec<String> {
        vec!["--enable-dist".to_string()]
    }

    fn make_target(&self) -> Option<&'static str> {
        Some("srpm")
    }
}

impl StyleStrategy for RpmStyle {
    fn configure_args(&self, props: &BuildProperties) -> Vec<String> {
        package_configure_args(props)
    }

    fn make_target(&self) -> Option<&'static str> {
        Some("rpms")
    }

    fn collects(&self) -> bool {
        true
    }

    /// Source packages go to `SRPM/`, binary packages to `<arch>/kmod/`
    fn collect_command(&self, props: &BuildProperties) -> StepCommand {
        let Some(arch) = safe_token(props.arch.as_deref()) else {
            return unusable_arch(props);
        };

        let dir = DELIVERABLES_DIR;
        let script = format!(
            "mkdir -p {dir}/SRPM {dir}/{arch}/kmod && \
             mv *.src.rpm {dir}/SRPM/ && \
             mv *.rpm {dir}/{arch}/kmod/"
        );
        shell(script)
    }

    /// Indexes both subtrees and writes a yum descriptor pointing at them
    fn repo_command(&self, props: &BuildProperties) -> StepCommand {
        let Some(arch) = safe_token(props.arch.as_deref()) else {
            return unusable_arch(props);
        };
        let location = match router::repo_location(props) {
            Ok(location) => location,
            Err(e) => return StepCommand::Invalid(format!("cannot locate repository: {}", e)),
        };

        let dir = DELIVERABLES_DIR;
        let descriptor = repo_descriptor(&location, arch);
        let script = format!(
            "createrepo {dir}/SRPM && \
             createrepo {dir}/{arch}/kmod && \
             printf '%s' {} > {dir}/{REPO_DESCRIPTOR}",
            shell_quote(&descriptor)
        );
        shell(script)
    }
}

impl StyleStrategy for DebStyle {
    fn configure_args(&self, props: &BuildProperties) -> Vec<String> {
        package_configure_args(props)
    }

    fn make_target(&self) -> Option<&'static str> {
        Some("debs")
    }

    fn collects(&self) -> bool {
        true
    }

    /// Every `.deb` in the tree, flattened into one directory
    fn collect_command(&self, _props: &BuildProperties) -> StepCommand {
        let dir = DELIVERABLES_DIR;
        shell(format!(
            "mkdir -p {dir} && \
             find . -path ./{dir} -prune -o -name '*.deb' -exec mv {{}} {dir}/ \\;"
        ))
    }
}

fn package_configure_args(props: &BuildProperties) -> Vec<String> {
    let zfs = if props.withzfs.is_yes() {
        "--with-zfs"
    } else {
        "--without-zfs"
    };
    let ldiskfs = if props.withldiskfs.is_yes() {
        "--enable-ldiskfs"
    } else {
        "--disable-ldiskfs"
    };
    vec![zfs.to_string(), ldiskfs.to_string()]
}

/// Yum repository descriptor for the binary and source subtrees
pub fn repo_descriptor(location: &ArtifactLocation, arch: &str) -> String {
    let url = location.url();
    let suffix = location.suffix.trim_end_matches('/');
    format!(
        "[kiln-kmod]\n\
         name=Kernel module packages {suffix}\n\
         baseurl={url}{arch}/kmod/\n\
         enabled=1\n\
         gpgcheck=0\n\
         \n\
         [kiln-srpm]\n\
         name=Source packages {suffix}\n\
         baseurl={url}SRPM/\n\
         enabled=1\n\
         gpgcheck=0\n"
    )
}

fn shell(script: String) -> StepCommand {
    StepCommand::Run(vec!["sh".to_string(), "-c".to_string(), script])
}

fn unusable_arch(props: &BuildProperties) -> StepCommand {
    match props.arch.as_deref() {
        None | Some("") => StepCommand::Invalid("arch is not set".to_string()),
        Some(arch) => StepCommand::Invalid(format!("arch {:?} is not a plain path segment", arch)),
    }
}

/// Accepts values usable unquoted in a shell path
fn safe_token(value: Option<&str>) -> Option<&str> {
    value.filter(|v| {
        !v.is_empty()
            && v.chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
            && *v != "."
            && *v != ".."
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{collect_command, repo_command};

    fn scenario_a() -> BuildProperties {
        BuildProperties::from_pairs([
            ("buildstyle", "rpm"),
            ("withzfs", "yes"),
            ("withldiskfs", "yes"),
            ("arch", "x86_64"),
            ("distro", "el7"),
            ("distrover", "7"),
            ("category", "patchset"),
            ("change", "123"),
            ("patchset", "4"),
            ("tarball", "lustre-2.10.tar.gz"),
            ("bbmaster", "build.example.org"),
        ])
        .unwrap()
    }

    #[test]
    fn test_rpm_collect_segregates_packages() {
        let cmd = collect_command(&scenario_a());
        let script = &cmd.args()[2];
        assert!(script.contains("mkdir -p deliverables/SRPM deliverables/x86_64/kmod"));
        assert!(script.contains("mv *.src.rpm deliverables/SRPM/"));
        assert!(script.contains("mv *.rpm deliverables/x86_64/kmod/"));
        // source packages must move before the binary glob picks them up
        assert!(script.find("*.src.rpm").unwrap() < script.find("mv *.rpm").unwrap());
    }

    #[test]
    fn test_rpm_repo_indexes_both_subtrees() {
        let cmd = repo_command(&scenario_a());
        let script = &cmd.args()[2];
        assert_eq!(script.matches("createrepo").count(), 2);
        assert!(script.contains("createrepo deliverables/SRPM"));
        assert!(script.contains("createrepo deliverables/x86_64/kmod"));
        assert!(script.contains(
            "baseurl=http://build.example.org/buildproducts/123/4/el7/7/x86_64/kmod/"
        ));
        assert!(script.contains("baseurl=http://build.example.org/buildproducts/123/4/el7/7/SRPM/"));
        assert!(script.ends_with("> deliverables/kiln.repo"));
    }

    #[test]
    fn test_rpm_repo_is_invalid_when_unroutable() {
        let mut props = scenario_a();
        props.distro = None;
        assert!(matches!(repo_command(&props), StepCommand::Invalid(_)));
    }

    #[test]
    fn test_rpm_commands_are_invalid_without_usable_arch() {
        let mut props = scenario_a();
        props.arch = Some("x86_64; rm -rf /".to_string());
        assert!(matches!(collect_command(&props), StepCommand::Invalid(_)));
        assert!(matches!(repo_command(&props), StepCommand::Invalid(_)));

        props.arch = None;
        assert_eq!(
            collect_command(&props),
            StepCommand::Invalid("arch is not set".to_string())
        );
    }

    #[test]
    fn test_deb_collect_flattens_and_repo_skips() {
        let props = BuildProperties::from_pairs([("buildstyle", "deb")]).unwrap();

        let cmd = collect_command(&props);
        assert_eq!(cmd.args()[0], "sh");
        let script = &cmd.args()[2];
        assert!(script.contains("-name '*.deb' -exec mv {} deliverables/ \\;"));
        assert!(script.contains("-path ./deliverables -prune"));

        assert!(repo_command(&props).is_skip());
    }

    #[test]
    fn test_other_styles_collect_nothing() {
        for style in [BuildStyle::Srpm, BuildStyle::Tarball, BuildStyle::Default] {
            let mut props = scenario_a();
            props.buildstyle = style;
            assert!(collect_command(&props).is_skip());
            assert!(repo_command(&props).is_skip());
            assert!(!style.strategy().collects());
        }
        assert!(BuildStyle::Rpm.strategy().collects());
        assert!(BuildStyle::Deb.strategy().collects());
    }
}
