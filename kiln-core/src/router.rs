//! Artifact routing
//!
//! Pure functions computing where artifacts live in the shared store and the
//! public URL that mirrors each location. Layout:
//!
//! ```text
//! buildproducts/
//!   <change>/<patchset>/<tarball>
//!   <change>/<patchset>/<distro>/<distrover>/...
//!   tags/<tag>/<tarball>
//!   tags/<tag>/<distro>/<distrover>/...
//! ```
//!
//! A location is a single relative suffix; the store path and the URL are both
//! derived from it, so they can only ever differ in their root. Concurrent
//! package builders write below distinct `<distro>/<distrover>` suffixes.

use serde::{Deserialize, Serialize};

use crate::domain::category::ArtifactCategory;
use crate::domain::properties::BuildProperties;
use crate::error::{CoreError, Result};

/// Top-level directory of the artifact store, also the URL path prefix
pub const STORE_ROOT: &str = "buildproducts";

/// A file or directory in the artifact store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactLocation {
    /// Path below the store root; directories end with `/`
    pub suffix: String,
    /// Scheme and host serving the store, e.g. `http://build.example.org`
    pub public_base: String,
}

impl ArtifactLocation {
    /// Store path, e.g. `buildproducts/123/4/lustre-2.10.tar.gz`
    pub fn path(&self) -> String {
        format!("{}/{}", STORE_ROOT, self.suffix)
    }

    /// Public URL mirroring `path()`
    pub fn url(&self) -> String {
        format!("{}/{}/{}", self.public_base, STORE_ROOT, self.suffix)
    }

    pub fn is_directory(&self) -> bool {
        self.suffix.ends_with('/')
    }
}

/// Normalizes the store host property into a URL base
///
/// A bare host gets `http://`; a value that already carries a scheme is kept.
pub fn public_base(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.contains("://") {
        host.to_string()
    } else {
        format!("http://{}", host)
    }
}

/// The per-change directory: `<change>/<patchset>/` or `tags/<tag>/`
pub fn change_dir(props: &BuildProperties) -> Result<String> {
    match props.resolve_category()? {
        ArtifactCategory::Patchset => {
            let change = props.change.ok_or_else(|| CoreError::missing("change"))?;
            let patchset = props
                .patchset
                .ok_or_else(|| CoreError::missing("patchset"))?;
            Ok(format!("{}/{}/", change, patchset))
        }
        ArtifactCategory::Tag => {
            let tag = props.tag().ok_or_else(|| CoreError::missing("branch"))?;
            check_path(tag)?;
            Ok(format!("tags/{}/", tag))
        }
    }
}

/// Location of the source tarball: `<change-dir><tarball>`
pub fn tarball_location(props: &BuildProperties) -> Result<ArtifactLocation> {
    let tarball = props
        .tarball
        .as_deref()
        .ok_or_else(|| CoreError::missing("tarball"))?;
    check_segment(tarball)?;

    Ok(ArtifactLocation {
        suffix: format!("{}{}", change_dir(props)?, tarball),
        public_base: store_base(props)?,
    })
}

/// Location of a target's package repository: `<change-dir><distro>/<distrover>/`
pub fn repo_location(props: &BuildProperties) -> Result<ArtifactLocation> {
    let distro = required(props.distro.as_deref(), "distro")?;
    let distrover = required(props.distrover.as_deref(), "distrover")?;

    Ok(ArtifactLocation {
        suffix: format!("{}{}/{}/", change_dir(props)?, distro, distrover),
        public_base: store_base(props)?,
    })
}

fn store_base(props: &BuildProperties) -> Result<String> {
    props
        .bbmaster
        .as_deref()
        .map(public_base)
        .ok_or_else(|| CoreError::missing("bbmaster"))
}

fn required<'a>(value: Option<&'a str>, key: &str) -> Result<&'a str> {
    let value = value.ok_or_else(|| CoreError::missing(key))?;
    check_segment(value)?;
    Ok(value)
}

/// Rejects values that would leave, or collapse into, their parent directory
fn check_segment(segment: &str) -> Result<()> {
    if segment.is_empty()
        || segment == "."
        || segment == ".."
        || segment.contains('/')
        || segment.contains('\\')
    {
        return Err(CoreError::UnsafeSegment(segment.to_string()));
    }
    Ok(())
}

fn check_path(path: &str) -> Result<()> {
    path.split('/')
        .try_for_each(check_segment)
        .map_err(|_| CoreError::UnsafeSegment(path.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patchset_props() -> BuildProperties {
        BuildProperties::from_pairs([
            ("category", "patchset"),
            ("change", "123"),
            ("patchset", "4"),
            ("distro", "el7"),
            ("distrover", "7"),
            ("arch", "x86_64"),
            ("tarball", "lustre-2.10.tar.gz"),
            ("bbmaster", "build.example.org"),
        ])
        .unwrap()
    }

    fn tag_props() -> BuildProperties {
        BuildProperties::from_pairs([
            ("scheduler", "tag-changes"),
            ("branch", "refs/tags/2.12.0"),
            ("distro", "ubuntu"),
            ("distrover", "16.04"),
            ("tarball", "lustre-2.12.0.tar.gz"),
            ("bbmaster", "build.example.org"),
        ])
        .unwrap()
    }

    fn assert_same_suffix(location: &ArtifactLocation) {
        let from_path = location
            .path()
            .strip_prefix(&format!("{}/", STORE_ROOT))
            .unwrap()
            .to_string();
        let from_url = location
            .url()
            .strip_prefix(&format!("{}/{}/", location.public_base, STORE_ROOT))
            .unwrap()
            .to_string();
        assert_eq!(from_path, from_url);
    }

    #[test]
    fn test_patchset_tarball_location() {
        let location = tarball_location(&patchset_props()).unwrap();
        assert_eq!(location.path(), "buildproducts/123/4/lustre-2.10.tar.gz");
        assert_eq!(
            location.url(),
            "http://build.example.org/buildproducts/123/4/lustre-2.10.tar.gz"
        );
        assert!(!location.is_directory());
    }

    #[test]
    fn test_patchset_repo_location() {
        let location = repo_location(&patchset_props()).unwrap();
        assert_eq!(location.path(), "buildproducts/123/4/el7/7/");
        assert!(location.is_directory());
    }

    #[test]
    fn test_tag_change_dir_strips_ref_prefix() {
        assert_eq!(change_dir(&tag_props()).unwrap(), "tags/2.12.0/");
        assert_eq!(
            repo_location(&tag_props()).unwrap().path(),
            "buildproducts/tags/2.12.0/ubuntu/16.04/"
        );
    }

    #[test]
    fn test_path_and_url_share_suffix() {
        for props in [patchset_props(), tag_props()] {
            assert_same_suffix(&tarball_location(&props).unwrap());
            assert_same_suffix(&repo_location(&props).unwrap());
        }
    }

    #[test]
    fn test_routing_is_idempotent() {
        let props = patchset_props();
        assert_eq!(
            tarball_location(&props).unwrap(),
            tarball_location(&props).unwrap()
        );
        assert_eq!(repo_location(&props).unwrap(), repo_location(&props).unwrap());
    }

    #[test]
    fn test_unknown_scheduler_does_not_collapse_path() {
        let mut props = patchset_props();
        props.category = None;
        props.scheduler = Some("nightly".to_string());

        assert_eq!(
            tarball_location(&props),
            Err(CoreError::UnknownScheduler("nightly".to_string()))
        );
    }

    #[test]
    fn test_missing_patchset_is_an_error() {
        let mut props = patchset_props();
        props.patchset = None;
        assert_eq!(
            change_dir(&props),
            Err(CoreError::MissingProperty("patchset".to_string()))
        );
    }

    #[test]
    fn test_unsafe_segments_rejected() {
        let mut props = patchset_props();
        props.distro = Some("..".to_string());
        assert!(matches!(
            repo_location(&props),
            Err(CoreError::UnsafeSegment(_))
        ));

        let mut props = tag_props();
        props.branch = Some("refs/tags/../../etc".to_string());
        assert!(matches!(change_dir(&props), Err(CoreError::UnsafeSegment(_))));
    }

    #[test]
    fn test_public_base_keeps_scheme() {
        assert_eq!(public_base("master:8010"), "http://master:8010");
        assert_eq!(public_base("https://store.example/"), "https://store.example");
    }

    #[test]
    fn test_distinct_targets_get_disjoint_locations() {
        let el7 = repo_location(&patchset_props()).unwrap();
        let mut other = patchset_props();
        other.distro = Some("sles".to_string());
        other.distrover = Some("12".to_string());
        let sles = repo_location(&other).unwrap();

        assert!(!el7.path().starts_with(&sles.path()));
        assert!(!sles.path().starts_with(&el7.path()));
    }
}
