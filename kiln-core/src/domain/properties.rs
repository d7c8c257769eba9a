//! Build properties
//!
//! The configuration of a single run. A triggering event creates the record,
//! steps extend it (the discovered tarball name, the derived category) and the
//! fan-out trigger copies an allow-listed subset into downstream runs.
//!
//! Known properties are typed fields. Anything else is kept verbatim in
//! `extra` so the string-keyed `get`/`set` interface stays lossless.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::category::ArtifactCategory;
use crate::domain::style::BuildStyle;
use crate::error::{CoreError, Result};

/// Property names with a typed field
pub const KNOWN_KEYS: &[&str] = &[
    "scheduler",
    "category",
    "change",
    "patchset",
    "branch",
    "revision",
    "buildstyle",
    "distro",
    "distrover",
    "arch",
    "withzfs",
    "withldiskfs",
    "buildzfs",
    "installdeps",
    "spltag",
    "zfstag",
    "jobs",
    "bburl",
    "bbmaster",
    "tarball",
];

/// Tri-state boolean property
///
/// Only the exact string `"yes"` is truthy. An absent property is `Unset`,
/// which behaves like `No` everywhere a decision is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Flag {
    Yes,
    No,
    #[default]
    Unset,
}

impl Flag {
    pub fn parse(value: &str) -> Self {
        if value == "yes" { Flag::Yes } else { Flag::No }
    }

    pub fn is_yes(self) -> bool {
        self == Flag::Yes
    }

    pub fn as_str(self) -> Option<&'static str> {
        match self {
            Flag::Yes => Some("yes"),
            Flag::No => Some("no"),
            Flag::Unset => None,
        }
    }
}

/// Typed per-run property record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildProperties {
    /// Name of the scheduler that started the run
    pub scheduler: Option<String>,
    pub category: Option<ArtifactCategory>,
    /// Review change number
    pub change: Option<u64>,
    pub patchset: Option<u32>,
    /// Branch or tag ref (`refs/tags/<tag>` for tag runs)
    pub branch: Option<String>,
    pub revision: Option<String>,
    pub buildstyle: BuildStyle,
    pub distro: Option<String>,
    pub distrover: Option<String>,
    pub arch: Option<String>,
    pub withzfs: Flag,
    pub withldiskfs: Flag,
    pub buildzfs: Flag,
    pub installdeps: Flag,
    pub spltag: Option<String>,
    pub zfstag: Option<String>,
    /// Parallel make jobs
    pub jobs: Option<u32>,
    /// Base URL of the remote helper scripts (ends with `/`)
    pub bburl: Option<String>,
    /// Host serving the artifact store
    pub bbmaster: Option<String>,
    /// File name of the source tarball produced by the tarball pipeline
    pub tarball: Option<String>,
    /// Properties without a typed field
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl BuildProperties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a property record from the string pairs of a triggering event
    ///
    /// Rejects unparseable values (unknown build style, non-numeric change).
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut props = Self::new();
        for (key, value) in pairs {
            props.set(key.as_ref(), value.as_ref())?;
        }
        Ok(props)
    }

    /// Sets a property from its string form
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let text = || Some(value.to_string());
        match key {
            "scheduler" => self.scheduler = text(),
            "category" => self.category = Some(value.parse()?),
            "change" => self.change = Some(parse_number(key, value)?),
            "patchset" => self.patchset = Some(parse_number(key, value)?),
            "branch" => self.branch = text(),
            "revision" => self.revision = text(),
            "buildstyle" => self.buildstyle = value.parse()?,
            "distro" => self.distro = text(),
            "distrover" => self.distrover = text(),
            "arch" => self.arch = text(),
            "withzfs" => self.withzfs = Flag::parse(value),
            "withldiskfs" => self.withldiskfs = Flag::parse(value),
            "buildzfs" => self.buildzfs = Flag::parse(value),
            "installdeps" => self.installdeps = Flag::parse(value),
            "spltag" => self.spltag = text(),
            "zfstag" => self.zfstag = text(),
            "jobs" => self.jobs = Some(parse_number(key, value)?),
            "bburl" => self.bburl = text(),
            "bbmaster" => self.bbmaster = text(),
            "tarball" => self.tarball = text(),
            _ => {
                self.extra.insert(key.to_string(), value.to_string());
            }
        }
        Ok(())
    }

    /// Reads a property in its string form; `None` when unset
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "scheduler" => self.scheduler.clone(),
            "category" => self.category.map(|c| c.as_str().to_string()),
            "change" => self.change.map(|n| n.to_string()),
            "patchset" => self.patchset.map(|n| n.to_string()),
            "branch" => self.branch.clone(),
            "revision" => self.revision.clone(),
            "buildstyle" => Some(self.buildstyle.as_str().to_string()),
            "distro" => self.distro.clone(),
            "distrover" => self.distrover.clone(),
            "arch" => self.arch.clone(),
            "withzfs" => self.withzfs.as_str().map(str::to_string),
            "withldiskfs" => self.withldiskfs.as_str().map(str::to_string),
            "buildzfs" => self.buildzfs.as_str().map(str::to_string),
            "installdeps" => self.installdeps.as_str().map(str::to_string),
            "spltag" => self.spltag.clone(),
            "zfstag" => self.zfstag.clone(),
            "jobs" => self.jobs.map(|n| n.to_string()),
            "bburl" => self.bburl.clone(),
            "bbmaster" => self.bbmaster.clone(),
            "tarball" => self.tarball.clone(),
            _ => self.extra.get(key).cloned(),
        }
    }

    /// Sets a property only when it is currently unset
    pub fn set_default(&mut self, key: &str, value: &str) -> Result<()> {
        if self.get(key).is_none() {
            self.set(key, value)?;
        }
        Ok(())
    }

    /// Returns every set property as string pairs
    pub fn to_pairs(&self) -> BTreeMap<String, String> {
        let mut pairs: BTreeMap<String, String> = KNOWN_KEYS
            .iter()
            .filter_map(|key| self.get(key).map(|value| (key.to_string(), value)))
            .collect();
        pairs.extend(self.extra.clone());
        pairs
    }

    /// Returns the artifact category, deriving it from the scheduler when needed
    pub fn resolve_category(&self) -> Result<ArtifactCategory> {
        match (&self.category, &self.scheduler) {
            (Some(category), _) => Ok(*category),
            (None, Some(scheduler)) => ArtifactCategory::from_scheduler(scheduler),
            (None, None) => Err(CoreError::missing("scheduler")),
        }
    }

    /// Checks the record before a run starts
    ///
    /// Style values are already checked by `set`; this rejects runs whose
    /// artifact category cannot be determined, so a misnamed scheduler fails
    /// before any step executes instead of producing a collapsed store path.
    pub fn validate(&self) -> Result<()> {
        self.resolve_category().map(|_| ())
    }

    /// The tag name of a tag run (`refs/tags/` prefix stripped)
    pub fn tag(&self) -> Option<&str> {
        self.branch
            .as_deref()
            .map(|branch| branch.strip_prefix("refs/tags/").unwrap_or(branch))
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| CoreError::invalid(key, value))
}
