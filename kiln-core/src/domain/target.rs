//! Target environments
//!
//! A target environment describes one package-builder: the distribution,
//! version and architecture it builds for and the packaging style it uses.
//! The fan-out trigger starts one package-builder run per target.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::properties::Flag;
use crate::domain::style::BuildStyle;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetEnvironment {
    /// Builder name, e.g. "el7-x86_64"
    pub builder: String,
    pub distro: String,
    pub distrover: String,
    pub arch: String,
    pub buildstyle: BuildStyle,
    #[serde(default)]
    pub withzfs: Flag,
    #[serde(default)]
    pub withldiskfs: Flag,
    #[serde(default)]
    pub buildzfs: Flag,
    #[serde(default)]
    pub installdeps: Flag,
}

impl TargetEnvironment {
    /// Properties this target contributes to its package-builder run
    pub fn properties(&self) -> BTreeMap<String, String> {
        let mut props = BTreeMap::from([
            ("distro".to_string(), self.distro.clone()),
            ("distrover".to_string(), self.distrover.clone()),
            ("arch".to_string(), self.arch.clone()),
            ("buildstyle".to_string(), self.buildstyle.as_str().to_string()),
        ]);

        for (key, flag) in [
            ("withzfs", self.withzfs),
            ("withldiskfs", self.withldiskfs),
            ("buildzfs", self.buildzfs),
            ("installdeps", self.installdeps),
        ] {
            if let Some(value) = flag.as_str() {
                props.insert(key.to_string(), value.to_string());
            }
        }

        props
    }

    /// A small default matrix: one rpm and one deb builder
    pub fn default_targets() -> Vec<TargetEnvironment> {
        vec![
            TargetEnvironment {
                builder: "el7-x86_64".to_string(),
                distro: "el7".to_string(),
                distrover: "7".to_string(),
                arch: "x86_64".to_string(),
                buildstyle: BuildStyle::Rpm,
                withzfs: Flag::Yes,
                withldiskfs: Flag::Yes,
                buildzfs: Flag::Yes,
                installdeps: Flag::Yes,
            },
            TargetEnvironment {
                builder: "ubuntu1604-x86_64".to_string(),
                distro: "ubuntu".to_string(),
                distrover: "16.04".to_string(),
                arch: "x86_64".to_string(),
                buildstyle: BuildStyle::Deb,
                withzfs: Flag::No,
                withldiskfs: Flag::No,
                buildzfs: Flag::No,
                installdeps: Flag::Yes,
            },
        ]
    }
}
