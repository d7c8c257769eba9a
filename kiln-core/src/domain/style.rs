//! Build style
//!
//! The packaging format a run produces. Every style-dependent command is
//! obtained through the style's strategy (see `render::strategy`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Packaging format produced by a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStyle {
    Tarball,
    Srpm,
    Rpm,
    Deb,
    #[default]
    Default,
}

impl BuildStyle {
    pub const ALL: [BuildStyle; 5] = [
        BuildStyle::Tarball,
        BuildStyle::Srpm,
        BuildStyle::Rpm,
        BuildStyle::Deb,
        BuildStyle::Default,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStyle::Tarball => "tarball",
            BuildStyle::Srpm => "srpm",
            BuildStyle::Rpm => "rpm",
            BuildStyle::Deb => "deb",
            BuildStyle::Default => "default",
        }
    }
}

impl FromStr for BuildStyle {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BuildStyle::ALL
            .into_iter()
            .find(|style| style.as_str() == s)
            .ok_or_else(|| CoreError::UnknownStyle(s.to_string()))
    }
}

impl fmt::Display for BuildStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_styles() {
        assert_eq!("rpm".parse::<BuildStyle>(), Ok(BuildStyle::Rpm));
        assert_eq!("deb".parse::<BuildStyle>(), Ok(BuildStyle::Deb));
        assert_eq!("srpm".parse::<BuildStyle>(), Ok(BuildStyle::Srpm));
        assert_eq!("tarball".parse::<BuildStyle>(), Ok(BuildStyle::Tarball));
        assert_eq!("default".parse::<BuildStyle>(), Ok(BuildStyle::Default));
    }

    #[test]
    fn test_parse_is_case_sensitive() {
        assert_eq!(
            "RPM".parse::<BuildStyle>(),
            Err(CoreError::UnknownStyle("RPM".to_string()))
        );
    }
}
