//! Artifact category
//!
//! A run either builds a change under code review or a release tag. The
//! category fixes the prefix of every artifact path the run produces.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Scheduler that starts runs for review changes
pub const PATCHSET_SCHEDULER: &str = "master-patchset";

/// Scheduler that starts runs for new or moved tags
pub const TAG_SCHEDULER: &str = "tag-changes";

/// Kind of source a run was started for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactCategory {
    /// A patchset of a change under review
    Patchset,
    /// A release tag
    Tag,
}

impl ArtifactCategory {
    /// Derives the category from the name of the scheduler that started the run
    pub fn from_scheduler(scheduler: &str) -> Result<Self, CoreError> {
        match scheduler {
            PATCHSET_SCHEDULER => Ok(Self::Patchset),
            TAG_SCHEDULER => Ok(Self::Tag),
            other => Err(CoreError::UnknownScheduler(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Patchset => "patchset",
            Self::Tag => "tag",
        }
    }
}

impl FromStr for ArtifactCategory {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "patchset" => Ok(Self::Patchset),
            "tag" => Ok(Self::Tag),
            other => Err(CoreError::UnknownCategory(other.to_string())),
        }
    }
}

impl fmt::Display for ArtifactCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_from_scheduler() {
        assert_eq!(
            ArtifactCategory::from_scheduler("master-patchset"),
            Ok(ArtifactCategory::Patchset)
        );
        assert_eq!(
            ArtifactCategory::from_scheduler("tag-changes"),
            Ok(ArtifactCategory::Tag)
        );
    }

    #[test]
    fn test_unknown_scheduler_is_an_error() {
        let err = ArtifactCategory::from_scheduler("nightly").unwrap_err();
        assert_eq!(err, CoreError::UnknownScheduler("nightly".to_string()));
    }

    #[test]
    fn test_category_parse_matches_display() {
        for category in [ArtifactCategory::Patchset, ArtifactCategory::Tag] {
            let parsed: ArtifactCategory = category.to_string().parse().unwrap();
            assert_eq!(parsed, category);
        }
        assert!("release".parse::<ArtifactCategory>().is_err());
    }
}
