//! Job kinds accepted by the scheduler.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// The kind of work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Capture an image corpus from an avatar asset.
    Dataset,
    /// Placeholder model training over an avatar asset.
    Training,
}

impl JobKind {
    /// Stable string form stored in the `jobs.kind` column.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dataset => "dataset",
            Self::Training => "training",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dataset" => Ok(Self::Dataset),
            "training" => Ok(Self::Training),
            other => Err(CoreError::Validation(format!(
                "Unknown job kind '{other}' (expected 'dataset' or 'training')"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parses_known_kinds_case_insensitively() {
        assert_eq!("dataset".parse::<JobKind>().unwrap(), JobKind::Dataset);
        assert_eq!(" Training ".parse::<JobKind>().unwrap(), JobKind::Training);
    }

    #[test]
    fn rejects_unknown_kind() {
        assert_matches!("lora".parse::<JobKind>(), Err(CoreError::Validation(_)));
    }

    #[test]
    fn display_matches_storage_form() {
        assert_eq!(JobKind::Dataset.to_string(), "dataset");
        assert_eq!(JobKind::Training.as_str(), "training");
    }
}
