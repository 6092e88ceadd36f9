//! Target video formats rendered for every job.
//!
//! The generator renders one video per aspect ratio and reports progress
//! keyed by the short names below (`9x16`, `1x1`, ...).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One output aspect-ratio variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TargetFormat {
    #[serde(rename = "9x16")]
    Vertical,
    #[serde(rename = "1x1")]
    Square,
    #[serde(rename = "4x5")]
    Portrait,
    #[serde(rename = "16x9")]
    Landscape,
}

impl TargetFormat {
    /// Every format a job renders, in the order the generator processes them.
    pub const ALL: [TargetFormat; 4] = [
        TargetFormat::Vertical,
        TargetFormat::Square,
        TargetFormat::Portrait,
        TargetFormat::Landscape,
    ];

    /// Short name used on the wire and in progress markers.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vertical => "9x16",
            Self::Square => "1x1",
            Self::Portrait => "4x5",
            Self::Landscape => "16x9",
        }
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string names no known format.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown target format '{0}'")]
pub struct UnknownFormat(pub String);

impl FromStr for TargetFormat {
    type Err = UnknownFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| UnknownFormat(s.to_string()))
    }
}
