//! Stage vocabulary as the single source of truth for stage label strings.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Canonical sleep stages recognized by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    /// Awake during the sleep window.
    Awake,
    /// Light sleep.
    Light,
    /// Deep sleep.
    Deep,
    /// REM sleep.
    Rem,
    /// In bed but awake, as distinct from mid-sleep wakefulness.
    AwakeInBed,
}

impl StageKind {
    /// Canonical label, matching what the exporting device writes.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Awake => "AWAKE",
            Self::Light => "LIGHT",
            Self::Deep => "DEEP",
            Self::Rem => "REM",
            Self::AwakeInBed => "AWAKE_IN_BED",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for labels outside the stage vocabulary.
#[derive(Debug, Clone, Error)]
#[error("unknown stage label: {0}")]
pub struct UnknownStageLabel(pub String);

impl FromStr for StageKind {
    type Err = UnknownStageLabel;

    /// Labels match case-insensitively; anything else is unknown.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "AWAKE" => Ok(Self::Awake),
            "LIGHT" => Ok(Self::Light),
            "DEEP" => Ok(Self::Deep),
            "REM" => Ok(Self::Rem),
            "AWAKE_IN_BED" => Ok(Self::AwakeInBed),
            _ => Err(UnknownStageLabel(s.to_string())),
        }
    }
}

impl Serialize for StageKind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for StageKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One normalized stage interval from the payload.
///
/// `stage` is `None` when the raw label fell outside the vocabulary. Such
/// intervals still take part in segmentation (their times shape session
/// bounds and gaps) and are dropped, counted as skipped, at import time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StageInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub stage: Option<StageKind>,
}
