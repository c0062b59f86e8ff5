//! Candidate sleep sessions produced by segmentation.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::stage::StageInterval;

/// A maximal run of stage intervals with no over-threshold gap between
/// consecutive kept intervals.
///
/// Candidates are not yet validated: bounds may be non-positive and
/// individual stages may poke outside them when the payload was not
/// actually sorted. The importer applies those checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SleepSession {
    /// Start of the first stage interval.
    pub start: DateTime<Utc>,
    /// End of the last stage interval, in payload order (not the maximum).
    pub end: DateTime<Utc>,
    pub stages: Vec<StageInterval>,
}

impl SleepSession {
    /// Builds a session around consecutive stages; `None` when empty.
    pub fn from_stages(stages: Vec<StageInterval>) -> Option<Self> {
        let start = stages.first()?.start;
        let end = stages.last()?.end;
        Some(Self { start, end, stages })
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }
}
