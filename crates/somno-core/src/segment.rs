//! Session segmentation: grouping the flat stage list on time gaps.

use chrono::Duration;

use crate::session::SleepSession;
use crate::stage::StageInterval;

/// Longest pause between consecutive stages that still belongs to the same
/// night. Gaps count in whole minutes: only a gap of 31 full minutes or
/// more closes the current session.
pub const SESSION_GAP: Duration = Duration::minutes(30);

/// Segmentation outcome: candidate sessions plus the count of intervals
/// dropped for non-positive duration.
#[derive(Debug)]
pub struct Segmentation {
    pub sessions: Vec<SleepSession>,
    pub skipped: usize,
}

/// Groups ordered intervals into candidate sessions.
///
/// Intervals are taken in payload order; nothing is re-sorted. An interval
/// with `start >= end` is dropped before grouping and never participates
/// in gap computation, so the gap always spans from the last kept
/// interval's end to the next interval's start. Gaps compare in whole
/// minutes; a sub-minute remainder never splits.
pub fn segment_intervals(intervals: Vec<StageInterval>) -> Segmentation {
    let mut sessions = Vec::new();
    let mut skipped = 0usize;
    let mut current: Vec<StageInterval> = Vec::new();

    for interval in intervals {
        if interval.start >= interval.end {
            tracing::warn!(
                start = %interval.start,
                end = %interval.end,
                "dropping stage interval with non-positive duration"
            );
            skipped += 1;
            continue;
        }

        if let Some(last) = current.last() {
            // Whole minutes, truncated toward zero.
            let gap = interval.start - last.end;
            if gap.num_minutes() > SESSION_GAP.num_minutes() {
                tracing::debug!(gap_minutes = gap.num_minutes(), "gap closes session");
                close_session(&mut sessions, std::mem::take(&mut current));
            }
        }
        current.push(interval);
    }
    close_session(&mut sessions, current);

    Segmentation { sessions, skipped }
}

fn close_session(sessions: &mut Vec<SleepSession>, stages: Vec<StageInterval>) {
    if let Some(session) = SleepSession::from_stages(stages) {
        sessions.push(session);
    }
}
