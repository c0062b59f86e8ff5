//! Payload parsing and timestamp normalization.
//!
//! The export payload is a JSON array of stage entries with camelCase
//! fields. Timestamps arrive in two shapes: RFC 3339 with an explicit
//! offset, taken as an absolute instant, or a naive local date-time,
//! resolved against the configured reference zone's rules for that date.

use chrono::{DateTime, Duration, DurationRound, LocalResult, NaiveDateTime, Offset, TimeZone, Utc};
use chrono_tz::{OffsetComponents, Tz};
use serde::Deserialize;
use thiserror::Error;

use crate::stage::{StageInterval, StageKind};

/// One element of the export payload, exactly as the device writes it.
///
/// Fields are optional so that a single incomplete entry surfaces as a
/// per-entry error instead of poisoning the whole array parse.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawStageEntry {
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub stage: Option<String>,
}

/// The payload could not be read as a JSON array of stage entries.
///
/// Fatal for the run: with the array structure itself broken there is no
/// trustworthy subset of entries to continue with.
#[derive(Debug, Error)]
#[error("payload is not a JSON array of stage entries: {0}")]
pub struct PayloadError(#[from] serde_json::Error);

/// Why a single entry was rejected during normalization.
#[derive(Debug, Clone, Error)]
pub enum MalformedEntry {
    #[error("entry {index}: missing field `{field}`")]
    MissingField { index: usize, field: &'static str },
    #[error("entry {index}: unparseable timestamp {value:?}")]
    BadTimestamp { index: usize, value: String },
    #[error("entry {index}: local time {value:?} does not exist in {zone}")]
    NonexistentLocalTime {
        index: usize,
        value: String,
        zone: Tz,
    },
}

/// Parses the raw payload text into entries.
pub fn parse_payload(text: &str) -> Result<Vec<RawStageEntry>, PayloadError> {
    Ok(serde_json::from_str(text)?)
}

/// Normalized entries plus the count of entries dropped as malformed.
#[derive(Debug)]
pub struct ParsedEntries {
    pub intervals: Vec<StageInterval>,
    pub skipped: usize,
}

/// Normalizes every entry, skipping and counting the malformed ones.
pub fn parse_entries(entries: &[RawStageEntry], zone: Tz) -> ParsedEntries {
    let mut intervals = Vec::with_capacity(entries.len());
    let mut skipped = 0usize;

    for (index, entry) in entries.iter().enumerate() {
        match parse_entry(index, entry, zone) {
            Ok(interval) => intervals.push(interval),
            Err(error) => {
                tracing::warn!(error = %error, "skipping malformed stage entry");
                skipped += 1;
            }
        }
    }

    ParsedEntries { intervals, skipped }
}

/// Normalizes one raw entry into a typed interval.
///
/// An unrecognized stage label is not an error here: the interval is kept
/// with `stage: None` and the importer drops it later.
pub fn parse_entry(
    index: usize,
    entry: &RawStageEntry,
    zone: Tz,
) -> Result<StageInterval, MalformedEntry> {
    let start_text = entry
        .start_time
        .as_deref()
        .ok_or(MalformedEntry::MissingField {
            index,
            field: "startTime",
        })?;
    let end_text = entry
        .end_time
        .as_deref()
        .ok_or(MalformedEntry::MissingField {
            index,
            field: "endTime",
        })?;
    let label = entry.stage.as_deref().ok_or(MalformedEntry::MissingField {
        index,
        field: "stage",
    })?;

    let start = parse_timestamp(index, start_text, zone)?;
    let end = parse_timestamp(index, end_text, zone)?;
    let stage = label.parse::<StageKind>().ok();

    Ok(StageInterval { start, end, stage })
}

/// Parses one timestamp string.
///
/// An explicit offset (including `Z`) wins and is never reinterpreted in
/// the reference zone; only offset-less values go through zone resolution.
/// Instants truncate to millisecond precision, the precision session
/// records are stored and compared at.
fn parse_timestamp(index: usize, value: &str, zone: Tz) -> Result<DateTime<Utc>, MalformedEntry> {
    let instant = if let Ok(instant) = DateTime::parse_from_rfc3339(value) {
        instant.with_timezone(&Utc)
    } else {
        let naive: NaiveDateTime = value.parse().map_err(|_| MalformedEntry::BadTimestamp {
            index,
            value: value.to_string(),
        })?;
        resolve_local(naive, zone).ok_or_else(|| MalformedEntry::NonexistentLocalTime {
            index,
            value: value.to_string(),
            zone,
        })?
    };

    instant
        .duration_trunc(Duration::milliseconds(1))
        .map_err(|_| MalformedEntry::BadTimestamp {
            index,
            value: value.to_string(),
        })
}

/// Maps a naive local time onto the zone's timeline using its rules.
///
/// An ambiguous time (fall-back hour) takes the reading on the zone's
/// standard offset; a time inside a spring-forward gap has no reading.
fn resolve_local(naive: NaiveDateTime, zone: Tz) -> Option<DateTime<Utc>> {
    let resolved = match zone.from_local_datetime(&naive) {
        LocalResult::Single(instant) => instant,
        LocalResult::Ambiguous(earlier, later) => {
            if later.offset().dst_offset() == Duration::zero() {
                later
            } else {
                earlier
            }
        }
        LocalResult::None => return None,
    };
    Some(resolved.with_timezone(&Utc))
}

/// UTC offset, in seconds, that `zone` assigns to `instant`.
///
/// This is the same rule lookup used for naive timestamps, reused when
/// record-level offsets are attached at insert time.
pub fn zone_offset_seconds(zone: Tz, instant: DateTime<Utc>) -> i32 {
    instant.with_timezone(&zone).offset().fix().local_minus_utc()
}
