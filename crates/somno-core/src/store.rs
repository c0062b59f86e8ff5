//! Record Store interface consumed by the importer.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::stage::StageKind;

/// Store failure classification. Only transient failures are retried.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store is temporarily unable to accept the request (rate
    /// limiting, exhausted quota, short outage).
    #[error("store temporarily unavailable: {0}")]
    Transient(String),
    /// Any other failure; retrying will not help.
    #[error("store request failed: {0}")]
    Permanent(String),
}

impl StoreError {
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Minimal view of a session already present in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingSession {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// One stage of an insertable session record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageRecord {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub stage: StageKind,
}

/// A validated session ready for insertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionRecord {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// UTC offset of the reference zone at `start`, in seconds.
    pub start_offset_secs: i32,
    /// UTC offset of the reference zone at `end`, in seconds.
    pub end_offset_secs: i32,
    /// Validated stages, in payload order. Never empty.
    pub stages: Vec<StageRecord>,
}

/// A destination for validated sleep sessions.
///
/// The importer drives implementations one call at a time, so the returned
/// futures carry no `Send` bound.
#[allow(async_fn_in_trait)]
pub trait RecordStore {
    /// Sessions whose interval overlaps `[start, end]`.
    async fn sessions_overlapping(
        &mut self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ExistingSession>, StoreError>;

    /// Persists one session record atomically.
    async fn insert_session(&mut self, record: &SessionRecord) -> Result<(), StoreError>;
}
