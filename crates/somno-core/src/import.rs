//! Session import: validation, duplicate suppression, and resilient
//! insertion into a Record Store.

use std::time::Duration;

use chrono_tz::Tz;

use crate::parse;
use crate::segment;
use crate::session::SleepSession;
use crate::store::{RecordStore, SessionRecord, StageRecord, StoreError};

/// Retry and pacing policy for a run. All pauses may be zero; none of
/// them changes the resulting tallies.
#[derive(Debug, Clone)]
pub struct ImporterConfig {
    /// Extra insert attempts allowed per session after a transient failure.
    pub retry_limit: u32,
    /// Pause before re-attempting after a transient failure.
    pub retry_backoff: Duration,
    /// Pause before each record construction and insert.
    pub insert_pause: Duration,
    /// Number of sessions processed between the longer batch pauses.
    pub batch_size: usize,
    /// Pause after every `batch_size` sessions.
    pub batch_pause: Duration,
}

impl Default for ImporterConfig {
    fn default() -> Self {
        Self {
            retry_limit: 1,
            retry_backoff: Duration::from_secs(5),
            insert_pause: Duration::from_millis(50),
            batch_size: 50,
            batch_pause: Duration::from_secs(3),
        }
    }
}

/// Final tallies of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportStats {
    /// Sessions inserted into the store.
    pub sessions_imported: usize,
    /// Stage entries that ended up represented in no inserted session.
    pub stages_skipped: usize,
}

/// Runs the whole pipeline over one payload text: parse, segment, import.
///
/// The per-phase skip tallies fold into the returned stats. Fails only
/// when the payload itself is unreadable; store trouble is absorbed into
/// the tallies per session.
pub async fn import_payload<S: RecordStore>(
    store: &mut S,
    payload: &str,
    zone: Tz,
    config: &ImporterConfig,
) -> Result<ImportStats, parse::PayloadError> {
    let entries = parse::parse_payload(payload)?;
    tracing::debug!(entries = entries.len(), "parsed payload");

    let parsed = parse::parse_entries(&entries, zone);
    let segmentation = segment::segment_intervals(parsed.intervals);
    tracing::debug!(
        sessions = segmentation.sessions.len(),
        malformed = parsed.skipped,
        unordered = segmentation.skipped,
        "segmented payload"
    );

    let mut stats = run_import(store, segmentation.sessions, zone, config).await;
    stats.stages_skipped += parsed.skipped + segmentation.skipped;
    Ok(stats)
}

/// Imports candidate sessions one at a time, in order.
///
/// Sessions are processed strictly sequentially: every store call and
/// every pause completes before the next session starts, so aborting the
/// future between sessions leaves tallies covering exactly the sessions
/// already handled.
pub async fn run_import<S: RecordStore>(
    store: &mut S,
    sessions: Vec<SleepSession>,
    zone: Tz,
    config: &ImporterConfig,
) -> ImportStats {
    let mut stats = ImportStats::default();

    for (index, session) in sessions.into_iter().enumerate() {
        if config.batch_size > 0 && index > 0 && index % config.batch_size == 0 {
            tracing::debug!(sessions_processed = index, "pausing between batches");
            tokio::time::sleep(config.batch_pause).await;
        }
        import_session(store, &session, zone, config, &mut stats).await;
    }

    tracing::debug!(
        imported = stats.sessions_imported,
        skipped = stats.stages_skipped,
        "import finished"
    );
    stats
}

async fn import_session<S: RecordStore>(
    store: &mut S,
    session: &SleepSession,
    zone: Tz,
    config: &ImporterConfig,
    stats: &mut ImportStats,
) {
    let stage_total = session.stage_count();

    if session.start >= session.end {
        tracing::warn!(
            start = %session.start,
            end = %session.end,
            "skipping session with non-positive duration"
        );
        stats.stages_skipped += stage_total;
        return;
    }

    match find_duplicate(store, session).await {
        Ok(true) => {
            tracing::debug!(
                start = %session.start,
                end = %session.end,
                "session already recorded, skipping"
            );
            stats.stages_skipped += stage_total;
            return;
        }
        Ok(false) => {}
        Err(error) => {
            // An unanswered duplicate check falls through to the insert,
            // which surfaces any persistent store fault itself.
            tracing::warn!(error = %error, "duplicate check failed, assuming none");
        }
    }

    let stages = surviving_stages(session);
    if stages.is_empty() {
        tracing::warn!(
            start = %session.start,
            stage_total,
            "no valid stages left, skipping session"
        );
        stats.stages_skipped += stage_total;
        return;
    }
    let rejected = stage_total - stages.len();

    tokio::time::sleep(config.insert_pause).await;
    let record = build_record(session, stages, zone);

    match insert_with_retry(store, &record, config).await {
        Ok(()) => {
            tracing::debug!(start = %session.start, stages = record.stages.len(), "session inserted");
            stats.sessions_imported += 1;
            stats.stages_skipped += rejected;
        }
        Err(error) => {
            tracing::warn!(error = %error, start = %session.start, "giving up on session");
            stats.stages_skipped += stage_total;
        }
    }
}

/// True when the store already holds a session with exactly these bounds.
/// Sessions merely overlapping the candidate do not count.
async fn find_duplicate<S: RecordStore>(
    store: &mut S,
    session: &SleepSession,
) -> Result<bool, StoreError> {
    let existing = store.sessions_overlapping(session.start, session.end).await?;
    Ok(existing
        .iter()
        .any(|found| found.start == session.start && found.end == session.end))
}

/// Stages that carry a known code and fit inside the session bounds.
fn surviving_stages(session: &SleepSession) -> Vec<StageRecord> {
    let mut kept = Vec::with_capacity(session.stages.len());
    for interval in &session.stages {
        let Some(stage) = interval.stage else {
            tracing::warn!(start = %interval.start, "skipping stage with unrecognized label");
            continue;
        };
        if interval.start >= interval.end
            || interval.start < session.start
            || interval.end > session.end
        {
            tracing::warn!(
                start = %interval.start,
                end = %interval.end,
                "skipping stage outside session bounds"
            );
            continue;
        }
        kept.push(StageRecord {
            start: interval.start,
            end: interval.end,
            stage,
        });
    }
    kept
}

/// Assembles the insertable record. Bounds stay the session's own; the
/// offsets come from the reference zone's rules at those bounds.
fn build_record(session: &SleepSession, stages: Vec<StageRecord>, zone: Tz) -> SessionRecord {
    SessionRecord {
        start: session.start,
        end: session.end,
        start_offset_secs: parse::zone_offset_seconds(zone, session.start),
        end_offset_secs: parse::zone_offset_seconds(zone, session.end),
        stages,
    }
}

/// One insert, re-attempted after transient failures up to `retry_limit`
/// times with a fixed pause in between.
async fn insert_with_retry<S: RecordStore>(
    store: &mut S,
    record: &SessionRecord,
    config: &ImporterConfig,
) -> Result<(), StoreError> {
    let mut attempt = 0u32;
    loop {
        match store.insert_session(record).await {
            Ok(()) => return Ok(()),
            Err(error) if error.is_transient() && attempt < config.retry_limit => {
                attempt += 1;
                tracing::warn!(
                    error = %error,
                    attempt,
                    backoff_ms = u64::try_from(config.retry_backoff.as_millis()).unwrap_or(u64::MAX),
                    "transient store failure, retrying"
                );
                tokio::time::sleep(config.retry_backoff).await;
            }
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;

    use chrono::{DateTime, Utc};
    use chrono_tz::Europe::Rome;

    use crate::stage::{StageInterval, StageKind};
    use crate::store::ExistingSession;

    /// In-memory store with scriptable failures.
    #[derive(Debug, Default)]
    struct MockStore {
        existing: Vec<ExistingSession>,
        inserted: Vec<SessionRecord>,
        /// Popped once per insert call; empty queue means success.
        insert_failures: VecDeque<StoreError>,
        fail_overlap_queries: bool,
        overlap_queries: usize,
        insert_calls: usize,
    }

    impl RecordStore for MockStore {
        async fn sessions_overlapping(
            &mut self,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> Result<Vec<ExistingSession>, StoreError> {
            self.overlap_queries += 1;
            if self.fail_overlap_queries {
                return Err(StoreError::Permanent("overlap query refused".to_string()));
            }
            Ok(self
                .existing
                .iter()
                .filter(|found| found.start < end && found.end > start)
                .cloned()
                .collect())
        }

        async fn insert_session(&mut self, record: &SessionRecord) -> Result<(), StoreError> {
            self.insert_calls += 1;
            if let Some(failure) = self.insert_failures.pop_front() {
                return Err(failure);
            }
            self.existing.push(ExistingSession {
                start: record.start,
                end: record.end,
            });
            self.inserted.push(record.clone());
            Ok(())
        }
    }

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().expect("valid test timestamp")
    }

    fn interval(start: &str, end: &str, stage: Option<StageKind>) -> StageInterval {
        StageInterval {
            start: utc(start),
            end: utc(end),
            stage,
        }
    }

    fn session(stages: Vec<StageInterval>) -> SleepSession {
        SleepSession::from_stages(stages).expect("non-empty stages")
    }

    fn night_session() -> SleepSession {
        session(vec![
            interval(
                "2024-01-15T22:00:00Z",
                "2024-01-15T23:00:00Z",
                Some(StageKind::Light),
            ),
            interval(
                "2024-01-15T23:00:00Z",
                "2024-01-16T05:30:00Z",
                Some(StageKind::Deep),
            ),
            interval(
                "2024-01-16T05:30:00Z",
                "2024-01-16T06:00:00Z",
                Some(StageKind::Rem),
            ),
        ])
    }

    /// Zeroed pauses so tests run instantly; tallies are unaffected.
    fn quick() -> ImporterConfig {
        ImporterConfig {
            retry_limit: 1,
            retry_backoff: Duration::ZERO,
            insert_pause: Duration::ZERO,
            batch_size: 50,
            batch_pause: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn empty_input_touches_nothing() {
        let mut store = MockStore::default();
        let stats = run_import(&mut store, Vec::new(), Rome, &quick()).await;

        assert_eq!(stats, ImportStats::default());
        assert_eq!(store.overlap_queries, 0);
        assert_eq!(store.insert_calls, 0);
    }

    #[tokio::test]
    async fn clean_session_imports_with_zone_offsets() {
        let mut store = MockStore::default();
        let stats = run_import(&mut store, vec![night_session()], Rome, &quick()).await;

        assert_eq!(stats.sessions_imported, 1);
        assert_eq!(stats.stages_skipped, 0);
        let record = &store.inserted[0];
        assert_eq!(record.stages.len(), 3);
        // January in Rome: UTC+1 at both bounds.
        assert_eq!(record.start_offset_secs, 3600);
        assert_eq!(record.end_offset_secs, 3600);
    }

    #[tokio::test]
    async fn unrecognized_stage_is_dropped_but_session_imports() {
        let mut session = night_session();
        session.stages[1].stage = None;

        let mut store = MockStore::default();
        let stats = run_import(&mut store, vec![session], Rome, &quick()).await;

        assert_eq!(stats.sessions_imported, 1);
        assert_eq!(stats.stages_skipped, 1);
        assert_eq!(store.inserted[0].stages.len(), 2);
    }

    #[tokio::test]
    async fn out_of_bounds_stage_is_dropped_but_session_imports() {
        let mut session = night_session();
        // Ends after the session's own end.
        session.stages[1].end = utc("2024-01-16T07:00:00Z");

        let mut store = MockStore::default();
        let stats = run_import(&mut store, vec![session], Rome, &quick()).await;

        assert_eq!(stats.sessions_imported, 1);
        assert_eq!(stats.stages_skipped, 1);
        assert_eq!(store.inserted[0].stages.len(), 2);
    }

    #[tokio::test]
    async fn exact_duplicate_skips_all_stages_without_insert() {
        let candidate = night_session();
        let mut store = MockStore::default();
        store.existing.push(ExistingSession {
            start: candidate.start,
            end: candidate.end,
        });

        let stats = run_import(&mut store, vec![candidate], Rome, &quick()).await;

        assert_eq!(stats.sessions_imported, 0);
        assert_eq!(stats.stages_skipped, 3);
        assert_eq!(store.insert_calls, 0);
    }

    #[tokio::test]
    async fn overlapping_but_unequal_session_is_not_a_duplicate() {
        let candidate = night_session();
        let mut store = MockStore::default();
        store.existing.push(ExistingSession {
            start: candidate.start,
            end: candidate.end + chrono::Duration::minutes(1),
        });

        let stats = run_import(&mut store, vec![candidate], Rome, &quick()).await;

        assert_eq!(stats.sessions_imported, 1);
        assert_eq!(store.inserted.len(), 1);
    }

    #[tokio::test]
    async fn reversed_session_bounds_never_reach_the_store() {
        // Payload order put the late stage first, so the candidate's
        // bounds run backwards.
        let candidate = session(vec![
            interval(
                "2024-01-16T05:00:00Z",
                "2024-01-16T06:00:00Z",
                Some(StageKind::Rem),
            ),
            interval(
                "2024-01-15T22:00:00Z",
                "2024-01-15T23:00:00Z",
                Some(StageKind::Light),
            ),
        ]);

        let mut store = MockStore::default();
        let stats = run_import(&mut store, vec![candidate], Rome, &quick()).await;

        assert_eq!(stats.sessions_imported, 0);
        assert_eq!(stats.stages_skipped, 2);
        assert_eq!(store.overlap_queries, 0);
        assert_eq!(store.insert_calls, 0);
    }

    #[tokio::test]
    async fn session_with_no_surviving_stages_is_skipped_whole() {
        let candidate = session(vec![
            interval("2024-01-15T22:00:00Z", "2024-01-15T23:00:00Z", None),
            interval("2024-01-15T23:00:00Z", "2024-01-16T06:00:00Z", None),
        ]);

        let mut store = MockStore::default();
        let stats = run_import(&mut store, vec![candidate], Rome, &quick()).await;

        assert_eq!(stats.sessions_imported, 0);
        assert_eq!(stats.stages_skipped, 2);
        assert_eq!(store.insert_calls, 0);
    }

    #[tokio::test]
    async fn transient_failure_is_retried_once_and_succeeds() {
        let mut store = MockStore::default();
        store
            .insert_failures
            .push_back(StoreError::Transient("rate limited".to_string()));

        let stats = run_import(&mut store, vec![night_session()], Rome, &quick()).await;

        assert_eq!(stats.sessions_imported, 1);
        assert_eq!(stats.stages_skipped, 0);
        assert_eq!(store.insert_calls, 2);
        assert_eq!(store.inserted.len(), 1);
    }

    #[tokio::test]
    async fn second_transient_failure_skips_the_session() {
        let mut store = MockStore::default();
        store
            .insert_failures
            .push_back(StoreError::Transient("rate limited".to_string()));
        store
            .insert_failures
            .push_back(StoreError::Transient("still rate limited".to_string()));

        let stats = run_import(&mut store, vec![night_session()], Rome, &quick()).await;

        assert_eq!(stats.sessions_imported, 0);
        assert_eq!(stats.stages_skipped, 3);
        assert_eq!(store.insert_calls, 2);
        assert!(store.inserted.is_empty());
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let mut store = MockStore::default();
        store
            .insert_failures
            .push_back(StoreError::Permanent("schema mismatch".to_string()));

        let stats = run_import(&mut store, vec![night_session()], Rome, &quick()).await;

        assert_eq!(stats.sessions_imported, 0);
        assert_eq!(stats.stages_skipped, 3);
        assert_eq!(store.insert_calls, 1);
    }

    #[tokio::test]
    async fn failed_duplicate_check_still_inserts() {
        let mut store = MockStore {
            fail_overlap_queries: true,
            ..MockStore::default()
        };

        let stats = run_import(&mut store, vec![night_session()], Rome, &quick()).await;

        assert_eq!(stats.sessions_imported, 1);
        assert_eq!(store.inserted.len(), 1);
    }

    #[tokio::test]
    async fn later_sessions_continue_after_a_failed_one() {
        let mut store = MockStore::default();
        store
            .insert_failures
            .push_back(StoreError::Permanent("first one refused".to_string()));

        let second = session(vec![interval(
            "2024-01-17T22:00:00Z",
            "2024-01-18T06:00:00Z",
            Some(StageKind::Deep),
        )]);

        let stats = run_import(&mut store, vec![night_session(), second], Rome, &quick()).await;

        assert_eq!(stats.sessions_imported, 1);
        assert_eq!(stats.stages_skipped, 3);
        assert_eq!(store.inserted.len(), 1);
        assert_eq!(store.inserted[0].start, utc("2024-01-17T22:00:00Z"));
    }

    #[tokio::test]
    async fn batch_pacing_does_not_change_tallies() {
        let config = ImporterConfig {
            batch_size: 2,
            ..quick()
        };
        let sessions: Vec<SleepSession> = (0..5)
            .map(|day| {
                session(vec![interval(
                    &format!("2024-01-{:02}T22:00:00Z", 10 + day),
                    &format!("2024-01-{:02}T06:00:00Z", 11 + day),
                    Some(StageKind::Light),
                )])
            })
            .collect();

        let mut store = MockStore::default();
        let stats = run_import(&mut store, sessions, Rome, &config).await;

        assert_eq!(stats.sessions_imported, 5);
        assert_eq!(stats.stages_skipped, 0);
    }

    const PAYLOAD: &str = r#"[
        {"startTime": "2024-01-15T22:00:00", "endTime": "2024-01-15T23:00:00", "stage": "LIGHT"},
        {"startTime": "2024-01-15T23:00:00", "endTime": "2024-01-16T06:00:00", "stage": "DEEP"},
        {"startTime": "2024-01-16T23:15:00", "endTime": "2024-01-17T06:45:00", "stage": "REM"}
    ]"#;

    #[tokio::test]
    async fn import_payload_folds_tallies_and_is_idempotent() {
        let mut store = MockStore::default();

        let first = import_payload(&mut store, PAYLOAD, Rome, &quick())
            .await
            .expect("readable payload");
        assert_eq!(first.sessions_imported, 2);
        assert_eq!(first.stages_skipped, 0);

        let second = import_payload(&mut store, PAYLOAD, Rome, &quick())
            .await
            .expect("readable payload");
        assert_eq!(second.sessions_imported, 0);
        assert_eq!(second.stages_skipped, 3);
        assert_eq!(store.inserted.len(), 2);
    }

    #[tokio::test]
    async fn unreadable_payload_is_fatal_with_no_partial_import() {
        let mut store = MockStore::default();
        let result = import_payload(&mut store, "{\"not\": \"an array\"}", Rome, &quick()).await;

        assert!(result.is_err());
        assert_eq!(store.insert_calls, 0);
    }

    #[tokio::test]
    async fn malformed_entries_fold_into_the_final_tally() {
        let payload = r#"[
            {"startTime": "2024-01-15T22:00:00Z", "endTime": "2024-01-16T06:00:00Z", "stage": "DEEP"},
            {"endTime": "2024-01-16T06:30:00Z", "stage": "LIGHT"}
        ]"#;

        let mut store = MockStore::default();
        let stats = import_payload(&mut store, payload, Rome, &quick())
            .await
            .expect("readable payload");

        assert_eq!(stats.sessions_imported, 1);
        assert_eq!(stats.stages_skipped, 1);
    }
}
