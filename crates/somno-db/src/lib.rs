//! SQLite storage for imported sleep sessions.
//!
//! Implements the [`RecordStore`] interface over a local database file and
//! doubles as the query surface for the CLI inspection commands.
//!
//! # Thread Safety
//!
//! [`Database`] wraps a `rusqlite::Connection`, which is `Send` but not
//! `Sync`: an instance can move between threads but cannot be shared
//! without external synchronization. The importer drives it from a single
//! task, which is all this crate is designed for.
//!
//! # Timestamp Format
//!
//! Timestamps are stored as TEXT in RFC 3339 UTC with millisecond
//! precision (e.g. `2024-01-15T22:30:00.000Z`). The fixed width keeps
//! lexicographic ordering identical to chronological ordering, so range
//! predicates work directly on the TEXT columns.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use somno_core::{ExistingSession, RecordStore, SessionRecord, StoreError};

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Failed to parse a stored session timestamp.
    #[error("invalid timestamp for session {session_id}: {timestamp}")]
    TimestampParse {
        session_id: String,
        timestamp: String,
        #[source]
        source: chrono::ParseError,
    },
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Connection,
}

/// Summary of one stored session, as the CLI lists it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub start_offset_secs: i32,
    pub end_offset_secs: i32,
    pub stage_count: i64,
}

/// One stored stage row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageRow {
    pub position: i64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub stage: String,
}

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The schema is initialized automatically on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection
    /// closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initializes the database schema.
    ///
    /// Idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                start_time TEXT NOT NULL,
                end_time TEXT NOT NULL,
                start_offset_secs INTEGER NOT NULL,
                end_offset_secs INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_start ON sessions(start_time);
            CREATE INDEX IF NOT EXISTS idx_sessions_end ON sessions(end_time);

            -- Stage rows: one per validated stage interval, in payload order
            -- stage: canonical label (e.g. 'LIGHT', 'AWAKE_IN_BED')
            CREATE TABLE IF NOT EXISTS session_stages (
                session_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT NOT NULL,
                stage TEXT NOT NULL,
                PRIMARY KEY (session_id, position),
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_session_stages_session ON session_stages(session_id);
            ",
        )?;
        Ok(())
    }

    /// Inserts one session record with its stages, atomically.
    ///
    /// Returns the generated session id.
    pub fn insert_record(&mut self, record: &SessionRecord) -> Result<String, DbError> {
        let id = Uuid::new_v4().to_string();
        let created_at = format_timestamp(Utc::now());

        let tx = self.conn.transaction()?;
        tx.execute(
            "
            INSERT INTO sessions
            (id, start_time, end_time, start_offset_secs, end_offset_secs, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ",
            params![
                id,
                format_timestamp(record.start),
                format_timestamp(record.end),
                record.start_offset_secs,
                record.end_offset_secs,
                created_at,
            ],
        )?;
        {
            let mut stmt = tx.prepare(
                "
                INSERT INTO session_stages (session_id, position, start_time, end_time, stage)
                VALUES (?, ?, ?, ?, ?)
                ",
            )?;
            for (position, stage) in record.stages.iter().enumerate() {
                stmt.execute(params![
                    id,
                    position as i64,
                    format_timestamp(stage.start),
                    format_timestamp(stage.end),
                    stage.stage.as_str(),
                ])?;
            }
        }
        tx.commit()?;

        tracing::debug!(session_id = %id, stages = record.stages.len(), "session stored");
        Ok(id)
    }

    /// Sessions whose interval strictly overlaps `[start, end]`.
    ///
    /// Touching at an endpoint only does not count as overlap.
    pub fn overlapping(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ExistingSession>, DbError> {
        let start_text = format_timestamp(start);
        let end_text = format_timestamp(end);
        let mut stmt = self.conn.prepare(
            "
            SELECT id, start_time, end_time
            FROM sessions
            WHERE start_time < ? AND end_time > ?
            ORDER BY start_time ASC
            ",
        )?;
        let rows = stmt.query_map([end_text, start_text], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut sessions = Vec::new();
        for row in rows {
            let (id, start_time, end_time) = row?;
            sessions.push(ExistingSession {
                start: parse_timestamp(&start_time, &id)?,
                end: parse_timestamp(&end_time, &id)?,
            });
        }
        Ok(sessions)
    }

    /// Lists stored sessions, newest first.
    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT s.id, s.start_time, s.end_time, s.start_offset_secs, s.end_offset_secs,
                   COUNT(st.session_id)
            FROM sessions s
            LEFT JOIN session_stages st ON st.session_id = s.id
            GROUP BY s.id
            ORDER BY s.start_time DESC
            ",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i32>(3)?,
                row.get::<_, i32>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?;

        let mut summaries = Vec::new();
        for row in rows {
            let (id, start_time, end_time, start_offset_secs, end_offset_secs, stage_count) = row?;
            let start = parse_timestamp(&start_time, &id)?;
            let end = parse_timestamp(&end_time, &id)?;
            summaries.push(SessionSummary {
                id,
                start,
                end,
                start_offset_secs,
                end_offset_secs,
                stage_count,
            });
        }
        Ok(summaries)
    }

    /// Stage rows of one session, in stored order.
    pub fn session_stages(&self, session_id: &str) -> Result<Vec<StageRow>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT position, start_time, end_time, stage
            FROM session_stages
            WHERE session_id = ?
            ORDER BY position ASC
            ",
        )?;
        let rows = stmt.query_map([session_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut stages = Vec::new();
        for row in rows {
            let (position, start_time, end_time, stage) = row?;
            stages.push(StageRow {
                position,
                start: parse_timestamp(&start_time, session_id)?,
                end: parse_timestamp(&end_time, session_id)?,
                stage,
            });
        }
        Ok(stages)
    }

    /// Number of stored sessions.
    pub fn session_count(&self) -> Result<i64, DbError> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?;
        Ok(count)
    }

    /// End of the most recently ending stored session, if any.
    pub fn latest_session_end(&self) -> Result<Option<DateTime<Utc>>, DbError> {
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT id, end_time FROM sessions ORDER BY end_time DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            Some((id, end_time)) => Ok(Some(parse_timestamp(&end_time, &id)?)),
            None => Ok(None),
        }
    }
}

impl RecordStore for Database {
    async fn sessions_overlapping(
        &mut self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ExistingSession>, StoreError> {
        self.overlapping(start, end).map_err(into_store_error)
    }

    async fn insert_session(&mut self, record: &SessionRecord) -> Result<(), StoreError> {
        self.insert_record(record).map(|_| ()).map_err(into_store_error)
    }
}

/// `SQLITE_BUSY` and `SQLITE_LOCKED` mean another writer holds the file
/// right now; those are worth a retry. Everything else is permanent.
fn into_store_error(error: DbError) -> StoreError {
    let transient = matches!(
        &error,
        DbError::Sqlite(rusqlite::Error::SqliteFailure(inner, _))
            if matches!(
                inner.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            )
    );
    if transient {
        StoreError::Transient(error.to_string())
    } else {
        StoreError::Permanent(error.to_string())
    }
}

fn parse_timestamp(timestamp: &str, session_id: &str) -> Result<DateTime<Utc>, DbError> {
    timestamp
        .parse::<DateTime<Utc>>()
        .map_err(|source| DbError::TimestampParse {
            session_id: session_id.to_string(),
            timestamp: timestamp.to_string(),
            source,
        })
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}
