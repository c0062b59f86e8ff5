//! HTTP client for a remote sleep-record service.
//!
//! Implements the Record Store interface over a small JSON API:
//! `GET {base}/v1/sessions?start=..&end=..` answers the overlap query and
//! `POST {base}/v1/sessions` accepts one record. Timestamps travel as
//! RFC 3339 UTC strings and field names are camelCase, matching the
//! export payload convention.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use somno_core::{ExistingSession, RecordStore, SessionRecord, StoreError};

/// Default request timeout for store calls.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Client setup errors. Request failures surface as
/// [`StoreError`] through the store interface instead.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The provided base URL was unusable.
    #[error("invalid base URL: {reason}")]
    InvalidBaseUrl { reason: &'static str },
    /// Failed to build the HTTP client.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
}

/// Client for the sleep-record service.
///
/// Safe to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct RemoteStore {
    http: reqwest::Client,
    base_url: String,
}

impl RemoteStore {
    /// Creates a client for the service at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is empty or not http(s), or if the
    /// HTTP client fails to build.
    pub fn new(base_url: impl Into<String>) -> Result<Self, RemoteError> {
        let mut base_url = base_url.into();

        if base_url.trim().is_empty() {
            return Err(RemoteError::InvalidBaseUrl {
                reason: "base URL cannot be empty",
            });
        }
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(RemoteError::InvalidBaseUrl {
                reason: "base URL must start with http:// or https://",
            });
        }
        while base_url.ends_with('/') {
            base_url.pop();
        }

        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(RemoteError::ClientBuild)?;

        Ok(Self { http, base_url })
    }

    fn sessions_url(&self) -> String {
        format!("{}/v1/sessions", self.base_url)
    }
}

impl RecordStore for RemoteStore {
    async fn sessions_overlapping(
        &mut self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ExistingSession>, StoreError> {
        let response = self
            .http
            .get(self.sessions_url())
            .query(&[
                ("start", format_timestamp(start)),
                ("end", format_timestamp(end)),
            ])
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let found: Vec<SessionEnvelope> = response.json().await.map_err(transport_error)?;
        tracing::debug!(count = found.len(), "overlap query answered");
        Ok(found
            .into_iter()
            .map(|session| ExistingSession {
                start: session.start_time,
                end: session.end_time,
            })
            .collect())
    }

    async fn insert_session(&mut self, record: &SessionRecord) -> Result<(), StoreError> {
        let payload = SessionPayload::from_record(record);
        let response = self
            .http
            .post(self.sessions_url())
            .json(&payload)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }
        Ok(())
    }
}

/// One session as the service reports it.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionEnvelope {
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
}

/// One session as posted to the service.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionPayload {
    start_time: String,
    end_time: String,
    start_offset_secs: i32,
    end_offset_secs: i32,
    stages: Vec<StagePayload>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StagePayload {
    start_time: String,
    end_time: String,
    stage: String,
}

impl SessionPayload {
    fn from_record(record: &SessionRecord) -> Self {
        Self {
            start_time: format_timestamp(record.start),
            end_time: format_timestamp(record.end),
            start_offset_secs: record.start_offset_secs,
            end_offset_secs: record.end_offset_secs,
            stages: record
                .stages
                .iter()
                .map(|stage| StagePayload {
                    start_time: format_timestamp(stage.start),
                    end_time: format_timestamp(stage.end),
                    stage: stage.stage.to_string(),
                })
                .collect(),
        }
    }
}

/// 429 and 503 are the service saying "not right now"; both are worth a
/// retry. Any other failing status is a real rejection.
fn status_error(status: reqwest::StatusCode, body: &str) -> StoreError {
    let message = if body.is_empty() {
        format!("status {status}")
    } else {
        format!("status {status}: {body}")
    };
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::SERVICE_UNAVAILABLE
    {
        StoreError::Transient(message)
    } else {
        StoreError::Permanent(message)
    }
}

/// Timeouts and refused connections pass; the service may come back.
/// Anything else wrong with the request itself will not improve.
fn transport_error(error: reqwest::Error) -> StoreError {
    if error.is_timeout() || error.is_connect() {
        StoreError::Transient(error.to_string())
    } else {
        StoreError::Permanent(error.to_string())
    }
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}
