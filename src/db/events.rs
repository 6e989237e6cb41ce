//! Event-log outcome persistence backing the [`crate::event_logger::EventLogger`].

use super::Store;
use crate::error::DatabaseError;
use crate::{Error, Result};
use sqlx::Row;

/// One outcome record to be inserted into the event log.
#[derive(Debug, Clone)]
pub struct NewEventOutcome {
    /// Source id the call targeted, if any
    pub source_id: Option<i64>,
    /// Source name, for display without a join
    pub source_name: Option<String>,
    /// Language, for display without a join
    pub language: Option<String>,
    /// Coarse event type (e.g. "fetch_chapters", "download_page")
    pub event_type: String,
    /// "ok" or "error"
    pub status: String,
    /// Wall-clock duration of the call
    pub duration_ms: i64,
    /// Error message, if any
    pub error: Option<String>,
    /// Error category per the spec's fixed taxonomy
    pub error_category: Option<String>,
    /// Item count the call produced/consumed, if applicable
    pub items_count: Option<i64>,
    /// Arbitrary structured metadata
    pub metadata: Option<serde_json::Value>,
}

/// An event-log outcome record as read back from the database.
#[derive(Debug, Clone)]
pub struct EventOutcome {
    /// Unique database id
    pub id: i64,
    /// Source id the call targeted, if any
    pub source_id: Option<i64>,
    /// Source name
    pub source_name: Option<String>,
    /// Language
    pub language: Option<String>,
    /// Coarse event type
    pub event_type: String,
    /// "ok" or "error"
    pub status: String,
    /// Wall-clock duration of the call
    pub duration_ms: i64,
    /// Error message, if any
    pub error: Option<String>,
    /// Error category
    pub error_category: Option<String>,
    /// Item count, if applicable
    pub items_count: Option<i64>,
    /// Arbitrary structured metadata
    pub metadata: Option<serde_json::Value>,
    /// Unix timestamp the outcome was recorded
    pub created_at: i64,
}

impl Store {
    /// Record one event-log outcome.
    pub async fn record_event(&self, outcome: &NewEventOutcome) -> Result<i64> {
        let metadata_json = outcome
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let row = sqlx::query(
            r#"
            INSERT INTO event_log
                (source_id, source_name, language, event_type, status, duration_ms,
                 error, error_category, items_count, metadata, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, strftime('%s', 'now'))
            RETURNING id
            "#,
        )
        .bind(outcome.source_id)
        .bind(&outcome.source_name)
        .bind(&outcome.language)
        .bind(&outcome.event_type)
        .bind(&outcome.status)
        .bind(outcome.duration_ms)
        .bind(&outcome.error)
        .bind(&outcome.error_category)
        .bind(outcome.items_count)
        .bind(metadata_json)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Error::Database(DatabaseError::QueryFailed(format!("record event: {e}"))))?;

        row.try_get("id").map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "reading inserted id: {e}"
            )))
        })
    }

    /// Most recent event-log records, newest first.
    pub async fn recent_events(&self, limit: i64) -> Result<Vec<EventOutcome>> {
        let rows = sqlx::query("SELECT * FROM event_log ORDER BY id DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "list recent events: {e}"
                )))
            })?;

        rows.into_iter()
            .map(|row| {
                let metadata_json: Option<String> = row.try_get("metadata").ok();
                let metadata = metadata_json
                    .map(|s| serde_json::from_str(&s))
                    .transpose()?;

                Ok(EventOutcome {
                    id: row.try_get("id").map_err(|e| {
                        Error::Database(DatabaseError::QueryFailed(format!(
                            "reading id: {e}"
                        )))
                    })?,
                    source_id: row.try_get("source_id").ok(),
                    source_name: row.try_get("source_name").ok(),
                    language: row.try_get("language").ok(),
                    event_type: row.try_get("event_type").map_err(|e| {
                        Error::Database(DatabaseError::QueryFailed(format!(
                            "reading event_type: {e}"
                        )))
                    })?,
                    status: row.try_get("status").map_err(|e| {
                        Error::Database(DatabaseError::QueryFailed(format!(
                            "reading status: {e}"
                        )))
                    })?,
                    duration_ms: row.try_get("duration_ms").map_err(|e| {
                        Error::Database(DatabaseError::QueryFailed(format!(
                            "reading duration_ms: {e}"
                        )))
                    })?,
                    error: row.try_get("error").ok(),
                    error_category: row.try_get("error_category").ok(),
                    items_count: row.try_get("items_count").ok(),
                    metadata,
                    created_at: row.try_get("created_at").map_err(|e| {
                        Error::Database(DatabaseError::QueryFailed(format!(
                            "reading created_at: {e}"
                        )))
                    })?,
                })
            })
            .collect()
    }
}
