//! Download queue CRUD and the dispatcher-facing queries that back the fair-share tick.

use super::Store;
use crate::error::DatabaseError;
use crate::types::{DownloadArgs, DownloadQueueItem, QueueCounts, QueueItemId, QueueStatus};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::Row;

fn row_to_item(row: sqlx::sqlite::SqliteRow) -> Result<DownloadQueueItem> {
    let id_str: String = row.try_get("id").map_err(|e| {
        Error::Database(DatabaseError::QueryFailed(format!("reading id: {e}")))
    })?;
    let args_json: String = row.try_get("args").map_err(|e| {
        Error::Database(DatabaseError::QueryFailed(format!("reading args: {e}")))
    })?;
    let args: DownloadArgs = serde_json::from_str(&args_json)?;

    Ok(DownloadQueueItem {
        id: QueueItemId(uuid::Uuid::parse_str(&id_str)?),
        group_key: row.try_get("group_key").map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "reading group_key: {e}"
            )))
        })?,
        status: QueueStatus::from_i32(row.try_get("status").map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!("reading status: {e}")))
        })?),
        priority: row.try_get("priority").map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "reading priority: {e}"
            )))
        })?,
        scheduled_at: timestamp_to_utc(row.try_get("scheduled_at").map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "reading scheduled_at: {e}"
            )))
        })?),
        started_at: row
            .try_get::<Option<i64>, _>("started_at")
            .ok()
            .flatten()
            .map(timestamp_to_utc),
        completed_at: row
            .try_get::<Option<i64>, _>("completed_at")
            .ok()
            .flatten()
            .map(timestamp_to_utc),
        args,
    })
}

fn timestamp_to_utc(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_else(Utc::now)
}

impl Store {
    /// Enqueue a new download at the given schedule time, in `waiting` status.
    pub async fn enqueue(
        &self,
        group_key: &str,
        priority: i64,
        scheduled_at: DateTime<Utc>,
        args: &DownloadArgs,
    ) -> Result<QueueItemId> {
        let id = QueueItemId::new();
        let args_json = serde_json::to_string(args)?;

        sqlx::query(
            r#"
            INSERT INTO download_queue (id, group_key, status, priority, scheduled_at, args)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(group_key)
        .bind(QueueStatus::Waiting.to_i32())
        .bind(priority)
        .bind(scheduled_at.timestamp())
        .bind(args_json)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(DatabaseError::QueryFailed(format!("enqueue: {e}"))))?;

        Ok(id)
    }

    /// Fetch one queue item by id.
    pub async fn get_queue_item(&self, id: QueueItemId) -> Result<Option<DownloadQueueItem>> {
        let row = sqlx::query("SELECT * FROM download_queue WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "get queue item: {e}"
                )))
            })?;

        row.map(row_to_item).transpose()
    }

    /// Distinct group keys with at least one eligible (`waiting`, `scheduled_at <= now`) item.
    /// Returned in sorted order for reproducible round-robin iteration.
    pub async fn waiting_group_keys(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT group_key FROM download_queue \
             WHERE status = ? AND scheduled_at <= ? ORDER BY group_key ASC",
        )
        .bind(QueueStatus::Waiting.to_i32())
        .bind(now.timestamp())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "query waiting group keys: {e}"
            )))
        })?;

        rows.into_iter()
            .map(|row| {
                row.try_get("group_key").map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "reading group_key: {e}"
                    )))
                })
            })
            .collect()
    }

    /// Current running-item count, total and per group (keyed by `group_key`).
    pub async fn running_counts(&self) -> Result<QueueRunningCounts> {
        let rows = sqlx::query(
            "SELECT group_key, COUNT(*) as n FROM download_queue WHERE status = ? GROUP BY group_key",
        )
        .bind(QueueStatus::Running.to_i32())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "query running counts: {e}"
            )))
        })?;

        let mut per_group = std::collections::HashMap::new();
        let mut total = 0u64;
        for row in rows {
            let group: String = row.try_get("group_key").map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "reading group_key: {e}"
                )))
            })?;
            let n: i64 = row.try_get("n").map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!("reading count: {e}")))
            })?;
            total += n as u64;
            per_group.insert(group, n as u64);
        }

        Ok(QueueRunningCounts { total, per_group })
    }

    /// Up to `limit` eligible waiting items for one group, ordered `(priority, scheduled_at, id)`.
    pub async fn waiting_items_for_group(
        &self,
        group_key: &str,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<DownloadQueueItem>> {
        let rows = sqlx::query(
            "SELECT * FROM download_queue \
             WHERE status = ? AND group_key = ? AND scheduled_at <= ? \
             ORDER BY priority ASC, scheduled_at ASC, id ASC \
             LIMIT ?",
        )
        .bind(QueueStatus::Waiting.to_i32())
        .bind(group_key)
        .bind(now.timestamp())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "query waiting items for group: {e}"
            )))
        })?;

        rows.into_iter().map(row_to_item).collect()
    }

    /// Transition an item from `waiting` to `running`, stamping `started_at`.
    pub async fn mark_running(&self, id: QueueItemId, started_at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE download_queue SET status = ?, started_at = ? WHERE id = ? AND status = ?",
        )
        .bind(QueueStatus::Running.to_i32())
        .bind(started_at.timestamp())
        .bind(id)
        .bind(QueueStatus::Waiting.to_i32())
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(DatabaseError::QueryFailed(format!("mark running: {e}"))))?;

        if result.rows_affected() == 0 {
            return Err(Error::Database(DatabaseError::NotFound(format!(
                "waiting queue item {id}"
            ))));
        }
        Ok(())
    }

    /// Transition an item to `completed`, stamping `completed_at`.
    pub async fn mark_completed(&self, id: QueueItemId, completed_at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE download_queue SET status = ?, completed_at = ? WHERE id = ?")
            .bind(QueueStatus::Completed.to_i32())
            .bind(completed_at.timestamp())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "mark completed: {e}"
                )))
            })?;
        Ok(())
    }

    /// Transition an item to `failed`, stamping `completed_at`.
    pub async fn mark_failed(&self, id: QueueItemId, completed_at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE download_queue SET status = ?, completed_at = ? WHERE id = ?")
            .bind(QueueStatus::Failed.to_i32())
            .bind(completed_at.timestamp())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Database(DatabaseError::QueryFailed(format!("mark failed: {e}"))))?;
        Ok(())
    }

    /// Return an item to `waiting` with `scheduled_at = now`, clearing timestamps.
    pub async fn retry(&self, id: QueueItemId, now: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE download_queue \
             SET status = ?, scheduled_at = ?, started_at = NULL, completed_at = NULL \
             WHERE id = ?",
        )
        .bind(QueueStatus::Waiting.to_i32())
        .bind(now.timestamp())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(DatabaseError::QueryFailed(format!("retry: {e}"))))?;

        if result.rows_affected() == 0 {
            return Err(Error::Database(DatabaseError::NotFound(format!(
                "queue item {id}"
            ))));
        }
        Ok(())
    }

    /// Delete a queue item outright (used when the cascade enqueues a follow-up).
    pub async fn delete_queue_item(&self, id: QueueItemId) -> Result<()> {
        sqlx::query("DELETE FROM download_queue WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "delete queue item: {e}"
                )))
            })?;
        Ok(())
    }

    /// Reset every `running` item back to `waiting` (crash recovery on startup).
    pub async fn reset_running_to_waiting(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE download_queue SET status = ?, started_at = NULL WHERE status = ?",
        )
        .bind(QueueStatus::Waiting.to_i32())
        .bind(QueueStatus::Running.to_i32())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "reset running to waiting: {e}"
            )))
        })?;

        Ok(result.rows_affected())
    }

    /// Delete every `waiting` item matching a predicate over group key / series id,
    /// used by `CancelSeries`/`CancelProvider`/`PauseSeries`-style operations.
    /// Never touches `running` items.
    pub async fn delete_waiting_matching(&self, series_id: Option<i64>) -> Result<u64> {
        let result = match series_id {
            Some(series_id) => {
                sqlx::query(
                    "DELETE FROM download_queue \
                     WHERE status = ? AND json_extract(args, '$.series_id') = ?",
                )
                .bind(QueueStatus::Waiting.to_i32())
                .bind(series_id)
                .execute(&self.pool)
                .await
            }
            None => {
                sqlx::query("DELETE FROM download_queue WHERE status = ?")
                    .bind(QueueStatus::Waiting.to_i32())
                    .execute(&self.pool)
                    .await
            }
        }
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "delete waiting matching: {e}"
            )))
        })?;

        Ok(result.rows_affected())
    }

    /// Delete every `waiting` item targeting one provider, used by
    /// `CancelProvider`/`CancelDisabledProviders`. Never touches `running` items.
    pub async fn delete_waiting_matching_provider(&self, provider_id: i64) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM download_queue \
             WHERE status = ? AND json_extract(args, '$.provider_id') = ?",
        )
        .bind(QueueStatus::Waiting.to_i32())
        .bind(provider_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "delete waiting matching provider: {e}"
            )))
        })?;

        Ok(result.rows_affected())
    }

    /// Paginated listing of every queue item targeting one series, regardless
    /// of status, most recently scheduled first.
    pub async fn list_for_series(
        &self,
        series_id: i64,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<DownloadQueueItem>> {
        let rows = sqlx::query(
            "SELECT * FROM download_queue WHERE json_extract(args, '$.series_id') = ? \
             ORDER BY scheduled_at DESC LIMIT ? OFFSET ?",
        )
        .bind(series_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "list for series: {e}"
            )))
        })?;

        rows.into_iter().map(row_to_item).collect()
    }

    /// Live counts of running/waiting/failed items.
    pub async fn queue_counts(&self) -> Result<QueueCounts> {
        let row = sqlx::query(
            r#"
            SELECT
                SUM(CASE WHEN status = ? THEN 1 ELSE 0 END) as running,
                SUM(CASE WHEN status = ? THEN 1 ELSE 0 END) as waiting,
                SUM(CASE WHEN status = ? THEN 1 ELSE 0 END) as failed
            FROM download_queue
            "#,
        )
        .bind(QueueStatus::Running.to_i32())
        .bind(QueueStatus::Waiting.to_i32())
        .bind(QueueStatus::Failed.to_i32())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "query queue counts: {e}"
            )))
        })?;

        Ok(QueueCounts {
            running: row.try_get::<Option<i64>, _>("running").unwrap_or(None).unwrap_or(0) as u64,
            waiting: row.try_get::<Option<i64>, _>("waiting").unwrap_or(None).unwrap_or(0) as u64,
            failed: row.try_get::<Option<i64>, _>("failed").unwrap_or(None).unwrap_or(0) as u64,
        })
    }

    /// Paginated listing of items in a given status, most recently scheduled first.
    pub async fn list_by_status(
        &self,
        status: QueueStatus,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<DownloadQueueItem>> {
        let rows = sqlx::query(
            "SELECT * FROM download_queue WHERE status = ? \
             ORDER BY scheduled_at DESC LIMIT ? OFFSET ?",
        )
        .bind(status.to_i32())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "list by status: {e}"
            )))
        })?;

        rows.into_iter().map(row_to_item).collect()
    }
}

/// Running counts snapshot used by the dispatcher tick.
#[derive(Debug, Clone, Default)]
pub struct QueueRunningCounts {
    /// Total running items across all groups
    pub total: u64,
    /// Running items keyed by group
    pub per_group: std::collections::HashMap<String, u64>,
}

impl QueueRunningCounts {
    /// Running count for a specific group, 0 if absent.
    pub fn for_group(&self, group: &str) -> u64 {
        self.per_group.get(group).copied().unwrap_or(0)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FallbackProvider, ProviderId, SeriesId};

    fn sample_args(series_id: i64, provider_id: i64) -> DownloadArgs {
        DownloadArgs {
            series_id: SeriesId(series_id),
            provider_id: ProviderId(provider_id),
            source_chapter_index: 0,
            chapter_number: Some(1.0),
            chapter_name: "Chapter 1".into(),
            provider_name: "group-a".into(),
            scanlator: None,
            language: "en".into(),
            title: "Title".into(),
            storage_path: "title".into(),
            url: "https://example.test".into(),
            uploaded_at: None,
            page_count_hint: None,
            fallback_providers: vec![FallbackProvider {
                provider_id: ProviderId(99),
                source_id: 1,
                importance: 1,
            }],
            cascade_retries: 0,
            replacement: None,
        }
    }

    #[tokio::test]
    async fn waiting_group_keys_is_sorted_and_excludes_future_items() {
        let store = Store::new_in_memory().await.unwrap();
        let now = Utc::now();

        store
            .enqueue("zeta", 0, now, &sample_args(1, 1))
            .await
            .unwrap();
        store
            .enqueue("alpha", 0, now, &sample_args(1, 1))
            .await
            .unwrap();
        store
            .enqueue(
                "future",
                0,
                now + chrono::Duration::hours(1),
                &sample_args(1, 1),
            )
            .await
            .unwrap();

        let groups = store.waiting_group_keys(now).await.unwrap();
        assert_eq!(groups, vec!["alpha".to_string(), "zeta".to_string()]);
    }

    #[tokio::test]
    async fn mark_running_then_mark_completed_updates_counts() {
        let store = Store::new_in_memory().await.unwrap();
        let now = Utc::now();
        let id = store.enqueue("a", 0, now, &sample_args(1, 1)).await.unwrap();

        store.mark_running(id, now).await.unwrap();
        let counts = store.queue_counts().await.unwrap();
        assert_eq!(counts.running, 1);
        assert_eq!(counts.waiting, 0);

        store.mark_completed(id, now).await.unwrap();
        let counts = store.queue_counts().await.unwrap();
        assert_eq!(counts.running, 0);

        let item = store.get_queue_item(id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Completed);
    }

    #[tokio::test]
    async fn delete_waiting_matching_series_never_touches_running() {
        let store = Store::new_in_memory().await.unwrap();
        let now = Utc::now();
        let waiting = store.enqueue("a", 0, now, &sample_args(5, 1)).await.unwrap();
        let running = store.enqueue("a", 0, now, &sample_args(5, 1)).await.unwrap();
        store.mark_running(running, now).await.unwrap();

        let deleted = store.delete_waiting_matching(Some(5)).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(store.get_queue_item(waiting).await.unwrap().is_none());
        assert!(store.get_queue_item(running).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delete_waiting_matching_provider_only_touches_that_provider() {
        let store = Store::new_in_memory().await.unwrap();
        let now = Utc::now();
        let target = store.enqueue("a", 0, now, &sample_args(1, 7)).await.unwrap();
        let other = store.enqueue("a", 0, now, &sample_args(1, 8)).await.unwrap();

        let deleted = store.delete_waiting_matching_provider(7).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(store.get_queue_item(target).await.unwrap().is_none());
        assert!(store.get_queue_item(other).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn list_for_series_includes_every_status() {
        let store = Store::new_in_memory().await.unwrap();
        let now = Utc::now();
        let waiting = store.enqueue("a", 0, now, &sample_args(3, 1)).await.unwrap();
        let running = store.enqueue("a", 0, now, &sample_args(3, 1)).await.unwrap();
        store.mark_running(running, now).await.unwrap();
        store.enqueue("a", 0, now, &sample_args(4, 1)).await.unwrap();

        let items = store.list_for_series(3, 0, 10).await.unwrap();
        let ids: Vec<_> = items.iter().map(|i| i.id).collect();
        assert_eq!(items.len(), 2);
        assert!(ids.contains(&waiting));
        assert!(ids.contains(&running));
    }
}
