//! Provider CRUD, including read-modify-write access to the embedded chapter list.

use super::Store;
use crate::error::DatabaseError;
use crate::types::{Chapter, Provider, ProviderFlags, ProviderId, SeriesId};
use crate::{Error, Result};
use sqlx::Row;

fn row_to_provider(row: sqlx::sqlite::SqliteRow) -> Result<Provider> {
    let chapters_json: String = row.try_get("chapters").map_err(|e| {
        Error::Database(DatabaseError::QueryFailed(format!(
            "reading chapters: {e}"
        )))
    })?;
    let chapters: Vec<Chapter> = serde_json::from_str(&chapters_json)?;

    let fetched_at: Option<i64> = row.try_get("fetched_at").ok();

    Ok(Provider {
        id: ProviderId(row.try_get("id").map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!("reading id: {e}")))
        })?),
        series_id: SeriesId(row.try_get("series_id").map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "reading series_id: {e}"
            )))
        })?),
        source_id: row.try_get("source_id").map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "reading source_id: {e}"
            )))
        })?,
        name: row.try_get("name").map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!("reading name: {e}")))
        })?,
        scanlator: row.try_get("scanlator").ok(),
        language: row.try_get("language").map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "reading language: {e}"
            )))
        })?,
        importance: row.try_get::<i64, _>("importance").map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "reading importance: {e}"
            )))
        })? as u32,
        flags: ProviderFlags {
            disabled: row.try_get::<i64, _>("disabled").unwrap_or(0) != 0,
            uninstalled: row.try_get::<i64, _>("uninstalled").unwrap_or(0) != 0,
            unknown: row.try_get::<i64, _>("unknown").unwrap_or(0) != 0,
            use_as_title: row.try_get::<i64, _>("use_as_title").unwrap_or(0) != 0,
            use_as_cover: row.try_get::<i64, _>("use_as_cover").unwrap_or(0) != 0,
        },
        continue_after_chapter: row.try_get("continue_after_chapter").ok(),
        title: row.try_get("title").ok(),
        description: row.try_get("description").ok(),
        artist: row.try_get("artist").ok(),
        author: row.try_get("author").ok(),
        chapters,
        fetched_at: fetched_at.and_then(|ts| chrono::DateTime::from_timestamp(ts, 0)),
    })
}

impl Store {
    /// Insert a new provider, returning its assigned id.
    pub async fn insert_provider(&self, provider: &Provider) -> Result<ProviderId> {
        let chapters_json = serde_json::to_string(&provider.chapters)?;
        let row = sqlx::query(
            r#"
            INSERT INTO providers
                (series_id, source_id, name, scanlator, language, importance,
                 disabled, uninstalled, unknown, use_as_title, use_as_cover,
                 continue_after_chapter, title, description, artist, author,
                 chapters, fetched_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(provider.series_id)
        .bind(provider.source_id)
        .bind(&provider.name)
        .bind(&provider.scanlator)
        .bind(&provider.language)
        .bind(provider.importance as i64)
        .bind(provider.flags.disabled as i64)
        .bind(provider.flags.uninstalled as i64)
        .bind(provider.flags.unknown as i64)
        .bind(provider.flags.use_as_title as i64)
        .bind(provider.flags.use_as_cover as i64)
        .bind(provider.continue_after_chapter)
        .bind(&provider.title)
        .bind(&provider.description)
        .bind(&provider.artist)
        .bind(&provider.author)
        .bind(chapters_json)
        .bind(provider.fetched_at.map(|d| d.timestamp()))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Error::Database(DatabaseError::QueryFailed(format!("insert provider: {e}"))))?;

        Ok(ProviderId(row.try_get("id").map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "reading inserted id: {e}"
            )))
        })?))
    }

    /// Fetch a provider by id.
    pub async fn get_provider(&self, id: ProviderId) -> Result<Option<Provider>> {
        let row = sqlx::query("SELECT * FROM providers WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!("get provider: {e}")))
            })?;

        row.map(row_to_provider).transpose()
    }

    /// List every provider for a series, ordered by importance (0 = most preferred, first).
    pub async fn list_providers_for_series(&self, series_id: SeriesId) -> Result<Vec<Provider>> {
        let rows = sqlx::query(
            "SELECT * FROM providers WHERE series_id = ? ORDER BY importance ASC, id ASC",
        )
        .bind(series_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "list providers for series: {e}"
            )))
        })?;

        rows.into_iter().map(row_to_provider).collect()
    }

    /// Persist a provider's full row, including its embedded chapter list
    /// (read-modify-write: callers load, mutate, and write back the whole record).
    pub async fn update_provider(&self, provider: &Provider) -> Result<()> {
        let chapters_json = serde_json::to_string(&provider.chapters)?;
        let result = sqlx::query(
            r#"
            UPDATE providers SET
                source_id = ?, name = ?, scanlator = ?, language = ?, importance = ?,
                disabled = ?, uninstalled = ?, unknown = ?, use_as_title = ?, use_as_cover = ?,
                continue_after_chapter = ?, title = ?, description = ?, artist = ?, author = ?,
                chapters = ?, fetched_at = ?
            WHERE id = ?
            "#,
        )
        .bind(provider.source_id)
        .bind(&provider.name)
        .bind(&provider.scanlator)
        .bind(&provider.language)
        .bind(provider.importance as i64)
        .bind(provider.flags.disabled as i64)
        .bind(provider.flags.uninstalled as i64)
        .bind(provider.flags.unknown as i64)
        .bind(provider.flags.use_as_title as i64)
        .bind(provider.flags.use_as_cover as i64)
        .bind(provider.continue_after_chapter)
        .bind(&provider.title)
        .bind(&provider.description)
        .bind(&provider.artist)
        .bind(&provider.author)
        .bind(chapters_json)
        .bind(provider.fetched_at.map(|d| d.timestamp()))
        .bind(provider.id)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(DatabaseError::QueryFailed(format!("update provider: {e}"))))?;

        if result.rows_affected() == 0 {
            return Err(Error::Database(DatabaseError::NotFound(format!(
                "provider {}",
                provider.id
            ))));
        }
        Ok(())
    }

    /// Mark a provider `unknown` (its source was removed but files must be preserved),
    /// per the data model's invariant that such providers are flagged rather than deleted.
    pub async fn mark_provider_unknown(&self, id: ProviderId) -> Result<()> {
        let result = sqlx::query("UPDATE providers SET unknown = 1, source_id = 0 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "mark provider unknown: {e}"
                )))
            })?;

        if result.rows_affected() == 0 {
            return Err(Error::Database(DatabaseError::NotFound(format!(
                "provider {id}"
            ))));
        }
        Ok(())
    }

    /// Delete a provider whose chapter list is entirely empty-filename
    /// (used by the verifier to prune dead unknown providers).
    pub async fn delete_provider(&self, id: ProviderId) -> Result<()> {
        let result = sqlx::query("DELETE FROM providers WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!("delete provider: {e}")))
            })?;

        if result.rows_affected() == 0 {
            return Err(Error::Database(DatabaseError::NotFound(format!(
                "provider {id}"
            ))));
        }
        Ok(())
    }
}
