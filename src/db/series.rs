//! Series CRUD.

use super::Store;
use crate::error::DatabaseError;
use crate::types::{Series, SeriesId, SeriesStatus, SeriesType};
use crate::{Error, Result};
use sqlx::Row;

fn status_to_str(status: SeriesStatus) -> &'static str {
    match status {
        SeriesStatus::Ongoing => "ongoing",
        SeriesStatus::Completed => "completed",
        SeriesStatus::Cancelled => "cancelled",
        SeriesStatus::Unknown => "unknown",
    }
}

fn status_from_str(s: &str) -> SeriesStatus {
    match s {
        "ongoing" => SeriesStatus::Ongoing,
        "completed" => SeriesStatus::Completed,
        "cancelled" => SeriesStatus::Cancelled,
        _ => SeriesStatus::Unknown,
    }
}

fn series_type_to_str(t: SeriesType) -> &'static str {
    match t {
        SeriesType::Manga => "manga",
        SeriesType::Comic => "comic",
        SeriesType::Manhwa => "manhwa",
    }
}

fn series_type_from_str(s: &str) -> SeriesType {
    match s {
        "comic" => SeriesType::Comic,
        "manhwa" => SeriesType::Manhwa,
        _ => SeriesType::Manga,
    }
}

fn row_to_series(row: sqlx::sqlite::SqliteRow) -> Result<Series> {
    let genres_json: String = row.try_get("genres").map_err(|e| {
        Error::Database(DatabaseError::QueryFailed(format!("reading genres: {e}")))
    })?;
    let genres: Vec<String> = serde_json::from_str(&genres_json)?;

    let status: String = row.try_get("status").map_err(|e| {
        Error::Database(DatabaseError::QueryFailed(format!("reading status: {e}")))
    })?;
    let series_type: String = row.try_get("series_type").map_err(|e| {
        Error::Database(DatabaseError::QueryFailed(format!(
            "reading series_type: {e}"
        )))
    })?;

    Ok(Series {
        id: SeriesId(row.try_get("id").map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!("reading id: {e}")))
        })?),
        title: row.try_get("title").map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!("reading title: {e}")))
        })?,
        author: row.try_get("author").ok(),
        artist: row.try_get("artist").ok(),
        description: row.try_get("description").ok(),
        genres,
        status: status_from_str(&status),
        series_type: series_type_from_str(&series_type),
        storage_path: row.try_get("storage_path").map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "reading storage_path: {e}"
            )))
        })?,
        pause_downloads: row.try_get::<i64, _>("pause_downloads").map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "reading pause_downloads: {e}"
            )))
        })? != 0,
        chapter_count: row.try_get::<i64, _>("chapter_count").map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "reading chapter_count: {e}"
            )))
        })? as u32,
    })
}

impl Store {
    /// Insert a new series, returning its assigned id.
    pub async fn insert_series(&self, series: &Series) -> Result<SeriesId> {
        let genres_json = serde_json::to_string(&series.genres)?;
        let row = sqlx::query(
            r#"
            INSERT INTO series
                (title, author, artist, description, genres, status, series_type,
                 storage_path, pause_downloads, chapter_count)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&series.title)
        .bind(&series.author)
        .bind(&series.artist)
        .bind(&series.description)
        .bind(genres_json)
        .bind(status_to_str(series.status))
        .bind(series_type_to_str(series.series_type))
        .bind(&series.storage_path)
        .bind(series.pause_downloads as i64)
        .bind(series.chapter_count as i64)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Error::Database(DatabaseError::QueryFailed(format!("insert series: {e}"))))?;

        Ok(SeriesId(row.try_get("id").map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "reading inserted id: {e}"
            )))
        })?))
    }

    /// Fetch a series by id.
    pub async fn get_series(&self, id: SeriesId) -> Result<Option<Series>> {
        let row = sqlx::query("SELECT * FROM series WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Database(DatabaseError::QueryFailed(format!("get series: {e}"))))?;

        row.map(row_to_series).transpose()
    }

    /// List every series.
    pub async fn list_series(&self) -> Result<Vec<Series>> {
        let rows = sqlx::query("SELECT * FROM series ORDER BY title ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::Database(DatabaseError::QueryFailed(format!("list series: {e}"))))?;

        rows.into_iter().map(row_to_series).collect()
    }

    /// Persist mutated series fields (full row replace).
    pub async fn update_series(&self, series: &Series) -> Result<()> {
        let genres_json = serde_json::to_string(&series.genres)?;
        let result = sqlx::query(
            r#"
            UPDATE series SET
                title = ?, author = ?, artist = ?, description = ?, genres = ?,
                status = ?, series_type = ?, storage_path = ?, pause_downloads = ?,
                chapter_count = ?
            WHERE id = ?
            "#,
        )
        .bind(&series.title)
        .bind(&series.author)
        .bind(&series.artist)
        .bind(&series.description)
        .bind(genres_json)
        .bind(status_to_str(series.status))
        .bind(series_type_to_str(series.series_type))
        .bind(&series.storage_path)
        .bind(series.pause_downloads as i64)
        .bind(series.chapter_count as i64)
        .bind(series.id)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(DatabaseError::QueryFailed(format!("update series: {e}"))))?;

        if result.rows_affected() == 0 {
            return Err(Error::Database(DatabaseError::NotFound(format!(
                "series {}",
                series.id
            ))));
        }
        Ok(())
    }

    /// Set a series's `pause_downloads` flag.
    pub async fn set_series_pause(&self, id: SeriesId, paused: bool) -> Result<()> {
        let result = sqlx::query("UPDATE series SET pause_downloads = ? WHERE id = ?")
            .bind(paused as i64)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "set series pause flag: {e}"
                )))
            })?;

        if result.rows_affected() == 0 {
            return Err(Error::Database(DatabaseError::NotFound(format!(
                "series {id}"
            ))));
        }
        Ok(())
    }

    /// Delete a series (explicit user delete only, per the data model).
    pub async fn delete_series(&self, id: SeriesId) -> Result<()> {
        let result = sqlx::query("DELETE FROM series WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Database(DatabaseError::QueryFailed(format!("delete series: {e}"))))?;

        if result.rows_affected() == 0 {
            return Err(Error::Database(DatabaseError::NotFound(format!(
                "series {id}"
            ))));
        }
        Ok(())
    }
}
