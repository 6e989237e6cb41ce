//! Core types for kaizoku-core

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a series
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeriesId(pub i64);

/// Unique identifier for a provider (one source's view of a series)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(pub i64);

/// Unique identifier for a download queue item
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueItemId(pub uuid::Uuid);

impl QueueItemId {
    /// Generate a fresh random id
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for QueueItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for QueueItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! id_newtype_sqlx_i64 {
    ($ty:ident) => {
        impl From<i64> for $ty {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl From<$ty> for i64 {
            fn from(id: $ty) -> Self {
                id.0
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl sqlx::Type<sqlx::Sqlite> for $ty {
            fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
                <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
            }

            fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
                <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
            }
        }

        impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for $ty {
            fn encode_by_ref(
                &self,
                buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
            ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
                sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for $ty {
            fn decode(
                value: sqlx::sqlite::SqliteValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
                Ok(Self(id))
            }
        }
    };
}

id_newtype_sqlx_i64!(SeriesId);
id_newtype_sqlx_i64!(ProviderId);

impl sqlx::Type<sqlx::Sqlite> for QueueItemId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for QueueItemId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0.to_string(), buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for QueueItemId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <String as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(uuid::Uuid::parse_str(&s)?))
    }
}

/// Descriptive status of a logical series
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeriesStatus {
    /// Still being published
    Ongoing,
    /// Publication finished
    Completed,
    /// Publication abandoned
    Cancelled,
    /// Unknown to the source
    Unknown,
}

/// The kind of published work
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeriesType {
    /// Japanese-style comic, read right-to-left
    Manga,
    /// Western-style comic, read left-to-right
    Comic,
    /// Korean webtoon, read top-to-bottom
    Manhwa,
}

/// A logical work tracked across one or more providers
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Series {
    /// Stable id
    pub id: SeriesId,
    /// Display title
    pub title: String,
    /// Author credit
    pub author: Option<String>,
    /// Artist credit
    pub artist: Option<String>,
    /// Free-text description
    pub description: Option<String>,
    /// Genre list
    pub genres: Vec<String>,
    /// Publication status
    pub status: SeriesStatus,
    /// Work type, drives the archive metadata's reading-direction hint
    pub series_type: SeriesType,
    /// Path relative to the storage root
    pub storage_path: String,
    /// When true, the dispatcher fails queued items for this series without network I/O
    pub pause_downloads: bool,
    /// Cached chapter-count hint, refreshed on reconsolidation
    pub chapter_count: u32,
}

/// Provider-level flags
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderFlags {
    /// The user disabled this provider; its files are kept but not updated
    pub disabled: bool,
    /// The backing extension was uninstalled
    pub uninstalled: bool,
    /// This is a retained record with no live source (source id == 0)
    pub unknown: bool,
    /// Prefer this provider's title for the series
    pub use_as_title: bool,
    /// Prefer this provider's cover for the series
    pub use_as_cover: bool,
}

impl ProviderFlags {
    /// True if this provider should not be scheduled new work
    pub fn is_inactive(&self) -> bool {
        self.disabled || self.uninstalled || self.unknown
    }
}

/// One source's view of a series
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Provider {
    /// Stable id
    pub id: ProviderId,
    /// Parent series
    pub series_id: SeriesId,
    /// Opaque id on the source's side; 0 for unknown providers
    pub source_id: i64,
    /// Name of the backing extension/source
    pub name: String,
    /// Scanlator group, if the source distinguishes one
    pub scanlator: Option<String>,
    /// ISO language code
    pub language: String,
    /// 0 = most preferred
    pub importance: u32,
    /// Disabled/uninstalled/unknown/title/cover flags
    pub flags: ProviderFlags,
    /// Chapters at or below this number are skipped on import
    pub continue_after_chapter: Option<f64>,
    /// Provider-reported title, if it differs from the series title
    pub title: Option<String>,
    /// Provider-reported description
    pub description: Option<String>,
    /// Provider-reported artist
    pub artist: Option<String>,
    /// Provider-reported author
    pub author: Option<String>,
    /// Embedded ordered chapter list
    pub chapters: Vec<Chapter>,
    /// Last time this provider's remote chapter list was fetched
    pub fetched_at: Option<DateTime<Utc>>,
}

impl Provider {
    /// Chapter numbers currently present on disk for this provider
    pub fn downloaded_numbers(&self) -> impl Iterator<Item = f64> + '_ {
        self.chapters.iter().filter(|c| c.is_present()).filter_map(|c| c.number)
    }

    /// Recompute `continue_after_chapter` from the present chapters
    pub fn recompute_continue_after_chapter(&mut self) {
        self.continue_after_chapter = self
            .downloaded_numbers()
            .fold(None, |acc, n| Some(acc.map_or(n, |a: f64| a.max(n))));
    }

    /// Find a chapter by its number identity, if any
    pub fn chapter_by_number(&self, number: f64) -> Option<&Chapter> {
        self.chapters.iter().find(|c| c.number == Some(number))
    }

    /// Find a chapter by its number identity, mutably
    pub fn chapter_by_number_mut(&mut self, number: f64) -> Option<&mut Chapter> {
        self.chapters.iter_mut().find(|c| c.number == Some(number))
    }
}

/// One chapter as seen through a provider
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Chapter {
    /// Display name
    pub name: String,
    /// Chapter number; the identity key for cross-provider comparison
    pub number: Option<f64>,
    /// Index of this chapter within the provider's remote listing
    pub source_index: i64,
    /// Remote URL for this chapter
    pub url: String,
    /// When this chapter was uploaded at the source
    pub uploaded_at: Option<DateTime<Utc>>,
    /// Page count, once known
    pub page_count: Option<u32>,
    /// Local filename; empty if not downloaded
    pub filename: String,
    /// When this chapter was downloaded
    pub downloaded_at: Option<DateTime<Utc>>,
    /// Hint that this chapter should be (re)downloaded
    pub should_download: bool,
    /// Set by the verifier when the backing file was removed/invalidated
    pub is_deleted: bool,
}

impl Chapter {
    /// True when this chapter has a non-empty filename and has not been marked deleted
    pub fn is_present(&self) -> bool {
        !self.filename.is_empty() && !self.is_deleted
    }
}

/// Status of a queued download
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    /// Waiting for a dispatcher slot
    Waiting,
    /// Currently executing
    Running,
    /// Finished successfully
    Completed,
    /// Terminal failure (cascade has ended, or never started)
    Failed,
}

impl QueueStatus {
    /// Decode from the integer representation stored in SQLite
    pub fn from_i32(v: i32) -> Self {
        match v {
            0 => QueueStatus::Waiting,
            1 => QueueStatus::Running,
            2 => QueueStatus::Completed,
            _ => QueueStatus::Failed,
        }
    }

    /// Encode to the integer representation stored in SQLite
    pub fn to_i32(self) -> i32 {
        match self {
            QueueStatus::Waiting => 0,
            QueueStatus::Running => 1,
            QueueStatus::Completed => 2,
            QueueStatus::Failed => 3,
        }
    }
}

/// One fallback candidate in a `DownloadArgs` cascade chain
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FallbackProvider {
    /// Candidate provider id
    pub provider_id: ProviderId,
    /// Candidate's source-side id
    pub source_id: i64,
    /// Candidate's importance
    pub importance: u32,
}

/// Replacement-specific fields on a `DownloadArgs`, present only for replacement jobs
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplacementInfo {
    /// The provider whose file this job will replace
    pub replacing_provider_id: ProviderId,
    /// The filename being replaced
    pub replacing_filename: String,
    /// Number of times this specific replacement has been retried
    pub replacement_retry: u32,
}

/// The full payload of one scheduled download
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadArgs {
    /// Target series
    pub series_id: SeriesId,
    /// Target provider
    pub provider_id: ProviderId,
    /// Index of this chapter in the provider's remote chapter list
    pub source_chapter_index: i64,
    /// Chapter number
    pub chapter_number: Option<f64>,
    /// Chapter display name
    pub chapter_name: String,
    /// Provider name (denormalized for execution without a join)
    pub provider_name: String,
    /// Scanlator (denormalized)
    pub scanlator: Option<String>,
    /// Language (denormalized)
    pub language: String,
    /// Series title (denormalized)
    pub title: String,
    /// Storage path relative to the storage root (denormalized)
    pub storage_path: String,
    /// Remote URL for this chapter
    pub url: String,
    /// Upload timestamp
    pub uploaded_at: Option<DateTime<Utc>>,
    /// Page-count hint, if already known
    pub page_count_hint: Option<u32>,
    /// Ordered list of fallback providers, most-preferred first
    pub fallback_providers: Vec<FallbackProvider>,
    /// Number of full-cascade-retry cycles consumed so far
    pub cascade_retries: u32,
    /// Present only for replacement downloads
    pub replacement: Option<ReplacementInfo>,
}

/// One unit of scheduled work
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadQueueItem {
    /// Unique id
    pub id: QueueItemId,
    /// Used for per-group capacity; the provider name
    pub group_key: String,
    /// Current lifecycle status
    pub status: QueueStatus,
    /// Lower values start earlier
    pub priority: i64,
    /// Items are only eligible once `now >= scheduled_at`
    pub scheduled_at: DateTime<Utc>,
    /// Set when the dispatcher picks this item up
    pub started_at: Option<DateTime<Utc>>,
    /// Set when execution finishes (success or failure)
    pub completed_at: Option<DateTime<Utc>>,
    /// The full download payload
    pub args: DownloadArgs,
}

/// Metadata embedded in a built archive
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArchiveMetadata {
    /// Chapter title
    pub title: String,
    /// Series title
    pub series: String,
    /// Localized series title, if any
    pub localized_series: Option<String>,
    /// Chapter number
    pub number: Option<f64>,
    /// Total chapter count hint
    pub count: Option<u32>,
    /// Page count
    pub page_count: u32,
    /// Always "Web"
    pub format: String,
    /// ISO language code
    pub language: String,
    /// Comma-separated genre list
    pub tags: String,
    /// Author credit
    pub writer: Option<String>,
    /// Provider name
    pub publisher: String,
    /// Scanlator credit
    pub translator: Option<String>,
    /// Artist credit
    pub cover_artist: Option<String>,
    /// Upload day
    pub day: Option<u32>,
    /// Upload month
    pub month: Option<u32>,
    /// Upload year
    pub year: Option<i32>,
    /// "right-to-left" when the series type is manga
    pub reading_direction: Option<String>,
}

/// Progress update broadcast on the [`crate::progress::ProgressBus`]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// Identifies which job this update belongs to
    pub job_id: String,
    /// Coarse classification of the job (e.g. "download", "verify")
    pub job_type: String,
    /// Human-readable status label
    pub status: String,
    /// Completion percentage, 0.0-100.0
    pub percentage: f32,
    /// Human-readable message
    pub message: String,
    /// Opaque, job-type-specific parameter
    pub opaque_param: Option<serde_json::Value>,
}

/// Live queue counts, exposed by [`crate::dispatcher::DownloadDispatcher`]
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct QueueCounts {
    /// Currently running items
    pub running: u64,
    /// Items waiting for a slot
    pub waiting: u64,
    /// Terminally failed items
    pub failed: u64,
}
