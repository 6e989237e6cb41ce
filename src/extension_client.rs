//! The extension-host seam: an opaque RPC surface for listing sources, searching,
//! and fetching series/chapter/page content. The real WASM/RPC-backed
//! implementation lives outside this crate; only the trait and a `NoOp` stand-in
//! used in tests are specified here.

use crate::error::ExtensionError;
use crate::Result;
use async_trait::async_trait;

/// One page's raw bytes plus its HTTP-style content type.
#[derive(Debug, Clone)]
pub struct PageData {
    /// Raw image bytes
    pub bytes: Vec<u8>,
    /// Content type, e.g. "image/jpeg"
    pub content_type: String,
}

/// Remote metadata for a series, as reported by one source.
#[derive(Debug, Clone)]
pub struct RemoteSeriesInfo {
    /// Title as the source reports it
    pub title: String,
    /// Author credit
    pub author: Option<String>,
    /// Artist credit
    pub artist: Option<String>,
    /// Description
    pub description: Option<String>,
    /// Genre list
    pub genres: Vec<String>,
    /// Publication status, source-reported
    pub status: crate::types::SeriesStatus,
}

/// One chapter entry as reported by a source's remote chapter list.
#[derive(Debug, Clone)]
pub struct RemoteChapterInfo {
    /// Display name
    pub name: String,
    /// Chapter number, if the source reports one
    pub number: Option<f64>,
    /// Index of this chapter within the source's listing
    pub source_index: i64,
    /// Remote URL
    pub url: String,
    /// Upload timestamp
    pub uploaded_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Scanlator credit, if the source distinguishes one
    pub scanlator: Option<String>,
}

/// A single listed source/extension.
#[derive(Debug, Clone)]
pub struct SourceInfo {
    /// Opaque source id
    pub id: i64,
    /// Display name
    pub name: String,
    /// ISO language code
    pub language: String,
}

/// A page of search/listing results.
#[derive(Debug, Clone)]
pub struct SeriesPage {
    /// Matching series, source-side identifiers only
    pub items: Vec<RemoteSeriesInfo>,
    /// Whether a further page is available
    pub has_next_page: bool,
}

/// Opaque adapter to the extension host (spec.md §6 extension host adapter).
///
/// Every method is a potential suspension point and may fail with
/// [`ExtensionError`]; callers (the orchestrator, the dispatcher's download
/// execution) are responsible for timing out and classifying failures for
/// the [`crate::event_logger::EventLogger`].
#[async_trait]
pub trait ExtensionClient: Send + Sync {
    /// List installed sources.
    async fn list_sources(&self) -> Result<Vec<SourceInfo>>;

    /// Search a source for series matching a keyword.
    async fn search_series(&self, source_id: i64, keyword: &str, page: u32) -> Result<SeriesPage>;

    /// List the latest series for a source.
    async fn get_latest_series(&self, source_id: i64, page: u32) -> Result<SeriesPage>;

    /// List the most popular series for a source.
    async fn get_popular_series(&self, source_id: i64, page: u32) -> Result<SeriesPage>;

    /// Fetch full remote metadata for one series.
    async fn get_series_full(&self, source_id: i64, online_fetch: bool) -> Result<RemoteSeriesInfo>;

    /// Fetch one chapter's metadata, triggering the chapter-load side effect
    /// sources require before pages become available.
    async fn get_chapter(&self, source_id: i64, chapter_index: i64) -> Result<RemoteChapterInfo>;

    /// List every remote chapter for a series.
    async fn get_chapters(
        &self,
        source_id: i64,
        online_fetch: bool,
    ) -> Result<Vec<RemoteChapterInfo>>;

    /// Fetch one page's bytes. Returns [`ExtensionError::NotFound`]-flavored
    /// [`crate::Error::Extension`] when the page index doesn't exist, the
    /// authoritative signal that terminates the dispatcher's page loop.
    async fn get_page(&self, source_id: i64, chapter_index: i64, page_index: u32)
        -> Result<PageData>;

    /// Fetch a series' thumbnail image.
    async fn get_thumbnail(&self, source_id: i64) -> Result<PageData>;
}

/// A no-op [`ExtensionClient`] usable in tests: every chapter has zero pages
/// available, so any download execution started against it completes the
/// metadata-fetch step then fails with "zero pages collected".
#[derive(Debug, Clone, Default)]
pub struct NoOpExtensionClient;

#[async_trait]
impl ExtensionClient for NoOpExtensionClient {
    async fn list_sources(&self) -> Result<Vec<SourceInfo>> {
        Ok(vec![])
    }

    async fn search_series(&self, _source_id: i64, _keyword: &str, _page: u32) -> Result<SeriesPage> {
        Ok(SeriesPage {
            items: vec![],
            has_next_page: false,
        })
    }

    async fn get_latest_series(&self, _source_id: i64, _page: u32) -> Result<SeriesPage> {
        Ok(SeriesPage {
            items: vec![],
            has_next_page: false,
        })
    }

    async fn get_popular_series(&self, _source_id: i64, _page: u32) -> Result<SeriesPage> {
        Ok(SeriesPage {
            items: vec![],
            has_next_page: false,
        })
    }

    async fn get_series_full(&self, source_id: i64, _online_fetch: bool) -> Result<RemoteSeriesInfo> {
        Err(ExtensionError::NotFound(source_id.to_string()).into())
    }

    async fn get_chapter(&self, source_id: i64, _chapter_index: i64) -> Result<RemoteChapterInfo> {
        Err(ExtensionError::NotFound(source_id.to_string()).into())
    }

    async fn get_chapters(
        &self,
        _source_id: i64,
        _online_fetch: bool,
    ) -> Result<Vec<RemoteChapterInfo>> {
        Ok(vec![])
    }

    async fn get_page(
        &self,
        source_id: i64,
        _chapter_index: i64,
        _page_index: u32,
    ) -> Result<PageData> {
        Err(ExtensionError::NotFound(source_id.to_string()).into())
    }

    async fn get_thumbnail(&self, source_id: i64) -> Result<PageData> {
        Err(ExtensionError::NotFound(source_id.to_string()).into())
    }
}
