//! Caller-facing queue operations and metrics (spec.md §4.1).
//!
//! Every cancel/pause operation here removes only `waiting` items matching
//! its predicate; `running` items are left to finish or fail on their own.

use super::DownloadDispatcher;
use crate::types::{DownloadArgs, ProviderId, QueueCounts, QueueItemId, QueueStatus, SeriesId};
use crate::Result;
use chrono::{DateTime, Utc};

impl DownloadDispatcher {
    /// Schedule a new download.
    pub async fn enqueue(
        &self,
        group_key: &str,
        priority: i64,
        scheduled_at: DateTime<Utc>,
        args: &DownloadArgs,
    ) -> Result<QueueItemId> {
        self.store.enqueue(group_key, priority, scheduled_at, args).await
    }

    /// Return a `failed` item to `waiting`, eligible immediately.
    pub async fn retry(&self, id: QueueItemId) -> Result<()> {
        self.store.retry(id, Utc::now()).await
    }

    /// Delete a queue item outright, regardless of its current status.
    pub async fn delete(&self, id: QueueItemId) -> Result<()> {
        self.store.delete_queue_item(id).await
    }

    /// Remove every `waiting` item for a series. Running items are left to
    /// finish or fail on their own.
    pub async fn cancel_series(&self, series_id: SeriesId) -> Result<u64> {
        self.store.delete_waiting_matching(Some(series_id.0)).await
    }

    /// Remove every `waiting` item for a provider.
    pub async fn cancel_provider(&self, provider_id: ProviderId) -> Result<u64> {
        self.store.delete_waiting_matching_provider(provider_id.0).await
    }

    /// Remove every `waiting` item targeting any disabled provider of a
    /// series.
    pub async fn cancel_disabled_providers(&self, series_id: SeriesId) -> Result<u64> {
        let providers = self.store.list_providers_for_series(series_id).await?;
        let mut total = 0;
        for provider in providers.iter().filter(|p| p.flags.disabled) {
            total += self
                .store
                .delete_waiting_matching_provider(provider.id.0)
                .await?;
        }
        Ok(total)
    }

    /// Pause a series: set the pause flag and purge its waiting items. The
    /// dispatcher also re-checks this flag at execution time, so a download
    /// enqueued after this call still fails without network I/O (spec.md §8
    /// scenario 6).
    pub async fn pause_series(&self, series_id: SeriesId) -> Result<u64> {
        let mut series = self
            .store
            .get_series(series_id)
            .await?
            .ok_or_else(|| crate::Error::NotFound(format!("series {series_id}")))?;
        series.pause_downloads = true;
        self.store.update_series(&series).await?;
        self.store.delete_waiting_matching(Some(series_id.0)).await
    }

    /// Resume a paused series; does not re-enqueue anything on its own.
    pub async fn resume_series(&self, series_id: SeriesId) -> Result<()> {
        let mut series = self
            .store
            .get_series(series_id)
            .await?
            .ok_or_else(|| crate::Error::NotFound(format!("series {series_id}")))?;
        series.pause_downloads = false;
        self.store.update_series(&series).await
    }

    /// Live counts of running/waiting/failed items.
    pub async fn queue_counts(&self) -> Result<QueueCounts> {
        self.store.queue_counts().await
    }

    /// Paginated listing of items in a given status, most recently scheduled
    /// first.
    pub async fn list_by_status(
        &self,
        status: QueueStatus,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<crate::types::DownloadQueueItem>> {
        self.store.list_by_status(status, offset, limit).await
    }

    /// Paginated listing of every queue item targeting one series, regardless
    /// of status.
    pub async fn list_for_series(
        &self,
        series_id: SeriesId,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<crate::types::DownloadQueueItem>> {
        self.store.list_for_series(series_id.0, offset, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cascade::CascadeController;
    use crate::config::{DispatchConfig, RetryConfig};
    use crate::db::Store;
    use crate::event_logger::EventLogger;
    use crate::extension_client::NoOpExtensionClient;
    use crate::progress::ProgressBus;
    use crate::types::{FallbackProvider, Series, SeriesStatus, SeriesType};
    use std::sync::Arc;

    async fn setup() -> (DownloadDispatcher, Store, tempfile::TempDir) {
        let store = Store::new_in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let cascade = CascadeController::new(store.clone(), RetryConfig::default(), dir.path().to_path_buf());
        let dispatcher = DownloadDispatcher::new(
            store.clone(),
            Arc::new(NoOpExtensionClient),
            ProgressBus::new(),
            EventLogger::new(store.clone()),
            cascade,
            DispatchConfig::default(),
            dir.path().to_path_buf(),
        );
        (dispatcher, store, dir)
    }

    fn sample_args(series_id: SeriesId, provider_id: ProviderId) -> DownloadArgs {
        DownloadArgs {
            series_id,
            provider_id,
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
            fallback_providers: Vec::<FallbackProvider>::new(),
            cascade_retries: 0,
            replacement: None,
        }
    }

    fn sample_series() -> Series {
        Series {
            id: SeriesId(0),
            title: "Sample".into(),
            author: None,
            artist: None,
            description: None,
            genres: vec![],
            status: SeriesStatus::Ongoing,
            series_type: SeriesType::Manga,
            storage_path: "sample".into(),
            pause_downloads: false,
            chapter_count: 0,
        }
    }

    #[tokio::test]
    async fn cancel_series_only_removes_waiting_items() {
        let (dispatcher, store, _dir) = setup().await;
        let series_id = store.insert_series(&sample_series()).await.unwrap();
        let args = sample_args(series_id, ProviderId(1));

        let waiting = store.enqueue("a", 0, Utc::now(), &args).await.unwrap();
        let running = store.enqueue("a", 0, Utc::now(), &args).await.unwrap();
        store.mark_running(running, Utc::now()).await.unwrap();

        let removed = dispatcher.cancel_series(series_id).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_queue_item(waiting).await.unwrap().is_none());
        assert!(store.get_queue_item(running).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn pause_series_sets_flag_and_purges_waiting() {
        let (dispatcher, store, _dir) = setup().await;
        let series_id = store.insert_series(&sample_series()).await.unwrap();
        let args = sample_args(series_id, ProviderId(1));
        let waiting = store.enqueue("a", 0, Utc::now(), &args).await.unwrap();

        let removed = dispatcher.pause_series(series_id).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_queue_item(waiting).await.unwrap().is_none());

        let series = store.get_series(series_id).await.unwrap().unwrap();
        assert!(series.pause_downloads);
    }

    #[tokio::test]
    async fn retry_returns_failed_item_to_waiting() {
        let (dispatcher, store, _dir) = setup().await;
        let series_id = store.insert_series(&sample_series()).await.unwrap();
        let args = sample_args(series_id, ProviderId(1));
        let id = store.enqueue("a", 0, Utc::now(), &args).await.unwrap();
        store.mark_failed(id, Utc::now()).await.unwrap();

        dispatcher.retry(id).await.unwrap();
        let item = store.get_queue_item(id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Waiting);
    }

    fn sample_provider(series_id: SeriesId) -> crate::types::Provider {
        crate::types::Provider {
            id: ProviderId(0),
            series_id,
            source_id: 1,
            name: "provider-a".into(),
            scanlator: None,
            language: "en".into(),
            importance: 0,
            flags: crate::types::ProviderFlags::default(),
            continue_after_chapter: None,
            title: None,
            description: None,
            artist: None,
            author: None,
            chapters: vec![],
            fetched_at: None,
        }
    }

    #[tokio::test]
    async fn cancel_disabled_providers_skips_active_providers() {
        let (dispatcher, store, _dir) = setup().await;
        let series_id = store.insert_series(&sample_series()).await.unwrap();

        let mut disabled = sample_provider(series_id);
        disabled.flags.disabled = true;
        let disabled_id = store.insert_provider(&disabled).await.unwrap();

        let active = sample_provider(series_id);
        let active_id = store.insert_provider(&active).await.unwrap();

        let disabled_waiting = store
            .enqueue("a", 0, Utc::now(), &sample_args(series_id, disabled_id))
            .await
            .unwrap();
        let active_waiting = store
            .enqueue("a", 0, Utc::now(), &sample_args(series_id, active_id))
            .await
            .unwrap();

        let removed = dispatcher.cancel_disabled_providers(series_id).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_queue_item(disabled_waiting).await.unwrap().is_none());
        assert!(store.get_queue_item(active_waiting).await.unwrap().is_some());
    }
}
