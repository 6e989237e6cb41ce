//! End-to-end exercises of the dispatcher against the public crate surface:
//! the fair-share/concurrency-cap invariants and the paused-series state
//! check (spec.md §8 scenario 1 and scenario 6).

use async_trait::async_trait;
use chrono::Utc;
use kaizoku_core::error::ExtensionError;
use kaizoku_core::extension_client::{
    ExtensionClient, NoOpExtensionClient, PageData, RemoteChapterInfo, SeriesPage, SourceInfo,
};
use kaizoku_core::{
    CascadeController, Config, DownloadArgs, DownloadDispatcher, EventLogger, Provider,
    ProviderFlags, ProviderId, ProgressBus, QueueStatus, Series, SeriesId, SeriesStatus,
    SeriesType, Store,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Sleeps past the test's observation window before reporting "no chapter",
/// so a picked-up item stays `running` long enough for the test to read the
/// concurrency snapshot mid-flight.
struct SlowExtensionClient {
    delay: Duration,
}

#[async_trait]
impl ExtensionClient for SlowExtensionClient {
    async fn list_sources(&self) -> kaizoku_core::Result<Vec<SourceInfo>> {
        Ok(vec![])
    }

    async fn search_series(&self, _: i64, _: &str, _: u32) -> kaizoku_core::Result<SeriesPage> {
        unimplemented!()
    }

    async fn get_latest_series(&self, _: i64, _: u32) -> kaizoku_core::Result<SeriesPage> {
        unimplemented!()
    }

    async fn get_popular_series(&self, _: i64, _: u32) -> kaizoku_core::Result<SeriesPage> {
        unimplemented!()
    }

    async fn get_series_full(&self, _: i64, _: bool) -> kaizoku_core::Result<kaizoku_core::extension_client::RemoteSeriesInfo> {
        unimplemented!()
    }

    async fn get_chapter(&self, source_id: i64, _chapter_index: i64) -> kaizoku_core::Result<RemoteChapterInfo> {
        tokio::time::sleep(self.delay).await;
        Err(ExtensionError::NotFound(source_id.to_string()).into())
    }

    async fn get_chapters(&self, _: i64, _: bool) -> kaizoku_core::Result<Vec<RemoteChapterInfo>> {
        Ok(vec![])
    }

    async fn get_page(&self, source_id: i64, _: i64, _: u32) -> kaizoku_core::Result<PageData> {
        Err(ExtensionError::NotFound(source_id.to_string()).into())
    }

    async fn get_thumbnail(&self, source_id: i64) -> kaizoku_core::Result<PageData> {
        Err(ExtensionError::NotFound(source_id.to_string()).into())
    }
}

fn sample_series(storage_path: &str) -> Series {
    Series {
        id: SeriesId(0),
        title: "Sample".into(),
        author: None,
        artist: None,
        description: None,
        genres: vec![],
        status: SeriesStatus::Ongoing,
        series_type: SeriesType::Manga,
        storage_path: storage_path.into(),
        pause_downloads: false,
        chapter_count: 0,
    }
}

fn sample_provider(series_id: SeriesId, name: &str) -> Provider {
    Provider {
        id: ProviderId(0),
        series_id,
        source_id: 1,
        name: name.into(),
        scanlator: None,
        language: "en".into(),
        importance: 0,
        flags: ProviderFlags::default(),
        continue_after_chapter: None,
        title: None,
        description: None,
        artist: None,
        author: None,
        chapters: vec![],
        fetched_at: None,
    }
}

fn sample_args(series_id: SeriesId, provider_id: ProviderId, provider_name: &str) -> DownloadArgs {
    DownloadArgs {
        series_id,
        provider_id,
        source_chapter_index: 0,
        chapter_number: Some(1.0),
        chapter_name: "Chapter 1".into(),
        provider_name: provider_name.into(),
        scanlator: None,
        language: "en".into(),
        title: "Sample".into(),
        storage_path: "sample".into(),
        url: "https://example.test/1".into(),
        uploaded_at: None,
        page_count_hint: None,
        fallback_providers: vec![],
        cascade_retries: 0,
        replacement: None,
    }
}

async fn build_dispatcher(
    max_total: usize,
    max_group: usize,
    tick_interval: Duration,
    extension_client: Arc<dyn ExtensionClient>,
) -> (DownloadDispatcher, Store, tempfile::TempDir) {
    let store = Store::new_in_memory().await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.dispatch.max_total_concurrency = max_total;
    config.dispatch.max_group_concurrency = max_group;
    config.dispatch.tick_interval = tick_interval;

    let cascade = CascadeController::new(store.clone(), config.retry.clone(), dir.path().to_path_buf());
    let dispatcher = DownloadDispatcher::new(
        store.clone(),
        extension_client,
        ProgressBus::new(),
        EventLogger::new(store.clone()),
        cascade,
        config.dispatch.clone(),
        dir.path().to_path_buf(),
    );
    (dispatcher, store, dir)
}

/// Scenario 1 / §8 universal invariants: `MaxTotal=3, MaxGroup=2`, groups A
/// (3 items) and B (1 item). While downloads are in flight, the running set
/// never exceeds `MaxTotal`, no group exceeds `MaxGroup`, and group B — with
/// a single item — gets picked up in the same round as group A rather than
/// starving behind it.
#[tokio::test]
async fn fair_share_dispatch_respects_caps_and_avoids_starvation() {
    let client = Arc::new(SlowExtensionClient {
        delay: Duration::from_millis(300),
    });
    let (dispatcher, store, _dir) =
        build_dispatcher(3, 2, Duration::from_millis(20), client).await;
    let series_id = store.insert_series(&sample_series("sample")).await.unwrap();
    let provider_a = store
        .insert_provider(&sample_provider(series_id, "A"))
        .await
        .unwrap();
    let provider_b = store
        .insert_provider(&sample_provider(series_id, "B"))
        .await
        .unwrap();

    store.enqueue("A", 100, Utc::now(), &sample_args(series_id, provider_a, "A")).await.unwrap();
    store.enqueue("A", 200, Utc::now(), &sample_args(series_id, provider_a, "A")).await.unwrap();
    store.enqueue("A", 300, Utc::now(), &sample_args(series_id, provider_a, "A")).await.unwrap();
    store.enqueue("B", 400, Utc::now(), &sample_args(series_id, provider_b, "B")).await.unwrap();

    let cancel = CancellationToken::new();
    let handle = {
        let dispatcher = dispatcher.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { dispatcher.run(cancel).await })
    };

    // Past one tick interval but well within the 300ms chapter-fetch delay:
    // every picked-up item is still `running`.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let running = store.running_counts().await.unwrap();
    assert!(running.total <= 3, "total running {} exceeds MaxTotal", running.total);
    assert!(running.for_group("A") <= 2, "group A running {} exceeds MaxGroup", running.for_group("A"));
    assert!(running.for_group("B") >= 1, "group B starved: {} running", running.for_group("B"));
    assert_eq!(running.total, 3, "all three available slots should be filled");

    cancel.cancel();
    handle.await.unwrap().unwrap();

    // Every item eventually terminates; none are left `running` forever.
    let counts = store.queue_counts().await.unwrap();
    assert_eq!(counts.running, 0);
}

/// Scenario 6: a paused series' waiting items are marked `failed` on pickup
/// without any network call, even though `pause_series` already purges
/// waiting items on the happy path — this exercises the independent
/// execution-time check for an item enqueued after the flag was set.
#[tokio::test]
async fn paused_series_item_fails_without_network_call() {
    let (dispatcher, store, _dir) = build_dispatcher(
        5,
        5,
        Duration::from_millis(10),
        Arc::new(NoOpExtensionClient),
    )
    .await;
    let mut series = sample_series("sample");
    series.pause_downloads = true;
    let series_id = store.insert_series(&series).await.unwrap();
    let provider_id = store
        .insert_provider(&sample_provider(series_id, "A"))
        .await
        .unwrap();

    let id = store
        .enqueue("A", 0, Utc::now(), &sample_args(series_id, provider_id, "A"))
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let handle = {
        let dispatcher = dispatcher.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { dispatcher.run(cancel).await })
    };

    tokio::time::sleep(Duration::from_millis(80)).await;
    cancel.cancel();
    handle.await.unwrap().unwrap();

    let item = store.get_queue_item(id).await.unwrap().unwrap();
    assert_eq!(item.status, QueueStatus::Failed);
}
