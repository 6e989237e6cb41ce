//! Provider-preference semantics under download failure and success
//! (spec.md §4.3).
//!
//! Every decision that enqueues a follow-up job also deletes the original
//! failed/completed queue row, so the "Error Downloads" view only ever
//! shows terminal failures.

use crate::backoff::next_scheduled_at;
use crate::config::RetryConfig;
use crate::db::Store;
use crate::types::{DownloadArgs, DownloadQueueItem, FallbackProvider, Provider, ProviderId, ReplacementInfo};
use crate::Result;
use chrono::Utc;
use std::path::{Path, PathBuf};

/// Outcome the dispatcher hands the cascade controller after a download
/// attempt finishes.
pub enum Outcome {
    /// The download wrote `filename` successfully.
    Success { filename: String },
    /// The download failed; `reason` is a human-readable summary.
    Failure { reason: String },
}

/// Implements the failure cascade and replacement-upgrade state machine.
#[derive(Clone)]
pub struct CascadeController {
    store: Store,
    retry_config: RetryConfig,
    storage_root: PathBuf,
}

impl CascadeController {
    /// Construct a controller over the given store, retry policy, and
    /// storage root (used to resolve chapter filenames into real paths when
    /// cleaning up superseded copies).
    pub fn new(store: Store, retry_config: RetryConfig, storage_root: PathBuf) -> Self {
        Self {
            store,
            retry_config,
            storage_root,
        }
    }

    /// Handle the outcome of one finished download item.
    pub async fn handle(&self, item: &DownloadQueueItem, outcome: Outcome) -> Result<()> {
        match outcome {
            Outcome::Success { filename } => self.handle_success(item, filename).await,
            Outcome::Failure { reason } => self.handle_failure(item, reason).await,
        }
    }

    async fn handle_failure(&self, item: &DownloadQueueItem, reason: String) -> Result<()> {
        if item.args.replacement.is_some() {
            return self.handle_replacement_failure(item).await;
        }

        let chapter_number = item
            .args
            .chapter_number
            .ok_or_else(|| crate::Error::Other(format!("queue item {} has no chapter number", item.id)))?;

        for candidate in &item.args.fallback_providers {
            let Some(provider) = self.store.get_provider(candidate.provider_id).await? else {
                continue;
            };
            if provider.flags.is_inactive() || provider.chapter_by_number(chapter_number).is_none() {
                continue;
            }

            let remaining_tail: Vec<FallbackProvider> = item
                .args
                .fallback_providers
                .iter()
                .skip_while(|f| f.provider_id != candidate.provider_id)
                .skip(1)
                .cloned()
                .collect();

            let args = DownloadArgs {
                provider_id: provider.id,
                provider_name: provider.name.clone(),
                scanlator: provider.scanlator.clone(),
                language: provider.language.clone(),
                fallback_providers: remaining_tail,
                ..item.args.clone()
            };

            self.store
                .enqueue(&provider.name, item.priority, Utc::now(), &args)
                .await?;
            self.store.delete_queue_item(item.id).await?;
            return Ok(());
        }

        self.schedule_full_cascade_retry(item, chapter_number, reason).await
    }

    async fn schedule_full_cascade_retry(
        &self,
        item: &DownloadQueueItem,
        chapter_number: f64,
        _reason: String,
    ) -> Result<()> {
        if item.args.cascade_retries >= self.retry_config.max_cascade_retries {
            return Ok(());
        }

        let mut siblings = self
            .store
            .list_providers_for_series(item.args.series_id)
            .await?;
        siblings.sort_by_key(|p| p.importance);

        let Some(chosen) = siblings
            .iter()
            .find(|p| !p.flags.is_inactive() && p.chapter_by_number(chapter_number).is_some())
        else {
            return Ok(());
        };

        let fallback_providers = siblings
            .iter()
            .filter(|p| p.id != chosen.id && !p.flags.is_inactive() && p.source_id != 0)
            .map(|p| FallbackProvider {
                provider_id: p.id,
                source_id: p.source_id,
                importance: p.importance,
            })
            .collect();

        let scheduled_at = next_scheduled_at(&self.retry_config, Utc::now());
        let args = DownloadArgs {
            provider_id: chosen.id,
            provider_name: chosen.name.clone(),
            scanlator: chosen.scanlator.clone(),
            language: chosen.language.clone(),
            fallback_providers,
            cascade_retries: item.args.cascade_retries + 1,
            ..item.args.clone()
        };

        self.store
            .enqueue(&chosen.name, item.priority, scheduled_at, &args)
            .await?;
        self.store.delete_queue_item(item.id).await?;
        Ok(())
    }

    async fn handle_replacement_failure(&self, item: &DownloadQueueItem) -> Result<()> {
        let replacement = item
            .args
            .replacement
            .as_ref()
            .expect("handle_replacement_failure called on a non-replacement item")
            .clone();

        if replacement.replacement_retry < self.retry_config.max_cascade_retries {
            let scheduled_at = next_scheduled_at(&self.retry_config, Utc::now());
            let args = DownloadArgs {
                replacement: Some(ReplacementInfo {
                    replacement_retry: replacement.replacement_retry + 1,
                    ..replacement
                }),
                ..item.args.clone()
            };
            self.store
                .enqueue(&item.group_key, item.priority, scheduled_at, &args)
                .await?;
            self.store.delete_queue_item(item.id).await?;
            return Ok(());
        }

        let low = self
            .store
            .get_provider(item.args.provider_id)
            .await?
            .map(|p| p.importance)
            .unwrap_or(u32::MAX);
        let high = self
            .store
            .get_provider(replacement.replacing_provider_id)
            .await?
            .map(|p| p.importance)
            .unwrap_or(0);

        let chapter_number = item.args.chapter_number;
        let mut siblings = self
            .store
            .list_providers_for_series(item.args.series_id)
            .await?;
        siblings.sort_by_key(|p| p.importance);

        let next_candidate = siblings.into_iter().find(|p| {
            p.importance > low
                && p.importance < high
                && !p.flags.is_inactive()
                && chapter_number.is_some_and(|n| p.chapter_by_number(n).is_some())
        });

        let Some(next) = next_candidate else {
            return Ok(());
        };

        let args = DownloadArgs {
            provider_id: next.id,
            provider_name: next.name.clone(),
            scanlator: next.scanlator.clone(),
            language: next.language.clone(),
            replacement: Some(ReplacementInfo {
                replacement_retry: 0,
                ..replacement
            }),
            ..item.args.clone()
        };
        self.store
            .enqueue(&next.name, item.priority, Utc::now(), &args)
            .await?;
        self.store.delete_queue_item(item.id).await?;
        Ok(())
    }

    async fn handle_success(&self, item: &DownloadQueueItem, filename: String) -> Result<()> {
        if let Some(replacement) = item.args.replacement.clone() {
            return self.handle_replacement_success(item, &replacement, filename).await;
        }

        let provider = self
            .store
            .get_provider(item.args.provider_id)
            .await?
            .ok_or_else(|| crate::Error::NotFound(format!("provider {}", item.args.provider_id)))?;

        if provider.importance > 0 {
            self.schedule_replacement_upgrade(item, &provider, filename).await
        } else {
            self.cleanup_inferior_copies(item, &provider).await
        }
    }

    async fn schedule_replacement_upgrade(
        &self,
        item: &DownloadQueueItem,
        provider: &Provider,
        filename: String,
    ) -> Result<()> {
        let Some(chapter_number) = item.args.chapter_number else {
            return Ok(());
        };

        let mut siblings = self
            .store
            .list_providers_for_series(provider.series_id)
            .await?;
        siblings.sort_by_key(|p| p.importance);

        let Some(better) = siblings.into_iter().find(|p| {
            p.id != provider.id
                && p.importance < provider.importance
                && p.chapter_by_number(chapter_number).is_some()
        }) else {
            return Ok(());
        };

        let scheduled_at = next_scheduled_at(&self.retry_config, Utc::now());
        let args = DownloadArgs {
            provider_id: better.id,
            provider_name: better.name.clone(),
            scanlator: better.scanlator.clone(),
            language: better.language.clone(),
            replacement: Some(ReplacementInfo {
                replacing_provider_id: provider.id,
                replacing_filename: filename,
                replacement_retry: 0,
            }),
            ..item.args.clone()
        };

        self.store
            .enqueue(&better.name, item.priority, scheduled_at, &args)
            .await?;
        Ok(())
    }

    async fn cleanup_inferior_copies(&self, item: &DownloadQueueItem, provider: &Provider) -> Result<()> {
        let Some(chapter_number) = item.args.chapter_number else {
            return Ok(());
        };

        let series = self
            .store
            .get_series(provider.series_id)
            .await?
            .ok_or_else(|| crate::Error::NotFound(format!("series {}", provider.series_id)))?;

        let siblings = self
            .store
            .list_providers_for_series(provider.series_id)
            .await?;

        for mut sibling in siblings.into_iter().filter(|p| p.id != provider.id) {
            let Some(chapter) = sibling.chapter_by_number_mut(chapter_number) else {
                continue;
            };
            if !chapter.is_present() {
                continue;
            }

            let path = self.storage_root.join(&series.storage_path).join(&chapter.filename);
            remove_file_if_present(&path)?;
            chapter.filename.clear();
            chapter.is_deleted = true;
            sibling.recompute_continue_after_chapter();
            self.store.update_provider(&sibling).await?;
        }

        Ok(())
    }

    async fn handle_replacement_success(
        &self,
        item: &DownloadQueueItem,
        replacement: &ReplacementInfo,
        _new_filename: String,
    ) -> Result<()> {
        let path = self.storage_root_path(item.args.series_id, replacement).await?;
        remove_file_if_present(&path)?;

        if let Some(mut old_provider) = self.store.get_provider(replacement.replacing_provider_id).await? {
            if let Some(number) = item.args.chapter_number {
                if let Some(chapter) = old_provider.chapter_by_number_mut(number) {
                    chapter.filename.clear();
                    chapter.is_deleted = true;
                }
            }
            old_provider.recompute_continue_after_chapter();
            self.store.update_provider(&old_provider).await?;
        }

        Ok(())
    }

    async fn storage_root_path(
        &self,
        series_id: crate::types::SeriesId,
        replacement: &ReplacementInfo,
    ) -> Result<PathBuf> {
        let series = self
            .store
            .get_series(series_id)
            .await?
            .ok_or_else(|| crate::Error::NotFound(format!("series {series_id}")))?;
        Ok(self
            .storage_root
            .join(&series.storage_path)
            .join(&replacement.replacing_filename))
    }
}

fn remove_file_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(crate::Error::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Chapter, ProviderFlags, QueueStatus, SeriesId, SeriesStatus, SeriesType};
    use std::time::Duration;

    fn retry_config() -> RetryConfig {
        RetryConfig {
            retry_delay: Duration::from_secs(1),
            max_cascade_retries: 3,
            jitter: false,
        }
    }

    async fn setup() -> (CascadeController, Store, tempfile::TempDir) {
        let store = Store::new_in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let controller = CascadeController::new(store.clone(), retry_config(), dir.path().to_path_buf());
        (controller, store, dir)
    }

    fn sample_series() -> crate::types::Series {
        crate::types::Series {
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

    fn sample_provider(series_id: SeriesId, importance: u32) -> Provider {
        Provider {
            id: ProviderId(0),
            series_id,
            source_id: 1,
            name: format!("provider-{importance}"),
            scanlator: None,
            language: "en".into(),
            importance,
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

    fn sample_args(series_id: SeriesId, provider_id: ProviderId) -> DownloadArgs {
        DownloadArgs {
            series_id,
            provider_id,
            source_chapter_index: 0,
            chapter_number: Some(2.0),
            chapter_name: "Chapter 2".into(),
            provider_name: "provider".into(),
            scanlator: None,
            language: "en".into(),
            title: "Sample".into(),
            storage_path: "sample".into(),
            url: "https://example.test/2".into(),
            uploaded_at: None,
            page_count_hint: None,
            fallback_providers: vec![],
            cascade_retries: 0,
            replacement: None,
        }
    }

    #[tokio::test]
    async fn failure_with_usable_fallback_enqueues_it_and_deletes_original() {
        let (controller, store, _dir) = setup().await;
        let series_id = store.insert_series(&sample_series()).await.unwrap();

        let mut fallback = sample_provider(series_id, 1);
        fallback.chapters.push(Chapter {
            name: "Chapter 2".into(),
            number: Some(2.0),
            source_index: 0,
            url: "https://example.test".into(),
            uploaded_at: None,
            page_count: None,
            filename: String::new(),
            downloaded_at: None,
            should_download: true,
            is_deleted: false,
        });
        let fallback_id = store.insert_provider(&fallback).await.unwrap();

        let primary = sample_provider(series_id, 0);
        let primary_id = store.insert_provider(&primary).await.unwrap();

        let mut args = sample_args(series_id, primary_id);
        args.fallback_providers = vec![FallbackProvider {
            provider_id: fallback_id,
            source_id: 1,
            importance: 1,
        }];
        let queue_id = store.enqueue("provider-0", 200, Utc::now(), &args).await.unwrap();
        let item = store.get_queue_item(queue_id).await.unwrap().unwrap();

        controller
            .handle(&item, Outcome::Failure { reason: "boom".into() })
            .await
            .unwrap();

        assert!(store.get_queue_item(queue_id).await.unwrap().is_none());
        let counts = store.queue_counts().await.unwrap();
        assert_eq!(counts.waiting, 1);
    }

    #[tokio::test]
    async fn failure_with_no_fallbacks_and_no_active_candidate_leaves_item_terminal() {
        let (controller, store, _dir) = setup().await;
        let series_id = store.insert_series(&sample_series()).await.unwrap();
        let primary = sample_provider(series_id, 0);
        let primary_id = store.insert_provider(&primary).await.unwrap();

        let args = sample_args(series_id, primary_id);
        let queue_id = store.enqueue("provider-0", 200, Utc::now(), &args).await.unwrap();
        let item = store.get_queue_item(queue_id).await.unwrap().unwrap();

        controller
            .handle(&item, Outcome::Failure { reason: "boom".into() })
            .await
            .unwrap();

        assert!(store.get_queue_item(queue_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn success_from_importance_zero_cleans_up_inferior_copies() {
        let (controller, store, dir) = setup().await;
        let series_id = store.insert_series(&sample_series()).await.unwrap();

        let primary = sample_provider(series_id, 0);
        let primary_id = store.insert_provider(&primary).await.unwrap();

        let mut inferior = sample_provider(series_id, 1);
        let series_dir = dir.path().join("sample");
        std::fs::create_dir_all(&series_dir).unwrap();
        let stale_path = series_dir.join("stale.cbz");
        std::fs::write(&stale_path, b"data").unwrap();
        inferior.chapters.push(Chapter {
            name: "Chapter 2".into(),
            number: Some(2.0),
            source_index: 0,
            url: "https://example.test".into(),
            uploaded_at: None,
            page_count: Some(1),
            filename: "stale.cbz".into(),
            downloaded_at: None,
            should_download: false,
            is_deleted: false,
        });
        let inferior_id = store.insert_provider(&inferior).await.unwrap();

        let args = sample_args(series_id, primary_id);
        let queue_id = store.enqueue("provider-0", 200, Utc::now(), &args).await.unwrap();
        let item = store.get_queue_item(queue_id).await.unwrap().unwrap();

        controller
            .handle(&item, Outcome::Success { filename: "fresh.cbz".into() })
            .await
            .unwrap();

        assert!(!stale_path.exists());
        let reloaded = store.get_provider(inferior_id).await.unwrap().unwrap();
        let chapter = reloaded.chapter_by_number(2.0).unwrap();
        assert!(chapter.is_deleted);
        assert_eq!(chapter.filename, "");
    }

    #[tokio::test]
    async fn success_with_importance_above_zero_schedules_replacement_upgrade() {
        let (controller, store, _dir) = setup().await;
        let series_id = store.insert_series(&sample_series()).await.unwrap();

        let worse = sample_provider(series_id, 1);
        let worse_id = store.insert_provider(&worse).await.unwrap();

        let mut better = sample_provider(series_id, 0);
        better.chapters.push(Chapter {
            name: "Chapter 2".into(),
            number: Some(2.0),
            source_index: 0,
            url: "https://example.test".into(),
            uploaded_at: None,
            page_count: None,
            filename: String::new(),
            downloaded_at: None,
            should_download: true,
            is_deleted: false,
        });
        let better_id = store.insert_provider(&better).await.unwrap();

        let args = sample_args(series_id, worse_id);
        let queue_id = store.enqueue("provider-1", 200, Utc::now(), &args).await.unwrap();
        let item = store.get_queue_item(queue_id).await.unwrap().unwrap();

        controller
            .handle(&item, Outcome::Success { filename: "worse.cbz".into() })
            .await
            .unwrap();

        // The original success row is left alone (only a follow-up is
        // scheduled; nothing is deleted until the replacement resolves).
        assert!(store.get_queue_item(queue_id).await.unwrap().is_some());

        let waiting = store.list_by_status(QueueStatus::Waiting, 0, 100).await.unwrap();
        let upgrade = waiting
            .into_iter()
            .find(|i| i.args.provider_id == better_id)
            .expect("expected a replacement-upgrade job enqueued against the better provider");
        let replacement = upgrade.args.replacement.as_ref().expect("replacement info");
        assert_eq!(replacement.replacing_provider_id, worse_id);
        assert_eq!(replacement.replacing_filename, "worse.cbz");
        assert_eq!(replacement.replacement_retry, 0);
    }

    #[tokio::test]
    async fn replacement_success_deletes_old_file_and_resets_old_provider_chapter() {
        let (controller, store, dir) = setup().await;
        let series_id = store.insert_series(&sample_series()).await.unwrap();

        let series_dir = dir.path().join("sample");
        std::fs::create_dir_all(&series_dir).unwrap();
        let old_path = series_dir.join("old.cbz");
        std::fs::write(&old_path, b"data").unwrap();

        let mut old_provider = sample_provider(series_id, 1);
        old_provider.chapters.push(Chapter {
            name: "Chapter 2".into(),
            number: Some(2.0),
            source_index: 0,
            url: "https://example.test".into(),
            uploaded_at: None,
            page_count: Some(1),
            filename: "old.cbz".into(),
            downloaded_at: None,
            should_download: false,
            is_deleted: false,
        });
        let old_id = store.insert_provider(&old_provider).await.unwrap();

        let better = sample_provider(series_id, 0);
        let better_id = store.insert_provider(&better).await.unwrap();

        let mut args = sample_args(series_id, better_id);
        args.replacement = Some(ReplacementInfo {
            replacing_provider_id: old_id,
            replacing_filename: "old.cbz".into(),
            replacement_retry: 0,
        });
        let queue_id = store.enqueue("provider-0", 200, Utc::now(), &args).await.unwrap();
        let item = store.get_queue_item(queue_id).await.unwrap().unwrap();

        controller
            .handle(&item, Outcome::Success { filename: "new.cbz".into() })
            .await
            .unwrap();

        assert!(!old_path.exists());
        let reloaded = store.get_provider(old_id).await.unwrap().unwrap();
        let chapter = reloaded.chapter_by_number(2.0).unwrap();
        assert!(chapter.is_deleted);
        assert_eq!(chapter.filename, "");
    }

    #[tokio::test]
    async fn replacement_failure_before_retry_limit_reenqueues_with_bumped_retry() {
        let (controller, store, _dir) = setup().await;
        let series_id = store.insert_series(&sample_series()).await.unwrap();

        let old_provider = sample_provider(series_id, 1);
        let old_id = store.insert_provider(&old_provider).await.unwrap();
        let better_id = store.insert_provider(&sample_provider(series_id, 0)).await.unwrap();

        let mut args = sample_args(series_id, better_id);
        args.replacement = Some(ReplacementInfo {
            replacing_provider_id: old_id,
            replacing_filename: "old.cbz".into(),
            replacement_retry: 0,
        });
        let queue_id = store.enqueue("provider-0", 200, Utc::now(), &args).await.unwrap();
        let item = store.get_queue_item(queue_id).await.unwrap().unwrap();

        controller
            .handle(&item, Outcome::Failure { reason: "boom".into() })
            .await
            .unwrap();

        assert!(store.get_queue_item(queue_id).await.unwrap().is_none());
        let waiting = store.list_by_status(QueueStatus::Waiting, 0, 100).await.unwrap();
        let retried = waiting
            .into_iter()
            .find(|i| i.args.provider_id == better_id)
            .expect("retry should stay against the same candidate provider");
        let replacement = retried.args.replacement.as_ref().expect("replacement info");
        assert_eq!(replacement.replacement_retry, 1);
        assert_eq!(replacement.replacing_provider_id, old_id);
    }

    #[tokio::test]
    async fn replacement_failure_after_retry_limit_walks_to_next_importance_candidate() {
        let (controller, store, _dir) = setup().await;
        let series_id = store.insert_series(&sample_series()).await.unwrap();

        // importance 0 (the exhausted replacement candidate), 1 (should be
        // tried next), 2 (the original file being replaced).
        let low_id = store.insert_provider(&sample_provider(series_id, 0)).await.unwrap();

        let mut mid = sample_provider(series_id, 1);
        mid.chapters.push(Chapter {
            name: "Chapter 2".into(),
            number: Some(2.0),
            source_index: 0,
            url: "https://example.test".into(),
            uploaded_at: None,
            page_count: None,
            filename: String::new(),
            downloaded_at: None,
            should_download: true,
            is_deleted: false,
        });
        let mid_id = store.insert_provider(&mid).await.unwrap();

        let high_id = store.insert_provider(&sample_provider(series_id, 2)).await.unwrap();

        let mut args = sample_args(series_id, low_id);
        args.replacement = Some(ReplacementInfo {
            replacing_provider_id: high_id,
            replacing_filename: "orig.cbz".into(),
            replacement_retry: retry_config().max_cascade_retries,
        });
        let queue_id = store.enqueue("provider-0", 200, Utc::now(), &args).await.unwrap();
        let item = store.get_queue_item(queue_id).await.unwrap().unwrap();

        controller
            .handle(&item, Outcome::Failure { reason: "boom".into() })
            .await
            .unwrap();

        assert!(store.get_queue_item(queue_id).await.unwrap().is_none());
        let waiting = store.list_by_status(QueueStatus::Waiting, 0, 100).await.unwrap();
        let next = waiting
            .into_iter()
            .find(|i| i.args.provider_id == mid_id)
            .expect("should walk to the provider strictly between low and high importance");
        let replacement = next.args.replacement.as_ref().expect("replacement info");
        assert_eq!(replacement.replacing_provider_id, high_id);
        assert_eq!(replacement.replacing_filename, "orig.cbz");
        assert_eq!(replacement.replacement_retry, 0);
    }
}
