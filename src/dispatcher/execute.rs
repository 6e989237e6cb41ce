//! Per-item download execution: state re-validation, page fetching, archive
//! assembly, and handoff to the cascade (spec.md §4.1 "Download execution").

use super::DownloadDispatcher;
use crate::archive::{self, PageEntry};
use crate::cascade::Outcome;
use crate::error::ExtensionError;
use crate::naming;
use crate::event_logger::CallOutcome;
use crate::types::{ArchiveMetadata, Chapter, DownloadQueueItem, ProgressUpdate};
use crate::Error;
use chrono::Utc;
use std::time::Instant;
use tracing::{info, warn};

/// Image magic numbers recognized as page terminators; an unrecognized or
/// empty body at the next index means the source ran out of pages.
fn recognized_image_ext(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some(".jpg")
    } else if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some(".png")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some(".gif")
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some(".webp")
    } else {
        None
    }
}

impl DownloadDispatcher {
    /// Execute one `running` queue item to completion, never propagating an
    /// error to the caller: every outcome is recorded on the item itself.
    pub(super) async fn execute_item(&self, item: DownloadQueueItem) {
        let job_id = item.id.to_string();
        let started = Instant::now();

        match self.validate_state(&item).await {
            Ok(()) => {}
            Err(reason) => {
                warn!(item = %item.id, %reason, "queue item failed state validation, not retried");
                let now = Utc::now();
                if let Err(e) = self.store.mark_failed(item.id, now).await {
                    warn!(item = %item.id, error = %e, "failed to mark item failed after state validation error");
                }
                let err = Error::Other(reason);
                if let Err(e) = self
                    .event_logger
                    .record(CallOutcome {
                        source_id: None,
                        source_name: Some(item.args.provider_name.as_str()),
                        language: Some(item.args.language.as_str()),
                        event_type: "download",
                        duration: started.elapsed(),
                        result: Err(&err),
                        metadata: None,
                    })
                    .await
                {
                    warn!(item = %item.id, error = %e, "failed to record event log entry");
                }
                return;
            }
        }

        match self.download(&item).await {
            Ok(filename) => {
                self.progress.publish(ProgressUpdate {
                    job_id: job_id.clone(),
                    job_type: "download".into(),
                    status: "completed".into(),
                    percentage: 100.0,
                    message: format!("saved {filename}"),
                    opaque_param: None,
                });
                let now = Utc::now();
                if let Err(e) = self.store.mark_completed(item.id, now).await {
                    warn!(item = %item.id, error = %e, "failed to mark item completed");
                }
                if let Err(e) = self
                    .event_logger
                    .record(CallOutcome {
                        source_id: None,
                        source_name: Some(item.args.provider_name.as_str()),
                        language: Some(item.args.language.as_str()),
                        event_type: "download",
                        duration: started.elapsed(),
                        result: Ok(1),
                        metadata: None,
                    })
                    .await
                {
                    warn!(item = %item.id, error = %e, "failed to record event log entry");
                }
                if let Err(e) = self.cascade.handle(&item, Outcome::Success { filename }).await {
                    warn!(item = %item.id, error = %e, "cascade success handling failed");
                }
            }
            Err(reason) => {
                warn!(item = %item.id, %reason, "download failed");
                self.progress.publish(ProgressUpdate {
                    job_id: job_id.clone(),
                    job_type: "download".into(),
                    status: "failed".into(),
                    percentage: 0.0,
                    message: reason.clone(),
                    opaque_param: None,
                });
                let now = Utc::now();
                if let Err(e) = self.store.mark_failed(item.id, now).await {
                    warn!(item = %item.id, error = %e, "failed to mark item failed");
                }
                let err = Error::Other(reason.clone());
                if let Err(e) = self
                    .event_logger
                    .record(CallOutcome {
                        source_id: None,
                        source_name: Some(item.args.provider_name.as_str()),
                        language: Some(item.args.language.as_str()),
                        event_type: "download",
                        duration: started.elapsed(),
                        result: Err(&err),
                        metadata: None,
                    })
                    .await
                {
                    warn!(item = %item.id, error = %e, "failed to record event log entry");
                }
                if let Err(e) = self
                    .cascade
                    .handle(&item, Outcome::Failure { reason })
                    .await
                {
                    warn!(item = %item.id, error = %e, "cascade failure handling failed");
                }
            }
        }
    }

    /// Re-validate series/provider state at execution time. Returns `Err` with
    /// a human-readable reason for any condition in the "never retried" set
    /// (spec.md §7): the series is gone or paused, or the provider is
    /// missing, disabled, uninstalled, or unknown.
    async fn validate_state(&self, item: &DownloadQueueItem) -> Result<(), String> {
        let series = self
            .store
            .get_series(item.args.series_id)
            .await
            .map_err(|e| format!("series lookup failed: {e}"))?;
        let Some(series) = series else {
            return Err(format!("series {} no longer exists", item.args.series_id));
        };
        if series.pause_downloads {
            return Err(format!("series {} has downloads paused", series.id));
        }

        let provider = self
            .store
            .get_provider(item.args.provider_id)
            .await
            .map_err(|e| format!("provider lookup failed: {e}"))?;
        let Some(provider) = provider else {
            return Err(format!("provider {} no longer exists", item.args.provider_id));
        };
        if provider.flags.is_inactive() {
            return Err(format!("provider {} is disabled, uninstalled, or unknown", provider.id));
        }

        Ok(())
    }

    /// Fetch pages, build the archive, and update provider/series/sidecar
    /// state. Returns the archive filename on success.
    async fn download(&self, item: &DownloadQueueItem) -> Result<String, String> {
        let args = &item.args;

        let provider = self
            .store
            .get_provider(args.provider_id)
            .await
            .map_err(|e| format!("provider lookup failed: {e}"))?
            .ok_or_else(|| format!("provider {} no longer exists", args.provider_id))?;
        let source_id = provider.source_id;

        self.extension_client
            .get_chapter(source_id, args.source_chapter_index)
            .await
            .map_err(|e| format!("chapter fetch failed: {e}"))?;

        let mut pages = Vec::new();
        let mut page_index: u32 = 0;
        loop {
            let result = self
                .extension_client
                .get_page(source_id, args.source_chapter_index, page_index)
                .await;

            let page = match result {
                Ok(page) => page,
                Err(Error::Extension(ExtensionError::NotFound(_))) => break,
                Err(e) => return Err(format!("page {page_index} fetch failed: {e}")),
            };

            if page.bytes.is_empty() {
                break;
            }
            let Some(ext) = recognized_image_ext(&page.bytes) else {
                break;
            };

            let filename = naming::page_filename(
                &args.provider_name,
                &args.language,
                &args.title,
                args.chapter_number,
                page_index,
                args.page_count_hint,
                ext,
            );
            pages.push(PageEntry {
                filename,
                bytes: page.bytes,
            });
            page_index += 1;
        }

        if pages.is_empty() {
            return Err("zero pages collected".to_string());
        }

        let series = self
            .store
            .get_series(args.series_id)
            .await
            .map_err(|e| format!("series lookup failed: {e}"))?
            .ok_or_else(|| format!("series {} no longer exists", args.series_id))?;

        let max_chapter_in_provider = provider
            .downloaded_numbers()
            .chain(args.chapter_number)
            .fold(0.0_f64, f64::max);

        let filename = naming::archive_filename(
            &args.provider_name,
            args.scanlator.as_deref(),
            &args.language,
            &args.title,
            args.chapter_number,
            &args.chapter_name,
            max_chapter_in_provider,
            ".cbz",
        );

        let dest = self
            .storage_root
            .join(&series.storage_path)
            .join(&filename);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| format!("create storage dir failed: {e}"))?;
        }

        let metadata = ArchiveMetadata {
            title: args.chapter_name.clone(),
            series: args.title.clone(),
            localized_series: None,
            number: args.chapter_number,
            count: Some(series.chapter_count),
            page_count: pages.len() as u32,
            format: "Web".into(),
            language: args.language.clone(),
            tags: series.genres.join(", "),
            writer: provider.author.clone(),
            publisher: args.provider_name.clone(),
            translator: args.scanlator.clone(),
            cover_artist: provider.artist.clone(),
            day: None,
            month: None,
            year: None,
            reading_direction: match series.series_type {
                crate::types::SeriesType::Manga => Some("right-to-left".into()),
                _ => None,
            },
        };

        archive::build(&dest, &pages, &metadata).map_err(|e| format!("archive build failed: {e}"))?;

        self.record_chapter(&provider, &series, item, &filename).await?;

        info!(item = %item.id, %filename, pages = pages.len(), "download completed");
        Ok(filename)
    }

    async fn record_chapter(
        &self,
        provider: &crate::types::Provider,
        series: &crate::types::Series,
        item: &DownloadQueueItem,
        filename: &str,
    ) -> Result<(), String> {
        let mut provider = provider.clone();
        let now = Utc::now();

        match item.args.chapter_number.and_then(|n| provider.chapter_by_number_mut(n)) {
            Some(chapter) => {
                chapter.filename = filename.to_string();
                chapter.downloaded_at = Some(now);
                chapter.should_download = false;
                chapter.is_deleted = false;
            }
            None => {
                provider.chapters.push(Chapter {
                    name: item.args.chapter_name.clone(),
                    number: item.args.chapter_number,
                    source_index: item.args.source_chapter_index,
                    url: item.args.url.clone(),
                    uploaded_at: item.args.uploaded_at,
                    page_count: item.args.page_count_hint,
                    filename: filename.to_string(),
                    downloaded_at: Some(now),
                    should_download: false,
                    is_deleted: false,
                });
            }
        }
        provider.recompute_continue_after_chapter();

        self.store
            .update_provider(&provider)
            .await
            .map_err(|e| format!("provider update failed: {e}"))?;

        let mut series = series.clone();
        series.chapter_count = provider.chapters.iter().filter(|c| c.is_present()).count() as u32;
        self.store
            .update_series(&series)
            .await
            .map_err(|e| format!("series update failed: {e}"))?;

        let providers = self
            .store
            .list_providers_for_series(series.id)
            .await
            .map_err(|e| format!("provider listing failed: {e}"))?;
        let sidecar = crate::sidecar::SeriesSidecar::build(&series, &providers);
        let sidecar_json =
            serde_json::to_string_pretty(&sidecar).map_err(|e| format!("sidecar serialize failed: {e}"))?;
        let sidecar_path = self.storage_root.join(&series.storage_path).join("index.json");
        std::fs::write(&sidecar_path, sidecar_json).map_err(|e| format!("sidecar write failed: {e}"))?;

        Ok(())
    }
}
