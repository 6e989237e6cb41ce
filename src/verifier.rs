//! Reconciles filesystem state with stored chapter records for one series
//! (spec.md §4.4).

use crate::archive::Classification;
use crate::db::Store;
use crate::orchestrator::ChapterOrchestrator;
use crate::types::{Provider, ProviderId, SeriesId};
use crate::Result;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const ARCHIVE_EXTENSIONS: &[&str] = &["cbz", "zip"];

/// Per-class count of bad files the verifier found and fixed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BadFileCounts {
    /// Archive path exists but isn't a valid container
    pub not_an_archive: u32,
    /// Archive opens but has zero page images
    pub no_images: u32,
    /// Tracked filename with no file on disk
    pub missing: u32,
    /// Archive appears to be cut off mid-write
    pub truncated: u32,
}

impl BadFileCounts {
    /// Total across all bad-file classes.
    pub fn total(&self) -> u32 {
        self.not_an_archive + self.no_images + self.missing + self.truncated
    }
}

/// Outcome of one verifier pass over a series.
#[derive(Debug, Default)]
pub struct Report {
    /// Counts of bad files by class
    pub bad_files: BadFileCounts,
    /// Filenames present on disk but not tracked by any provider
    pub orphans: Vec<String>,
    /// Number of chapter records reset this pass
    pub fix_count: u32,
    /// Number of providers for which a redownload orchestrator run was queued
    pub redownload_queued_count: u32,
}

/// Reconciles on-disk archives against stored chapter records.
pub struct IntegrityVerifier {
    store: Store,
    orchestrator: ChapterOrchestrator,
    storage_root: PathBuf,
}

impl IntegrityVerifier {
    /// Construct a verifier over the given store, orchestrator, and storage
    /// root.
    pub fn new(store: Store, orchestrator: ChapterOrchestrator, storage_root: PathBuf) -> Self {
        Self {
            store,
            orchestrator,
            storage_root,
        }
    }

    /// Run the full reconciliation procedure for one series.
    pub async fn verify_series(&self, series_id: SeriesId) -> Result<Report> {
        let series = self
            .store
            .get_series(series_id)
            .await?
            .ok_or_else(|| crate::Error::NotFound(format!("series {series_id}")))?;

        let mut providers = self.store.list_providers_for_series(series_id).await?;

        for unknown in providers.iter().filter(|p| p.flags.unknown) {
            if unknown.chapters.iter().all(|c| c.filename.is_empty()) {
                self.store.delete_provider(unknown.id).await?;
            }
        }
        providers.retain(|p| !(p.flags.unknown && p.chapters.iter().all(|c| c.filename.is_empty())));

        let series_dir = self.storage_root.join(&series.storage_path);

        let mut report = Report::default();
        let mut affected_providers: HashSet<ProviderId> = HashSet::new();
        let mut tracked: HashSet<String> = HashSet::new();

        for provider in providers.iter_mut() {
            let mut changed = false;
            for chapter in provider.chapters.iter_mut() {
                if chapter.is_deleted || chapter.filename.is_empty() {
                    continue;
                }
                tracked.insert(chapter.filename.clone());

                let path = series_dir.join(&chapter.filename);
                let classification = crate::archive::classify(&path);

                match classification {
                    Classification::Fine => continue,
                    Classification::NotFound => {
                        report.bad_files.missing += 1;
                    }
                    Classification::NotAnArchive => {
                        report.bad_files.not_an_archive += 1;
                        remove_file_best_effort(&path);
                    }
                    Classification::NoImages => {
                        report.bad_files.no_images += 1;
                        remove_file_best_effort(&path);
                    }
                    Classification::Truncated => {
                        report.bad_files.truncated += 1;
                    }
                }

                warn!(series_id = series_id.0, provider_id = provider.id.0, filename = %chapter.filename, ?classification, "resetting bad chapter record");
                chapter.filename.clear();
                chapter.downloaded_at = None;
                chapter.is_deleted = false;
                chapter.should_download = true;
                report.fix_count += 1;
                changed = true;
            }

            if changed {
                provider.recompute_continue_after_chapter();
                affected_providers.insert(provider.id);
            }
        }

        for provider in providers.iter().filter(|p| affected_providers.contains(&p.id)) {
            self.store.update_provider(provider).await?;
        }

        report.orphans = scan_orphans(&series_dir, &tracked);

        self.write_sidecar(&series, &providers)?;

        for provider in providers.iter().filter(|p| affected_providers.contains(&p.id) && !p.flags.is_inactive()) {
            self.orchestrator.run_for_provider(provider.id).await?;
            report.redownload_queued_count += 1;
        }

        info!(
            series_id = series_id.0,
            bad_files = report.bad_files.total(),
            orphans = report.orphans.len(),
            fix_count = report.fix_count,
            redownload_queued_count = report.redownload_queued_count,
            "integrity verification complete"
        );

        Ok(report)
    }

    fn write_sidecar(&self, series: &crate::types::Series, providers: &[Provider]) -> Result<()> {
        let series_dir = self.storage_root.join(&series.storage_path);
        std::fs::create_dir_all(&series_dir).map_err(crate::Error::Io)?;

        let sidecar = crate::sidecar::SeriesSidecar::build(series, providers);
        let json = serde_json::to_string_pretty(&sidecar)?;
        let path = series_dir.join("index.json");
        std::fs::write(path, json).map_err(crate::Error::Io)?;
        Ok(())
    }
}

fn scan_orphans(series_dir: &Path, tracked: &HashSet<String>) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(series_dir) else {
        return vec![];
    };

    let mut orphans = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
            continue;
        };
        let is_archive = path
            .extension()
            .map(|ext| ARCHIVE_EXTENSIONS.contains(&ext.to_string_lossy().to_lowercase().as_str()))
            .unwrap_or(false);
        if is_archive && !tracked.contains(&name) {
            orphans.push(name);
        }
    }
    orphans
}

fn remove_file_best_effort(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(?path, error = %e, "failed to remove bad archive file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension_client::NoOpExtensionClient;
    use crate::types::{Chapter, ProviderFlags, Series, SeriesStatus, SeriesType};
    use std::sync::Arc;

    async fn setup() -> (IntegrityVerifier, Store, tempfile::TempDir) {
        let store = Store::new_in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = ChapterOrchestrator::new(store.clone(), Arc::new(NoOpExtensionClient));
        let verifier = IntegrityVerifier::new(store.clone(), orchestrator, dir.path().to_path_buf());
        (verifier, store, dir)
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
    async fn missing_file_resets_chapter_and_recomputes_floor() {
        let (verifier, store, dir) = setup().await;
        let series_id = store.insert_series(&sample_series()).await.unwrap();
        std::fs::create_dir_all(dir.path().join("sample")).unwrap();

        let mut provider = Provider {
            id: ProviderId(0),
            series_id,
            source_id: 1,
            name: "provider-a".into(),
            scanlator: None,
            language: "en".into(),
            importance: 0,
            flags: ProviderFlags::default(),
            continue_after_chapter: Some(2.0),
            title: None,
            description: None,
            artist: None,
            author: None,
            chapters: vec![
                Chapter {
                    name: "Chapter 1".into(),
                    number: Some(1.0),
                    source_index: 0,
                    url: "https://example.test/1".into(),
                    uploaded_at: None,
                    page_count: Some(5),
                    filename: "missing.cbz".into(),
                    downloaded_at: None,
                    should_download: false,
                    is_deleted: false,
                },
                Chapter {
                    name: "Chapter 2".into(),
                    number: Some(2.0),
                    source_index: 1,
                    url: "https://example.test/2".into(),
                    uploaded_at: None,
                    page_count: Some(5),
                    filename: "present.cbz".into(),
                    downloaded_at: None,
                    should_download: false,
                    is_deleted: false,
                },
            ],
            fetched_at: None,
        };

        crate::archive::build(
            &dir.path().join("sample").join("present.cbz"),
            &[crate::archive::PageEntry {
                filename: "page-001.jpg".into(),
                bytes: vec![1, 2, 3],
            }],
            &crate::types::ArchiveMetadata {
                title: "Chapter 2".into(),
                series: "Sample".into(),
                localized_series: None,
                number: Some(2.0),
                count: None,
                page_count: 1,
                format: "Web".into(),
                language: "en".into(),
                tags: String::new(),
                writer: None,
                publisher: "provider-a".into(),
                translator: None,
                cover_artist: None,
                day: None,
                month: None,
                year: None,
                reading_direction: Some("right-to-left".into()),
            },
        )
        .unwrap();

        provider.id = store.insert_provider(&provider).await.unwrap();

        let report = verifier.verify_series(series_id).await.unwrap();

        assert_eq!(report.bad_files.missing, 1);
        assert_eq!(report.fix_count, 1);
        assert_eq!(report.redownload_queued_count, 1);

        let reloaded = store.get_provider(provider.id).await.unwrap().unwrap();
        let fixed = reloaded.chapter_by_number(1.0).unwrap();
        assert_eq!(fixed.filename, "");
        assert!(fixed.should_download);
        assert_eq!(reloaded.continue_after_chapter, Some(2.0));
    }

    #[tokio::test]
    async fn orphan_archive_is_reported_not_deleted() {
        let (verifier, store, dir) = setup().await;
        let series_id = store.insert_series(&sample_series()).await.unwrap();
        std::fs::create_dir_all(dir.path().join("sample")).unwrap();
        std::fs::write(dir.path().join("sample").join("orphan.cbz"), b"data").unwrap();

        let report = verifier.verify_series(series_id).await.unwrap();
        assert_eq!(report.orphans, vec!["orphan.cbz".to_string()]);
        assert!(dir.path().join("sample").join("orphan.cbz").exists());
    }

    #[tokio::test]
    async fn running_verifier_twice_on_unchanged_state_is_idempotent() {
        let (verifier, store, dir) = setup().await;
        let series_id = store.insert_series(&sample_series()).await.unwrap();
        std::fs::create_dir_all(dir.path().join("sample")).unwrap();

        let first = verifier.verify_series(series_id).await.unwrap();
        let second = verifier.verify_series(series_id).await.unwrap();

        assert_eq!(first.bad_files, second.bad_files);
        assert_eq!(first.fix_count, second.fix_count);
        assert_eq!(second.bad_files.total(), 0);
        assert_eq!(second.fix_count, 0);
    }
}
