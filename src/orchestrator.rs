//! Computes, for one provider, which chapters to enqueue given its own
//! progress, its siblings' progress, and the freshly fetched remote chapter
//! list (spec.md §4.2).

use crate::db::Store;
use crate::error::ExtensionError;
use crate::extension_client::{ExtensionClient, RemoteChapterInfo};
use crate::types::{DownloadArgs, FallbackProvider, Provider, ProviderId, QueueItemId};
use crate::Result;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;

const PRIORITY_SCALE: f64 = 100.0;

#[derive(Default, Clone, Copy)]
struct CrossEntry {
    has_disabled_copy: bool,
    best_active_downloaded: Option<u32>,
    best_active_available: Option<u32>,
}

/// Computes and enqueues the set of chapters one provider should download.
pub struct ChapterOrchestrator {
    store: Store,
    extension_client: Arc<dyn ExtensionClient>,
}

impl ChapterOrchestrator {
    /// Construct an orchestrator over the given store and extension host.
    pub fn new(store: Store, extension_client: Arc<dyn ExtensionClient>) -> Self {
        Self {
            store,
            extension_client,
        }
    }

    /// Fetch the remote chapter list for `provider_id`, diff it against the
    /// series' existing providers, and enqueue the resulting download jobs.
    /// Returns the ids of the jobs enqueued, in enqueue (ascending chapter
    /// number) order.
    ///
    /// A no-op on inactive providers (disabled/uninstalled/unknown): there is
    /// nothing meaningful to fetch or enqueue for a provider with no live
    /// source.
    pub async fn run_for_provider(&self, provider_id: ProviderId) -> Result<Vec<QueueItemId>> {
        let provider = self
            .store
            .get_provider(provider_id)
            .await?
            .ok_or_else(|| crate::Error::NotFound(format!("provider {provider_id}")))?;

        if provider.flags.is_inactive() {
            return Ok(vec![]);
        }

        let series = self
            .store
            .get_series(provider.series_id)
            .await?
            .ok_or_else(|| crate::Error::NotFound(format!("series {}", provider.series_id)))?;

        let siblings = self.store.list_providers_for_series(provider.series_id).await?;

        let remote_chapters = self
            .extension_client
            .get_chapters(provider.source_id, true)
            .await?;

        let filtered = filter_by_scanlator(&provider, remote_chapters);
        let this_downloaded = downloaded_number_set(&provider);
        let cross_map = build_cross_map(&siblings, provider.id);

        let mut included: Vec<RemoteChapterInfo> = filtered
            .into_iter()
            .filter(|chapter| {
                chapter
                    .number
                    .is_some_and(|n| should_include(n, &provider, &this_downloaded, &cross_map))
            })
            .collect();

        included.sort_by(|a, b| {
            a.number
                .partial_cmp(&b.number)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let fallback_providers = fallback_chain(&siblings, provider.id);

        let mut enqueued = Vec::with_capacity(included.len());
        let now = Utc::now();
        for chapter in included {
            let number = chapter.number.expect("filtered to Some above");
            let args = DownloadArgs {
                series_id: provider.series_id,
                provider_id: provider.id,
                source_chapter_index: chapter.source_index,
                chapter_number: Some(number),
                chapter_name: chapter.name,
                provider_name: provider.name.clone(),
                scanlator: chapter.scanlator.clone(),
                language: provider.language.clone(),
                title: provider.title.clone().unwrap_or_default(),
                storage_path: series.storage_path.clone(),
                url: chapter.url,
                uploaded_at: chapter.uploaded_at,
                page_count_hint: None,
                fallback_providers: fallback_providers.clone(),
                cascade_retries: 0,
                replacement: None,
            };

            let priority = (number * PRIORITY_SCALE).round() as i64;
            let id = self
                .store
                .enqueue(&provider.name, priority, now, &args)
                .await?;
            enqueued.push(id);
        }

        let mut updated = provider;
        updated.fetched_at = Some(now);
        self.store.update_provider(&updated).await?;

        Ok(enqueued)
    }
}

fn filter_by_scanlator(provider: &Provider, remote: Vec<RemoteChapterInfo>) -> Vec<RemoteChapterInfo> {
    match &provider.scanlator {
        Some(scanlator) if !scanlator.eq_ignore_ascii_case(&provider.name) => remote
            .into_iter()
            .filter(|c| {
                c.scanlator
                    .as_ref()
                    .is_some_and(|s| s.eq_ignore_ascii_case(scanlator))
            })
            .collect(),
        _ => remote,
    }
}

fn downloaded_number_set(provider: &Provider) -> Vec<u64> {
    provider.downloaded_numbers().map(f64::to_bits).collect()
}

fn build_cross_map(siblings: &[Provider], self_id: ProviderId) -> HashMap<u64, CrossEntry> {
    let mut map: HashMap<u64, CrossEntry> = HashMap::new();

    for sibling in siblings.iter().filter(|s| s.id != self_id) {
        let is_active = !sibling.flags.is_inactive();

        for chapter in &sibling.chapters {
            let Some(number) = chapter.number else {
                continue;
            };
            let entry = map.entry(number.to_bits()).or_default();

            if chapter.is_present() {
                if is_active {
                    entry.best_active_downloaded =
                        Some(min_opt(entry.best_active_downloaded, sibling.importance));
                } else {
                    entry.has_disabled_copy = true;
                }
            }

            if is_active {
                entry.best_active_available =
                    Some(min_opt(entry.best_active_available, sibling.importance));
            }
        }
    }

    map
}

fn min_opt(current: Option<u32>, candidate: u32) -> u32 {
    current.map_or(candidate, |c| c.min(candidate))
}

fn should_include(
    number: f64,
    provider: &Provider,
    this_downloaded: &[u64],
    cross_map: &HashMap<u64, CrossEntry>,
) -> bool {
    if this_downloaded.contains(&number.to_bits()) {
        return false;
    }

    if let Some(floor) = provider.continue_after_chapter {
        if number <= floor {
            return false;
        }
    }

    let cross = cross_map.get(&number.to_bits()).copied().unwrap_or_default();

    if cross
        .best_active_downloaded
        .is_some_and(|best| best <= provider.importance)
    {
        return false;
    }

    if cross
        .best_active_available
        .is_some_and(|best| best < provider.importance)
    {
        return false;
    }

    if cross.has_disabled_copy && cross.best_active_downloaded.is_none() {
        return false;
    }

    true
}

fn fallback_chain(siblings: &[Provider], self_id: ProviderId) -> Vec<FallbackProvider> {
    let mut chain: Vec<&Provider> = siblings
        .iter()
        .filter(|s| s.id != self_id && !s.flags.is_inactive() && s.source_id != 0)
        .collect();
    chain.sort_by_key(|s| s.importance);

    chain
        .into_iter()
        .map(|s| FallbackProvider {
            provider_id: s.id,
            source_id: s.source_id,
            importance: s.importance,
        })
        .collect()
}

/// Maps an extension-host RPC failure into the orchestrator's own result
/// type without losing the underlying category.
pub fn classify_fetch_failure(error: &crate::Error) -> Option<&ExtensionError> {
    match error {
        crate::Error::Extension(e) => Some(e),
        _ => None,
    }
}
