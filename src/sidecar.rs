//! Series-level metadata sidecar (`index.json`) written alongside a series'
//! archives (spec.md §6).

use crate::types::{Provider, Series};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const VERSION: u32 = 1;

/// One provider's summary within a series sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    /// Backing extension/source name
    pub provider: String,
    /// ISO language code
    pub language: String,
    /// Scanlator group, if any
    pub scanlator: Option<String>,
    /// Provider-reported title, if set
    pub title: Option<String>,
    /// `"active"`, `"disabled"`, `"uninstalled"`, or `"unknown"`
    pub status: String,
    /// 0 = most preferred
    pub importance: u32,
    /// Number of chapters currently present on disk
    pub chapter_count: usize,
    /// Contiguous downloaded-chapter ranges, e.g. `["1-5", "7", "9-12"]`
    pub downloaded_ranges: Vec<String>,
    /// Filenames of archives currently on disk for this provider
    pub archives: Vec<String>,
}

/// Full series sidecar document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesSidecar {
    /// Sidecar format version
    pub version: u32,
    /// Display title
    pub title: String,
    /// Publication status, lowercased
    pub status: String,
    /// Author credit
    pub author: Option<String>,
    /// Artist credit
    pub artist: Option<String>,
    /// Free-text description
    pub description: Option<String>,
    /// Genre list
    pub genres: Vec<String>,
    /// Sum of present chapters across all providers
    pub chapter_count: usize,
    /// Whether the user has paused downloads for this series
    pub disabled: bool,
    /// When this sidecar was written
    pub last_updated: DateTime<Utc>,
    /// Per-provider summaries
    pub providers: Vec<ProviderEntry>,
}

impl SeriesSidecar {
    /// Build a sidecar document from current series and provider state.
    pub fn build(series: &Series, providers: &[Provider]) -> Self {
        let provider_entries: Vec<ProviderEntry> = providers.iter().map(provider_entry).collect();
        let chapter_count = provider_entries.iter().map(|p| p.chapter_count).sum();

        Self {
            version: VERSION,
            title: series.title.clone(),
            status: status_str(series.status).to_string(),
            author: series.author.clone(),
            artist: series.artist.clone(),
            description: series.description.clone(),
            genres: series.genres.clone(),
            chapter_count,
            disabled: series.pause_downloads,
            last_updated: now(),
            providers: provider_entries,
        }
    }
}

#[cfg(not(test))]
fn now() -> DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
fn now() -> DateTime<Utc> {
    DateTime::from_timestamp(0, 0).expect("epoch is a valid timestamp")
}

fn status_str(status: crate::types::SeriesStatus) -> &'static str {
    use crate::types::SeriesStatus::*;
    match status {
        Ongoing => "ongoing",
        Completed => "completed",
        Cancelled => "cancelled",
        Unknown => "unknown",
    }
}

fn provider_status_str(provider: &Provider) -> &'static str {
    if provider.flags.disabled {
        "disabled"
    } else if provider.flags.uninstalled {
        "uninstalled"
    } else if provider.flags.unknown {
        "unknown"
    } else {
        "active"
    }
}

fn provider_entry(provider: &Provider) -> ProviderEntry {
    let mut numbers: Vec<f64> = provider.downloaded_numbers().collect();
    numbers.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let archives: Vec<String> = provider
        .chapters
        .iter()
        .filter(|c| c.is_present())
        .map(|c| c.filename.clone())
        .collect();

    ProviderEntry {
        provider: provider.name.clone(),
        language: provider.language.clone(),
        scanlator: provider.scanlator.clone(),
        title: provider.title.clone(),
        status: provider_status_str(provider).to_string(),
        importance: provider.importance,
        chapter_count: numbers.len(),
        downloaded_ranges: contiguous_ranges(&numbers),
        archives,
    }
}

fn contiguous_ranges(sorted_numbers: &[f64]) -> Vec<String> {
    let mut ranges = Vec::new();
    let mut iter = sorted_numbers.iter().copied().peekable();

    while let Some(start) = iter.next() {
        let mut end = start;
        while iter.peek().is_some_and(|&next| (next - end - 1.0).abs() < f64::EPSILON) {
            end = iter.next().unwrap();
        }
        if (end - start).abs() < f64::EPSILON {
            ranges.push(format_number(start));
        } else {
            ranges.push(format!("{}-{}", format_number(start), format_number(end)));
        }
    }

    ranges
}

fn format_number(n: f64) -> String {
    if (n.fract()).abs() < f64::EPSILON {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}
