//! Archive container format: an uncompressed zip holding page images plus a
//! `metadata.json` sidecar entry (spec.md §4.5, §6).
//!
//! Writes are always atomic: built in a temp file beside the destination,
//! then renamed into place.

use crate::error::ArchiveError;
use crate::types::ArchiveMetadata;
use crate::Result;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

const METADATA_ENTRY: &str = "metadata.json";

/// Outcome of inspecting an archive on disk (spec.md §4.5 `Classify`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Opens cleanly and contains at least one page image
    Fine,
    /// Path exists but is not a valid zip container
    NotAnArchive,
    /// Opens cleanly but contains zero page images
    NoImages,
    /// Path does not exist
    NotFound,
    /// Appears to be a zip container cut off mid-write
    Truncated,
}

/// One page to be written into an archive, in final page order.
pub struct PageEntry {
    /// Entry name within the archive, e.g. `page-001.jpg`
    pub filename: String,
    /// Raw image bytes
    pub bytes: Vec<u8>,
}

/// Build a new archive at `dest`, replacing anything already there.
///
/// The file is assembled in a sibling temp file first and renamed into place,
/// so a reader never observes a partially-written archive.
pub fn build(dest: &Path, pages: &[PageEntry], metadata: &ArchiveMetadata) -> Result<()> {
    let temp_path = temp_path_for(dest);
    write_archive(&temp_path, pages, metadata)?;
    finalize(&temp_path, dest)
}

/// Read the `metadata.json` sidecar entry, if present.
pub fn read_metadata(path: &Path) -> Result<Option<ArchiveMetadata>> {
    let file = File::open(path).map_err(crate::Error::Io)?;
    let mut archive = zip::ZipArchive::new(file).map_err(ArchiveError::Zip)?;

    match archive.by_name(METADATA_ENTRY) {
        Ok(mut entry) => {
            let mut contents = String::new();
            entry.read_to_string(&mut contents).map_err(crate::Error::Io)?;
            let metadata: ArchiveMetadata = serde_json::from_str(&contents)?;
            Ok(Some(metadata))
        }
        Err(zip::result::ZipError::FileNotFound) => Ok(None),
        Err(e) => Err(ArchiveError::Zip(e).into()),
    }
}

/// Rewrite an archive's `metadata.json` entry in place, preserving every page.
///
/// `zip` has no in-place entry replacement, so this reads every entry into
/// memory and rebuilds the archive via [`build`].
pub fn update_metadata(path: &Path, metadata: &ArchiveMetadata) -> Result<()> {
    let pages = read_pages(path)?;
    build(path, &pages, metadata)
}

/// Count page image entries (anything other than the metadata sidecar).
pub fn count_image_entries(path: &Path) -> Result<usize> {
    let file = File::open(path).map_err(crate::Error::Io)?;
    let mut archive = zip::ZipArchive::new(file).map_err(ArchiveError::Zip)?;

    let mut count = 0;
    for i in 0..archive.len() {
        let entry = archive.by_index(i).map_err(ArchiveError::Zip)?;
        if entry.is_dir() || entry.name() == METADATA_ENTRY {
            continue;
        }
        count += 1;
    }
    Ok(count)
}

/// Inspect an archive's health without needing the caller to interpret a
/// raw [`crate::Error`].
pub fn classify(path: &Path) -> Classification {
    if !path.exists() {
        return Classification::NotFound;
    }

    let file = match File::open(path) {
        Ok(f) => f,
        Err(_) => return Classification::NotAnArchive,
    };

    let mut archive = match zip::ZipArchive::new(file) {
        Ok(a) => a,
        Err(zip::result::ZipError::Io(io_err))
            if io_err.kind() == std::io::ErrorKind::UnexpectedEof =>
        {
            return Classification::Truncated;
        }
        Err(_) => return Classification::NotAnArchive,
    };

    let mut image_count = 0;
    for i in 0..archive.len() {
        match archive.by_index(i) {
            Ok(entry) if !entry.is_dir() && entry.name() != METADATA_ENTRY => {
                image_count += 1;
            }
            Ok(_) => {}
            Err(_) => return Classification::Truncated,
        }
    }

    if image_count == 0 {
        Classification::NoImages
    } else {
        Classification::Fine
    }
}

fn read_pages(path: &Path) -> Result<Vec<PageEntry>> {
    let file = File::open(path).map_err(crate::Error::Io)?;
    let mut archive = zip::ZipArchive::new(file).map_err(ArchiveError::Zip)?;

    let mut pages = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(ArchiveError::Zip)?;
        if entry.is_dir() || entry.name() == METADATA_ENTRY {
            continue;
        }
        let filename = entry.name().to_string();
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes).map_err(crate::Error::Io)?;
        pages.push(PageEntry { filename, bytes });
    }
    Ok(pages)
}

fn write_archive(temp_path: &Path, pages: &[PageEntry], metadata: &ArchiveMetadata) -> Result<()> {
    let file = File::create(temp_path).map_err(crate::Error::Io)?;
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Stored);

    for page in pages {
        writer
            .start_file(&page.filename, options)
            .map_err(ArchiveError::Zip)?;
        writer.write_all(&page.bytes).map_err(crate::Error::Io)?;
    }

    let metadata_json = serde_json::to_string_pretty(metadata)?;
    writer
        .start_file(METADATA_ENTRY, options)
        .map_err(ArchiveError::Zip)?;
    writer
        .write_all(metadata_json.as_bytes())
        .map_err(crate::Error::Io)?;

    writer.finish().map_err(ArchiveError::Zip)?;
    Ok(())
}

fn temp_path_for(dest: &Path) -> PathBuf {
    let file_name = dest
        .file_name()
        .map(|n| format!(".{}.tmp", n.to_string_lossy()))
        .unwrap_or_else(|| ".archive.tmp".to_string());
    dest.with_file_name(file_name)
}

fn finalize(temp_path: &Path, dest: &Path) -> Result<()> {
    std::fs::rename(temp_path, dest).map_err(|e| {
        ArchiveError::WriteFailed {
            path: dest.to_path_buf(),
            reason: e.to_string(),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ArchiveMetadata;

    fn sample_metadata() -> ArchiveMetadata {
        ArchiveMetadata {
            title: "Chapter 1".into(),
            series: "One Piece".into(),
            localized_series: None,
            number: Some(1.0),
            count: None,
            page_count: 2,
            format: "Web".into(),
            language: "en".into(),
            tags: "Action".into(),
            writer: None,
            publisher: "MangaPlus".into(),
            translator: None,
            cover_artist: None,
            day: None,
            month: None,
            year: None,
            reading_direction: Some("right-to-left".into()),
        }
    }

    fn sample_pages() -> Vec<PageEntry> {
        vec![
            PageEntry {
                filename: "page-001.jpg".into(),
                bytes: vec![1, 2, 3],
            },
            PageEntry {
                filename: "page-002.jpg".into(),
                bytes: vec![4, 5, 6],
            },
        ]
    }

    #[test]
    fn build_then_read_metadata_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("chapter.cbz");
        build(&dest, &sample_pages(), &sample_metadata()).unwrap();

        let metadata = read_metadata(&dest).unwrap().unwrap();
        assert_eq!(metadata.series, "One Piece");
        assert_eq!(metadata.page_count, 2);
    }

    #[test]
    fn build_then_count_image_entries_excludes_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("chapter.cbz");
        build(&dest, &sample_pages(), &sample_metadata()).unwrap();
        assert_eq!(count_image_entries(&dest).unwrap(), 2);
    }

    #[test]
    fn classify_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("missing.cbz");
        assert_eq!(classify(&dest), Classification::NotFound);
    }

    #[test]
    fn classify_well_formed_archive_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("chapter.cbz");
        build(&dest, &sample_pages(), &sample_metadata()).unwrap();
        assert_eq!(classify(&dest), Classification::Fine);
    }

    #[test]
    fn classify_archive_with_no_pages_is_no_images() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("empty.cbz");
        build(&dest, &[], &sample_metadata()).unwrap();
        assert_eq!(classify(&dest), Classification::NoImages);
    }

    #[test]
    fn classify_garbage_file_is_not_an_archive() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("garbage.cbz");
        std::fs::write(&dest, b"not a zip file").unwrap();
        assert_eq!(classify(&dest), Classification::NotAnArchive);
    }

    #[test]
    fn update_metadata_preserves_pages() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("chapter.cbz");
        build(&dest, &sample_pages(), &sample_metadata()).unwrap();

        let mut updated = sample_metadata();
        updated.title = "Chapter 1 (Retitled)".into();
        update_metadata(&dest, &updated).unwrap();

        assert_eq!(count_image_entries(&dest).unwrap(), 2);
        let metadata = read_metadata(&dest).unwrap().unwrap();
        assert_eq!(metadata.title, "Chapter 1 (Retitled)");
    }

    #[test]
    fn build_writes_atomically_leaving_no_temp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("chapter.cbz");
        build(&dest, &sample_pages(), &sample_metadata()).unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
