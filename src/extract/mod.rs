//! # Extraction Module
//!
//! Reads a ZIP archive held in memory and exposes every file it contains as
//! an in-memory blob behind a transient handle, plus a rebuilt folder tree.
//!
//! Progress: parsing the central directory is the first phase, decoding the
//! entries one by one is the second.

mod mime;
mod tree;

pub use mime::{mime_for_name, DEFAULT_MIME_TYPE};
pub use tree::{FileTree, FileTreeNode, NodeKind};

use std::io::{Cursor, Read};

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::common::{base_name, normalize_path};
use crate::error::{EntryFailure, ForgeError, Result};
use crate::ledger::{Blob, ResourceLedger, TransientHandle};
use crate::progress::{Phase, ProgressAggregator};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtractOptions {
    /// Only an explicit `Some(false)` turns a per-entry failure into an
    /// error; unset means skip and continue.
    pub continue_on_error: Option<bool>,
}

impl ExtractOptions {
    fn aborts_on_entry_failure(&self) -> bool {
        self.continue_on_error == Some(false)
    }
}

/// A decoded file entry.
#[derive(Debug, Clone)]
pub struct ExtractedFile {
    pub name: String,
    pub path: String,
    /// Uncompressed size in bytes.
    pub size: u64,
    pub mime_type: String,
    pub handle: TransientHandle,
    pub blob: Blob,
    pub modified: Option<NaiveDateTime>,
}

impl ExtractedFile {
    pub fn url(&self) -> &str {
        self.handle.url()
    }
}

/// An explicit directory marker from the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedDirectory {
    pub name: String,
    pub path: String,
    pub modified: Option<NaiveDateTime>,
}

/// Flat, serializable description of one extracted entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntrySummary {
    pub name: String,
    pub path: String,
    pub size: u64,
    pub mime_type: Option<String>,
    pub url: Option<String>,
    pub is_directory: bool,
}

#[derive(Debug, Clone)]
pub struct ExtractResult {
    pub files: Vec<ExtractedFile>,
    pub directories: Vec<ExtractedDirectory>,
    pub file_tree: FileTree,
    /// Number of extracted files.
    pub count: usize,
    /// Entries skipped because they could not be decoded.
    pub skipped: Vec<EntryFailure>,
}

impl ExtractResult {
    pub fn file(&self, path: &str) -> Option<&ExtractedFile> {
        let path = normalize_path(path);
        self.files.iter().find(|f| f.path == path)
    }

    /// Directories first, then files, in archive order.
    pub fn summaries(&self) -> Vec<EntrySummary> {
        let dirs = self.directories.iter().map(|d| EntrySummary {
            name: d.name.clone(),
            path: d.path.clone(),
            size: 0,
            mime_type: None,
            url: None,
            is_directory: true,
        });
        let files = self.files.iter().map(|f| EntrySummary {
            name: f.name.clone(),
            path: f.path.clone(),
            size: f.size,
            mime_type: Some(f.mime_type.clone()),
            url: Some(f.url().to_string()),
            is_directory: false,
        });
        dirs.chain(files).collect()
    }
}

enum RawEntry {
    Directory(ExtractedDirectory),
    File { path: String, data: Vec<u8>, modified: Option<NaiveDateTime> },
}

/// Largest inflated size accepted for a single entry.
pub const DEFAULT_ENTRY_LIMIT: u64 = 512 * 1024 * 1024;

/// Cap on buffer pre-sizing; a declared size is a hint, not a promise.
const PREALLOC_LIMIT: u64 = 16 * 1024 * 1024;

/// Decodes archives into blobs and handles.
#[derive(Debug, Clone)]
pub struct ArchiveReader {
    options: ExtractOptions,
    entry_limit: u64,
}

impl Default for ArchiveReader {
    fn default() -> Self {
        Self::new(ExtractOptions::default())
    }
}

impl ArchiveReader {
    pub fn new(options: ExtractOptions) -> Self {
        Self { options, entry_limit: DEFAULT_ENTRY_LIMIT }
    }

    /// Entries declaring or inflating to more than `limit` bytes are failed.
    pub fn with_entry_limit(mut self, limit: u64) -> Self {
        self.entry_limit = limit;
        self
    }

    /// Decode every entry of `bytes`.
    ///
    /// Handles for the returned files are moved into `ledger` only when the
    /// whole call succeeds; on error every handle created so far is revoked.
    pub async fn extract(
        &self,
        bytes: &[u8],
        ledger: &mut ResourceLedger,
        progress: &mut ProgressAggregator,
    ) -> Result<ExtractResult> {
        progress.reset();
        let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(ForgeError::ArchiveParse)?;
        let total = archive.len();
        progress.report(Phase::Packing, 1.0);
        info!(entries = total, bytes = bytes.len(), "reading archive");

        let mut batch = ResourceLedger::new(ledger.registry().clone());
        let mut files = Vec::new();
        let mut directories = Vec::new();
        let mut skipped = Vec::new();

        for index in 0..total {
            let outcome = match read_entry(&mut archive, index, self.entry_limit) {
                Ok(RawEntry::Directory(dir)) => {
                    directories.push(dir);
                    Ok(())
                }
                Ok(RawEntry::File { path, data, modified }) => {
                    expose(&mut batch, path, data, modified).map(|file| files.push(file))
                }
                Err(failure) => Err(failure),
            };

            if let Err(failure) = outcome {
                if self.options.aborts_on_entry_failure() {
                    return Err(ForgeError::EntryFailed(failure));
                }
                warn!(path = %failure.path, error = %failure.message, "skipping archive entry");
                skipped.push(failure);
            }

            progress.report_units(Phase::Encoding, index as u64 + 1, total as u64);
            tokio::task::yield_now().await;
        }

        let mut file_tree = FileTree::new();
        for dir in &directories {
            file_tree.insert_directory(&dir.path);
        }
        for file in &files {
            file_tree.insert_file(file.clone());
        }

        ledger.absorb(batch);
        progress.finish();
        info!(files = files.len(), directories = directories.len(), skipped = skipped.len(), "archive extracted");

        Ok(ExtractResult { count: files.len(), files, directories, file_tree, skipped })
    }
}

fn read_entry(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    index: usize,
    limit: u64,
) -> std::result::Result<RawEntry, EntryFailure> {
    let mut entry = archive
        .by_index(index)
        .map_err(|e| EntryFailure::new(format!("#{}", index), e.to_string()))?;

    let raw_name = entry.name().to_string();
    let path = safe_logical_path(&raw_name).map_err(|reason| EntryFailure::new(&raw_name, reason))?;
    let modified = to_naive(entry.last_modified());

    if entry.is_dir() {
        return Ok(RawEntry::Directory(ExtractedDirectory {
            name: base_name(&path).to_string(),
            path,
            modified,
        }));
    }

    let declared = entry.size();
    if declared > limit {
        return Err(EntryFailure::new(
            &path,
            format!("declared size {} exceeds the {} byte entry limit", declared, limit),
        ));
    }

    let capacity = usize::try_from(declared.min(PREALLOC_LIMIT)).unwrap_or(0);
    let mut data = Vec::with_capacity(capacity);
    entry
        .by_ref()
        .take(limit.saturating_add(1))
        .read_to_end(&mut data)
        .map_err(|e| EntryFailure::new(&path, e.to_string()))?;
    if data.len() as u64 > limit {
        return Err(EntryFailure::new(
            &path,
            format!("entry inflates past the {} byte entry limit", limit),
        ));
    }
    debug!(path = %path, size = data.len(), "entry decoded");
    Ok(RawEntry::File { path, data, modified })
}

fn expose(
    batch: &mut ResourceLedger,
    path: String,
    data: Vec<u8>,
    modified: Option<NaiveDateTime>,
) -> std::result::Result<ExtractedFile, EntryFailure> {
    let mime_type = mime_for_name(&path);
    let blob = Blob::new(data, mime_type);
    let handle = batch
        .create(blob.clone())
        .map_err(|e| EntryFailure::new(&path, e.to_string()))?;
    Ok(ExtractedFile {
        name: base_name(&path).to_string(),
        size: blob.len(),
        mime_type: mime_type.to_string(),
        handle,
        blob,
        modified,
        path,
    })
}

/// Logical path for an entry name. Leading slashes are dropped; names that
/// climb out of the archive root are refused.
fn safe_logical_path(name: &str) -> std::result::Result<String, &'static str> {
    let normalized = normalize_path(name);
    if normalized.split('/').any(|segment| segment == "..") {
        return Err("entry path escapes the archive root");
    }
    if normalized.is_empty() {
        return Err("entry has an empty name");
    }
    Ok(normalized)
}

fn to_naive(dt: zip::DateTime) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(dt.year() as i32, dt.month() as u32, dt.day() as u32)?.and_hms_opt(
        dt.hour() as u32,
        dt.minute() as u32,
        dt.second() as u32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::ObjectUrlRegistry;
    use std::io::Write;
    use zip::write::FileOptions;

    fn zip_of(entries: &[(&str, Option<&[u8]>)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, content) in entries {
            match content {
                Some(data) => {
                    writer.start_file(*name, FileOptions::default()).unwrap();
                    writer.write_all(data).unwrap();
                }
                None => writer.add_directory(*name, FileOptions::default()).unwrap(),
            }
        }
        writer.finish().unwrap().into_inner()
    }

    #[tokio::test]
    async fn files_get_handles_and_the_tree_is_complete() {
        let bytes = zip_of(&[("docs/", None), ("docs/a.txt", Some(b"alpha")), ("img/x/p.png", Some(b"png"))]);
        let registry = ObjectUrlRegistry::new();
        let mut ledger = ResourceLedger::new(registry.clone());
        let mut progress = ProgressAggregator::disabled();

        let result = ArchiveReader::default().extract(&bytes, &mut ledger, &mut progress).await.unwrap();
        assert_eq!(result.count, 2);
        assert_eq!(result.directories.len(), 1);
        assert_eq!(registry.live_count(), 2);
        assert_eq!(ledger.len(), 2);

        let a = result.file("docs/a.txt").unwrap();
        assert_eq!(a.mime_type, "text/plain");
        assert_eq!(registry.resolve(&a.handle).unwrap().bytes(), b"alpha");
        assert!(a.modified.is_some());

        // `img` and `img/x` have no markers but still exist.
        assert!(result.file_tree.find("img/x").unwrap().is_directory());
        assert_eq!(result.summaries().len(), 3);
        assert_eq!(progress.percent(), 100);

        drop(ledger);
        assert_eq!(registry.live_count(), 0);
    }

    #[tokio::test]
    async fn garbage_is_a_parse_error() {
        let mut ledger = ResourceLedger::new(ObjectUrlRegistry::new());
        let err = ArchiveReader::default()
            .extract(b"definitely not a zip", &mut ledger, &mut ProgressAggregator::disabled())
            .await
            .unwrap_err();
        assert!(matches!(err, ForgeError::ArchiveParse(_)));
    }

    #[tokio::test]
    async fn handle_failures_skip_or_abort() {
        let bytes = zip_of(&[("a.txt", Some(b"a")), ("b.txt", Some(b"b"))]);

        let registry = ObjectUrlRegistry::with_limit(1);
        let mut ledger = ResourceLedger::new(registry.clone());
        let result = ArchiveReader::default()
            .extract(&bytes, &mut ledger, &mut ProgressAggregator::disabled())
            .await
            .unwrap();
        assert_eq!(result.count, 1);
        assert_eq!(result.skipped.len(), 1);
        assert_eq!(result.skipped[0].path, "b.txt");
        ledger.release_all();

        let strict = ArchiveReader::new(ExtractOptions { continue_on_error: Some(false) });
        let err = strict
            .extract(&bytes, &mut ledger, &mut ProgressAggregator::disabled())
            .await
            .unwrap_err();
        assert!(err.is_per_item());
        // The handle created for a.txt was revoked with the failed batch.
        assert_eq!(registry.live_count(), 0);
        assert!(ledger.is_empty());
    }

    #[test]
    fn entry_paths_are_sanitized() {
        assert_eq!(safe_logical_path("/abs/file.txt").unwrap(), "abs/file.txt");
        assert!(safe_logical_path("../evil.sh").is_err());
        assert!(safe_logical_path("a/../../b").is_err());
        assert!(safe_logical_path("/").is_err());
    }

    /// One stored entry whose central directory declares `declared` as the
    /// uncompressed size, through a ZIP64 extra field when it does not fit 32 bits.
    fn stored_zip_declaring(name: &str, data: &[u8], declared: u64) -> Vec<u8> {
        const CRC_UNCHECKED: u32 = 0;
        let zip64 = declared >= u64::from(u32::MAX);
        let mut out = Vec::new();

        // Local file header.
        out.extend_from_slice(&0x0403_4b50u32.to_le_bytes());
        out.extend_from_slice(&45u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // flags
        out.extend_from_slice(&0u16.to_le_bytes()); // stored
        out.extend_from_slice(&0u16.to_le_bytes()); // time
        out.extend_from_slice(&0x21u16.to_le_bytes()); // 1980-01-01
        out.extend_from_slice(&CRC_UNCHECKED.to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(data);

        let cd_offset = out.len() as u32;
        let mut extra = Vec::new();
        if zip64 {
            extra.extend_from_slice(&1u16.to_le_bytes());
            extra.extend_from_slice(&8u16.to_le_bytes());
            extra.extend_from_slice(&declared.to_le_bytes());
        }
        let declared32 = if zip64 { u32::MAX } else { declared as u32 };

        // Central directory header.
        out.extend_from_slice(&0x0201_4b50u32.to_le_bytes());
        out.extend_from_slice(&45u16.to_le_bytes());
        out.extend_from_slice(&45u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0x21u16.to_le_bytes());
        out.extend_from_slice(&CRC_UNCHECKED.to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&declared32.to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&(extra.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // comment
        out.extend_from_slice(&0u16.to_le_bytes()); // disk
        out.extend_from_slice(&0u16.to_le_bytes()); // internal attrs
        out.extend_from_slice(&0u32.to_le_bytes()); // external attrs
        out.extend_from_slice(&0u32.to_le_bytes()); // local header offset
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(&extra);
        let cd_size = out.len() as u32 - cd_offset;

        // End of central directory.
        out.extend_from_slice(&0x0605_4b50u32.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&cd_size.to_le_bytes());
        out.extend_from_slice(&cd_offset.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out
    }

    #[tokio::test]
    async fn a_huge_declared_size_is_skipped_without_allocating() {
        let bytes = stored_zip_declaring("a.txt", b"hello", 1 << 62);
        let registry = ObjectUrlRegistry::new();
        let mut ledger = ResourceLedger::new(registry.clone());

        let result = ArchiveReader::default()
            .extract(&bytes, &mut ledger, &mut ProgressAggregator::disabled())
            .await
            .unwrap();
        assert_eq!(result.count, 0);
        assert_eq!(result.skipped.len(), 1);
        assert_eq!(result.skipped[0].path, "a.txt");
        assert!(result.skipped[0].message.contains("entry limit"));

        let strict = ArchiveReader::new(ExtractOptions { continue_on_error: Some(false) });
        let err = strict
            .extract(&bytes, &mut ledger, &mut ProgressAggregator::disabled())
            .await
            .unwrap_err();
        assert!(matches!(err, ForgeError::EntryFailed(ref f) if f.path == "a.txt"));
        assert_eq!(registry.live_count(), 0);
    }

    #[tokio::test]
    async fn entries_inflating_past_the_limit_are_skipped() {
        // Declares 2 bytes but stores 5.
        let understated = stored_zip_declaring("a.txt", b"hello", 2);
        let mut ledger = ResourceLedger::new(ObjectUrlRegistry::new());
        let result = ArchiveReader::default()
            .with_entry_limit(3)
            .extract(&understated, &mut ledger, &mut ProgressAggregator::disabled())
            .await
            .unwrap();
        assert_eq!(result.count, 0);
        assert!(result.skipped[0].message.contains("inflates past"));

        let compressible = zip_of(&[("zeros.bin", Some(&[0u8; 64 * 1024])), ("small.txt", Some(b"ok"))]);
        let result = ArchiveReader::default()
            .with_entry_limit(1024)
            .extract(&compressible, &mut ledger, &mut ProgressAggregator::disabled())
            .await
            .unwrap();
        assert_eq!(result.count, 1);
        assert_eq!(result.skipped[0].path, "zeros.bin");
        assert_eq!(result.file("small.txt").unwrap().blob.bytes(), b"ok");
    }
}
