//! # Compression Pipeline
//!
//! Turns normalized [`SourceEntry`] records into one ZIP archive.
//!
//! The build runs in two phases reported on one progress scale:
//! - **Packing** (lower half): every file is read through the
//!   [`ChunkedReader`], with a bounded number of retries per entry.
//! - **Encoding** (upper half): the packed entries are written through the
//!   codec and the central directory is finalized.
//!
//! Entries are processed strictly in order, one at a time.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::archive::{ArchiveCodec, ArchiveWriter};
use crate::chunked::ChunkedReader;
use crate::common::ratio_percent;
use crate::error::{EntryFailure, ForgeError, Result};
use crate::progress::{Phase, ProgressAggregator};
use crate::source::{EntryContent, SharedSource, SourceEntry};

/// Holds all configuration options for an archive build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildOptions {
    /// Entry codec.
    #[serde(rename = "compression")]
    pub codec: ArchiveCodec,
    /// Codec level; clamped to the codec's range.
    pub compression_level: i32,
    /// Record unreadable entries and keep going instead of aborting.
    pub continue_on_error: bool,
    /// Attempts per entry; 0 is treated as 1.
    pub retries: u32,
    /// Fixed delay between attempts.
    pub retry_delay_ms: u64,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            codec: ArchiveCodec::Deflate,
            compression_level: 6,
            continue_on_error: false,
            retries: 3,
            retry_delay_ms: 100,
        }
    }
}

impl BuildOptions {
    fn attempts(&self) -> u32 {
        self.retries.max(1)
    }
}

/// Result of a successful build.
#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub bytes: Vec<u8>,
    /// Entries skipped under `continue_on_error`.
    pub failed: Vec<EntryFailure>,
    /// File records written.
    pub entry_count: usize,
    /// Total bytes of the packed entries.
    pub original_size: u64,
    pub compressed_size: u64,
    /// `round((1 - compressed / original) * 100)`, 0 for empty input.
    pub ratio_percent: i64,
}

/// Assembles normalized entries into a ZIP archive.
#[derive(Debug, Clone, Default)]
pub struct ArchiveBuilder {
    options: BuildOptions,
    reader: ChunkedReader,
}

struct PendingFile<'a> {
    path: &'a str,
    source: &'a SharedSource,
}

impl ArchiveBuilder {
    pub fn new(options: BuildOptions, reader: ChunkedReader) -> Self {
        Self { options, reader }
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Build one archive from `entries`.
    pub async fn build(&self, entries: &[SourceEntry], progress: &mut ProgressAggregator) -> Result<BuildOutput> {
        if entries.is_empty() {
            return Err(ForgeError::EmptySelection);
        }

        let files = flatten(entries);
        let total_bytes: u64 = files.iter().map(|f| f.source.size()).sum();
        info!(entries = entries.len(), files = files.len(), total_bytes, "building archive");
        progress.reset();

        // --- Phase 1: packing ---
        let mut packed: Vec<(&str, Vec<u8>)> = Vec::with_capacity(files.len());
        let mut failed = Vec::new();
        let mut done_bytes = 0u64;
        for (index, file) in files.iter().enumerate() {
            let size = file.source.size();
            let outcome = {
                let files_total = files.len() as u64;
                let report = |consumed: u64| {
                    if total_bytes > 0 {
                        let current = done_bytes + consumed.min(size);
                        progress.report_units(Phase::Packing, current, total_bytes);
                    } else {
                        progress.report_units(Phase::Packing, index as u64, files_total);
                    }
                };
                self.read_with_retry(file, report).await
            };
            match outcome {
                Ok(data) => packed.push((file.path, data)),
                Err(failure) if self.options.continue_on_error => {
                    warn!(path = %failure.path, error = %failure.message, "skipping unreadable entry");
                    failed.push(failure);
                }
                Err(failure) => return Err(ForgeError::EntryFailed(failure)),
            }
            done_bytes += size;
            if total_bytes > 0 {
                progress.report_units(Phase::Packing, done_bytes, total_bytes);
            } else {
                progress.report_units(Phase::Packing, index as u64 + 1, files.len() as u64);
            }
        }

        // --- Phase 2: encoding ---
        let original_size: u64 = packed.iter().map(|(_, data)| data.len() as u64).sum();
        let packed_count = packed.len() as u64;
        let mut writer = ArchiveWriter::new(self.options.codec, self.options.compression_level);
        let mut encoded = 0u64;
        for (index, (path, data)) in packed.into_iter().enumerate() {
            let len = data.len() as u64;
            writer.add_file_entry(path, &data, |n| {
                if original_size > 0 {
                    progress.report_units(Phase::Encoding, encoded + n, original_size);
                }
            })?;
            encoded += len;
            if original_size == 0 {
                progress.report_units(Phase::Encoding, index as u64 + 1, packed_count);
            }
        }
        let entry_count = writer.entry_count();
        let bytes = writer.finalize()?;
        if bytes.is_empty() {
            return Err(ForgeError::EmptyOutput);
        }

        let compressed_size = bytes.len() as u64;
        let ratio_percent = ratio_percent(original_size, compressed_size);
        progress.finish();
        info!(entry_count, skipped = failed.len(), original_size, compressed_size, ratio_percent, "archive built");

        Ok(BuildOutput { bytes, failed, entry_count, original_size, compressed_size, ratio_percent })
    }

    async fn read_with_retry<F>(&self, file: &PendingFile<'_>, mut on_bytes: F) -> std::result::Result<Vec<u8>, EntryFailure>
    where
        F: FnMut(u64),
    {
        let attempts = self.options.attempts();
        let delay = Duration::from_millis(self.options.retry_delay_ms);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.reader.read_all(file.source.as_ref(), &mut on_bytes).await {
                Ok(data) => return Ok(data),
                Err(e) => {
                    warn!(path = file.path, attempt, attempts, error = %e, "entry read failed");
                    last_error = e.to_string();
                    if attempt < attempts && !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        Err(EntryFailure::new(file.path, last_error))
    }
}

/// Expand directory placeholders into their files; the last entry with a
/// given logical path wins.
fn flatten(entries: &[SourceEntry]) -> Vec<PendingFile<'_>> {
    fn walk<'a>(entry: &'a SourceEntry, out: &mut Vec<PendingFile<'a>>) {
        match entry.content() {
            EntryContent::File(source) => {
                if let Some(pos) = out.iter().position(|f| f.path == entry.logical_path()) {
                    debug!(path = entry.logical_path(), "duplicate logical path, last one wins");
                    out.remove(pos);
                }
                out.push(PendingFile { path: entry.logical_path(), source });
            }
            EntryContent::Directory(children) => {
                for child in children {
                    walk(child, out);
                }
            }
        }
    }

    let mut out = Vec::new();
    for entry in entries {
        walk(entry, &mut out);
    }
    out
}
