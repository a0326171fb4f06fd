//! # ZIP Writer
//!
//! Thin wrapper over [`zip::ZipWriter`] writing into memory. The builder
//! hands it one entry at a time; each entry's bytes are fed to the codec in
//! fixed windows so that encoding progress can be reported while the
//! archive is being produced.

use std::io::{Cursor, Write};

use serde::{Deserialize, Serialize};
use tracing::debug;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{ForgeError, Result};

/// Bytes handed to the codec per write call.
const ENCODE_WINDOW: usize = 256 * 1024;

/// Defines the available entry codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveCodec {
    /// Plain storage without any compression.
    #[serde(alias = "STORE")]
    Store,
    /// DEFLATE, readable by every ZIP tool.
    #[default]
    #[serde(alias = "DEFLATE")]
    Deflate,
    /// Zstandard (ZIP method 93). Not every extractor supports it.
    #[serde(alias = "ZSTD")]
    Zstd,
}

impl ArchiveCodec {
    fn method(self) -> CompressionMethod {
        match self {
            ArchiveCodec::Store => CompressionMethod::Stored,
            ArchiveCodec::Deflate => CompressionMethod::Deflated,
            ArchiveCodec::Zstd => CompressionMethod::Zstd,
        }
    }

    /// The level actually passed to the codec; `Store` takes none.
    pub fn effective_level(self, level: i32) -> Option<i32> {
        match self {
            ArchiveCodec::Store => None,
            ArchiveCodec::Deflate => Some(level.clamp(0, 9)),
            ArchiveCodec::Zstd => Some(level.clamp(1, 22)),
        }
    }
}

/// Download name for a built archive: `<base>.zip`.
pub fn archive_file_name(base: &str) -> String {
    let base = base.trim();
    let base = base.strip_suffix(".zip").unwrap_or(base);
    if base.is_empty() {
        "compressed.zip".to_string()
    } else {
        format!("{}.zip", base)
    }
}

/// A writer responsible for constructing a ZIP archive in memory.
pub struct ArchiveWriter {
    zip: ZipWriter<Cursor<Vec<u8>>>,
    options: FileOptions,
    entry_count: usize,
    bytes_in: u64,
}

impl ArchiveWriter {
    /// Creates a new `ArchiveWriter`.
    ///
    /// Levels outside the codec's range are clamped.
    pub fn new(codec: ArchiveCodec, level: i32) -> Self {
        let options = FileOptions::default()
            .compression_method(codec.method())
            .compression_level(codec.effective_level(level))
            .unix_permissions(0o644);
        Self {
            zip: ZipWriter::new(Cursor::new(Vec::new())),
            options,
            entry_count: 0,
            bytes_in: 0,
        }
    }

    /// Adds one file under `path`. `on_bytes` receives the cumulative count
    /// of this entry's bytes handed to the codec.
    pub fn add_file_entry<F>(&mut self, path: &str, data: &[u8], mut on_bytes: F) -> Result<()>
    where
        F: FnMut(u64),
    {
        self.zip.start_file(path, self.options).map_err(ForgeError::ArchiveEncode)?;
        let mut written = 0u64;
        for window in data.chunks(ENCODE_WINDOW) {
            self.zip.write_all(window)?;
            written += window.len() as u64;
            on_bytes(written);
        }
        if data.is_empty() {
            on_bytes(0);
        }
        self.entry_count += 1;
        self.bytes_in += data.len() as u64;
        Ok(())
    }

    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    /// Finalizes the archive by writing the central directory.
    ///
    /// This method consumes the writer and must be called to produce a valid archive.
    pub fn finalize(mut self) -> Result<Vec<u8>> {
        let cursor = self.zip.finish().map_err(ForgeError::ArchiveEncode)?;
        let bytes = cursor.into_inner();
        debug!(entries = self.entry_count, bytes_in = self.bytes_in, bytes_out = bytes.len(), "archive finalized");
        Ok(bytes)
    }
}
