//! # Tool Sessions
//!
//! State holders for the three tools a UI exposes. Each session owns its
//! current selection, its last result and, where results carry transient
//! handles, the [`ResourceLedger`] for them. Operations take `&mut self`, so
//! a second operation cannot start while one is still pending. A session's
//! ledger is released when a new batch starts, on `clear` and on drop.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::archive::{archive_file_name, ArchiveCodec};
use crate::chunked::ChunkedReader;
use crate::compress::{ArchiveBuilder, BuildOptions, BuildOutput};
use crate::error::{EntryFailure, ForgeError, Result};
use crate::extract::{ArchiveReader, ExtractOptions, ExtractResult};
use crate::ledger::{Blob, ObjectUrlRegistry, ResourceLedger, TransientHandle};
use crate::progress::ProgressAggregator;
use crate::raster::{download_name, CompressionResult, ImageOptions, RasterRecompressor};
use crate::source::{normalize, SourceInput, SourceSet};
use crate::validate::{validate_archive_file, validate_image_file};

/// Build policy of the interactive archive tool.
pub fn interactive_build_options() -> BuildOptions {
    BuildOptions {
        codec: ArchiveCodec::Deflate,
        compression_level: 9,
        continue_on_error: true,
        retries: 3,
        ..BuildOptions::default()
    }
}

/// Image policy of the interactive recompression tool.
pub fn interactive_image_options() -> ImageOptions {
    ImageOptions { max_width: 2048, max_height: 2048, ..ImageOptions::default() }
}

/// Compression surface: a selection of files and directories turned into
/// one archive.
#[derive(Debug)]
pub struct ZipSession {
    builder: ArchiveBuilder,
    selection: SourceSet,
    archive_name: Option<String>,
    output: Option<BuildOutput>,
}

impl Default for ZipSession {
    fn default() -> Self {
        Self::new(ArchiveBuilder::new(interactive_build_options(), ChunkedReader::default()))
    }
}

impl ZipSession {
    pub fn new(builder: ArchiveBuilder) -> Self {
        Self { builder, selection: SourceSet::new(), archive_name: None, output: None }
    }

    /// Normalize and add inputs. Returns the subtrees that could not be listed.
    pub async fn add(&mut self, input: SourceInput) -> Vec<EntryFailure> {
        let normalized = normalize(input).await;
        self.selection.extend(normalized.entries);
        self.output = None;
        normalized.failures
    }

    pub fn remove(&mut self, index: usize) {
        if self.selection.remove(index).is_some() {
            self.output = None;
        }
    }

    pub fn selection(&self) -> &SourceSet {
        &self.selection
    }

    pub fn set_archive_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        self.archive_name = if name.trim().is_empty() { None } else { Some(name) };
    }

    /// The chosen name, else the one suggested by the first selected item.
    pub fn archive_name(&self) -> &str {
        self.archive_name
            .as_deref()
            .or_else(|| self.selection.suggested_name())
            .unwrap_or("compressed")
    }

    pub fn download_name(&self) -> String {
        archive_file_name(self.archive_name())
    }

    pub async fn compress(&mut self, progress: &mut ProgressAggregator) -> Result<&BuildOutput> {
        self.output = None;
        let output = self.builder.build(self.selection.entries(), progress).await?;
        Ok(self.output.insert(output))
    }

    pub fn output(&self) -> Option<&BuildOutput> {
        self.output.as_ref()
    }

    pub fn clear(&mut self) {
        self.selection.clear();
        self.archive_name = None;
        self.output = None;
    }
}

/// Extraction surface: one archive, its files exposed through handles.
#[derive(Debug)]
pub struct ExtractSession {
    reader: ArchiveReader,
    ledger: ResourceLedger,
    selected: Option<(String, Vec<u8>)>,
    result: Option<ExtractResult>,
}

impl ExtractSession {
    pub fn new(registry: ObjectUrlRegistry) -> Self {
        Self::with_reader(registry, ArchiveReader::new(ExtractOptions { continue_on_error: Some(true) }))
    }

    pub fn with_reader(registry: ObjectUrlRegistry, reader: ArchiveReader) -> Self {
        Self { reader, ledger: ResourceLedger::new(registry), selected: None, result: None }
    }

    /// Select an archive. Replaces the previous one and its results.
    pub fn select(&mut self, name: impl Into<String>, bytes: Vec<u8>) -> Result<()> {
        let name = name.into();
        validate_archive_file(&name, bytes.len() as u64)?;
        self.release();
        self.selected = Some((name, bytes));
        Ok(())
    }

    pub fn selected_name(&self) -> Option<&str> {
        self.selected.as_ref().map(|(name, _)| name.as_str())
    }

    pub async fn extract(&mut self, progress: &mut ProgressAggregator) -> Result<&ExtractResult> {
        self.release();
        let Some((_, bytes)) = self.selected.as_ref() else {
            return Err(ForgeError::EmptySelection);
        };
        let result = self.reader.extract(bytes, &mut self.ledger, progress).await?;
        Ok(self.result.insert(result))
    }

    pub fn result(&self) -> Option<&ExtractResult> {
        self.result.as_ref()
    }

    /// The file name and bytes behind one extracted file's handle.
    pub fn download(&self, path: &str) -> Option<(String, Blob)> {
        let file = self.result.as_ref()?.file(path)?;
        let blob = self.ledger.registry().resolve(&file.handle)?;
        Some((file.name.clone(), blob))
    }

    pub fn live_handles(&self) -> usize {
        self.ledger.len()
    }

    pub fn clear(&mut self) {
        self.release();
        self.selected = None;
    }

    fn release(&mut self) {
        self.result = None;
        self.ledger.release_all();
    }
}

/// Unit of a size target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SizeUnit {
    #[default]
    #[serde(rename = "KB")]
    Kb,
    #[serde(rename = "MB")]
    Mb,
}

impl SizeUnit {
    pub fn to_kb(self, value: f64) -> f64 {
        match self {
            SizeUnit::Kb => value,
            SizeUnit::Mb => value * 1024.0,
        }
    }
}

#[derive(Debug, Clone)]
struct SelectedImage {
    name: String,
    bytes: Vec<u8>,
}

/// A recompressed image and the handle exposing it.
#[derive(Debug, Clone)]
pub struct ImageOutput {
    pub result: CompressionResult,
    pub handle: TransientHandle,
    pub download_name: String,
}

/// Image surface: one image recompressed toward a size target.
#[derive(Debug)]
pub struct ImageSession {
    options: ImageOptions,
    ledger: ResourceLedger,
    selected: Option<SelectedImage>,
    output: Option<ImageOutput>,
}

impl ImageSession {
    pub fn new(registry: ObjectUrlRegistry) -> Self {
        Self::with_options(registry, interactive_image_options())
    }

    pub fn with_options(registry: ObjectUrlRegistry, options: ImageOptions) -> Self {
        Self { options, ledger: ResourceLedger::new(registry), selected: None, output: None }
    }

    pub fn select(&mut self, name: impl Into<String>, mime_type: Option<&str>, bytes: Vec<u8>) -> Result<()> {
        let name = name.into();
        validate_image_file(&name, mime_type, bytes.len() as u64)?;
        self.release();
        self.selected = Some(SelectedImage { name, bytes });
        Ok(())
    }

    /// Recompress the selected image toward `target` in `unit`.
    pub async fn compress(&mut self, target: f64, unit: SizeUnit, progress: &mut ProgressAggregator) -> Result<&ImageOutput> {
        self.release();
        let Some(selected) = self.selected.as_ref() else {
            return Err(ForgeError::EmptySelection);
        };
        let options = ImageOptions { max_size_kb: unit.to_kb(target), ..self.options.clone() };
        debug!(name = %selected.name, max_size_kb = options.max_size_kb, "recompressing image");

        let format = options.format;
        let result = RasterRecompressor::new(options).compress(&selected.bytes, progress).await?;
        let blob = Blob::new(result.output_bytes.clone(), result.mime_type.clone());
        let handle = self.ledger.create(blob)?;
        let output = ImageOutput { download_name: download_name(&selected.name, format), result, handle };
        Ok(self.output.insert(output))
    }

    pub fn output(&self) -> Option<&ImageOutput> {
        self.output.as_ref()
    }

    pub fn live_handles(&self) -> usize {
        self.ledger.len()
    }

    pub fn clear(&mut self) {
        self.release();
        self.selected = None;
    }

    fn release(&mut self) {
        self.output = None;
        self.ledger.release_all();
    }
}
