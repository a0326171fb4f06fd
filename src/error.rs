use std::fmt;

use thiserror::Error;

/// A single entry that could not be processed.
///
/// Recorded instead of aborting when the caller tolerates partial failure,
/// and carried inside [`ForgeError::EntryFailed`] when it does not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryFailure {
    /// Logical path of the entry (`dir/file.txt`).
    pub path: String,
    /// Human-readable cause.
    pub message: String,
}

impl EntryFailure {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self { path: path.into(), message: message.into() }
    }
}

impl fmt::Display for EntryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// The primary error type for all operations in the `fileforge` crate.
#[derive(Debug, Error)]
pub enum ForgeError {
    // --- input validation: raised before any async work starts ---
    /// Nothing was selected.
    #[error("nothing to compress: the selection is empty")]
    EmptySelection,

    /// Wrong file type or extension for the tool.
    #[error("unsupported file '{name}': {reason}")]
    UnsupportedFile { name: String, reason: String },

    /// The input exceeds the tool's size limit.
    #[error("file '{name}' is {size} bytes, the limit is {limit} bytes")]
    TooLarge { name: String, size: u64, limit: u64 },

    /// An option carried a value outside its accepted range.
    #[error("invalid option: {0}")]
    InvalidOption(String),

    // --- per-item: escalated only when the caller opted out of tolerance ---
    /// A single entry failed after exhausting its retries.
    #[error("failed to process '{}': {}", .0.path, .0.message)]
    EntryFailed(EntryFailure),

    /// A transient handle could not be created.
    #[error("could not create a handle: {0}")]
    HandleUnavailable(String),

    // --- whole-operation ---
    /// The archive's central directory could not be parsed.
    #[error("archive could not be read, check the file format: {0}")]
    ArchiveParse(#[source] zip::result::ZipError),

    /// The encoder produced zero bytes.
    #[error("the generated archive is empty")]
    EmptyOutput,

    /// Writing the archive stream failed.
    #[error("archive encoding failed: {0}")]
    ArchiveEncode(#[source] zip::result::ZipError),

    /// The image bytes could not be decoded.
    #[error("image could not be decoded: {0}")]
    ImageDecode(#[source] image::ImageError),

    /// No drawing surface could be allocated for the target raster.
    #[error("no drawing surface available for {width}x{height}")]
    SurfaceUnavailable { width: u32, height: u32 },

    /// The image encoder failed.
    #[error("image encoding failed: {0}")]
    Encode(#[source] image::ImageError),

    /// An I/O error while reading a source or writing an output.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration file could not be parsed.
    #[error("configuration error: {0}")]
    Config(#[from] serde_json::Error),
}

impl ForgeError {
    /// True for errors that are reported synchronously before any work starts.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ForgeError::EmptySelection
                | ForgeError::UnsupportedFile { .. }
                | ForgeError::TooLarge { .. }
                | ForgeError::InvalidOption(_)
        )
    }

    /// True for errors scoped to a single entry.
    pub fn is_per_item(&self) -> bool {
        matches!(self, ForgeError::EntryFailed(_) | ForgeError::HandleUnavailable(_))
    }
}

impl From<EntryFailure> for ForgeError {
    fn from(failure: EntryFailure) -> Self {
        ForgeError::EntryFailed(failure)
    }
}

pub type Result<T> = std::result::Result<T, ForgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_classes_are_distinct() {
        assert!(ForgeError::EmptySelection.is_validation());
        assert!(!ForgeError::EmptySelection.is_per_item());

        let failed: ForgeError = EntryFailure::new("dir/a.txt", "unreadable").into();
        assert!(failed.is_per_item());
        assert!(!failed.is_validation());
        assert_eq!(failed.to_string(), "failed to process 'dir/a.txt': unreadable");

        assert!(!ForgeError::EmptyOutput.is_validation());
        assert!(!ForgeError::EmptyOutput.is_per_item());
    }
}
