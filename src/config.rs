//! Engine configuration, loadable from a JSON file.
//!
//! Keys are camelCase and every field is optional:
//!
//! ```json
//! { "compression": "zstd", "compressionLevel": 9, "maxSizeKB": 500, "progressSplit": 40 }
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::chunked::{ChunkedReader, DEFAULT_CHUNK_SIZE};
use crate::compress::BuildOptions;
use crate::error::{ForgeError, Result};
use crate::extract::ExtractOptions;
use crate::progress::{ProgressAggregator, DEFAULT_SPLIT};
use crate::raster::ImageOptions;

/// Environment variable naming a default configuration file.
pub const CONFIG_ENV: &str = "FILEFORGE_CONFIG";

/// All tool options in one flat key space.
///
/// `continueOnError` is shared by building and extracting; unset, a build
/// aborts on the first unreadable entry while an extraction skips bad entries.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    continue_on_error: Option<bool>,
    #[serde(flatten)]
    build: BuildOptions,
    #[serde(flatten)]
    image: ImageOptions,
    chunk_size: usize,
    progress_split: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            continue_on_error: None,
            build: BuildOptions::default(),
            image: ImageOptions::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            progress_split: DEFAULT_SPLIT,
        }
    }
}

impl EngineConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        debug!(path = %path.display(), "loading configuration");
        Self::from_json(&text)
    }

    /// Load from `--config`, else from `FILEFORGE_CONFIG`, else defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match resolve_config_path(explicit) {
            Some(path) => Self::from_file(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(ForgeError::InvalidOption("chunkSize must be at least 1".to_string()));
        }
        if !(1..=99).contains(&self.progress_split) {
            return Err(ForgeError::InvalidOption(format!(
                "progressSplit must be within 1..=99, got {}",
                self.progress_split
            )));
        }
        self.image.validate()
    }

    pub fn build_options(&self) -> BuildOptions {
        let mut options = self.build.clone();
        if let Some(tolerate) = self.continue_on_error {
            options.continue_on_error = tolerate;
        }
        options
    }

    pub fn extract_options(&self) -> ExtractOptions {
        ExtractOptions { continue_on_error: self.continue_on_error }
    }

    pub fn image_options(&self) -> ImageOptions {
        self.image.clone()
    }

    pub fn chunked_reader(&self) -> ChunkedReader {
        ChunkedReader::new(self.chunk_size)
    }

    pub fn progress(&self) -> ProgressAggregator {
        ProgressAggregator::new(self.progress_split)
    }
}

/// The explicit path wins over the environment.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    std::env::var_os(CONFIG_ENV).filter(|v| !v.is_empty()).map(PathBuf::from)
}
