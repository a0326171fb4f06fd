//! # Image Recompression
//!
//! Shrinks an image below a byte ceiling. The image is decoded and scaled
//! once into a [`RenderSurface`], then re-encoded while a bounded binary
//! search walks the quality range:
//!
//! 1. encode at the initial quality and accept it if it fits;
//! 2. otherwise encode at the minimum quality and accept that as the best
//!    attainable if even it does not fit;
//! 3. otherwise search `[min, initial]` for [`SEARCH_ITERATIONS`] rounds,
//!    keeping the highest quality that fit.
//!
//! At most `2 + SEARCH_ITERATIONS` encodes run per call.

mod encoder;
mod surface;

pub use encoder::{jpeg_quality, ImageCrateEncoder, RasterEncoder};
pub use surface::{RenderSurface, MAX_SURFACE_PIXELS, MAX_SURFACE_SIDE};

use image::GenericImageView;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::common::{base_name, ratio_percent};
use crate::error::{ForgeError, Result};
use crate::progress::{Phase, ProgressAggregator};

/// Fixed number of binary search rounds.
pub const SEARCH_ITERATIONS: usize = 7;
const MAX_ENCODES: u64 = 2 + SEARCH_ITERATIONS as u64;

/// Output encoding, serialized as its MIME type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputFormat {
    #[default]
    #[serde(rename = "image/jpeg")]
    Jpeg,
    #[serde(rename = "image/png")]
    Png,
}

impl OutputFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Png => "png",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageOptions {
    /// Size ceiling in KiB.
    #[serde(rename = "maxSizeKB")]
    pub max_size_kb: f64,
    pub max_width: u32,
    pub max_height: u32,
    /// Initial (and highest) quality, `(0, 1]`.
    pub quality: f64,
    /// Quality floor, `(0, quality]`.
    pub min_quality: f64,
    pub format: OutputFormat,
    pub preserve_aspect_ratio: bool,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            max_size_kb: 250.0,
            max_width: 1200,
            max_height: 1200,
            quality: 0.9,
            min_quality: 0.1,
            format: OutputFormat::Jpeg,
            preserve_aspect_ratio: true,
        }
    }
}

impl ImageOptions {
    pub fn validate(&self) -> Result<()> {
        if !self.max_size_kb.is_finite() || self.max_size_kb <= 0.0 {
            return Err(ForgeError::InvalidOption(format!("maxSizeKB must be positive, got {}", self.max_size_kb)));
        }
        if self.max_width == 0 || self.max_height == 0 {
            return Err(ForgeError::InvalidOption("maxWidth and maxHeight must be at least 1".to_string()));
        }
        let in_range = |q: f64| q.is_finite() && q > 0.0 && q <= 1.0;
        if !in_range(self.quality) || !in_range(self.min_quality) || self.min_quality > self.quality {
            return Err(ForgeError::InvalidOption(format!(
                "qualities must satisfy 0 < minQuality <= quality <= 1, got {} and {}",
                self.min_quality, self.quality
            )));
        }
        Ok(())
    }

    fn ceiling_bytes(&self) -> f64 {
        self.max_size_kb * 1024.0
    }
}

/// Raster size after applying the bounds. Never upscales; sides stay >= 1.
///
/// With the aspect ratio preserved, a landscape image is bounded by its width
/// and anything else by its height; the other side follows proportionally.
pub fn target_dimensions(width: u32, height: u32, options: &ImageOptions) -> (u32, u32) {
    let (max_w, max_h) = (options.max_width, options.max_height);
    let (w, h) = if options.preserve_aspect_ratio {
        if width > height {
            if width > max_w {
                (max_w, (height as f64 * max_w as f64 / width as f64).round() as u32)
            } else {
                (width, height)
            }
        } else if height > max_h {
            ((width as f64 * max_h as f64 / height as f64).round() as u32, max_h)
        } else {
            (width, height)
        }
    } else {
        (width.min(max_w), height.min(max_h))
    };
    (w.max(1), h.max(1))
}

/// Download name for a recompressed image: `compressed_<stem>.<ext>`, where
/// the stem is everything before the first dot.
pub fn download_name(original: &str, format: OutputFormat) -> String {
    let name = base_name(original);
    let stem = name.split('.').next().filter(|s| !s.is_empty()).unwrap_or("image");
    format!("compressed_{}.{}", stem, format.extension())
}

#[derive(Debug, Clone)]
pub struct CompressionResult {
    pub output_bytes: Vec<u8>,
    pub mime_type: String,
    pub original_size: u64,
    pub output_size: u64,
    pub ratio_percent: i64,
    /// `None` when the input was returned unchanged.
    pub quality_used: Option<f64>,
    /// Output raster size; `None` for unchanged input.
    pub dimensions: Option<(u32, u32)>,
    pub encode_count: usize,
}

impl CompressionResult {
    pub fn is_passthrough(&self) -> bool {
        self.quality_used.is_none()
    }
}

struct Candidate {
    bytes: Vec<u8>,
    quality: f64,
}

/// Size-targeted image recompressor.
pub struct RasterRecompressor {
    options: ImageOptions,
    encoder: Box<dyn RasterEncoder>,
}

impl RasterRecompressor {
    pub fn new(options: ImageOptions) -> Self {
        Self::with_encoder(options, Box::new(ImageCrateEncoder))
    }

    pub fn with_encoder(options: ImageOptions, encoder: Box<dyn RasterEncoder>) -> Self {
        Self { options, encoder }
    }

    pub fn options(&self) -> &ImageOptions {
        &self.options
    }

    pub async fn compress(&self, bytes: &[u8], progress: &mut ProgressAggregator) -> Result<CompressionResult> {
        self.options.validate()?;
        progress.reset();
        let original_size = bytes.len() as u64;
        let ceiling = self.options.ceiling_bytes();

        if original_size as f64 <= ceiling {
            debug!(original_size, ceiling, "image already within the ceiling");
            progress.finish();
            let mime_type = image::guess_format(bytes)
                .map(|f| f.to_mime_type())
                .unwrap_or(self.options.format.mime_type());
            return Ok(CompressionResult {
                output_bytes: bytes.to_vec(),
                mime_type: mime_type.to_string(),
                original_size,
                output_size: original_size,
                ratio_percent: 0,
                quality_used: None,
                dimensions: None,
                encode_count: 0,
            });
        }

        let decoded = image::load_from_memory(bytes).map_err(ForgeError::ImageDecode)?;
        progress.report(Phase::Packing, 0.5);
        let (src_w, src_h) = decoded.dimensions();
        let (width, height) = target_dimensions(src_w, src_h, &self.options);
        let surface = RenderSurface::render(&decoded, width, height, self.options.format)?;
        drop(decoded);
        progress.report(Phase::Packing, 1.0);
        tokio::task::yield_now().await;

        let fits = |candidate: &Candidate| candidate.bytes.len() as f64 <= ceiling;
        let mut encodes = 0usize;

        let initial = self.encode(&surface, self.options.quality, &mut encodes, progress).await?;
        let best = if fits(&initial) {
            initial
        } else {
            let floor = self.encode(&surface, self.options.min_quality, &mut encodes, progress).await?;
            if !fits(&floor) {
                debug!(size = floor.bytes.len(), ceiling, "minimum quality still above the ceiling");
                floor
            } else {
                let (mut low, mut high) = (self.options.min_quality, self.options.quality);
                let mut best = floor;
                for round in 0..SEARCH_ITERATIONS {
                    let mid = (low + high) / 2.0;
                    let candidate = self.encode(&surface, mid, &mut encodes, progress).await?;
                    let ok = fits(&candidate);
                    debug!(round, quality = mid, size = candidate.bytes.len(), fits = ok, "quality search");
                    if ok {
                        low = mid;
                        best = candidate;
                    } else {
                        high = mid;
                    }
                }
                best
            }
        };

        progress.finish();
        let output_size = best.bytes.len() as u64;
        let ratio_percent = ratio_percent(original_size, output_size);
        info!(original_size, output_size, quality = best.quality, encodes, width, height, "image recompressed");

        Ok(CompressionResult {
            output_bytes: best.bytes,
            mime_type: self.options.format.mime_type().to_string(),
            original_size,
            output_size,
            ratio_percent,
            quality_used: Some(best.quality),
            dimensions: Some((width, height)),
            encode_count: encodes,
        })
    }

    async fn encode(
        &self,
        surface: &RenderSurface,
        quality: f64,
        encodes: &mut usize,
        progress: &mut ProgressAggregator,
    ) -> Result<Candidate> {
        let bytes = self.encoder.encode(surface.raster(), self.options.format, quality)?;
        *encodes += 1;
        progress.report_units(Phase::Encoding, *encodes as u64, MAX_ENCODES);
        tokio::task::yield_now().await;
        Ok(Candidate { bytes, quality })
    }
}

impl Default for RasterRecompressor {
    fn default() -> Self {
        Self::new(ImageOptions::default())
    }
}

impl std::fmt::Debug for RasterRecompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterRecompressor").field("options", &self.options).finish()
    }
}
