//! Off-screen raster the recompressor renders into once per call.

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use tracing::debug;

use super::OutputFormat;
use crate::error::{ForgeError, Result};

/// Largest side a surface accepts.
pub const MAX_SURFACE_SIDE: u32 = 32_767;
/// Largest area a surface accepts.
pub const MAX_SURFACE_PIXELS: u64 = 16_384 * 16_384;

/// A scaled raster ready for repeated encoding.
#[derive(Debug, Clone)]
pub struct RenderSurface {
    raster: DynamicImage,
}

impl RenderSurface {
    /// Draw `source` scaled to `width` x `height`.
    ///
    /// JPEG has no alpha channel, so the raster is flattened to RGB once here
    /// instead of on every encode.
    pub fn render(source: &DynamicImage, width: u32, height: u32, format: OutputFormat) -> Result<Self> {
        let area = width as u64 * height as u64;
        if width == 0 || height == 0 || width > MAX_SURFACE_SIDE || height > MAX_SURFACE_SIDE || area > MAX_SURFACE_PIXELS {
            return Err(ForgeError::SurfaceUnavailable { width, height });
        }

        let scaled = if source.dimensions() == (width, height) {
            source.clone()
        } else {
            source.resize_exact(width, height, FilterType::Triangle)
        };
        let raster = match format {
            OutputFormat::Jpeg if scaled.color().has_alpha() || !matches!(scaled, DynamicImage::ImageRgb8(_)) => {
                DynamicImage::ImageRgb8(scaled.to_rgb8())
            }
            _ => scaled,
        };
        debug!(from = ?source.dimensions(), to = ?(width, height), "raster rendered");
        Ok(Self { raster })
    }

    pub fn raster(&self) -> &DynamicImage {
        &self.raster
    }

    pub fn width(&self) -> u32 {
        self.raster.width()
    }

    pub fn height(&self) -> u32 {
        self.raster.height()
    }
}
