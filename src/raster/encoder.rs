use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::DynamicImage;

use super::OutputFormat;
use crate::error::{ForgeError, Result};

/// Encodes a rendered raster at a given quality.
pub trait RasterEncoder: Send + Sync {
    /// `quality` is in `(0, 1]`. Formats without a quality knob ignore it.
    fn encode(&self, raster: &DynamicImage, format: OutputFormat, quality: f64) -> Result<Vec<u8>>;
}

/// Encoder backed by the `image` crate codecs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCrateEncoder;

impl RasterEncoder for ImageCrateEncoder {
    fn encode(&self, raster: &DynamicImage, format: OutputFormat, quality: f64) -> Result<Vec<u8>> {
        let mut buffer = Cursor::new(Vec::new());
        match format {
            OutputFormat::Jpeg => {
                let encoder = JpegEncoder::new_with_quality(&mut buffer, jpeg_quality(quality));
                raster.write_with_encoder(encoder).map_err(ForgeError::Encode)?;
            }
            OutputFormat::Png => {
                let encoder = PngEncoder::new(&mut buffer);
                raster.write_with_encoder(encoder).map_err(ForgeError::Encode)?;
            }
        }
        Ok(buffer.into_inner())
    }
}

/// Map a `(0, 1]` quality onto the JPEG encoder's 1-100 scale.
pub fn jpeg_quality(quality: f64) -> u8 {
    if !quality.is_finite() {
        return 1;
    }
    (quality * 100.0).round().clamp(1.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_scale() {
        assert_eq!(jpeg_quality(0.9), 90);
        assert_eq!(jpeg_quality(0.001), 1);
        assert_eq!(jpeg_quality(1.7), 100);
        assert_eq!(jpeg_quality(f64::NAN), 1);
    }

    #[test]
    fn lower_quality_is_not_larger() {
        let raster = DynamicImage::ImageRgb8(image::RgbImage::from_fn(64, 64, |x, y| {
            image::Rgb([(x * 4) as u8, (y * 4) as u8, ((x ^ y) * 4) as u8])
        }));
        let high = ImageCrateEncoder.encode(&raster, OutputFormat::Jpeg, 0.95).unwrap();
        let low = ImageCrateEncoder.encode(&raster, OutputFormat::Jpeg, 0.1).unwrap();
        assert!(low.len() < high.len());
        assert_eq!(&high[..2], &[0xFF, 0xD8]);

        let png = ImageCrateEncoder.encode(&raster, OutputFormat::Png, 0.1).unwrap();
        assert_eq!(&png[1..4], b"PNG");
    }
}
