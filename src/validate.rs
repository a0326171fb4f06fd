//! Input checks run before any asynchronous work starts.

use crate::common::extension;
use crate::error::{ForgeError, Result};

pub const MAX_ARCHIVE_BYTES: u64 = 100 * 1024 * 1024;
pub const MAX_IMAGE_BYTES: u64 = 15 * 1024 * 1024;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp", "tiff", "svg"];

/// An archive to extract: `.zip` (any case), at most 100 MiB.
pub fn validate_archive_file(name: &str, size: u64) -> Result<()> {
    if extension(name).as_deref() != Some("zip") {
        return Err(ForgeError::UnsupportedFile {
            name: name.to_string(),
            reason: "only .zip archives can be extracted".to_string(),
        });
    }
    if size > MAX_ARCHIVE_BYTES {
        return Err(ForgeError::TooLarge { name: name.to_string(), size, limit: MAX_ARCHIVE_BYTES });
    }
    Ok(())
}

/// An image to recompress, identified by MIME type or, without one, by
/// extension. Must be smaller than 15 MiB.
pub fn validate_image_file(name: &str, mime_type: Option<&str>, size: u64) -> Result<()> {
    let accepted = match mime_type.filter(|m| !m.is_empty()) {
        Some(mime) => mime.starts_with("image/"),
        None => extension(name).is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str())),
    };
    if !accepted {
        return Err(ForgeError::UnsupportedFile {
            name: name.to_string(),
            reason: format!("not an image (accepted: {})", IMAGE_EXTENSIONS.join(", ")),
        });
    }
    if size >= MAX_IMAGE_BYTES {
        return Err(ForgeError::TooLarge { name: name.to_string(), size, limit: MAX_IMAGE_BYTES });
    }
    Ok(())
}

/// Human-readable size with two decimals: `1.50 KB`, `3.00 MB`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 B".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archives() {
        assert!(validate_archive_file("Bundle.ZIP", 10).is_ok());
        assert!(matches!(
            validate_archive_file("bundle.rar", 10),
            Err(ForgeError::UnsupportedFile { .. })
        ));
        assert!(matches!(
            validate_archive_file("big.zip", MAX_ARCHIVE_BYTES + 1),
            Err(ForgeError::TooLarge { .. })
        ));
    }

    #[test]
    fn images() {
        assert!(validate_image_file("x.bin", Some("image/heic"), 10).is_ok());
        assert!(validate_image_file("photo.WEBP", None, 10).is_ok());
        assert!(validate_image_file("notes.txt", Some("text/plain"), 10).is_err());
        assert!(validate_image_file("notes.txt", None, 10).is_err());
        let err = validate_image_file("huge.png", None, MAX_IMAGE_BYTES).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn sizes() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(512), "512.00 B");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.00 MB");
    }
}
