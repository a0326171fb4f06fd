//! Extension to MIME type hints for extracted entries.

use crate::common::extension;

pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

const MIME_TABLE: &[(&str, &str)] = &[
    ("pdf", "application/pdf"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("bmp", "image/bmp"),
    ("webp", "image/webp"),
    ("txt", "text/plain"),
    ("html", "text/html"),
    ("htm", "text/html"),
    ("css", "text/css"),
    ("js", "text/javascript"),
    ("json", "application/json"),
    ("csv", "text/csv"),
    ("xml", "text/xml"),
    ("doc", "application/msword"),
    ("docx", "application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
    ("xls", "application/vnd.ms-excel"),
    ("xlsx", "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
    ("ppt", "application/vnd.ms-powerpoint"),
    ("pptx", "application/vnd.openxmlformats-officedocument.presentationml.presentation"),
];

/// MIME hint for a file name, by its last extension (case-insensitive).
pub fn mime_for_name(name: &str) -> &'static str {
    extension(name)
        .and_then(|ext| MIME_TABLE.iter().find(|(e, _)| *e == ext).map(|(_, mime)| *mime))
        .unwrap_or(DEFAULT_MIME_TYPE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_and_unknown_extensions() {
        assert_eq!(mime_for_name("dir/Photo.JPG"), "image/jpeg");
        assert_eq!(mime_for_name("notes.txt"), "text/plain");
        assert_eq!(mime_for_name("archive.tar.gz"), DEFAULT_MIME_TYPE);
        assert_eq!(mime_for_name("Makefile"), DEFAULT_MIME_TYPE);
    }
}
