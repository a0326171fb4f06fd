//! Common utilities shared by the normalizer, the builder and the reader.
// Logical paths are always '/'-separated, relative, and never start with '/'.

use std::path::{Component, Path};

/// Normalize a path into a logical archive path.
///
/// Backslashes become forward slashes, `./` and leading `/` are stripped and
/// repeated separators collapse. Example: `"/./photos//a.jpg"` becomes
/// `"photos/a.jpg"`.
pub fn normalize_path(path: &str) -> String {
    let s = path.replace('\\', "/");
    s.split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Join a parent logical path and a child name.
pub fn join_path(parent: &str, child: &str) -> String {
    let parent = normalize_path(parent);
    let child = normalize_path(child);
    match (parent.is_empty(), child.is_empty()) {
        (true, _) => child,
        (_, true) => parent,
        _ => format!("{}/{}", parent, child),
    }
}

/// Last segment of a logical path.
pub fn base_name(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or("")
}

/// File name without its last extension; the whole name if there is none.
///
/// `"report.final.txt"` → `"report.final"`, `".bashrc"` → `".bashrc"`.
pub fn strip_last_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(0) | None => name,
        Some(idx) => &name[..idx],
    }
}

/// Lowercased extension of a file name, if any.
pub fn extension(name: &str) -> Option<String> {
    let base = base_name(name);
    match base.rfind('.') {
        Some(idx) if idx + 1 < base.len() => Some(base[idx + 1..].to_ascii_lowercase()),
        _ => None,
    }
}

/// Turn an archive entry name into a safe relative filesystem path.
///
/// Only normal components are kept, so `../../etc/passwd` cannot escape the
/// output directory. Returns `None` when nothing usable remains.
pub fn sanitize_relative(name: &str) -> Option<std::path::PathBuf> {
    let normalized = name.replace('\\', "/");
    let mut out = std::path::PathBuf::new();
    for component in Path::new(&normalized).components() {
        if let Component::Normal(part) = component {
            out.push(part);
        }
    }
    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Size reduction in percent: `round((1 - output / original) * 100)`.
///
/// Negative when the output grew; 0 for an empty original.
pub fn ratio_percent(original: u64, output: u64) -> i64 {
    if original == 0 {
        return 0;
    }
    ((1.0 - output as f64 / original as f64) * 100.0).round() as i64
}
