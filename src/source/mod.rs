//! # Input Normalization
//!
//! Inputs reach the engine in three shapes: a flat list of files, drag-and-drop
//! items (files or directory handles with paged listings) and a directory
//! picker's file list where every file carries a relative path. This module
//! turns all of them into one ordered list of [`SourceEntry`] records.
//!
//! Nothing is read here. Byte sources stay lazy until the builder consumes them.

mod fs;
mod memory;

pub use fs::{FsDirectory, PathSource};
pub use memory::{MemoryDirectory, MemorySource};

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::common::{base_name, join_path, normalize_path, strip_last_extension};
use crate::error::EntryFailure;

/// A lazily readable provider of a file's bytes.
#[async_trait]
pub trait ByteSource: Send + Sync {
    /// File name (may contain a relative path for directory-picker inputs).
    fn name(&self) -> &str;

    /// Declared length in bytes.
    fn size(&self) -> u64;

    fn mime_type(&self) -> Option<&str> {
        None
    }

    /// Read bytes `[start, end)`. `end` never exceeds [`ByteSource::size`].
    async fn read_range(&self, start: u64, end: u64) -> io::Result<Vec<u8>>;
}

pub type SharedSource = Arc<dyn ByteSource>;

/// One page-at-a-time listing of a directory.
///
/// Each call returns the next batch; an empty batch means the listing is
/// complete. A single call is not guaranteed to return everything.
#[async_trait]
pub trait DirectoryReader: Send {
    async fn read_entries(&mut self) -> io::Result<Vec<EntryHandle>>;
}

/// A directory handle from a drop event or the local filesystem.
pub trait DirectoryHandle: Send + Sync {
    fn name(&self) -> &str;

    /// Path from the drop root, starting with `/` (e.g. `/photos/sub`).
    fn full_path(&self) -> &str;

    fn create_reader(&self) -> Box<dyn DirectoryReader>;
}

/// A dropped or listed item.
#[derive(Clone)]
pub enum EntryHandle {
    File { full_path: String, source: SharedSource },
    Directory(Arc<dyn DirectoryHandle>),
    /// A listed child that could not be opened (dangling link, symlink loop,
    /// permission error). Recorded as a failure; siblings are unaffected.
    Unreadable { full_path: String, message: String },
}

impl EntryHandle {
    pub fn file(full_path: impl Into<String>, source: SharedSource) -> Self {
        EntryHandle::File { full_path: full_path.into(), source }
    }

    pub fn full_path(&self) -> &str {
        match self {
            EntryHandle::File { full_path, .. } => full_path,
            EntryHandle::Directory(dir) => dir.full_path(),
            EntryHandle::Unreadable { full_path, .. } => full_path,
        }
    }
}

impl fmt::Debug for EntryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryHandle::File { full_path, source } => {
                write!(f, "File({}, {} bytes)", full_path, source.size())
            }
            EntryHandle::Directory(dir) => write!(f, "Directory({})", dir.full_path()),
            EntryHandle::Unreadable { full_path, message } => write!(f, "Unreadable({}: {})", full_path, message),
        }
    }
}

/// A file from a directory picker, carrying its path relative to the picked
/// directory's parent (`photos/sub/b.jpg`).
#[derive(Clone)]
pub struct RelativeFile {
    pub relative_path: String,
    pub source: SharedSource,
}

impl RelativeFile {
    pub fn new(relative_path: impl Into<String>, source: SharedSource) -> Self {
        Self { relative_path: relative_path.into(), source }
    }
}

/// Raw input handed to [`normalize`].
#[derive(Clone)]
pub enum SourceInput {
    /// A flat list of selected files.
    Files(Vec<SharedSource>),
    /// Drag-and-drop items.
    Dropped(Vec<EntryHandle>),
    /// A directory picker's list; the first path segment is the base directory.
    RelativeFiles(Vec<RelativeFile>),
}

/// Content of a normalized entry.
#[derive(Clone)]
pub enum EntryContent {
    File(SharedSource),
    /// Flattened file descendants, each with its full logical path.
    Directory(Vec<SourceEntry>),
}

/// A normalized input record.
#[derive(Clone)]
pub struct SourceEntry {
    logical_path: String,
    size: u64,
    content: EntryContent,
}

impl SourceEntry {
    pub fn file(logical_path: impl AsRef<str>, source: SharedSource) -> Self {
        Self {
            logical_path: normalize_path(logical_path.as_ref()),
            size: source.size(),
            content: EntryContent::File(source),
        }
    }

    /// A directory placeholder; its size is the sum of its children.
    pub fn directory(logical_path: impl AsRef<str>, children: Vec<SourceEntry>) -> Self {
        let size = children.iter().map(|c| c.size).sum();
        Self {
            logical_path: normalize_path(logical_path.as_ref()),
            size,
            content: EntryContent::Directory(children),
        }
    }

    pub fn logical_path(&self) -> &str {
        &self.logical_path
    }

    /// Last path segment.
    pub fn name(&self) -> &str {
        base_name(&self.logical_path)
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_directory(&self) -> bool {
        matches!(self.content, EntryContent::Directory(_))
    }

    pub fn content(&self) -> &EntryContent {
        &self.content
    }

    pub fn byte_source(&self) -> Option<&SharedSource> {
        match &self.content {
            EntryContent::File(source) => Some(source),
            EntryContent::Directory(_) => None,
        }
    }

    pub fn children(&self) -> &[SourceEntry] {
        match &self.content {
            EntryContent::File(_) => &[],
            EntryContent::Directory(children) => children,
        }
    }

    /// Number of file records this entry expands to.
    pub fn file_count(&self) -> usize {
        match &self.content {
            EntryContent::File(_) => 1,
            EntryContent::Directory(children) => children.iter().map(SourceEntry::file_count).sum(),
        }
    }
}

impl fmt::Debug for SourceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceEntry")
            .field("logical_path", &self.logical_path)
            .field("size", &self.size)
            .field("is_directory", &self.is_directory())
            .field("children", &self.children().len())
            .finish()
    }
}

/// Output of [`normalize`].
#[derive(Debug, Default)]
pub struct Normalized {
    pub entries: Vec<SourceEntry>,
    /// Subtrees and entries that could not be listed or opened. Siblings
    /// were still traversed.
    pub failures: Vec<EntryFailure>,
}

/// Convert one raw input into ordered, deduplicated entries.
pub async fn normalize(input: SourceInput) -> Normalized {
    let mut set = SourceSet::new();
    let mut failures = Vec::new();

    match input {
        SourceInput::Files(files) => {
            for source in files {
                let name = base_name(&normalize_path(source.name())).to_string();
                set.add(SourceEntry::file(name, source));
            }
        }
        SourceInput::RelativeFiles(files) => {
            for entry in group_relative_files(files) {
                set.add(entry);
            }
        }
        SourceInput::Dropped(items) => {
            for item in items {
                match item {
                    EntryHandle::File { full_path, source } => {
                        let name = base_name(&normalize_path(&full_path)).to_string();
                        set.add(SourceEntry::file(name, source));
                    }
                    EntryHandle::Directory(dir) => {
                        let mut files = Vec::new();
                        traverse(Arc::clone(&dir), &mut files, &mut failures).await;
                        debug!(dir = dir.full_path(), files = files.len(), "traversed dropped directory");
                        set.add(SourceEntry::directory(dir.full_path(), files));
                    }
                    EntryHandle::Unreadable { full_path, message } => {
                        warn!(path = %full_path, error = %message, "dropped item could not be opened");
                        failures.push(EntryFailure::new(normalize_path(&full_path), message));
                    }
                }
            }
        }
    }

    Normalized { entries: set.into_entries(), failures }
}

/// Group a directory picker's files under their first path segment.
fn group_relative_files(files: Vec<RelativeFile>) -> Vec<SourceEntry> {
    let mut groups: Vec<(String, Vec<SourceEntry>)> = Vec::new();
    let mut loose = Vec::new();

    for file in files {
        let path = normalize_path(&file.relative_path);
        let path = if path.is_empty() { normalize_path(file.source.name()) } else { path };
        match path.split_once('/') {
            Some((base, _)) => {
                let child = SourceEntry::file(&path, file.source);
                match groups.iter_mut().find(|(name, _)| name == base) {
                    Some((_, children)) => children.push(child),
                    None => groups.push((base.to_string(), vec![child])),
                }
            }
            None => loose.push(SourceEntry::file(&path, file.source)),
        }
    }

    let mut out: Vec<SourceEntry> = groups
        .into_iter()
        .map(|(base, children)| SourceEntry::directory(base, dedup_last_wins(children)))
        .collect();
    out.extend(loose);
    out
}

fn dedup_last_wins(entries: Vec<SourceEntry>) -> Vec<SourceEntry> {
    let mut out: Vec<SourceEntry> = Vec::with_capacity(entries.len());
    for entry in entries {
        out.retain(|e| e.logical_path != entry.logical_path);
        out.push(entry);
    }
    out
}

/// Read every page of a directory listing.
pub async fn list_all(dir: &dyn DirectoryHandle) -> io::Result<Vec<EntryHandle>> {
    let mut reader = dir.create_reader();
    let mut entries = Vec::new();
    loop {
        let batch = reader.read_entries().await?;
        if batch.is_empty() {
            break;
        }
        entries.extend(batch);
    }
    Ok(entries)
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Depth-first walk collecting file entries with their full logical paths.
fn traverse<'a>(
    dir: Arc<dyn DirectoryHandle>,
    files: &'a mut Vec<SourceEntry>,
    failures: &'a mut Vec<EntryFailure>,
) -> BoxFuture<'a, ()> {
    Box::pin(async move {
        let listing = match list_all(dir.as_ref()).await {
            Ok(listing) => listing,
            Err(e) => {
                warn!(dir = dir.full_path(), error = %e, "directory listing failed, skipping subtree");
                failures.push(EntryFailure::new(normalize_path(dir.full_path()), e.to_string()));
                return;
            }
        };

        for child in listing {
            match child {
                EntryHandle::File { full_path, source } => {
                    let path = if full_path.is_empty() {
                        join_path(dir.full_path(), source.name())
                    } else {
                        full_path
                    };
                    files.push(SourceEntry::file(path, source));
                }
                EntryHandle::Directory(sub) => traverse(sub, files, failures).await,
                EntryHandle::Unreadable { full_path, message } => {
                    warn!(path = %full_path, error = %message, "skipping unreadable entry");
                    failures.push(EntryFailure::new(normalize_path(&full_path), message));
                }
            }
        }
    })
}

/// The current selection of a compression surface.
///
/// Adding an entry whose top-level name already exists replaces the earlier
/// entry, which supports replacing a directory by dragging it in again.
#[derive(Debug, Default, Clone)]
pub struct SourceSet {
    entries: Vec<SourceEntry>,
    suggested_name: Option<String>,
}

impl SourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, entry: SourceEntry) {
        if self.suggested_name.is_none() {
            let name = entry.name();
            let suggestion = if entry.is_directory() { name } else { strip_last_extension(name) };
            if !suggestion.is_empty() {
                self.suggested_name = Some(suggestion.to_string());
            }
        }
        if let Some(pos) = self.entries.iter().position(|e| e.logical_path == entry.logical_path) {
            debug!(path = entry.logical_path(), "replacing entry with the same name");
            self.entries.remove(pos);
        }
        self.entries.push(entry);
    }

    pub fn extend(&mut self, entries: impl IntoIterator<Item = SourceEntry>) {
        for entry in entries {
            self.add(entry);
        }
    }

    pub fn remove(&mut self, index: usize) -> Option<SourceEntry> {
        if index >= self.entries.len() {
            return None;
        }
        let removed = self.entries.remove(index);
        if self.entries.is_empty() {
            self.suggested_name = None;
        }
        Some(removed)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.suggested_name = None;
    }

    pub fn entries(&self) -> &[SourceEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<SourceEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of declared sizes, directories counted by their aggregate size.
    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(SourceEntry::size).sum()
    }

    /// Archive base name derived from the first entry added to an empty set.
    pub fn suggested_name(&self) -> Option<&str> {
        self.suggested_name.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem(name: &str, len: usize) -> SharedSource {
        Arc::new(MemorySource::new(name, vec![7u8; len]))
    }

    struct DeniedDirectory;

    struct DeniedReader;

    #[async_trait]
    impl DirectoryReader for DeniedReader {
        async fn read_entries(&mut self) -> io::Result<Vec<EntryHandle>> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "listing denied"))
        }
    }

    impl DirectoryHandle for DeniedDirectory {
        fn name(&self) -> &str {
            "locked"
        }
        fn full_path(&self) -> &str {
            "/photos/locked"
        }
        fn create_reader(&self) -> Box<dyn DirectoryReader> {
            Box::new(DeniedReader)
        }
    }

    #[tokio::test]
    async fn flat_files_keep_order_and_last_wins() {
        let out = normalize(SourceInput::Files(vec![mem("a.txt", 1), mem("b.txt", 2), mem("a.txt", 3)])).await;
        let paths: Vec<_> = out.entries.iter().map(|e| e.logical_path().to_string()).collect();
        assert_eq!(paths, vec!["b.txt", "a.txt"]);
        assert_eq!(out.entries[1].size(), 3);
        assert!(out.failures.is_empty());
    }

    #[tokio::test]
    async fn paged_listing_is_read_until_empty() {
        let mut dir = MemoryDirectory::new("many").with_page_size(2);
        for i in 0..7 {
            dir = dir.with_file(format!("f{i}.bin"), vec![0u8; 4]);
        }
        let listing = list_all(dir.into_handle().as_ref()).await.unwrap();
        assert_eq!(listing.len(), 7);
    }

    #[tokio::test]
    async fn relative_files_group_under_their_base_directory() {
        let out = normalize(SourceInput::RelativeFiles(vec![
            RelativeFile::new("photos/a.jpg", mem("a.jpg", 10)),
            RelativeFile::new("photos/sub/b.jpg", mem("b.jpg", 20)),
        ]))
        .await;
        assert_eq!(out.entries.len(), 1);
        let dir = &out.entries[0];
        assert!(dir.is_directory());
        assert_eq!(dir.logical_path(), "photos");
        assert_eq!(dir.size(), 30);
        let children: Vec<_> = dir.children().iter().map(|c| c.logical_path()).collect();
        assert_eq!(children, vec!["photos/a.jpg", "photos/sub/b.jpg"]);
    }

    #[tokio::test]
    async fn a_failing_subtree_does_not_abort_siblings() {
        struct Root {
            children: Vec<EntryHandle>,
        }
        struct RootReader {
            children: Option<Vec<EntryHandle>>,
        }
        #[async_trait]
        impl DirectoryReader for RootReader {
            async fn read_entries(&mut self) -> io::Result<Vec<EntryHandle>> {
                Ok(self.children.take().unwrap_or_default())
            }
        }
        impl DirectoryHandle for Root {
            fn name(&self) -> &str {
                "photos"
            }
            fn full_path(&self) -> &str {
                "/photos"
            }
            fn create_reader(&self) -> Box<dyn DirectoryReader> {
                Box::new(RootReader { children: Some(self.children.clone()) })
            }
        }

        let root = Root {
            children: vec![
                EntryHandle::Directory(Arc::new(DeniedDirectory)),
                EntryHandle::file("/photos/a.jpg", mem("a.jpg", 5)),
            ],
        };
        let out = normalize(SourceInput::Dropped(vec![EntryHandle::Directory(Arc::new(root))])).await;

        assert_eq!(out.failures.len(), 1);
        assert_eq!(out.failures[0].path, "photos/locked");
        assert_eq!(out.entries[0].children().len(), 1);
        assert_eq!(out.entries[0].children()[0].logical_path(), "photos/a.jpg");
    }

    #[test]
    fn source_set_suggests_a_name_and_replaces_duplicates() {
        let mut set = SourceSet::new();
        set.add(SourceEntry::file("report.final.txt", mem("report.final.txt", 10)));
        set.add(SourceEntry::file("img.png", mem("img.png", 20)));
        set.add(SourceEntry::file("report.final.txt", mem("report.final.txt", 11)));

        assert_eq!(set.suggested_name(), Some("report.final"));
        assert_eq!(set.len(), 2);
        assert_eq!(set.entries()[1].logical_path(), "report.final.txt");
        assert_eq!(set.total_size(), 31);

        set.remove(0);
        set.remove(0);
        assert!(set.is_empty());
        assert_eq!(set.suggested_name(), None);
    }
}
