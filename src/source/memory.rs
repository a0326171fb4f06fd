//! In-memory byte sources and directory trees.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;

use super::{ByteSource, DirectoryHandle, DirectoryReader, EntryHandle};
use crate::common::join_path;

/// Browsers hand out directory listings in batches of about this size.
const DEFAULT_PAGE_SIZE: usize = 100;

/// A blob held in memory.
#[derive(Debug, Clone)]
pub struct MemorySource {
    name: String,
    data: Arc<[u8]>,
    mime_type: Option<String>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        Self { name: name.into(), data: data.into(), mime_type: None }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

#[async_trait]
impl ByteSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    async fn read_range(&self, start: u64, end: u64) -> io::Result<Vec<u8>> {
        let len = self.data.len() as u64;
        if start > end || end > len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("range {}..{} outside of {} bytes", start, end, len),
            ));
        }
        Ok(self.data[start as usize..end as usize].to_vec())
    }
}

#[derive(Debug, Clone)]
enum MemoryNode {
    File(Arc<MemorySource>),
    Directory(Arc<MemoryDirectory>),
}

/// An in-memory directory tree that lists its children in pages.
#[derive(Debug, Clone)]
pub struct MemoryDirectory {
    name: String,
    children: Vec<MemoryNode>,
    page_size: usize,
}

impl MemoryDirectory {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), children: Vec::new(), page_size: DEFAULT_PAGE_SIZE }
    }

    pub fn with_file(mut self, name: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        self.children.push(MemoryNode::File(Arc::new(MemorySource::new(name, data))));
        self
    }

    pub fn with_dir(mut self, dir: MemoryDirectory) -> Self {
        self.children.push(MemoryNode::Directory(Arc::new(dir)));
        self
    }

    /// Maximum number of entries returned per `read_entries` call (at least 1).
    /// Applies to this directory only.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// A root handle, as a drop event would produce it (`/<name>`).
    pub fn into_handle(self) -> Arc<dyn DirectoryHandle> {
        let full_path = format!("/{}", self.name);
        Arc::new(MemoryDirectoryHandle { full_path, dir: Arc::new(self) })
    }
}

struct MemoryDirectoryHandle {
    full_path: String,
    dir: Arc<MemoryDirectory>,
}

impl DirectoryHandle for MemoryDirectoryHandle {
    fn name(&self) -> &str {
        &self.dir.name
    }

    fn full_path(&self) -> &str {
        &self.full_path
    }

    fn create_reader(&self) -> Box<dyn DirectoryReader> {
        Box::new(MemoryDirectoryReader {
            full_path: self.full_path.clone(),
            dir: Arc::clone(&self.dir),
            cursor: 0,
        })
    }
}

struct MemoryDirectoryReader {
    full_path: String,
    dir: Arc<MemoryDirectory>,
    cursor: usize,
}

#[async_trait]
impl DirectoryReader for MemoryDirectoryReader {
    async fn read_entries(&mut self) -> io::Result<Vec<EntryHandle>> {
        let end = (self.cursor + self.dir.page_size).min(self.dir.children.len());
        let page = self.dir.children[self.cursor..end]
            .iter()
            .map(|node| match node {
                MemoryNode::File(source) => EntryHandle::File {
                    full_path: format!("/{}", join_path(&self.full_path, source.name())),
                    source: Arc::clone(source) as Arc<dyn ByteSource>,
                },
                MemoryNode::Directory(dir) => EntryHandle::Directory(Arc::new(MemoryDirectoryHandle {
                    full_path: format!("/{}", join_path(&self.full_path, &dir.name)),
                    dir: Arc::clone(dir),
                })),
            })
            .collect();
        self.cursor = end;
        Ok(page)
    }
}
