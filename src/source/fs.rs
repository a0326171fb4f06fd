//! Filesystem-backed sources used by the command-line front end.

use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::{ByteSource, DirectoryHandle, DirectoryReader, EntryHandle};
use crate::common::join_path;

const FS_PAGE_SIZE: usize = 100;

/// A file on disk, read lazily.
#[derive(Debug, Clone)]
pub struct PathSource {
    path: PathBuf,
    name: String,
    size: u64,
}

impl PathSource {
    /// Stat the file; no content is read.
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("'{}' is not a regular file", path.display()),
            ));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self { path, name, size: metadata.len() })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ByteSource for PathSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn read_range(&self, start: u64, end: u64) -> io::Result<Vec<u8>> {
        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(start)).await?;
        let mut buf = vec![0u8; end.saturating_sub(start) as usize];
        file.read_exact(&mut buf).await?;
        Ok(buf)
    }
}

/// A directory on disk, listed in pages.
#[derive(Debug, Clone)]
pub struct FsDirectory {
    path: PathBuf,
    name: String,
    full_path: String,
    /// Canonical paths from the root down to this directory.
    ancestors: Vec<PathBuf>,
}

impl FsDirectory {
    /// A root handle for `path` (`/<dir name>`).
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let canonical = path.canonicalize()?;
        let name = canonical
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "root".to_string());
        Ok(Self { full_path: format!("/{}", name), path, name, ancestors: vec![canonical] })
    }
}

impl DirectoryHandle for FsDirectory {
    fn name(&self) -> &str {
        &self.name
    }

    fn full_path(&self) -> &str {
        &self.full_path
    }

    fn create_reader(&self) -> Box<dyn DirectoryReader> {
        Box::new(FsDirectoryReader {
            dir: self.clone(),
            listing: None,
            done: false,
        })
    }
}

struct FsDirectoryReader {
    dir: FsDirectory,
    listing: Option<tokio::fs::ReadDir>,
    done: bool,
}

#[async_trait]
impl DirectoryReader for FsDirectoryReader {
    async fn read_entries(&mut self) -> io::Result<Vec<EntryHandle>> {
        if self.done {
            return Ok(Vec::new());
        }
        if self.listing.is_none() {
            self.listing = Some(tokio::fs::read_dir(&self.dir.path).await?);
        }
        let Some(listing) = self.listing.as_mut() else {
            return Ok(Vec::new());
        };

        let mut page = Vec::with_capacity(FS_PAGE_SIZE);
        while page.len() < FS_PAGE_SIZE {
            let Some(entry) = listing.next_entry().await? else {
                self.done = true;
                break;
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            let full_path = format!("/{}", join_path(&self.dir.full_path, &name));
            match Self::open_child(&self.dir, entry.path(), name, full_path.clone()).await {
                Ok(Some(handle)) => page.push(handle),
                Ok(None) => {}
                Err(e) => page.push(EntryHandle::Unreadable { full_path, message: e.to_string() }),
            }
        }
        Ok(page)
    }
}

impl FsDirectoryReader {
    /// Open one listed child. Sockets, fifos and devices yield `None`.
    async fn open_child(dir: &FsDirectory, path: PathBuf, name: String, full_path: String) -> io::Result<Option<EntryHandle>> {
        // Follows symlinks, so a dangling link fails here.
        let metadata = tokio::fs::metadata(&path).await?;
        if metadata.is_dir() {
            let canonical = tokio::fs::canonicalize(&path).await?;
            if dir.ancestors.contains(&canonical) {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!("symlink loop back to '{}'", canonical.display()),
                ));
            }
            let mut ancestors = dir.ancestors.clone();
            ancestors.push(canonical);
            Ok(Some(EntryHandle::Directory(Arc::new(FsDirectory { path, name, full_path, ancestors }))))
        } else if metadata.is_file() {
            let source = PathSource::open(&path).await?;
            Ok(Some(EntryHandle::File { full_path, source: Arc::new(source) }))
        } else {
            Ok(None)
        }
    }
}
