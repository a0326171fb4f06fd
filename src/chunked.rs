//! Windowed reads over a [`ByteSource`].
//!
//! Small sources are read in one call. Larger ones are read as sequential
//! fixed-size windows copied into one buffer sized to the declared length,
//! which bounds each pending read and yields a progress tick per window.

use std::io;

use tracing::trace;

use crate::source::ByteSource;

/// 2 MiB windows.
pub const DEFAULT_CHUNK_SIZE: usize = 2 * 1024 * 1024;

/// Reads a source incrementally in fixed-size windows.
#[derive(Debug, Clone, Copy)]
pub struct ChunkedReader {
    chunk_size: usize,
}

impl ChunkedReader {
    pub fn new(chunk_size: usize) -> Self {
        Self { chunk_size: chunk_size.max(1) }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Read the whole source. `on_progress` receives the cumulative number of
    /// bytes consumed after each window.
    pub async fn read_all<F>(&self, source: &dyn ByteSource, mut on_progress: F) -> io::Result<Vec<u8>>
    where
        F: FnMut(u64),
    {
        let size = source.size();
        let chunk = self.chunk_size as u64;

        if size <= chunk {
            let buf = source.read_range(0, size).await?;
            check_len(source, 0, size, buf.len())?;
            on_progress(size);
            return Ok(buf);
        }

        let capacity = usize::try_from(size)
            .map_err(|_| io::Error::new(io::ErrorKind::OutOfMemory, "source does not fit in memory"))?;
        let mut out = Vec::with_capacity(capacity);
        let mut offset = 0u64;
        while offset < size {
            let end = (offset + chunk).min(size);
            let part = source.read_range(offset, end).await?;
            check_len(source, offset, end, part.len())?;
            out.extend_from_slice(&part);
            offset = end;
            trace!(name = source.name(), offset, size, "chunk read");
            on_progress(offset);
        }
        Ok(out)
    }
}

impl Default for ChunkedReader {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

fn check_len(source: &dyn ByteSource, start: u64, end: u64, got: usize) -> io::Result<()> {
    let expected = end - start;
    if got as u64 != expected {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!(
                "short read on '{}' at offset {}: expected {} bytes, got {}",
                source.name(),
                start,
                expected,
                got
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use async_trait::async_trait;

    #[tokio::test]
    async fn small_sources_are_read_in_one_shot() {
        let source = MemorySource::new("small.txt", b"hello".to_vec());
        let mut ticks = Vec::new();
        let data = ChunkedReader::new(16).read_all(&source, |n| ticks.push(n)).await.unwrap();
        assert_eq!(data, b"hello");
        assert_eq!(ticks, vec![5]);
    }

    #[tokio::test]
    async fn large_sources_tick_once_per_window() {
        let payload: Vec<u8> = (0..10u8).collect();
        let source = MemorySource::new("big.bin", payload.clone());
        let mut ticks = Vec::new();
        let data = ChunkedReader::new(4).read_all(&source, |n| ticks.push(n)).await.unwrap();
        assert_eq!(data, payload);
        assert_eq!(ticks, vec![4, 8, 10]);
    }

    #[tokio::test]
    async fn short_reads_are_errors() {
        struct Truncating;

        #[async_trait]
        impl ByteSource for Truncating {
            fn name(&self) -> &str {
                "lying.bin"
            }
            fn size(&self) -> u64 {
                8
            }
            async fn read_range(&self, start: u64, end: u64) -> io::Result<Vec<u8>> {
                Ok(vec![0u8; (end - start) as usize / 2])
            }
        }

        let err = ChunkedReader::new(4).read_all(&Truncating, |_| {}).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
