//! Chunked ranged downloads into buffers and files
//!
//! Each chunk issues one ranged read, buffers the body up to the chunk
//! length, and copies it into its own bounded [`SectionWriter`] over the
//! destination on the blocking pool. Chunks write disjoint regions, so a
//! shared destination needs no lock beyond the per-region ones a
//! [`BytesWriter`] keeps.

use crate::blob::store::BlobStore;
use crate::error::{Result, TransferError};
use crate::transfer::executor::{run_parallel_transfer, BatchTransferOptions, ChunkOperation};
use crate::transfer::plan::Chunk;
use crate::transfer::progress::{ProgressFn, ProgressTracker};
use crate::transfer::section::{blocking, BytesWriter, SectionWriter, WriteAt};
use crate::transfer::DEFAULT_BLOCK_SIZE;
use bytes::BytesMut;
use futures::StreamExt;
use std::path::Path;
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Options for buffer and file downloads
#[derive(Clone, Default)]
pub struct DownloadOptions {
    /// First byte of the blob to read
    pub offset: u64,
    /// Bytes to read; `None` or zero reads to the end of the blob
    pub count: Option<u64>,
    /// Bytes per ranged read; zero means 4 MiB
    pub block_size: u64,
    pub parallelism: u16,
    pub progress: Option<ProgressFn>,
    pub cancel: Option<CancellationToken>,
}

impl std::fmt::Debug for DownloadOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadOptions")
            .field("offset", &self.offset)
            .field("count", &self.count)
            .field("block_size", &self.block_size)
            .field("parallelism", &self.parallelism)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl DownloadOptions {
    fn block_size(&self) -> u64 {
        if self.block_size == 0 {
            DEFAULT_BLOCK_SIZE
        } else {
            self.block_size
        }
    }

    /// Copy of these options with the count already resolved
    pub fn with_count(&self, count: u64) -> Self {
        Self {
            count: Some(count),
            ..self.clone()
        }
    }
}

/// Number of bytes a download with `options` will transfer.
///
/// Without an explicit count this asks the store for the blob size; an
/// offset at or past the end resolves to zero. A range whose end does not
/// fit in a `u64` is rejected before any remote call.
pub async fn resolve_count(store: &dyn BlobStore, options: &DownloadOptions) -> Result<u64> {
    let count = match options.count {
        Some(count) if count > 0 => count,
        _ => store.size().await?.saturating_sub(options.offset),
    };
    if options.offset.checked_add(count).is_none() {
        return Err(TransferError::invalid_argument(format!(
            "range of {count} bytes at offset {} overflows",
            options.offset
        )));
    }
    Ok(count)
}

struct RangeReadOperation<W: WriteAt + ?Sized> {
    store: Arc<dyn BlobStore>,
    dest: Arc<W>,
    base_offset: u64,
    progress: Arc<ProgressTracker>,
}

impl<W: WriteAt + ?Sized + 'static> ChunkOperation for RangeReadOperation<W> {
    async fn execute(&self, chunk: Chunk, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(TransferError::Canceled);
        }

        let start = self.base_offset + chunk.offset;
        trace!(offset = start, length = chunk.length, "reading range");
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(TransferError::Canceled),
            response = self.store.read_range(start, Some(chunk.length)) => response?,
        };

        // Dropping the body on any early return releases the connection.
        let mut body = response.body;
        let mut pieces = Vec::new();
        let mut received = 0u64;
        loop {
            let piece = tokio::select! {
                _ = cancel.cancelled() => return Err(TransferError::Canceled),
                piece = body.next() => piece,
            };
            let Some(piece) = piece else { break };
            let piece = piece?;
            let len = piece.len() as u64;
            if len > chunk.length - received {
                return Err(TransferError::PartialWrite {
                    offset: received,
                    len,
                    limit: chunk.length,
                });
            }
            received += len;
            pieces.push(piece);
        }
        drop(body);

        if received < chunk.length {
            return Err(TransferError::remote(
                "read_range",
                format!(
                    "body for range at {start} ended after {received} of {} bytes",
                    chunk.length
                ),
            ));
        }

        let dest = Arc::clone(&self.dest);
        blocking(move || {
            let mut section = SectionWriter::new(dest.as_ref(), chunk.offset, chunk.length);
            for piece in &pieces {
                section.write(piece)?;
            }
            Ok(())
        })
        .await?;

        self.progress.add(chunk.length);
        Ok(())
    }
}

async fn download_resolved<W>(
    store: Arc<dyn BlobStore>,
    dest: Arc<W>,
    count: u64,
    options: &DownloadOptions,
) -> Result<u64>
where
    W: WriteAt + ?Sized + 'static,
{
    if count == 0 {
        debug!(offset = options.offset, "nothing to download");
        return Ok(0);
    }

    let operation = Arc::new(RangeReadOperation {
        store,
        dest,
        base_offset: options.offset,
        progress: Arc::new(ProgressTracker::new(options.progress.clone())),
    });

    let mut batch = BatchTransferOptions::new("download", count, options.block_size())
        .parallelism(options.parallelism);
    batch.cancel = options.cancel.clone();
    run_parallel_transfer(&batch, operation).await?;
    Ok(count)
}

/// Download `count` bytes into a fresh buffer split into per-chunk regions.
async fn download_into_memory(
    store: Arc<dyn BlobStore>,
    count: u64,
    options: &DownloadOptions,
) -> Result<BytesMut> {
    let len = usize::try_from(count)
        .map_err(|_| TransferError::invalid_argument("download does not fit in memory"))?;
    let writer = Arc::new(BytesWriter::new(len, options.block_size())?);
    download_resolved(store, Arc::clone(&writer), count, options).await?;
    Ok(writer.take())
}

/// Download into any positional writer, returning the bytes written.
///
/// Chunk offsets are relative to `options.offset`, so byte `options.offset`
/// of the blob lands at position zero of `dest`.
pub async fn download_to_writer<W>(
    store: Arc<dyn BlobStore>,
    dest: Arc<W>,
    options: &DownloadOptions,
) -> Result<u64>
where
    W: WriteAt + ?Sized + 'static,
{
    let count = resolve_count(store.as_ref(), options).await?;
    download_resolved(store, dest, count, options).await
}

/// Download into the front of `buffer`, returning the bytes written.
///
/// Fails before any ranged read when `buffer` is shorter than the range.
/// Chunks land in an owned staging buffer that is copied into `buffer` once
/// every chunk has arrived, so a failed download leaves `buffer` untouched.
pub async fn download_buffer(
    store: Arc<dyn BlobStore>,
    buffer: &mut [u8],
    options: &DownloadOptions,
) -> Result<u64> {
    let count = resolve_count(store.as_ref(), options).await?;
    if (buffer.len() as u64) < count {
        return Err(TransferError::invalid_argument(format!(
            "buffer of {} bytes cannot hold {count} bytes",
            buffer.len()
        )));
    }

    let contents = download_into_memory(store, count, options).await?;
    buffer[..contents.len()].copy_from_slice(&contents);
    Ok(count)
}

/// Download into a freshly allocated vector sized to the range.
pub async fn download_to_vec(store: Arc<dyn BlobStore>, options: &DownloadOptions) -> Result<Vec<u8>> {
    let count = resolve_count(store.as_ref(), options).await?;
    let contents = download_into_memory(store, count, options).await?;
    Ok(Vec::from(contents))
}

/// Download into an open file, resizing it to the range length first.
pub async fn download_file(
    store: Arc<dyn BlobStore>,
    file: File,
    options: &DownloadOptions,
) -> Result<u64> {
    let count = resolve_count(store.as_ref(), options).await?;
    if file.metadata().await?.len() != count {
        file.set_len(count).await?;
    }
    let file = Arc::new(file.into_std().await);
    download_resolved(store, file, count, options).await
}

/// Create or open `path` and download into it.
pub async fn download_path(
    store: Arc<dyn BlobStore>,
    path: &Path,
    options: &DownloadOptions,
) -> Result<u64> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .await?;
    download_file(store, file, options).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::memory::MemoryBlobStore;
    use crate::blob::store::MockBlobStore;

    fn content() -> Vec<u8> {
        (0..=255u8).cycle().take(1000).collect()
    }

    #[tokio::test]
    async fn test_short_buffer_rejected_before_reading() {
        let mut store = MockBlobStore::new();
        store.expect_size().returning(|| Ok(100));
        store.expect_read_range().never();

        let mut buffer = vec![0u8; 99];
        let result = download_buffer(Arc::new(store), &mut buffer, &DownloadOptions::default()).await;
        assert!(matches!(result, Err(TransferError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_overflowing_range_rejected_before_reading() {
        let mut store = MockBlobStore::new();
        store.expect_size().never();
        store.expect_read_range().never();
        let store = Arc::new(store);

        let options = DownloadOptions {
            offset: u64::MAX - 10,
            count: Some(100),
            block_size: 10,
            ..Default::default()
        };
        let mut buffer = vec![0u8; 100];
        let result = download_buffer(store.clone(), &mut buffer, &options).await;
        assert!(matches!(result, Err(TransferError::InvalidArgument(_))));

        let result = download_to_vec(store.clone(), &options).await;
        assert!(matches!(result, Err(TransferError::InvalidArgument(_))));

        let file = File::from_std(tempfile::tempfile().unwrap());
        let result = download_file(store, file, &options).await;
        assert!(matches!(result, Err(TransferError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_offset_past_end_is_noop() {
        let store = Arc::new(MemoryBlobStore::with_content("tail", content()));
        let options = DownloadOptions {
            offset: 5000,
            ..Default::default()
        };
        let mut buffer = Vec::new();
        assert_eq!(download_buffer(store, &mut buffer, &options).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_short_body_reported() {
        let store = Arc::new(MemoryBlobStore::with_content("short", content()));
        let options = DownloadOptions {
            offset: 900,
            count: Some(200),
            block_size: 64,
            ..Default::default()
        };
        let mut buffer = vec![0u8; 200];
        let err = download_buffer(store, &mut buffer, &options).await.unwrap_err();
        assert!(matches!(err, TransferError::RemoteOperationFailed { .. }));
        assert!(buffer.iter().all(|&b| b == 0));
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let mut store = MockBlobStore::new();
        store.expect_read_range().returning(|_, _| {
            let pieces = vec![Ok(bytes::Bytes::from_static(b"abcdef"))];
            Ok(crate::blob::models::RangeResponse {
                body: futures::stream::iter(pieces).boxed(),
            })
        });

        let options = DownloadOptions {
            count: Some(4),
            block_size: 4,
            ..Default::default()
        };
        let err = download_to_vec(Arc::new(store), &options).await.unwrap_err();
        assert!(matches!(err, TransferError::PartialWrite { offset: 0, len: 6, limit: 4 }));
    }

    #[tokio::test]
    async fn test_file_resized_to_range() {
        let data = content();
        let store = Arc::new(MemoryBlobStore::with_content("file", data.clone()).read_piece_size(7));
        let std_file = tempfile::tempfile().unwrap();
        std_file.set_len(5000).unwrap();
        let handle = std_file.try_clone().unwrap();

        let options = DownloadOptions {
            offset: 10,
            count: Some(300),
            block_size: 32,
            parallelism: 4,
            ..Default::default()
        };
        let written = download_file(store, File::from_std(std_file), &options).await.unwrap();
        assert_eq!(written, 300);
        assert_eq!(handle.metadata().unwrap().len(), 300);

        let mut read_back = vec![0u8; 300];
        crate::transfer::section::ReadAt::read_exact_at(&handle, &mut read_back, 0).unwrap();
        assert_eq!(read_back, data[10..310]);
    }
}
