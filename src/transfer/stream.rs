//! Streaming uploads from single-pass readers
//!
//! The source size is unknown, so there is no plan to hand the executor.
//! Instead a small pool of buffers is filled from the reader in order, each
//! full buffer is staged as the next block, and reading overlaps with the
//! stage calls still in flight. A buffer goes back to the pool only once its
//! stage call has finished, which caps memory at `max_buffers` buffers.

use crate::blob::models::{BlockId, CommitOptions, UploadResponse};
use crate::blob::store::BlobStore;
use crate::error::{Result, TransferError};
use crate::transfer::progress::{ProgressFn, ProgressTracker};
use crate::transfer::{DEFAULT_MAX_BUFFERS, MIN_STREAM_BUFFER_SIZE};
use bytes::Bytes;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Options for [`upload_stream`]
#[derive(Clone, Default)]
pub struct UploadStreamOptions {
    /// Bytes per staged block, raised to 1 MiB when smaller
    pub buffer_size: usize,
    /// Buffers allowed in flight at once; zero means two
    pub max_buffers: usize,
    pub commit: CommitOptions,
    pub progress: Option<ProgressFn>,
    pub cancel: Option<CancellationToken>,
}

impl std::fmt::Debug for UploadStreamOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadStreamOptions")
            .field("buffer_size", &self.buffer_size)
            .field("max_buffers", &self.max_buffers)
            .field("commit", &self.commit)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Fixed number of reusable buffers, allocated lazily
struct BufferPool {
    free: Vec<Vec<u8>>,
    allocated: usize,
    buffer_size: usize,
    max_buffers: usize,
}

impl BufferPool {
    fn new(buffer_size: usize, max_buffers: usize) -> Self {
        Self {
            free: Vec::with_capacity(max_buffers),
            allocated: 0,
            buffer_size,
            max_buffers,
        }
    }

    /// A free buffer, or `None` when every buffer is in flight
    fn take(&mut self) -> Option<Vec<u8>> {
        if let Some(buffer) = self.free.pop() {
            return Some(buffer);
        }
        if self.allocated < self.max_buffers {
            self.allocated += 1;
            return Some(vec![0u8; self.buffer_size]);
        }
        None
    }

    fn put(&mut self, buffer: Vec<u8>) {
        self.free.push(buffer);
    }
}

/// A finished stage call and the buffer it borrowed from the pool
struct Staged {
    buffer: Vec<u8>,
    len: u64,
    result: Result<()>,
}

async fn stage_buffer(
    store: &dyn BlobStore,
    block_id: BlockId,
    buffer: Vec<u8>,
    len: usize,
    cancel: CancellationToken,
) -> Staged {
    let body = Bytes::copy_from_slice(&buffer[..len]);
    trace!(block = %block_id, len, "staging streamed block");
    let result = tokio::select! {
        _ = cancel.cancelled() => Err(TransferError::Canceled),
        staged = store.stage_block(&block_id, body) => staged,
    };
    Staged {
        buffer,
        len: len as u64,
        result,
    }
}

/// Return the buffer to the pool and surface the stage result.
fn settle(staged: Staged, pool: &mut BufferPool, progress: &ProgressTracker) -> Result<()> {
    pool.put(staged.buffer);
    if staged.result.is_ok() {
        progress.add(staged.len);
    }
    staged.result
}

/// Read until `buffer` is full or the reader reaches end of stream.
async fn fill_buffer<R>(reader: &mut R, buffer: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buffer.len() {
        let n = reader.read(&mut buffer[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Upload everything `reader` yields as one block blob.
///
/// Blocks are committed in read order. After the first failed read or
/// stage call no further reads are issued; stage calls already in flight
/// run to completion and the first error is returned without a commit.
/// An empty reader commits an empty blob.
pub async fn upload_stream<R>(
    store: &dyn BlobStore,
    mut reader: R,
    options: &UploadStreamOptions,
) -> Result<UploadResponse>
where
    R: AsyncRead + Unpin + Send,
{
    let buffer_size = options.buffer_size.max(MIN_STREAM_BUFFER_SIZE);
    let max_buffers = if options.max_buffers == 0 {
        DEFAULT_MAX_BUFFERS
    } else {
        options.max_buffers
    };
    let cancel = options.cancel.clone().unwrap_or_default();
    let progress = ProgressTracker::new(options.progress.clone());

    debug!(buffer_size, max_buffers, "starting stream upload");

    let mut pool = BufferPool::new(buffer_size, max_buffers);
    let mut in_flight = FuturesUnordered::new();
    let mut block_ids: Vec<BlockId> = Vec::new();
    let mut first_error: Option<TransferError> = None;
    let mut total_size = 0u64;

    loop {
        let Some(mut buffer) = pool.take() else {
            match in_flight.next().await {
                Some(staged) => {
                    if let Err(err) = settle(staged, &mut pool, &progress) {
                        first_error = Some(err);
                        break;
                    }
                    continue;
                }
                None => break,
            }
        };

        let filled = {
            let read = fill_buffer(&mut reader, &mut buffer);
            tokio::pin!(read);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break Err(TransferError::Canceled),
                    Some(staged) = in_flight.next(), if !in_flight.is_empty() => {
                        if let Err(err) = settle(staged, &mut pool, &progress) {
                            break Err(err);
                        }
                    }
                    filled = &mut read => break filled.map_err(TransferError::from),
                }
            }
        };

        match filled {
            Err(err) => {
                pool.put(buffer);
                first_error = Some(err);
                break;
            }
            Ok(0) => {
                pool.put(buffer);
                break;
            }
            Ok(n) => {
                let block_id = BlockId::new();
                block_ids.push(block_id.clone());
                total_size += n as u64;
                in_flight.push(stage_buffer(store, block_id, buffer, n, cancel.clone()));
                if n < buffer_size {
                    break;
                }
            }
        }
    }

    while let Some(staged) = in_flight.next().await {
        if let Err(err) = settle(staged, &mut pool, &progress) {
            if first_error.is_none() {
                first_error = Some(err);
            }
        }
    }

    if let Some(err) = first_error {
        debug!(error = %err, blocks = block_ids.len(), "stream upload failed");
        return Err(err);
    }

    debug!(blocks = block_ids.len(), total_size, "committing streamed block list");
    let mut response = store.commit_block_list(&block_ids, &options.commit).await?;
    response.size = total_size;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::memory::MemoryBlobStore;
    use crate::blob::store::MockBlobStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_pool_caps_allocations() {
        let mut pool = BufferPool::new(4, 2);
        let first = pool.take().unwrap();
        let _second = pool.take().unwrap();
        assert!(pool.take().is_none());
        pool.put(first);
        assert_eq!(pool.take().unwrap().len(), 4);
        assert_eq!(pool.allocated, 2);
    }

    #[tokio::test]
    async fn test_empty_reader_commits_empty_blob() {
        let store = MemoryBlobStore::new("empty");
        let response = upload_stream(&store, &b""[..], &UploadStreamOptions::default())
            .await
            .unwrap();
        assert_eq!(response.size, 0);
        assert_eq!(response.block_count, 0);
        assert_eq!(store.content().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_blocks_follow_read_order() {
        let data: Vec<u8> = (0..(3 * MIN_STREAM_BUFFER_SIZE + 17)).map(|i| (i % 251) as u8).collect();
        let store = MemoryBlobStore::new("ordered");
        let options = UploadStreamOptions {
            buffer_size: 1,
            max_buffers: 3,
            ..Default::default()
        };

        let response = upload_stream(&store, &data[..], &options).await.unwrap();
        assert_eq!(response.block_count, 4);
        assert_eq!(response.size, data.len() as u64);
        assert_eq!(store.content().unwrap().as_ref(), &data[..]);
    }

    #[tokio::test]
    async fn test_stage_failure_stops_reading() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut store = MockBlobStore::new();
        store.expect_stage_block().returning(move |_, _| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(TransferError::remote("stage_block", "boom"))
            } else {
                Ok(())
            }
        });
        store.expect_commit_block_list().never();

        let data = vec![7u8; 10 * MIN_STREAM_BUFFER_SIZE];
        let err = upload_stream(&store, &data[..], &UploadStreamOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::RemoteOperationFailed { .. }));
        assert!(calls.load(Ordering::SeqCst) < 10);
    }
}
