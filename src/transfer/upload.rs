//! Chunked block uploads from seekable sources
//!
//! A source of known size is cut into blocks, each block is staged
//! concurrently through [`run_parallel_transfer`], and the block list is
//! committed in offset order once every block has landed. Sources that fit
//! in one block go up in a single request instead.
//!
//! A failed upload leaves its staged blocks uncommitted; the service
//! discards them on its own schedule.

use crate::blob::models::{BlockIdList, CommitOptions, UploadResponse};
use crate::blob::store::BlobStore;
use crate::error::{Result, TransferError};
use crate::transfer::executor::{run_parallel_transfer, BatchTransferOptions, ChunkOperation};
use crate::transfer::plan::{Chunk, TransferPlan};
use crate::transfer::progress::{ProgressFn, ProgressTracker};
use crate::transfer::section::{blocking, ReadAt, SectionReader};
use crate::transfer::{
    DEFAULT_BLOCK_SIZE, MAX_BLOCKS, MAX_STAGE_BLOCK_BYTES, MAX_UPLOAD_BLOB_BYTES,
};
use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;
use tokio::fs::File;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Options for buffer and file uploads
#[derive(Clone, Default)]
pub struct UploadOptions {
    /// Block size in bytes; zero picks one from the source size
    pub block_size: u64,
    /// Maximum concurrently staged blocks; zero means the default
    pub parallelism: u16,
    pub commit: CommitOptions,
    pub progress: Option<ProgressFn>,
    pub cancel: Option<CancellationToken>,
}

impl std::fmt::Debug for UploadOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadOptions")
            .field("block_size", &self.block_size)
            .field("parallelism", &self.parallelism)
            .field("commit", &self.commit)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Pick the block size for an upload of `total_size` bytes.
///
/// An explicit size is checked against the service limits. Without one,
/// sources that fit a single request use the single-request maximum;
/// larger ones spread over all allowed blocks, never below 4 MiB.
pub fn resolve_block_size(total_size: u64, requested: u64) -> Result<u64> {
    if total_size > MAX_STAGE_BLOCK_BYTES * MAX_BLOCKS {
        return Err(TransferError::invalid_argument(format!(
            "source of {total_size} bytes is too large to upload as a block blob"
        )));
    }

    if requested > 0 {
        if requested > MAX_STAGE_BLOCK_BYTES {
            return Err(TransferError::invalid_argument(format!(
                "block size {requested} exceeds the maximum of {MAX_STAGE_BLOCK_BYTES} bytes"
            )));
        }
        return Ok(requested);
    }

    if total_size <= MAX_UPLOAD_BLOB_BYTES {
        return Ok(MAX_UPLOAD_BLOB_BYTES);
    }

    Ok(total_size.div_ceil(MAX_BLOCKS).max(DEFAULT_BLOCK_SIZE))
}

/// Read `[offset, offset + length)` of `source` on the blocking pool.
async fn read_section<R>(source: &Arc<R>, offset: u64, length: u64) -> Result<Bytes>
where
    R: ReadAt + ?Sized + 'static,
{
    let source = Arc::clone(source);
    blocking(move || SectionReader::new(source.as_ref(), offset, length).read_bytes()).await
}

/// Stages one block per chunk, reading its bytes through a bounded section.
struct StageBlockOperation<R: ReadAt + ?Sized> {
    store: Arc<dyn BlobStore>,
    source: Arc<R>,
    block_ids: Arc<BlockIdList>,
    progress: Arc<ProgressTracker>,
}

impl<R: ReadAt + ?Sized + 'static> ChunkOperation for StageBlockOperation<R> {
    async fn execute(&self, chunk: Chunk, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(TransferError::Canceled);
        }

        let body = read_section(&self.source, chunk.offset, chunk.length).await?;
        let block_id = &self.block_ids[chunk.index];
        trace!(block = %block_id, offset = chunk.offset, length = chunk.length, "staging block");

        tokio::select! {
            _ = cancel.cancelled() => return Err(TransferError::Canceled),
            staged = self.store.stage_block(block_id, body) => staged?,
        }

        self.progress.add(chunk.length);
        Ok(())
    }
}

/// Upload `total_size` bytes read from `source` as one block blob.
pub async fn upload_from_reader<R>(
    store: Arc<dyn BlobStore>,
    source: Arc<R>,
    total_size: u64,
    options: &UploadOptions,
) -> Result<UploadResponse>
where
    R: ReadAt + ?Sized + 'static,
{
    let block_size = resolve_block_size(total_size, options.block_size)?;
    let progress = Arc::new(ProgressTracker::new(options.progress.clone()));

    if total_size <= block_size && total_size <= MAX_UPLOAD_BLOB_BYTES {
        debug!(total_size, "uploading in a single request");
        let body = read_section(&source, 0, total_size).await?;
        let mut response = store.upload_whole(body, &options.commit).await?;
        progress.add(total_size);
        response.size = total_size;
        return Ok(response);
    }

    let plan = TransferPlan::new(total_size, block_size, options.parallelism)?;
    let block_count = plan.chunk_count();
    if block_count as u64 > MAX_BLOCKS {
        return Err(TransferError::invalid_argument(format!(
            "{block_count} blocks of {block_size} bytes exceed the limit of {MAX_BLOCKS} blocks"
        )));
    }

    let block_ids = Arc::new(BlockIdList::generate(block_count));
    let operation = Arc::new(StageBlockOperation {
        store: Arc::clone(&store),
        source,
        block_ids: Arc::clone(&block_ids),
        progress,
    });

    let mut batch = BatchTransferOptions::new("upload_from_reader", total_size, block_size)
        .parallelism(plan.parallelism());
    batch.cancel = options.cancel.clone();
    run_parallel_transfer(&batch, operation).await?;

    debug!(block_count, total_size, "committing block list");
    let mut response = store
        .commit_block_list(block_ids.as_slice(), &options.commit)
        .await?;
    response.size = total_size;
    Ok(response)
}

/// Upload an in-memory buffer. Blocks are zero-copy slices of `buffer`.
pub async fn upload_buffer(
    store: Arc<dyn BlobStore>,
    buffer: Bytes,
    options: &UploadOptions,
) -> Result<UploadResponse> {
    let size = buffer.len() as u64;
    upload_from_reader(store, Arc::new(buffer), size, options).await
}

/// Upload an open file from its start to its current length.
pub async fn upload_file(
    store: Arc<dyn BlobStore>,
    file: File,
    options: &UploadOptions,
) -> Result<UploadResponse> {
    let size = file.metadata().await?.len();
    let file = Arc::new(file.into_std().await);
    upload_from_reader(store, file, size, options).await
}

/// Open `path` and upload it.
pub async fn upload_path(
    store: Arc<dyn BlobStore>,
    path: &Path,
    options: &UploadOptions,
) -> Result<UploadResponse> {
    let file = File::open(path).await?;
    upload_file(store, file, options).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::memory::MemoryBlobStore;
    use crate::blob::store::MockBlobStore;
    use crate::transfer::MIB;
    use chrono::Utc;
    use mockall::predicate::always;

    #[test]
    fn test_resolve_block_size_defaults() {
        assert_eq!(resolve_block_size(10, 0).unwrap(), MAX_UPLOAD_BLOB_BYTES);
        assert_eq!(
            resolve_block_size(MAX_UPLOAD_BLOB_BYTES + 1, 0).unwrap(),
            DEFAULT_BLOCK_SIZE
        );
        let huge = 1000 * 1024 * MIB;
        assert_eq!(resolve_block_size(huge, 0).unwrap(), huge.div_ceil(MAX_BLOCKS));
        assert_eq!(resolve_block_size(10, 3).unwrap(), 3);
    }

    #[test]
    fn test_resolve_block_size_limits() {
        assert!(resolve_block_size(10, MAX_STAGE_BLOCK_BYTES + 1).is_err());
        assert!(resolve_block_size(MAX_STAGE_BLOCK_BYTES * MAX_BLOCKS + 1, 0).is_err());
    }

    #[tokio::test]
    async fn test_too_many_blocks_rejected_before_staging() {
        let store = MockBlobStore::new();
        let options = UploadOptions {
            block_size: 1,
            ..Default::default()
        };
        let data = Bytes::from(vec![0u8; (MAX_BLOCKS + 1) as usize]);
        let result = upload_buffer(Arc::new(store), data, &options).await;
        assert!(matches!(result, Err(TransferError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_stage_failure_skips_commit() {
        let mut store = MockBlobStore::new();
        store
            .expect_stage_block()
            .with(always(), always())
            .returning(|_, data| {
                if data.first() == Some(&2) {
                    Err(TransferError::remote("stage_block", "503 server busy"))
                } else {
                    Ok(())
                }
            });
        store.expect_commit_block_list().never();

        let data: Bytes = (0..4u8).flat_map(|b| [b; 8]).collect();
        let options = UploadOptions {
            block_size: 8,
            parallelism: 2,
            ..Default::default()
        };

        let err = upload_buffer(Arc::new(store), data, &options).await.unwrap_err();
        assert!(matches!(
            err,
            TransferError::RemoteOperationFailed { ref operation, .. } if operation == "stage_block"
        ));
    }

    #[tokio::test]
    async fn test_small_source_uses_single_request() {
        let mut store = MockBlobStore::new();
        store.expect_stage_block().never();
        store
            .expect_upload_whole()
            .times(1)
            .returning(|data, _| {
                Ok(UploadResponse {
                    etag: "\"0x1\"".to_string(),
                    last_modified: Utc::now(),
                    size: data.len() as u64,
                    block_count: 0,
                })
            });

        let response = upload_buffer(Arc::new(store), Bytes::from_static(b"tiny"), &UploadOptions::default())
            .await
            .unwrap();
        assert_eq!(response.size, 4);
        assert_eq!(response.block_count, 0);
    }

    #[tokio::test]
    async fn test_upload_path_reads_file_blocks() {
        let data: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocks.bin");
        std::fs::write(&path, &data).unwrap();

        let store = Arc::new(MemoryBlobStore::new("blocks.bin"));
        let options = UploadOptions {
            block_size: 1024,
            parallelism: 3,
            ..Default::default()
        };
        let response = upload_path(store.clone(), &path, &options).await.unwrap();

        assert_eq!(response.block_count, 10);
        assert_eq!(store.stage_calls(), 10);
        assert_eq!(store.whole_uploads(), 0);
        assert_eq!(store.content().unwrap().as_ref(), &data[..]);
    }

    #[tokio::test]
    async fn test_upload_path_missing_file() {
        let store = Arc::new(MemoryBlobStore::new("absent"));
        let result = upload_path(store.clone(), Path::new("/nonexistent/azx/file.bin"), &UploadOptions::default()).await;
        assert!(matches!(result, Err(TransferError::IoError(_))));
        assert_eq!(store.stage_calls(), 0);
    }
}
