//! Remote object store seam
//!
//! The transfer engine reaches the service only through [`BlobStore`]. Each
//! method is one remote call that either succeeds or fails; retries, if any,
//! belong to the implementation.

use crate::blob::models::{BlockId, CommitOptions, RangeResponse, UploadResponse};
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// Block-blob operations used by chunked uploads and downloads
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stage one uncommitted block under `block_id`
    async fn stage_block(&self, block_id: &BlockId, data: Bytes) -> Result<()>;

    /// Commit staged blocks in the given order, replacing the blob content
    async fn commit_block_list(
        &self,
        block_ids: &[BlockId],
        options: &CommitOptions,
    ) -> Result<UploadResponse>;

    /// Replace the blob with `data` in a single request
    async fn upload_whole(&self, data: Bytes, options: &CommitOptions) -> Result<UploadResponse>;

    /// Read `count` bytes starting at `offset`, or to the end when `count` is `None`
    async fn read_range(&self, offset: u64, count: Option<u64>) -> Result<RangeResponse>;

    /// Current size of the committed blob
    async fn size(&self) -> Result<u64>;
}
