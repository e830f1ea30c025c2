//! Data models for blob transfers
//!
//! This module defines block identifiers, commit options, and the response
//! types exchanged with a [`BlobStore`](crate::blob::store::BlobStore).

use crate::error::Result;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::ops::Index;

/// Opaque identifier of a staged block.
///
/// Every id is the base64 form of a random UUID, so all ids of one upload
/// share the same encoded length.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockId(String);

impl BlockId {
    pub fn new() -> Self {
        Self(STANDARD.encode(uuid::Uuid::new_v4().as_bytes()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for BlockId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<BlockId> for String {
    fn from(id: BlockId) -> Self {
        id.0
    }
}

/// Block ids for a fixed-size upload, addressed by chunk index
#[derive(Debug, Clone)]
pub struct BlockIdList(Vec<BlockId>);

impl BlockIdList {
    pub fn generate(count: usize) -> Self {
        Self((0..count).map(|_| BlockId::new()).collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Ids in chunk order, ready for a commit
    pub fn as_slice(&self) -> &[BlockId] {
        &self.0
    }
}

impl Index<usize> for BlockIdList {
    type Output = BlockId;

    fn index(&self, index: usize) -> &BlockId {
        &self.0[index]
    }
}

/// Properties applied when a blob is committed
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommitOptions {
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// Result of a committed upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub etag: String,
    pub last_modified: DateTime<Utc>,
    pub size: u64,
    /// Blocks in the committed list; zero for a single-request upload
    pub block_count: usize,
}

/// Stream of body bytes returned by a ranged read
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Body of a ranged read
pub struct RangeResponse {
    pub body: ByteStream,
}

impl fmt::Debug for RangeResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RangeResponse").finish_non_exhaustive()
    }
}
