//! In-memory block blob
//!
//! Mirrors the block blob life cycle of the service: staged blocks are held
//! by id until a commit assembles them in list order, and a commit discards
//! every block it did not reference.

use crate::blob::models::{BlockId, CommitOptions, RangeResponse, UploadResponse};
use crate::blob::store::BlobStore;
use crate::error::{Result, TransferError};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Size of the pieces a ranged read is streamed in
const DEFAULT_READ_PIECE_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
struct CommittedBlob {
    content: Bytes,
    block_ids: Vec<BlockId>,
    options: CommitOptions,
    last_modified: DateTime<Utc>,
    version: u64,
}

#[derive(Debug, Default)]
struct MemoryState {
    staged: HashMap<BlockId, Bytes>,
    committed: Option<CommittedBlob>,
    version: u64,
    stage_calls: usize,
    commit_calls: usize,
    whole_uploads: usize,
}

/// A single blob held in memory
#[derive(Debug)]
pub struct MemoryBlobStore {
    name: String,
    state: Mutex<MemoryState>,
    read_piece_size: usize,
}

impl MemoryBlobStore {
    /// An empty store with no committed blob
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(MemoryState::default()),
            read_piece_size: DEFAULT_READ_PIECE_SIZE,
        }
    }

    /// A store whose blob is already committed with `content`
    pub fn with_content<S: Into<String>>(name: S, content: impl Into<Bytes>) -> Self {
        let store = Self::new(name);
        {
            let mut state = store.state.lock().unwrap_or_else(|e| e.into_inner());
            state.version = 1;
            state.committed = Some(CommittedBlob {
                content: content.into(),
                block_ids: Vec::new(),
                options: CommitOptions::default(),
                last_modified: Utc::now(),
                version: 1,
            });
        }
        store
    }

    /// Stream ranged reads in pieces of `size` bytes
    pub fn read_piece_size(mut self, size: usize) -> Self {
        self.read_piece_size = size.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Committed content, if any
    pub fn content(&self) -> Option<Bytes> {
        self.lock().committed.as_ref().map(|blob| blob.content.clone())
    }

    /// Block ids of the last committed block list, in committed order
    pub fn committed_block_ids(&self) -> Vec<BlockId> {
        self.lock()
            .committed
            .as_ref()
            .map(|blob| blob.block_ids.clone())
            .unwrap_or_default()
    }

    /// Options recorded with the last commit
    pub fn commit_options(&self) -> Option<CommitOptions> {
        self.lock().committed.as_ref().map(|blob| blob.options.clone())
    }

    /// Blocks staged but not yet committed
    pub fn staged_block_count(&self) -> usize {
        self.lock().staged.len()
    }

    pub fn stage_calls(&self) -> usize {
        self.lock().stage_calls
    }

    pub fn commit_calls(&self) -> usize {
        self.lock().commit_calls
    }

    pub fn whole_uploads(&self) -> usize {
        self.lock().whole_uploads
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn commit(state: &mut MemoryState, blob: CommittedBlob) -> UploadResponse {
        let response = UploadResponse {
            etag: format!("\"0x{:016X}\"", blob.version),
            last_modified: blob.last_modified,
            size: blob.content.len() as u64,
            block_count: blob.block_ids.len(),
        };
        state.committed = Some(blob);
        response
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn stage_block(&self, block_id: &BlockId, data: Bytes) -> Result<()> {
        let mut state = self.lock();
        state.stage_calls += 1;
        state.staged.insert(block_id.clone(), data);
        Ok(())
    }

    async fn commit_block_list(
        &self,
        block_ids: &[BlockId],
        options: &CommitOptions,
    ) -> Result<UploadResponse> {
        let mut state = self.lock();
        state.commit_calls += 1;

        let mut content = Vec::new();
        for id in block_ids {
            let block = state.staged.get(id).ok_or_else(|| {
                TransferError::remote(
                    "commit_block_list",
                    format!("block '{id}' was never staged for '{}'", self.name),
                )
            })?;
            content.extend_from_slice(block);
        }

        state.staged.clear();
        state.version += 1;
        let blob = CommittedBlob {
            content: Bytes::from(content),
            block_ids: block_ids.to_vec(),
            options: options.clone(),
            last_modified: Utc::now(),
            version: state.version,
        };
        Ok(Self::commit(&mut state, blob))
    }

    async fn upload_whole(&self, data: Bytes, options: &CommitOptions) -> Result<UploadResponse> {
        let mut state = self.lock();
        state.whole_uploads += 1;
        state.staged.clear();
        state.version += 1;
        let blob = CommittedBlob {
            content: data,
            block_ids: Vec::new(),
            options: options.clone(),
            last_modified: Utc::now(),
            version: state.version,
        };
        Ok(Self::commit(&mut state, blob))
    }

    async fn read_range(&self, offset: u64, count: Option<u64>) -> Result<RangeResponse> {
        let content = self
            .content()
            .ok_or_else(|| TransferError::not_found(self.name.clone()))?;
        let total_size = content.len() as u64;

        if offset >= total_size {
            return Err(TransferError::remote(
                "read_range",
                format!("range starting at {offset} is not satisfiable for {total_size} bytes"),
            ));
        }

        let end = match count {
            Some(count) => total_size.min(offset.saturating_add(count)),
            None => total_size,
        };
        let range = content.slice(offset as usize..end as usize);
        let piece = self.read_piece_size;
        let pieces: Vec<Result<Bytes>> = (0..range.len())
            .step_by(piece)
            .map(|start| Ok(range.slice(start..range.len().min(start + piece))))
            .collect();

        Ok(RangeResponse {
            body: futures::stream::iter(pieces).boxed(),
        })
    }

    async fn size(&self) -> Result<u64> {
        self.content()
            .map(|content| content.len() as u64)
            .ok_or_else(|| TransferError::not_found(self.name.clone()))
    }
}
