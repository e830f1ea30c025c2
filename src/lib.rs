//! azxfer - parallel chunked transfers for Azure Blob Storage
//!
//! A bounded-parallelism transfer engine that uploads and downloads large
//! blobs in chunks, with first-error cancellation, ordered block commits,
//! and a streaming upload path for single-pass readers.

pub mod blob;
pub mod cli;
pub mod config;
pub mod error;
pub mod transfer;

// Re-export commonly used types
pub use blob::{BlobStore, MemoryBlobStore, TransferManager};
pub use error::{Result, TransferError};
pub use transfer::{run_parallel_transfer, BatchTransferOptions, Chunk, ChunkOperation};
