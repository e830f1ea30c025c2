//! Parallel chunked transfer engine
//!
//! [`plan`] cuts a transfer into chunks, [`executor`] runs one operation per
//! chunk under a parallelism bound with first-error cancellation, and the
//! adapters in [`upload`], [`download`] and [`stream`] turn blob store calls
//! into such operations.

pub mod download;
pub mod executor;
pub mod plan;
pub mod progress;
pub mod section;
pub mod stream;
pub mod upload;

pub use download::{download_buffer, download_file, download_to_vec, DownloadOptions};
pub use executor::{run_parallel_transfer, BatchTransferOptions, ChunkOperation};
pub use plan::{plan, Chunk, TransferPlan, DEFAULT_PARALLELISM};
pub use progress::{ProgressFn, ProgressTracker};
pub use section::{BytesWriter, ReadAt, SectionReader, SectionWriter, WriteAt};
pub use stream::{upload_stream, UploadStreamOptions};
pub use upload::{upload_buffer, upload_file, upload_from_reader, UploadOptions};

pub const MIB: u64 = 1024 * 1024;

/// Largest body accepted by a single-request upload
pub const MAX_UPLOAD_BLOB_BYTES: u64 = 256 * MIB;

/// Largest block accepted by a stage call
pub const MAX_STAGE_BLOCK_BYTES: u64 = 4000 * MIB;

/// Most blocks a committed block list may hold
pub const MAX_BLOCKS: u64 = 50_000;

/// Chunk size for downloads, and the floor for computed upload block sizes
pub const DEFAULT_BLOCK_SIZE: u64 = 4 * MIB;

/// Smallest buffer a streaming upload will stage from
pub const MIN_STREAM_BUFFER_SIZE: usize = 1024 * 1024;

/// Buffers a streaming upload keeps in flight when the caller passes zero
pub const DEFAULT_MAX_BUFFERS: usize = 2;
