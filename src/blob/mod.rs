//! Blob stores and the transfer manager
//!
//! This module defines the [`BlobStore`] seam the transfer engine talks to,
//! its Azure and in-memory implementations, and the [`TransferManager`]
//! facade that applies configured defaults to each transfer.

pub mod azure;
pub mod manager;
pub mod memory;
pub mod models;
pub mod store;

// Re-export commonly used types
pub use azure::AzureBlobStore;
pub use manager::{create_transfer_manager, format_size, TransferDefaults, TransferManager};
pub use memory::MemoryBlobStore;
pub use models::*;
pub use store::BlobStore;
