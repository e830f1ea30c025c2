//! Transfer manager for a single blob
//!
//! This module provides the TransferManager struct, which pairs a
//! [`BlobStore`] with configured transfer defaults and exposes the buffer,
//! file and stream transfers callers use.

use crate::blob::azure::AzureBlobStore;
use crate::blob::models::{CommitOptions, UploadResponse};
use crate::blob::store::BlobStore;
use crate::config::{Config, TransferConfig};
use crate::error::{Result, TransferError};
use crate::transfer::download::{self, DownloadOptions};
use crate::transfer::executor::{self, BatchTransferOptions, ChunkOperation};
use crate::transfer::stream::{self, UploadStreamOptions};
use crate::transfer::upload::{self, UploadOptions};
use crate::transfer::MIB;
use azure_core::auth::TokenCredential;
use azure_identity::{DefaultAzureCredential, TokenCredentialOptions};
use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tracing::info;

/// Transfer tuning applied when a call leaves a field at zero
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferDefaults {
    pub block_size: u64,
    pub parallelism: u16,
    pub buffer_size: usize,
    pub max_buffers: usize,
}

impl Default for TransferDefaults {
    fn default() -> Self {
        Self::from(&TransferConfig::default())
    }
}

impl From<&TransferConfig> for TransferDefaults {
    fn from(config: &TransferConfig) -> Self {
        Self {
            block_size: config.block_size_mb.saturating_mul(MIB),
            parallelism: config.parallelism,
            buffer_size: config.buffer_size_mb.saturating_mul(MIB as usize),
            max_buffers: config.max_buffers,
        }
    }
}

/// Uploads and downloads for one blob
#[derive(Clone)]
pub struct TransferManager {
    store: Arc<dyn BlobStore>,
    defaults: TransferDefaults,
}

impl TransferManager {
    /// Create a new TransferManager over any store
    pub fn new(store: Arc<dyn BlobStore>, defaults: TransferDefaults) -> Self {
        Self { store, defaults }
    }

    pub fn store(&self) -> &dyn BlobStore {
        self.store.as_ref()
    }

    pub fn defaults(&self) -> TransferDefaults {
        self.defaults
    }

    fn upload_options(&self, mut options: UploadOptions) -> UploadOptions {
        if options.block_size == 0 {
            options.block_size = self.defaults.block_size;
        }
        if options.parallelism == 0 {
            options.parallelism = self.defaults.parallelism;
        }
        options
    }

    fn download_options(&self, mut options: DownloadOptions) -> DownloadOptions {
        if options.block_size == 0 {
            options.block_size = self.defaults.block_size;
        }
        if options.parallelism == 0 {
            options.parallelism = self.defaults.parallelism;
        }
        options
    }

    /// Upload an in-memory buffer
    pub async fn upload_buffer(&self, buffer: Bytes, options: UploadOptions) -> Result<UploadResponse> {
        let options = self.upload_options(options);
        upload::upload_buffer(Arc::clone(&self.store), buffer, &options).await
    }

    /// Upload a local file, guessing its content type from the path when unset
    pub async fn upload_file(&self, path: &Path, options: UploadOptions) -> Result<UploadResponse> {
        let mut options = self.upload_options(options);
        if options.commit.content_type.is_none() {
            options.commit.content_type = Some(
                mime_guess::from_path(path)
                    .first_or_octet_stream()
                    .to_string(),
            );
        }

        let response = upload::upload_path(Arc::clone(&self.store), path, &options).await?;
        info!(path = %path.display(), size = response.size, blocks = response.block_count, "upload complete");
        Ok(response)
    }

    /// Upload everything a single-pass reader yields
    pub async fn upload_stream<R>(&self, reader: R, mut options: UploadStreamOptions) -> Result<UploadResponse>
    where
        R: AsyncRead + Unpin + Send,
    {
        if options.buffer_size == 0 {
            options.buffer_size = self.defaults.buffer_size;
        }
        if options.max_buffers == 0 {
            options.max_buffers = self.defaults.max_buffers;
        }
        stream::upload_stream(self.store(), reader, &options).await
    }

    /// Download a range into the front of `buffer`
    pub async fn download_buffer(&self, buffer: &mut [u8], options: DownloadOptions) -> Result<u64> {
        let options = self.download_options(options);
        download::download_buffer(Arc::clone(&self.store), buffer, &options).await
    }

    /// Download a range into a new vector
    pub async fn download_to_vec(&self, options: DownloadOptions) -> Result<Vec<u8>> {
        let options = self.download_options(options);
        download::download_to_vec(Arc::clone(&self.store), &options).await
    }

    /// Download a range into a local file, creating it if needed and
    /// resizing it to the range length
    pub async fn download_file(&self, path: &Path, options: DownloadOptions) -> Result<u64> {
        let options = self.download_options(options);
        let written = download::download_path(Arc::clone(&self.store), path, &options).await?;
        info!(path = %path.display(), size = written, "download complete");
        Ok(written)
    }

    /// Bytes a download with `options` would transfer
    pub async fn resolve_download_count(&self, options: &DownloadOptions) -> Result<u64> {
        download::resolve_count(self.store(), options).await
    }

    /// Run a caller-supplied chunk operation with the configured parallelism
    pub async fn run_parallel_transfer<O>(&self, mut options: BatchTransferOptions, operation: Arc<O>) -> Result<()>
    where
        O: ChunkOperation,
    {
        if options.parallelism == 0 {
            options.parallelism = self.defaults.parallelism;
        }
        executor::run_parallel_transfer(&options, operation).await
    }
}

/// Build commit options from a content type and `KEY=VALUE` metadata pairs
pub fn commit_options(content_type: Option<String>, metadata: Vec<(String, String)>) -> CommitOptions {
    CommitOptions {
        content_type,
        metadata: metadata.into_iter().collect(),
    }
}

/// Format file size in human-readable format
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];

    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// Helper function to create a TransferManager for `blob_name` from configuration
pub fn create_transfer_manager(config: &Config, blob_name: &str) -> Result<TransferManager> {
    let transfer = &config.transfer;

    if transfer.storage_account.is_empty() {
        return Err(TransferError::config(
            "No storage account configured. Run 'azx config set storage_account <name>'.",
        ));
    }

    let credential = DefaultAzureCredential::create(TokenCredentialOptions::default())
        .map_err(|e| TransferError::authentication(format!("Failed to create DefaultAzureCredential: {e}")))?;
    let credential: Arc<dyn TokenCredential> = Arc::new(credential);

    let store = AzureBlobStore::from_credential(
        &transfer.storage_account,
        &transfer.container_name,
        blob_name,
        credential,
    );

    Ok(TransferManager::new(Arc::new(store), TransferDefaults::from(transfer)))
}
