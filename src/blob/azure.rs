//! Azure Blob Storage implementation of [`BlobStore`]
//!
//! Thin wrapper over a block blob client from `azure_storage_blobs`. Each
//! trait method issues exactly one REST call (or one paged ranged read);
//! the SDK's pipeline owns retries.

use crate::blob::models::{BlockId, CommitOptions, RangeResponse, UploadResponse};
use crate::blob::store::BlobStore;
use crate::error::{Result, TransferError};
use async_trait::async_trait;
use azure_core::auth::TokenCredential;
use azure_core::prelude::Range;
use azure_core::request_options::Metadata;
use azure_core::StatusCode;
use azure_storage_blobs::prelude::*;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use std::sync::Arc;

/// Block blob addressed through the Azure SDK
#[derive(Clone)]
pub struct AzureBlobStore {
    client: BlobClient,
}

impl std::fmt::Debug for AzureBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureBlobStore")
            .field("blob", &self.client.blob_name())
            .finish()
    }
}

impl AzureBlobStore {
    /// Wrap an existing blob client
    pub fn new(client: BlobClient) -> Self {
        Self { client }
    }

    /// Address `blob_name` in `container_name` of `storage_account` with a token credential
    pub fn from_credential(
        storage_account: &str,
        container_name: &str,
        blob_name: &str,
        credential: Arc<dyn TokenCredential>,
    ) -> Self {
        let blob_service = BlobServiceClient::new(storage_account, credential);
        let client = blob_service
            .container_client(container_name)
            .blob_client(blob_name);
        Self { client }
    }

    pub fn blob_name(&self) -> &str {
        self.client.blob_name()
    }

    fn map_error(&self, operation: &str, error: azure_core::Error) -> TransferError {
        let not_found = error
            .as_http_error()
            .map(|e| e.status() == StatusCode::NotFound)
            .unwrap_or_default();
        if not_found {
            TransferError::not_found(self.client.blob_name())
        } else {
            TransferError::remote(operation, error)
        }
    }
}

fn to_metadata(options: &CommitOptions) -> Metadata {
    let mut metadata = Metadata::new();
    for (key, value) in &options.metadata {
        metadata.insert(key.clone(), value.clone());
    }
    metadata
}

/// Convert the SDK's timestamp to chrono
fn to_utc(last_modified: time::OffsetDateTime) -> DateTime<Utc> {
    DateTime::from_timestamp(last_modified.unix_timestamp(), 0).unwrap_or_else(Utc::now)
}

#[async_trait]
impl BlobStore for AzureBlobStore {
    async fn stage_block(&self, block_id: &BlockId, data: Bytes) -> Result<()> {
        self.client
            .put_block(block_id.as_str().to_owned(), data)
            .await
            .map_err(|e| self.map_error("stage_block", e))?;
        Ok(())
    }

    async fn commit_block_list(
        &self,
        block_ids: &[BlockId],
        options: &CommitOptions,
    ) -> Result<UploadResponse> {
        let block_list = BlockList {
            blocks: block_ids
                .iter()
                .map(|id| BlobBlockType::new_uncommitted(id.as_str().to_owned()))
                .collect(),
        };

        let mut builder = self
            .client
            .put_block_list(block_list)
            .metadata(to_metadata(options));
        if let Some(content_type) = &options.content_type {
            builder = builder.content_type(content_type.clone());
        }

        let response = builder
            .await
            .map_err(|e| self.map_error("commit_block_list", e))?;

        Ok(UploadResponse {
            etag: response.etag.to_string(),
            last_modified: to_utc(response.last_modified),
            size: 0,
            block_count: block_ids.len(),
        })
    }

    async fn upload_whole(&self, data: Bytes, options: &CommitOptions) -> Result<UploadResponse> {
        let size = data.len() as u64;
        let mut builder = self
            .client
            .put_block_blob(data)
            .metadata(to_metadata(options));
        if let Some(content_type) = &options.content_type {
            builder = builder.content_type(content_type.clone());
        }

        let response = builder
            .await
            .map_err(|e| self.map_error("upload_whole", e))?;

        Ok(UploadResponse {
            etag: response.etag.to_string(),
            last_modified: to_utc(response.last_modified),
            size,
            block_count: 0,
        })
    }

    async fn read_range(&self, offset: u64, count: Option<u64>) -> Result<RangeResponse> {
        let range = match count {
            Some(count) => {
                let end = offset.checked_add(count).ok_or_else(|| {
                    TransferError::invalid_argument(format!(
                        "range of {count} bytes at offset {offset} overflows"
                    ))
                })?;
                Range::from(offset..end)
            }
            None => Range::from(offset..),
        };

        let mut pages = self.client.get().range(range).into_stream();
        let first = pages
            .next()
            .await
            .ok_or_else(|| TransferError::remote("read_range", "service returned no response"))?
            .map_err(|e| self.map_error("read_range", e))?;

        let first_body = first
            .data
            .collect()
            .await
            .map_err(|e| TransferError::remote("read_range", e))?;

        let rest = pages
            .and_then(|page| async move { page.data.collect().await })
            .map_err(|e| TransferError::remote("read_range", e));

        Ok(RangeResponse {
            body: futures::stream::once(async move { Ok(first_body) })
                .chain(rest)
                .boxed(),
        })
    }

    async fn size(&self) -> Result<u64> {
        let properties = self
            .client
            .get_properties()
            .await
            .map_err(|e| self.map_error("get_properties", e))?;
        Ok(properties.blob.properties.content_length)
    }
}
