use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub mod memory;
pub mod multipart;
pub mod s3;

pub use memory::InMemoryStorage;
pub use s3::S3Storage;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("download failed: {0}")]
    Download(String),
    #[error("upload failed: {0}")]
    Upload(String),
    #[error("failed to presign URL: {0}")]
    Presign(String),
}

/// Blob storage for source videos and encoded artifacts, addressed by key.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Bytes, StorageError>;

    /// Stores `body` under `key` and returns the key.
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<String, StorageError>;

    async fn presigned_url(&self, key: &str, ttl: Duration) -> Result<String, StorageError>;
}
