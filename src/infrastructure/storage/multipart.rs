use bytes::{Bytes, BytesMut};
use tracing::{error, info};

use super::StorageError;
use super::s3::S3Storage;

// Minimum part size for S3 is 5MB. We use 6MB to be safe.
pub const MIN_PART_SIZE: usize = 6 * 1024 * 1024;

/// Buffers chunks into parts of at least [`MIN_PART_SIZE`] and uploads them
/// as one multipart object.
pub struct MultipartUploader<'a> {
    storage: &'a S3Storage,
    key: String,
    upload_id: String,
    parts: Vec<aws_sdk_s3::types::CompletedPart>,
    part_number: i32,
    buffer: BytesMut,
}

impl<'a> MultipartUploader<'a> {
    pub async fn new(storage: &'a S3Storage, key: String, content_type: &str) -> Result<Self, StorageError> {
        let upload_id = storage.create_multipart_upload(&key, content_type).await?;
        info!("Started multipart upload for {}", key);

        Ok(Self {
            storage,
            key,
            upload_id,
            parts: Vec::new(),
            part_number: 1,
            buffer: BytesMut::with_capacity(MIN_PART_SIZE),
        })
    }

    pub async fn write_chunk(&mut self, chunk: Bytes) -> Result<(), StorageError> {
        self.buffer.extend_from_slice(&chunk);

        if self.buffer.len() >= MIN_PART_SIZE {
            self.flush_part().await?;
        }

        Ok(())
    }

    async fn flush_part(&mut self) -> Result<(), StorageError> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let body = self.buffer.split().freeze();
        self.buffer.reserve(MIN_PART_SIZE);

        let part = self
            .storage
            .upload_part(&self.key, &self.upload_id, self.part_number, body)
            .await?;

        self.parts.push(part);
        self.part_number += 1;

        Ok(())
    }

    pub async fn finish(mut self) -> Result<String, StorageError> {
        self.flush_part().await?;

        self.storage
            .complete_multipart_upload(&self.key, &self.upload_id, self.parts)
            .await?;
        Ok(self.key)
    }

    pub async fn abort(&self) -> Result<(), StorageError> {
        error!("Aborting multipart upload for {}", self.key);
        self.storage.abort_multipart_upload(&self.key, &self.upload_id).await
    }
}
