use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::config::Builder;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::{Client, config::BehaviorVersion, config::Credentials, config::Region};
use bytes::Bytes;
use tracing::{debug, info};

use super::multipart::{MIN_PART_SIZE, MultipartUploader};
use super::{ObjectStorage, StorageError};

#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
}

impl S3Storage {
    pub fn new(endpoint: &str, bucket: &str, access_key: &str, secret_key: &str) -> Self {
        let credentials = Credentials::new(access_key, secret_key, None, None, "static");

        let config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .endpoint_url(endpoint)
            .credentials_provider(credentials)
            .force_path_style(true) // Required for MinIO
            .build();

        let client = Client::from_conf(config);

        info!("✅ Configured S3 storage at {} (bucket {})", endpoint, bucket);

        Self {
            client,
            bucket: bucket.to_string(),
        }
    }

    pub(super) async fn create_multipart_upload(
        &self,
        key: &str,
        content_type: &str,
    ) -> Result<String, StorageError> {
        let result = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::Upload(e.to_string()))?;

        result
            .upload_id
            .ok_or_else(|| StorageError::Upload(format!("no upload id returned for {key}")))
    }

    pub(super) async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<CompletedPart, StorageError> {
        let result = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| StorageError::Upload(e.to_string()))?;

        let e_tag = result
            .e_tag
            .ok_or_else(|| StorageError::Upload(format!("part {part_number} of {key} has no ETag")))?;

        Ok(CompletedPart::builder()
            .e_tag(e_tag)
            .part_number(part_number)
            .build())
    }

    pub(super) async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<(), StorageError> {
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| StorageError::Upload(e.to_string()))?;

        Ok(())
    }

    pub(super) async fn abort_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
    ) -> Result<(), StorageError> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| StorageError::Upload(e.to_string()))?;

        Ok(())
    }

    async fn put_object(&self, key: &str, body: Bytes, content_type: &str) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::Upload(e.to_string()))?;

        Ok(())
    }
}

fn download_error(key: &str, err: GetObjectError) -> StorageError {
    if err.is_no_such_key() {
        StorageError::NotFound(key.to_string())
    } else {
        StorageError::Download(err.to_string())
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        debug!("⬇️ Downloading {} from S3", key);
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| download_error(key, e.into_service_error()))?;

        let body = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Download(e.to_string()))?
            .into_bytes();

        debug!("⬇️ Downloaded {} bytes", body.len());
        Ok(body)
    }

    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<String, StorageError> {
        if body.len() <= MIN_PART_SIZE {
            self.put_object(key, body, content_type).await?;
            return Ok(key.to_string());
        }

        let mut uploader = MultipartUploader::new(self, key.to_string(), content_type).await?;
        for chunk in body.chunks(MIN_PART_SIZE) {
            if let Err(e) = uploader.write_chunk(body.slice_ref(chunk)).await {
                uploader.abort().await?;
                return Err(e);
            }
        }
        uploader.finish().await
    }

    async fn presigned_url(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        let config = PresigningConfig::expires_in(ttl).map_err(|e| StorageError::Presign(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(config)
            .await
            .map_err(|e| StorageError::Presign(e.to_string()))?;

        Ok(presigned.uri().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::types::error::{InvalidObjectState, NoSuchKey};

    #[test]
    fn test_missing_key_is_not_found() {
        let err = GetObjectError::NoSuchKey(NoSuchKey::builder().message("NoSuchKey").build());
        assert!(matches!(
            download_error("source/a.mkv", err),
            StorageError::NotFound(key) if key == "source/a.mkv"
        ));
    }

    #[test]
    fn test_other_service_errors_are_download_failures() {
        let err = GetObjectError::InvalidObjectState(
            InvalidObjectState::builder().message("archived").build(),
        );
        assert!(matches!(download_error("source/a.mkv", err), StorageError::Download(_)));
    }
}
