use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::head_object::HeadObjectError;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ServerSideEncryption;
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object storage is not configured")]
    NotConfigured,
    #[error("object {0} does not exist")]
    NotFound(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait ObjectStorage: Send + Sync + 'static {
    /// Bucket objects are written to, `None` when storage is not configured.
    fn bucket(&self) -> Option<&str>;

    /// Writes `bytes` under `key`. Server-side encryption is always requested.
    async fn put_object(&self, key: &str, bytes: Bytes, content_type: &str) -> StorageResult<()>;

    /// Issues a read capability for an existing object. A missing object is
    /// reported as [`StorageError::NotFound`] rather than a URL to nothing.
    async fn presign_get_object(&self, key: &str, expires_in: Duration) -> StorageResult<String>;

    async fn delete_object(&self, key: &str) -> StorageResult<()>;

    async fn exists(&self, key: &str) -> StorageResult<bool>;
}

pub struct S3Storage {
    client: S3Client,
    bucket: String,
}

impl S3Storage {
    pub fn new(client: S3Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    fn bucket(&self) -> Option<&str> {
        Some(&self.bucket)
    }

    async fn put_object(&self, key: &str, bytes: Bytes, content_type: &str) -> StorageResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .server_side_encryption(ServerSideEncryption::Aes256)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .context("failed to upload object to S3")?;

        Ok(())
    }

    async fn presign_get_object(&self, key: &str, expires_in: Duration) -> StorageResult<String> {
        if !self.exists(key).await? {
            return Err(StorageError::NotFound(key.to_string()));
        }

        let presign_config = PresigningConfig::builder()
            .expires_in(expires_in)
            .build()
            .context("failed to build S3 presigning config")?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presign_config)
            .await
            .context("failed to generate presigned download URL")?;

        Ok(presigned.uri().to_string())
    }

    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .context("failed to delete object from S3")?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(SdkError::ServiceError(service_err))
                if matches!(service_err.err(), HeadObjectError::NotFound(_)) =>
            {
                Ok(false)
            }
            Err(err) => Err(anyhow::Error::new(err)
                .context("failed to check object in S3")
                .into()),
        }
    }
}

/// Stand-in used when no bucket or credentials were configured. Every
/// operation that would touch the service fails the same way.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredStorage;

#[async_trait]
impl ObjectStorage for UnconfiguredStorage {
    fn bucket(&self) -> Option<&str> {
        None
    }

    async fn put_object(&self, _key: &str, _bytes: Bytes, _content_type: &str) -> StorageResult<()> {
        Err(StorageError::NotConfigured)
    }

    async fn presign_get_object(&self, _key: &str, _expires_in: Duration) -> StorageResult<String> {
        Err(StorageError::NotConfigured)
    }

    async fn delete_object(&self, _key: &str) -> StorageResult<()> {
        Err(StorageError::NotConfigured)
    }

    async fn exists(&self, _key: &str) -> StorageResult<bool> {
        Ok(false)
    }
}
