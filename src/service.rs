use std::{fmt, sync::Arc, time::Duration};

use bytes::Bytes;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::keys::{generate_storage_key, is_valid_tenant_id};
use crate::models::{Document, DocumentMetadata, NewDocument};
use crate::storage::{ObjectStorage, StorageError};
use crate::store::{DocumentFilter, DocumentStore, Visibility};
use crate::validation::{extract_extension, validate, ValidationError, MAX_FILE_NAME_LENGTH};

pub const DOWNLOAD_URL_TTL_SECONDS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidFileType,
    FileTooLarge,
    InvalidArgument,
    NotFound,
    StorageNotConfigured,
    StorageOperationFailed,
    MetadataOperationFailed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidFileType => "VALIDATION_INVALID_FILE_TYPE",
            ErrorKind::FileTooLarge => "VALIDATION_FILE_TOO_LARGE",
            ErrorKind::InvalidArgument => "VALIDATION_INVALID_ARGUMENT",
            ErrorKind::NotFound => "RESOURCE_NOT_FOUND",
            ErrorKind::StorageNotConfigured => "STORAGE_NOT_CONFIGURED",
            ErrorKind::StorageOperationFailed => "STORAGE_OPERATION_FAILED",
            ErrorKind::MetadataOperationFailed => "METADATA_OPERATION_FAILED",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{0}")]
    InvalidArgument(String),
    #[error("document not found")]
    NotFound,
    #[error("object storage is not configured")]
    StorageNotConfigured,
    #[error("object storage operation failed: {0:#}")]
    Storage(anyhow::Error),
    #[error("metadata operation failed: {0:#}")]
    Metadata(anyhow::Error),
}

impl DocumentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DocumentError::Validation(ValidationError::InvalidFileType) => {
                ErrorKind::InvalidFileType
            }
            DocumentError::Validation(ValidationError::FileTooLarge) => ErrorKind::FileTooLarge,
            DocumentError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            DocumentError::NotFound => ErrorKind::NotFound,
            DocumentError::StorageNotConfigured => ErrorKind::StorageNotConfigured,
            DocumentError::Storage(_) => ErrorKind::StorageOperationFailed,
            DocumentError::Metadata(_) => ErrorKind::MetadataOperationFailed,
        }
    }
}

impl From<StorageError> for DocumentError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::NotConfigured => DocumentError::StorageNotConfigured,
            StorageError::NotFound(key) => {
                DocumentError::Storage(anyhow::anyhow!("object {key} is missing from storage"))
            }
            StorageError::Backend(err) => DocumentError::Storage(err),
        }
    }
}

pub type DocumentResult<T> = Result<T, DocumentError>;

/// A candidate upload as declared by the caller.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Bytes,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes: bytes.into(),
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadLink {
    pub url: String,
    pub expires_in: u64,
    pub file_name: String,
}

/// Caller-facing document operations. Owns no state beyond its two
/// collaborators; clones share them.
#[derive(Clone)]
pub struct DocumentService {
    storage: Arc<dyn ObjectStorage>,
    store: Arc<dyn DocumentStore>,
}

impl DocumentService {
    pub fn new(storage: Arc<dyn ObjectStorage>, store: Arc<dyn DocumentStore>) -> Self {
        Self { storage, store }
    }

    pub fn storage(&self) -> &Arc<dyn ObjectStorage> {
        &self.storage
    }

    pub async fn upload(
        &self,
        file: UploadFile,
        tenant_id: &str,
        actor_id: &str,
    ) -> DocumentResult<Document> {
        self.store_upload(file, tenant_id, actor_id).await
    }

    /// Upload into `target_tenant_id` recording the administrator as the
    /// uploader. Whether the actor really is an administrator is decided
    /// before this is called.
    pub async fn upload_on_behalf(
        &self,
        file: UploadFile,
        target_tenant_id: &str,
        admin_actor_id: &str,
    ) -> DocumentResult<Document> {
        info!(
            tenant_id = %target_tenant_id,
            actor_id = %admin_actor_id,
            "uploading document on behalf of tenant"
        );
        self.store_upload(file, target_tenant_id, admin_actor_id).await
    }

    async fn store_upload(
        &self,
        file: UploadFile,
        tenant_id: &str,
        actor_id: &str,
    ) -> DocumentResult<Document> {
        if !is_valid_tenant_id(tenant_id) {
            return Err(DocumentError::InvalidArgument(
                "tenant id must be non-empty and contain only letters, digits, '.', '_' or '-'"
                    .to_string(),
            ));
        }
        if actor_id.trim().is_empty() {
            return Err(DocumentError::InvalidArgument(
                "actor id is required".to_string(),
            ));
        }
        if file.name.chars().count() > MAX_FILE_NAME_LENGTH {
            warn!(
                tenant_id = %tenant_id,
                name_length = file.name.chars().count(),
                "upload rejected: file name too long"
            );
            return Err(DocumentError::InvalidArgument(format!(
                "file name must be at most {MAX_FILE_NAME_LENGTH} characters"
            )));
        }

        let size = file.size();
        if let Err(err) = validate(&file.name, &file.mime_type, size) {
            warn!(
                tenant_id = %tenant_id,
                file_name = %file.name,
                mime_type = %file.mime_type,
                size_bytes = size,
                error = %err,
                "upload rejected by validation"
            );
            return Err(err.into());
        }

        let file_type = extract_extension(&file.name).ok_or(ValidationError::InvalidFileType)?;
        let storage_key = generate_storage_key(tenant_id, &file.name);
        let checksum = hex::encode(Sha256::digest(&file.bytes));

        self.storage
            .put_object(&storage_key, file.bytes.clone(), &file.mime_type)
            .await
            .map_err(|err| {
                error!(error = %err, key = %storage_key, "failed to store document object");
                DocumentError::from(err)
            })?;

        let bucket = self.storage.bucket().unwrap_or_default().to_string();
        let metadata = DocumentMetadata {
            file_size: size,
            mime_type: file.mime_type.clone(),
            original_name: file.name.clone(),
            checksum,
        };
        let metadata = serde_json::to_value(&metadata)
            .map_err(|err| DocumentError::Metadata(anyhow::Error::new(err)))?;

        let new_document = NewDocument {
            tenant_id: tenant_id.to_string(),
            file_name: file.name,
            file_type,
            storage_key: storage_key.clone(),
            storage_bucket: bucket,
            uploaded_by: actor_id.to_string(),
            metadata,
        };

        match self.store.insert(new_document).await {
            Ok(document) => {
                info!(
                    document_id = %document.id,
                    tenant_id = %document.tenant_id,
                    uploaded_by = %document.uploaded_by,
                    key = %document.storage_key,
                    size_bytes = size,
                    "document upload succeeded"
                );
                Ok(document)
            }
            Err(insert_err) => {
                error!(
                    error = ?insert_err,
                    key = %storage_key,
                    "failed to record document metadata; removing stored object"
                );
                self.compensate_orphan(&storage_key).await;
                Err(DocumentError::Metadata(insert_err))
            }
        }
    }

    /// Removes an object whose metadata row could not be written. A failure
    /// here leaves an orphaned object, which is logged and not escalated.
    async fn compensate_orphan(&self, storage_key: &str) {
        match self.storage.delete_object(storage_key).await {
            Ok(()) => info!(key = %storage_key, "removed orphaned document object"),
            Err(err) => error!(
                error = %err,
                key = %storage_key,
                "failed to remove orphaned document object; object left in storage"
            ),
        }
    }

    pub async fn get(&self, visibility: &Visibility, document_id: Uuid) -> DocumentResult<Document> {
        self.store
            .find(visibility, document_id)
            .await
            .map_err(DocumentError::Metadata)?
            .ok_or(DocumentError::NotFound)
    }

    pub async fn get_download_url(
        &self,
        visibility: &Visibility,
        document_id: Uuid,
    ) -> DocumentResult<DownloadLink> {
        let document = self.get(visibility, document_id).await?;

        let url = self
            .storage
            .presign_get_object(
                &document.storage_key,
                Duration::from_secs(DOWNLOAD_URL_TTL_SECONDS),
            )
            .await
            .map_err(|err| {
                error!(
                    error = %err,
                    document_id = %document.id,
                    key = %document.storage_key,
                    "failed to issue download URL"
                );
                DocumentError::from(err)
            })?;

        Ok(DownloadLink {
            url,
            expires_in: DOWNLOAD_URL_TTL_SECONDS,
            file_name: document.file_name,
        })
    }

    pub async fn list(
        &self,
        visibility: &Visibility,
        tenant_id: &str,
        filter: &DocumentFilter,
    ) -> DocumentResult<Vec<Document>> {
        if tenant_id.is_empty() {
            return Err(DocumentError::InvalidArgument(
                "tenant id is required".to_string(),
            ));
        }
        self.store
            .list(visibility, tenant_id, filter)
            .await
            .map_err(DocumentError::Metadata)
    }

    /// The metadata row is authoritative: once it is gone the document is
    /// deleted, whatever happened to the object.
    pub async fn delete(&self, visibility: &Visibility, document_id: Uuid) -> DocumentResult<()> {
        let document = self.get(visibility, document_id).await?;

        if let Err(err) = self.storage.delete_object(&document.storage_key).await {
            warn!(
                error = %err,
                document_id = %document.id,
                key = %document.storage_key,
                "failed to delete document object; continuing with metadata removal"
            );
        }

        let removed = self
            .store
            .delete(visibility, document.id)
            .await
            .map_err(|err| {
                error!(
                    error = ?err,
                    document_id = %document.id,
                    "failed to delete document record"
                );
                DocumentError::Metadata(err)
            })?;

        if !removed {
            return Err(DocumentError::NotFound);
        }

        info!(
            document_id = %document.id,
            tenant_id = %document.tenant_id,
            "document deleted"
        );
        Ok(())
    }
}
