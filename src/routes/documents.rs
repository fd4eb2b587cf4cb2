use axum::extract::multipart::MultipartError;
use axum::extract::{Json, Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::Document;
use crate::service::{DocumentError, DownloadLink, UploadFile};
use crate::state::AppState;
use crate::store::DocumentFilter;
use crate::validation::ValidationError;

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Deserialize)]
pub struct DocumentListQuery {
    pub tenant_id: Option<String>,
    pub file_type: Option<String>,
    pub uploaded_from: Option<DateTime<Utc>>,
    pub uploaded_until: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Serialize)]
pub struct DocumentResponse {
    pub id: Uuid,
    pub tenant_id: String,
    pub file_name: String,
    pub file_type: String,
    pub storage_key: String,
    pub storage_bucket: String,
    pub uploaded_by: String,
    pub metadata: Value,
    pub uploaded_at: String,
}

impl From<Document> for DocumentResponse {
    fn from(doc: Document) -> Self {
        Self {
            id: doc.id,
            tenant_id: doc.tenant_id,
            file_name: doc.file_name,
            file_type: doc.file_type,
            storage_key: doc.storage_key,
            storage_bucket: doc.storage_bucket,
            uploaded_by: doc.uploaded_by,
            metadata: doc.metadata,
            uploaded_at: to_iso(doc.uploaded_at),
        }
    }
}

#[derive(Serialize)]
pub struct DocumentDetailResponse {
    pub document: DocumentResponse,
}

#[derive(Serialize)]
pub struct DocumentDownloadResponse {
    pub url: String,
    pub expires_in: u64,
    pub file_name: String,
}

impl From<DownloadLink> for DocumentDownloadResponse {
    fn from(link: DownloadLink) -> Self {
        Self {
            url: link.url,
            expires_in: link.expires_in,
            file_name: link.file_name,
        }
    }
}

pub async fn list_documents(
    State(state): State<AppState>,
    Query(params): Query<DocumentListQuery>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<DocumentResponse>>> {
    let DocumentListQuery {
        tenant_id,
        file_type,
        uploaded_from,
        uploaded_until,
        limit,
        offset,
    } = params;

    let requested = tenant_id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned);
    let tenant_id = resolve_tenant(&user, requested)?;

    let filter = DocumentFilter {
        file_type,
        uploaded_from: uploaded_from.map(|dt| dt.naive_utc()),
        uploaded_until: uploaded_until.map(|dt| dt.naive_utc()),
        limit,
        offset,
    };

    let documents = state
        .documents
        .list(&user.visibility(), &tenant_id, &filter)
        .await?;

    Ok(Json(
        documents.into_iter().map(DocumentResponse::from).collect(),
    ))
}

pub async fn get_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<DocumentDetailResponse>> {
    let document = state
        .documents
        .get(&user.visibility(), document_id)
        .await?;

    Ok(Json(DocumentDetailResponse {
        document: document.into(),
    }))
}

pub async fn upload_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<DocumentDetailResponse>)> {
    let mut file: Option<UploadFile> = None;
    let mut target_tenant: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| multipart_error(err, "invalid multipart data"))?
    {
        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("file") => {
                let file_name = field.file_name().map(|n| n.to_string());
                let content_type = field
                    .content_type()
                    .map(|mime| mime.to_string())
                    .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string());
                let data = field
                    .bytes()
                    .await
                    .map_err(|err| multipart_error(err, "failed to read file bytes"))?;
                let file_name = file_name.ok_or_else(|| {
                    error!("upload rejected: missing original filename");
                    AppError::bad_request("filename is required")
                })?;
                file = Some(UploadFile::new(file_name, content_type, data));
            }
            Some("tenant_id") => {
                let value = field
                    .text()
                    .await
                    .map_err(|err| multipart_error(err, "invalid tenant id"))?;
                let value = value.trim();
                if !value.is_empty() {
                    target_tenant = Some(value.to_string());
                }
            }
            _ => {}
        }
    }

    let file = file.ok_or_else(|| {
        error!("upload rejected: missing file field");
        AppError::bad_request("file field is required")
    })?;
    let original_name_for_log = file.name.clone();

    let tenant_id = resolve_tenant(&user, target_tenant)?;
    let result = if tenant_id == user.tenant_id {
        state
            .documents
            .upload(file, &tenant_id, &user.user_id)
            .await
    } else {
        state
            .documents
            .upload_on_behalf(file, &tenant_id, &user.user_id)
            .await
    };

    let document = match result {
        Ok(document) => {
            info!(
                document_id = %document.id,
                tenant_id = %document.tenant_id,
                file_name = %document.file_name,
                "document upload request completed"
            );
            document
        }
        Err(err) => {
            error!(
                error = %err,
                kind = %err.kind(),
                original_name = %original_name_for_log,
                "document upload failed"
            );
            return Err(err.into());
        }
    };

    Ok((
        StatusCode::CREATED,
        Json(DocumentDetailResponse {
            document: document.into(),
        }),
    ))
}

pub async fn download_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<DocumentDownloadResponse>> {
    let link = state
        .documents
        .get_download_url(&user.visibility(), document_id)
        .await?;

    Ok(Json(link.into()))
}

pub async fn delete_document(
    State(state): State<AppState>,
    Path(document_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<impl IntoResponse> {
    state
        .documents
        .delete(&user.visibility(), document_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// A body cut off by the request size limit is an oversized file, not a
/// malformed form.
fn multipart_error(err: MultipartError, context: &str) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        warn!(error = %err, "upload rejected: request body exceeds limit");
        return DocumentError::from(ValidationError::FileTooLarge).into();
    }
    error!(error = %err, "{context}");
    AppError::bad_request(format!("{context}: {err}"))
}

/// Non-admins always act on their own tenant; naming another one is refused.
/// Admins may name any tenant. Without a name the caller's tenant is used.
fn resolve_tenant(user: &AuthenticatedUser, requested: Option<String>) -> AppResult<String> {
    match requested {
        Some(tenant_id) if tenant_id == user.tenant_id => Ok(tenant_id),
        Some(tenant_id) if user.is_admin() => Ok(tenant_id),
        Some(_) => Err(AppError::forbidden(
            "only administrators may act on another tenant's documents",
        )),
        None => Ok(user.tenant_id.clone()),
    }
}

pub(crate) fn to_iso(dt: NaiveDateTime) -> String {
    DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc).to_rfc3339()
}
