use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = clients)]
pub struct Client {
    pub id: String,
    pub name: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = clients)]
pub struct NewClient {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Associations)]
#[diesel(table_name = documents)]
#[diesel(belongs_to(Client, foreign_key = tenant_id))]
pub struct Document {
    pub id: Uuid,
    pub tenant_id: String,
    pub file_name: String,
    pub file_type: String,
    pub storage_key: String,
    pub storage_bucket: String,
    pub uploaded_by: String,
    pub metadata: serde_json::Value,
    pub uploaded_at: NaiveDateTime,
}

impl Document {
    pub fn file_size(&self) -> Option<u64> {
        self.metadata.get("fileSize").and_then(|value| value.as_u64())
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.metadata.get("mimeType").and_then(|value| value.as_str())
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = documents)]
pub struct NewDocument {
    pub tenant_id: String,
    pub file_name: String,
    pub file_type: String,
    pub storage_key: String,
    pub storage_bucket: String,
    pub uploaded_by: String,
    pub metadata: serde_json::Value,
}

/// Upload-time facts recorded in `documents.metadata`. The column is
/// schema-flexible; these are the keys every row carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    pub file_size: u64,
    pub mime_type: String,
    pub original_name: String,
    pub checksum: String,
}
