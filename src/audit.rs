use crate::models::Document;
use crate::storage::ObjectStorage;

/// Outcome of checking document rows against the configured bucket.
#[derive(Debug, Default)]
pub struct ObjectAudit {
    pub checked: usize,
    pub missing: Vec<Document>,
    /// Rows recorded against a bucket other than the configured one. Their
    /// objects cannot be checked from here.
    pub foreign_bucket: Vec<Document>,
    pub failed: Vec<(Document, String)>,
}

impl ObjectAudit {
    pub fn problem_count(&self) -> usize {
        self.missing.len() + self.foreign_bucket.len() + self.failed.len()
    }

    pub fn is_clean(&self) -> bool {
        self.problem_count() == 0
    }
}

pub async fn audit_objects(storage: &dyn ObjectStorage, rows: Vec<Document>) -> ObjectAudit {
    let mut audit = ObjectAudit::default();
    for document in rows {
        audit.checked += 1;

        if storage.bucket() != Some(document.storage_bucket.as_str()) {
            tracing::warn!(
                document_id = %document.id,
                bucket = %document.storage_bucket,
                "document recorded against another bucket"
            );
            audit.foreign_bucket.push(document);
            continue;
        }

        match storage.exists(&document.storage_key).await {
            Ok(true) => {}
            Ok(false) => audit.missing.push(document),
            Err(err) => {
                tracing::error!(
                    error = %err,
                    document_id = %document.id,
                    key = %document.storage_key,
                    "failed to check document object"
                );
                audit.failed.push((document, err.to_string()));
            }
        }
    }
    audit
}
