use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::sql_types::Text;
use diesel::PgConnection;
use uuid::Uuid;

use crate::db::PgPool;
use crate::models::{Document, NewDocument};
use crate::schema::documents;

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 200;

/// Which rows a caller may see. Resolved by the identity layer and applied
/// by the store on every read and delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Visibility {
    Admin,
    Tenant(String),
}

/// Conjunctive list filters. Date bounds are inclusive.
#[derive(Debug, Clone, Default)]
pub struct DocumentFilter {
    pub file_type: Option<String>,
    pub uploaded_from: Option<NaiveDateTime>,
    pub uploaded_until: Option<NaiveDateTime>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl DocumentFilter {
    pub fn normalized_file_type(&self) -> Option<String> {
        self.file_type
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_lowercase)
    }

    /// `(limit, offset)` to apply, if any. An offset on its own pages with
    /// the default size.
    pub fn page(&self) -> Option<(u32, u32)> {
        match (self.limit, self.offset) {
            (Some(limit), offset) => Some((limit.min(MAX_PAGE_SIZE), offset.unwrap_or(0))),
            (None, Some(offset)) => Some((DEFAULT_PAGE_SIZE, offset)),
            (None, None) => None,
        }
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    async fn insert(&self, document: NewDocument) -> Result<Document>;

    async fn find(&self, visibility: &Visibility, id: Uuid) -> Result<Option<Document>>;

    /// Newest first.
    async fn list(
        &self,
        visibility: &Visibility,
        tenant_id: &str,
        filter: &DocumentFilter,
    ) -> Result<Vec<Document>>;

    /// Returns whether a row was removed.
    async fn delete(&self, visibility: &Visibility, id: Uuid) -> Result<bool>;
}

#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("database pool error: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("database task panicked")?
    }
}

/// Runs `f` in a transaction carrying the caller's tenant so the row-level
/// security policy on `documents` applies alongside the explicit filters.
fn scoped<T, F>(conn: &mut PgConnection, visibility: &Visibility, f: F) -> QueryResult<T>
where
    F: FnOnce(&mut PgConnection) -> QueryResult<T>,
{
    conn.transaction(|conn| {
        if let Visibility::Tenant(tenant_id) = visibility {
            diesel::sql_query("SELECT set_config('app.current_tenant_id', $1, true)")
                .bind::<Text, _>(tenant_id)
                .execute(conn)?;
        }
        f(conn)
    })
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn insert(&self, document: NewDocument) -> Result<Document> {
        self.with_conn(move |conn| {
            diesel::insert_into(documents::table)
                .values(&document)
                .get_result::<Document>(conn)
                .context("failed to insert document record")
        })
        .await
    }

    async fn find(&self, visibility: &Visibility, id: Uuid) -> Result<Option<Document>> {
        let visibility = visibility.clone();
        self.with_conn(move |conn| {
            scoped(conn, &visibility, |conn| {
                let mut query = documents::table
                    .filter(documents::id.eq(id))
                    .into_boxed();
                if let Visibility::Tenant(tenant_id) = &visibility {
                    query = query.filter(documents::tenant_id.eq(tenant_id.clone()));
                }
                query.first::<Document>(conn).optional()
            })
            .context("failed to load document record")
        })
        .await
    }

    async fn list(
        &self,
        visibility: &Visibility,
        tenant_id: &str,
        filter: &DocumentFilter,
    ) -> Result<Vec<Document>> {
        let visibility = visibility.clone();
        let tenant_id = tenant_id.to_string();
        let filter = filter.clone();
        self.with_conn(move |conn| {
            scoped(conn, &visibility, |conn| {
                let mut query = documents::table
                    .filter(documents::tenant_id.eq(tenant_id.clone()))
                    .into_boxed();

                if let Visibility::Tenant(own) = &visibility {
                    query = query.filter(documents::tenant_id.eq(own.clone()));
                }
                if let Some(file_type) = filter.normalized_file_type() {
                    query = query.filter(documents::file_type.eq(file_type));
                }
                if let Some(from) = filter.uploaded_from {
                    query = query.filter(documents::uploaded_at.ge(from));
                }
                if let Some(until) = filter.uploaded_until {
                    query = query.filter(documents::uploaded_at.le(until));
                }

                query = query.order((documents::uploaded_at.desc(), documents::id.desc()));

                if let Some((limit, offset)) = filter.page() {
                    query = query.limit(i64::from(limit)).offset(i64::from(offset));
                }

                query.load::<Document>(conn)
            })
            .context("failed to list document records")
        })
        .await
    }

    async fn delete(&self, visibility: &Visibility, id: Uuid) -> Result<bool> {
        let visibility = visibility.clone();
        self.with_conn(move |conn| {
            scoped(conn, &visibility, |conn| {
                let removed = match &visibility {
                    Visibility::Admin => diesel::delete(documents::table.find(id)).execute(conn)?,
                    Visibility::Tenant(tenant_id) => diesel::delete(
                        documents::table
                            .find(id)
                            .filter(documents::tenant_id.eq(tenant_id.clone())),
                    )
                    .execute(conn)?,
                };
                Ok(removed > 0)
            })
            .context("failed to delete document record")
        })
        .await
    }
}
