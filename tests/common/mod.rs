use std::collections::HashMap;
use std::env;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request};
use axum::Router;
use bytes::Bytes;
use chrono::{NaiveDateTime, Utc};
use compliance_docs::auth::jwt::JwtService;
use compliance_docs::config::AppConfig;
use compliance_docs::db::{self, PgPool};
use compliance_docs::models::{Document, NewClient, NewDocument};
use compliance_docs::routes;
use compliance_docs::service::DocumentService;
use compliance_docs::state::AppState;
use compliance_docs::storage::{ObjectStorage, StorageError, StorageResult};
use compliance_docs::store::{DocumentFilter, DocumentStore, PgDocumentStore, Visibility};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

pub const TEST_BUCKET: &str = "test-bucket";

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[allow(dead_code)]
#[derive(Clone)]
pub struct StoredObject {
    pub key: String,
    pub bytes: Bytes,
    pub content_type: String,
}

/// In-memory object store. Every trait call is counted so tests can assert
/// that an operation never reached storage.
#[derive(Default)]
pub struct FakeStorage {
    objects: Mutex<HashMap<String, StoredObject>>,
    calls: AtomicUsize,
    fail_puts: AtomicBool,
    fail_deletes: AtomicBool,
    fail_exists: AtomicBool,
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    fn bucket(&self) -> Option<&str> {
        Some(TEST_BUCKET)
    }

    async fn put_object(&self, key: &str, bytes: Bytes, content_type: &str) -> StorageResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StorageError::Backend(anyhow!("simulated put failure")));
        }
        let stored = StoredObject {
            key: key.to_string(),
            bytes,
            content_type: content_type.to_string(),
        };
        let mut guard = self.objects.lock().await;
        guard.insert(stored.key.clone(), stored);
        Ok(())
    }

    async fn presign_get_object(&self, key: &str, expires_in: Duration) -> StorageResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let guard = self.objects.lock().await;
        if !guard.contains_key(key) {
            return Err(StorageError::NotFound(key.to_string()));
        }
        Ok(format!(
            "https://fake-storage/{key}?expires_in={}",
            expires_in.as_secs()
        ))
    }

    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::Backend(anyhow!("simulated delete failure")));
        }
        let mut guard = self.objects.lock().await;
        guard.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_exists.load(Ordering::SeqCst) {
            return Err(StorageError::Backend(anyhow!("simulated head failure")));
        }
        let guard = self.objects.lock().await;
        Ok(guard.contains_key(key))
    }
}

#[allow(dead_code)]
impl FakeStorage {
    pub async fn get(&self, key: &str) -> Option<StoredObject> {
        let guard = self.objects.lock().await;
        guard.get(key).cloned()
    }

    pub async fn contains(&self, key: &str) -> bool {
        let guard = self.objects.lock().await;
        guard.contains_key(key)
    }

    pub async fn object_count(&self) -> usize {
        let guard = self.objects.lock().await;
        guard.len()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_exists(&self, fail: bool) {
        self.fail_exists.store(fail, Ordering::SeqCst);
    }
}

fn visible_to(visibility: &Visibility, tenant_id: &str) -> bool {
    match visibility {
        Visibility::Admin => true,
        Visibility::Tenant(own) => own == tenant_id,
    }
}

fn matches_filter(filter: &DocumentFilter, document: &Document) -> bool {
    if let Some(file_type) = filter.normalized_file_type() {
        if document.file_type != file_type {
            return false;
        }
    }
    if let Some(from) = filter.uploaded_from {
        if document.uploaded_at < from {
            return false;
        }
    }
    if let Some(until) = filter.uploaded_until {
        if document.uploaded_at > until {
            return false;
        }
    }
    true
}

/// In-memory metadata store with the same ordering, filtering and
/// visibility rules as the Postgres store.
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<Vec<Document>>,
    fail_inserts: AtomicBool,
    fail_deletes: AtomicBool,
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert(&self, document: NewDocument) -> Result<Document> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            bail!("simulated insert failure");
        }
        let mut rows = self.rows.lock().await;
        if rows
            .iter()
            .any(|row| row.storage_key == document.storage_key)
        {
            bail!("duplicate storage key {}", document.storage_key);
        }
        let row = Document {
            id: Uuid::new_v4(),
            tenant_id: document.tenant_id,
            file_name: document.file_name,
            file_type: document.file_type,
            storage_key: document.storage_key,
            storage_bucket: document.storage_bucket,
            uploaded_by: document.uploaded_by,
            metadata: document.metadata,
            uploaded_at: Utc::now().naive_utc(),
        };
        rows.push(row.clone());
        Ok(row)
    }

    async fn find(&self, visibility: &Visibility, id: Uuid) -> Result<Option<Document>> {
        let rows = self.rows.lock().await;
        Ok(rows
            .iter()
            .find(|row| row.id == id && visible_to(visibility, &row.tenant_id))
            .cloned())
    }

    async fn list(
        &self,
        visibility: &Visibility,
        tenant_id: &str,
        filter: &DocumentFilter,
    ) -> Result<Vec<Document>> {
        let rows = self.rows.lock().await;
        let mut matching: Vec<Document> = rows
            .iter()
            .filter(|row| row.tenant_id == tenant_id)
            .filter(|row| visible_to(visibility, &row.tenant_id))
            .filter(|row| matches_filter(filter, row))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            b.uploaded_at
                .cmp(&a.uploaded_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        if let Some((limit, offset)) = filter.page() {
            matching = matching
                .into_iter()
                .skip(offset as usize)
                .take(limit as usize)
                .collect();
        }
        Ok(matching)
    }

    async fn delete(&self, visibility: &Visibility, id: Uuid) -> Result<bool> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            bail!("simulated delete failure");
        }
        let mut rows = self.rows.lock().await;
        let before = rows.len();
        rows.retain(|row| !(row.id == id && visible_to(visibility, &row.tenant_id)));
        Ok(rows.len() < before)
    }
}

#[allow(dead_code)]
impl MemoryStore {
    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub async fn backdate(&self, id: Uuid, uploaded_at: NaiveDateTime) {
        let mut rows = self.rows.lock().await;
        if let Some(row) = rows.iter_mut().find(|row| row.id == id) {
            row.uploaded_at = uploaded_at;
        }
    }
}

#[allow(dead_code)]
pub struct Harness {
    pub service: DocumentService,
    pub storage: Arc<FakeStorage>,
    pub store: Arc<MemoryStore>,
}

#[allow(dead_code)]
pub fn harness() -> Harness {
    let storage = Arc::new(FakeStorage::default());
    let store = Arc::new(MemoryStore::default());
    let storage_for_service: Arc<dyn ObjectStorage> = storage.clone();
    let store_for_service: Arc<dyn DocumentStore> = store.clone();
    Harness {
        service: DocumentService::new(storage_for_service, store_for_service),
        storage,
        store,
    }
}

pub fn test_config(database_url: String) -> AppConfig {
    AppConfig {
        database_url,
        database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
        server_host: "127.0.0.1".to_string(),
        server_port: 0,
        jwt_secret: "test-secret".to_string(),
        jwt_issuer: "test-issuer".to_string(),
        jwt_audience: "test-audience".to_string(),
        jwt_expiry_minutes: 60,
        cors_allowed_origin: None,
        aws_endpoint_url: None,
        aws_access_key_id: None,
        aws_secret_access_key: None,
        aws_region: "us-east-1".to_string(),
        s3_bucket: Some(TEST_BUCKET.to_string()),
    }
}

/// The HTTP router over in-memory fakes; needs no database.
#[allow(dead_code)]
pub struct FakeApp {
    pub storage: Arc<FakeStorage>,
    pub store: Arc<MemoryStore>,
    jwt: JwtService,
    router: Router,
}

#[allow(dead_code)]
impl FakeApp {
    pub fn new() -> Result<Self> {
        let Harness {
            service,
            storage,
            store,
        } = harness();
        let config = test_config("postgres://unused/compliance_docs".to_string());
        let jwt = JwtService::from_config(&config)?;
        let state = AppState::new(config, service, jwt.clone());
        Ok(Self {
            storage,
            store,
            jwt,
            router: routes::create_router(state),
        })
    }

    pub fn token(&self, user_id: &str, tenant_id: &str, role: &str) -> Result<String> {
        self.jwt.generate_token(user_id, tenant_id, role)
    }

    pub async fn upload_document(
        &self,
        filename: &str,
        content_type: &str,
        data: &[u8],
        tenant_id: Option<&str>,
        token: &str,
    ) -> Result<hyper::Response<Body>> {
        let request = upload_request(filename, content_type, data, tenant_id, token)?;
        Ok(send(&self.router, request).await)
    }
}

#[allow(dead_code)]
pub struct TestApp {
    pub pool: PgPool,
    pub service: DocumentService,
    pub jwt: JwtService,
    router: Router,
    storage: Arc<FakeStorage>,
}

#[allow(dead_code)]
impl TestApp {
    /// `None` when `TEST_DATABASE_URL` is not set; Postgres-backed tests
    /// are skipped in that case.
    pub async fn try_new() -> Result<Option<Self>> {
        let Ok(database_url) = env::var("TEST_DATABASE_URL") else {
            eprintln!("TEST_DATABASE_URL not set; skipping Postgres-backed test");
            return Ok(None);
        };

        let config = test_config(database_url);

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let storage = Arc::new(FakeStorage::default());
        let storage_for_service: Arc<dyn ObjectStorage> = storage.clone();
        let store: Arc<dyn DocumentStore> = Arc::new(PgDocumentStore::new(pool.clone()));
        let service = DocumentService::new(storage_for_service, store);
        let jwt = JwtService::from_config(&config)?;
        let state = AppState::new(config, service.clone(), jwt.clone());
        let router = routes::create_router(state);

        Ok(Some(Self {
            pool,
            service,
            jwt,
            router,
            storage,
        }))
    }

    pub async fn cleanup(&self) -> Result<()> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get cleanup connection: {err}"))?;
            truncate_all(&mut conn)?;
            Ok(())
        })
        .await
        .context("cleanup task panicked")?
    }

    pub fn storage(&self) -> Arc<FakeStorage> {
        self.storage.clone()
    }

    pub async fn insert_client(&self, id: &str, name: &str) -> Result<()> {
        let client = NewClient {
            id: id.to_string(),
            name: name.to_string(),
        };
        self.with_conn(move |conn| {
            diesel::insert_into(compliance_docs::schema::clients::table)
                .values(&client)
                .execute(conn)
                .context("failed to insert client")?;
            Ok(())
        })
        .await
    }

    pub fn token(&self, user_id: &str, tenant_id: &str, role: &str) -> Result<String> {
        self.jwt.generate_token(user_id, tenant_id, role)
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::GET).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::empty())?;
        Ok(send(&self.router, request).await)
    }

    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let builder = Request::builder().method(Method::DELETE).uri(path);
        let builder = if let Some(token) = token {
            builder.header("authorization", format!("Bearer {token}"))
        } else {
            builder
        };
        let request = builder.body(Body::empty())?;
        Ok(send(&self.router, request).await)
    }

    pub async fn upload_document(
        &self,
        filename: &str,
        content_type: &str,
        data: &[u8],
        tenant_id: Option<&str>,
        token: &str,
    ) -> Result<hyper::Response<Body>> {
        let request = upload_request(filename, content_type, data, tenant_id, token)?;
        Ok(send(&self.router, request).await)
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
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

#[allow(dead_code)]
pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

#[allow(dead_code)]
pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

async fn send(router: &Router, request: Request<Body>) -> hyper::Response<Body> {
    router
        .clone()
        .oneshot(request)
        .await
        .expect("infallible response")
}

fn upload_request(
    filename: &str,
    content_type: &str,
    data: &[u8],
    tenant_id: Option<&str>,
    token: &str,
) -> Result<Request<Body>> {
    let boundary = format!("boundary-{}", Uuid::new_v4());
    let mut body = Vec::new();
    body.extend(format!("--{boundary}\r\n").as_bytes());
    body.extend(
        format!(
            "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
            filename
        )
        .as_bytes(),
    );
    body.extend(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
    body.extend(data);
    body.extend(b"\r\n");

    if let Some(tenant) = tenant_id {
        body.extend(format!("--{boundary}\r\n").as_bytes());
        body.extend(b"Content-Disposition: form-data; name=\"tenant_id\"\r\n\r\n");
        body.extend(tenant.as_bytes());
        body.extend(b"\r\n");
    }

    body.extend(format!("--{boundary}--\r\n").as_bytes());

    Ok(Request::builder()
        .method(Method::POST)
        .uri("/api/documents")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={boundary}"),
        )
        .header("authorization", format!("Bearer {token}"))
        .body(Body::from(body))?)
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        db::run_migrations(&pool)?;
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute("TRUNCATE TABLE documents, clients RESTART IDENTITY CASCADE;")
        .context("failed to truncate tables")?;
    Ok(())
}
