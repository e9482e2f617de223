//! Shared fixtures for integration tests.
//! Note: #[allow(dead_code)] because each test file compiles common/ separately.
#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use bytes::Bytes;
use image_catalog::{
    cache::{CacheError, CacheResult, ImageCache, MemoryImageCache},
    db,
    models::{
        image::{Image, UserImage},
        user::{CreateUser, User},
    },
    routes,
    services::{
        catalog_service::CatalogService,
        description::MockDescriptionGenerator,
        metadata_store::{MetadataError, MetadataResult, MetadataStore, SqliteMetadataStore},
        object_store::{
            ByteStream, FilesystemObjectStore, ObjectStore, ObjectStoreError, ObjectStoreResult,
        },
    },
};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};
use tempfile::TempDir;
use tower::ServiceExt;

pub const BOUNDARY: &str = "----image-catalog-test-boundary";
pub const MAX_UPLOAD_BYTES: usize = 1024 * 1024;

/// A wired service with real SQLite metadata, a temp-dir object store and
/// instrumented wrappers around the cache and metadata store.
pub struct TestApp {
    pub router: Router,
    pub service: CatalogService,
    pub sqlite: SqliteMetadataStore,
    pub metadata: Arc<FaultyMetadataStore>,
    pub cache: Arc<CountingCache>,
    pub objects: FilesystemObjectStore,
    _temp_dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::build(|cache| cache, |objects| objects, Duration::from_secs(5)).await
    }

    /// Replace the cache handed to the service (the counting wrapper stays
    /// reachable through `self.cache` but only sees traffic if it is used).
    pub async fn with_cache(cache: Arc<dyn ImageCache>) -> Self {
        Self::build(move |_| cache, |objects| objects, Duration::from_secs(5)).await
    }

    pub async fn with_objects(
        objects: impl FnOnce(Arc<dyn ObjectStore>) -> Arc<dyn ObjectStore>,
        timeout: Duration,
    ) -> Self {
        Self::build(|cache| cache, objects, timeout).await
    }

    async fn build(
        cache: impl FnOnce(Arc<dyn ImageCache>) -> Arc<dyn ImageCache>,
        objects: impl FnOnce(Arc<dyn ObjectStore>) -> Arc<dyn ObjectStore>,
        timeout: Duration,
    ) -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let pool = db::connect("sqlite::memory:", 1)
            .await
            .expect("Failed to open metadata database");
        db::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        let sqlite = SqliteMetadataStore::new(Arc::new(pool));
        let metadata = Arc::new(FaultyMetadataStore::new(Arc::new(sqlite.clone())));

        let file_store =
            FilesystemObjectStore::new(temp_dir.path().join("objects"), "http://test.local");
        let counting = Arc::new(CountingCache::new(Arc::new(MemoryImageCache::new())));
        let counting_dyn: Arc<dyn ImageCache> = counting.clone();
        let service_cache = cache(counting_dyn);
        let file_store_dyn: Arc<dyn ObjectStore> = Arc::new(file_store.clone());

        let service = CatalogService::new(
            metadata.clone(),
            objects(file_store_dyn),
            Arc::new(MockDescriptionGenerator),
            service_cache,
        )
        .with_timeout(timeout);

        let router = routes::routes::routes(MAX_UPLOAD_BYTES).with_state(service.clone());

        Self {
            router,
            service,
            sqlite,
            metadata,
            cache: counting,
            objects: file_store,
            _temp_dir: temp_dir,
        }
    }

    pub async fn create_user(&self, name: &str) -> User {
        self.service
            .create_user(CreateUser {
                name: name.to_string(),
                email: format!("{}@example.com", name.to_lowercase()),
            })
            .await
            .expect("Failed to create user")
    }

    pub async fn count_rows(&self, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&*self.sqlite.db)
            .await
            .expect("Failed to count rows")
    }

    /// Number of stored blob files beneath the object store root.
    pub fn stored_blob_count(&self) -> usize {
        fn walk(dir: &std::path::Path) -> usize {
            let Ok(entries) = std::fs::read_dir(dir) else {
                return 0;
            };
            entries
                .flatten()
                .map(|entry| {
                    let path = entry.path();
                    if path.is_dir() { walk(&path) } else { 1 }
                })
                .sum()
        }
        walk(&self.objects.base_path)
    }

    pub async fn json_request(
        &self,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(v) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(serde_json::to_vec(&v).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send(request).await
    }

    pub async fn upload(
        &self,
        user_id: &str,
        content_type: &str,
        data: &[u8],
    ) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method("POST")
            .uri(format!("/images/upload/{user_id}"))
            .header(
                "Content-Type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body("file", content_type, data)))
            .unwrap();
        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let (status, bytes) = self.send_raw(request).await;
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
        };
        (status, json)
    }

    pub async fn send_raw(&self, request: Request<Body>) -> (StatusCode, Bytes) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body)
    }
}

pub fn multipart_body(field: &str, content_type: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{field}\"; filename=\"upload\"\r\n\
             Content-Type: {content_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn image(id: &str) -> Image {
    Image {
        id: id.to_string(),
        url: format!("http://test.local/objects/{id}.png"),
        desc: format!("desc of {id}"),
    }
}

/// Cache wrapper that counts calls per operation.
pub struct CountingCache {
    inner: Arc<dyn ImageCache>,
    pub gets: AtomicUsize,
    pub puts: AtomicUsize,
    pub invalidations: AtomicUsize,
}

impl CountingCache {
    pub fn new(inner: Arc<dyn ImageCache>) -> Self {
        Self {
            inner,
            gets: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
            invalidations: AtomicUsize::new(0),
        }
    }

    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn invalidations(&self) -> usize {
        self.invalidations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageCache for CountingCache {
    async fn get(&self, user_id: &str) -> CacheResult<Option<Vec<Image>>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(user_id).await
    }

    async fn put(&self, user_id: &str, images: &[Image], ttl: Duration) -> CacheResult<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(user_id, images, ttl).await
    }

    async fn invalidate(&self, user_id: &str) -> CacheResult<()> {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        self.inner.invalidate(user_id).await
    }

    async fn purge_expired(&self) -> CacheResult<u64> {
        self.inner.purge_expired().await
    }

    async fn ping(&self) -> CacheResult<()> {
        self.inner.ping().await
    }
}

/// Cache whose backend is permanently unreachable.
pub struct UnreachableCache;

#[async_trait]
impl ImageCache for UnreachableCache {
    async fn get(&self, _user_id: &str) -> CacheResult<Option<Vec<Image>>> {
        Err(CacheError::Backend(sqlx::Error::PoolClosed))
    }

    async fn put(&self, _user_id: &str, _images: &[Image], _ttl: Duration) -> CacheResult<()> {
        Err(CacheError::Backend(sqlx::Error::PoolClosed))
    }

    async fn invalidate(&self, _user_id: &str) -> CacheResult<()> {
        Err(CacheError::Backend(sqlx::Error::PoolClosed))
    }

    async fn purge_expired(&self) -> CacheResult<u64> {
        Err(CacheError::Backend(sqlx::Error::PoolClosed))
    }

    async fn ping(&self) -> CacheResult<()> {
        Err(CacheError::Backend(sqlx::Error::PoolClosed))
    }
}

/// Metadata store wrapper that counts list queries and can be told to fail
/// image writes.
pub struct FaultyMetadataStore {
    inner: Arc<dyn MetadataStore>,
    pub list_calls: AtomicUsize,
    pub fail_image_writes: AtomicBool,
}

impl FaultyMetadataStore {
    pub fn new(inner: Arc<dyn MetadataStore>) -> Self {
        Self {
            inner,
            list_calls: AtomicUsize::new(0),
            fail_image_writes: AtomicBool::new(false),
        }
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataStore for FaultyMetadataStore {
    async fn create_user(&self, new_user: &CreateUser) -> MetadataResult<User> {
        self.inner.create_user(new_user).await
    }

    async fn get_user(&self, user_id: &str) -> MetadataResult<User> {
        self.inner.get_user(user_id).await
    }

    async fn delete_user(&self, user_id: &str) -> MetadataResult<Vec<String>> {
        self.inner.delete_user(user_id).await
    }

    async fn create_image_and_association(
        &self,
        user_id: &str,
        image: &Image,
        object_key: &str,
    ) -> MetadataResult<UserImage> {
        if self.fail_image_writes.load(Ordering::SeqCst) {
            // the link insert fails after the image insert; the whole unit
            // is rolled back, which from outside means nothing was written
            return Err(MetadataError::Sqlx(sqlx::Error::Protocol(
                "injected association failure".into(),
            )));
        }
        self.inner
            .create_image_and_association(user_id, image, object_key)
            .await
    }

    async fn list_images_for_user(&self, user_id: &str) -> MetadataResult<Vec<Image>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.list_images_for_user(user_id).await
    }

    async fn ping(&self) -> MetadataResult<()> {
        self.inner.ping().await
    }
}

/// Metadata store whose writes commit immediately but report back only
/// after `delay`.
pub struct SlowAcknowledgeMetadataStore {
    pub inner: Arc<dyn MetadataStore>,
    pub delay: Duration,
}

#[async_trait]
impl MetadataStore for SlowAcknowledgeMetadataStore {
    async fn create_user(&self, new_user: &CreateUser) -> MetadataResult<User> {
        self.inner.create_user(new_user).await
    }

    async fn get_user(&self, user_id: &str) -> MetadataResult<User> {
        self.inner.get_user(user_id).await
    }

    async fn delete_user(&self, user_id: &str) -> MetadataResult<Vec<String>> {
        let result = self.inner.delete_user(user_id).await;
        tokio::time::sleep(self.delay).await;
        result
    }

    async fn create_image_and_association(
        &self,
        user_id: &str,
        image: &Image,
        object_key: &str,
    ) -> MetadataResult<UserImage> {
        let result = self
            .inner
            .create_image_and_association(user_id, image, object_key)
            .await;
        tokio::time::sleep(self.delay).await;
        result
    }

    async fn list_images_for_user(&self, user_id: &str) -> MetadataResult<Vec<Image>> {
        self.inner.list_images_for_user(user_id).await
    }

    async fn ping(&self) -> MetadataResult<()> {
        self.inner.ping().await
    }
}

/// Object store that fails every upload, as if the backend rejected auth.
pub struct RejectingObjectStore;

#[async_trait]
impl ObjectStore for RejectingObjectStore {
    async fn put_object(
        &self,
        _key: &str,
        _data: Bytes,
        _content_type: Option<&str>,
    ) -> ObjectStoreResult<String> {
        Err(ObjectStoreError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "access denied by backend",
        )))
    }

    async fn get_object(&self, key: &str) -> ObjectStoreResult<ByteStream> {
        Err(ObjectStoreError::ObjectNotFound(key.to_string()))
    }

    async fn delete_object(&self, _key: &str) -> ObjectStoreResult<()> {
        Ok(())
    }

    async fn ping(&self) -> ObjectStoreResult<()> {
        Ok(())
    }
}

/// Object store whose uploads take `delay` before delegating.
pub struct SlowObjectStore {
    pub inner: Arc<dyn ObjectStore>,
    pub delay: Duration,
}

#[async_trait]
impl ObjectStore for SlowObjectStore {
    async fn put_object(
        &self,
        key: &str,
        data: Bytes,
        content_type: Option<&str>,
    ) -> ObjectStoreResult<String> {
        tokio::time::sleep(self.delay).await;
        self.inner.put_object(key, data, content_type).await
    }

    async fn get_object(&self, key: &str) -> ObjectStoreResult<ByteStream> {
        self.inner.get_object(key).await
    }

    async fn delete_object(&self, key: &str) -> ObjectStoreResult<()> {
        self.inner.delete_object(key).await
    }

    async fn ping(&self) -> ObjectStoreResult<()> {
        self.inner.ping().await
    }
}
