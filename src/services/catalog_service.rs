//! CatalogService: orchestration of users, image uploads and the cached
//! per-user image list.
//!
//! Reads are cache-aside: consult the cache, fall back to the metadata store
//! on a miss, then repopulate. Writes that change a user's image set commit
//! to the metadata store first and invalidate the user's cache entry before
//! reporting success. The cache never fails a request: its errors are logged
//! and treated as a miss (on read) or a skipped invalidation (on write).

use crate::{
    cache::{DEFAULT_TTL, ImageCache},
    models::{
        image::Image,
        user::{CreateUser, User},
    },
    services::{
        description::DescriptionGenerator,
        metadata_store::{MetadataError, MetadataStore},
        object_store::{ByteStream, ObjectStore, ObjectStoreError},
    },
};
use bytes::Bytes;
use futures::StreamExt;
use std::{future::Future, sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default upper bound for a single collaborator call.
pub const DEFAULT_COLLABORATOR_TIMEOUT: Duration = Duration::from_secs(10);

/// Concurrent blob deletions after a user is removed.
const BLOB_CLEANUP_CONCURRENCY: usize = 4;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    NotFound(String),
    #[error("failed to store image: {0}")]
    Storage(#[source] ObjectStoreError),
    #[error("metadata store failure: {0}")]
    Persistence(#[source] MetadataError),
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
    #[error("background write failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<MetadataError> for ServiceError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::UserNotFound(id) => Self::NotFound(format!("user `{}` not found", id)),
            other => Self::Persistence(other),
        }
    }
}

impl From<ObjectStoreError> for ServiceError {
    fn from(err: ObjectStoreError) -> Self {
        match err {
            ObjectStoreError::ObjectNotFound(key) => {
                Self::NotFound(format!("object `{}` not found", key))
            }
            ObjectStoreError::InvalidObjectKey => Self::InvalidInput("invalid object key".into()),
            other => Self::Storage(other),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// An image file as received from the client.
#[derive(Clone, Debug)]
pub struct UploadedImage {
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

/// Result of probing each collaborator.
#[derive(Debug)]
pub struct Readiness {
    pub metadata: Result<(), String>,
    pub objects: Result<(), String>,
    pub cache: Result<(), String>,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        self.metadata.is_ok() && self.objects.is_ok() && self.cache.is_ok()
    }
}

/// Shared application state handed to every handler. Cloning is cheap.
#[derive(Clone)]
pub struct CatalogService {
    pub metadata: Arc<dyn MetadataStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub describer: Arc<dyn DescriptionGenerator>,
    pub cache: Arc<dyn ImageCache>,
    cache_ttl: Duration,
    timeout: Duration,
}

impl CatalogService {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        objects: Arc<dyn ObjectStore>,
        describer: Arc<dyn DescriptionGenerator>,
        cache: Arc<dyn ImageCache>,
    ) -> Self {
        Self {
            metadata,
            objects,
            describer,
            cache,
            cache_ttl: DEFAULT_TTL,
            timeout: DEFAULT_COLLABORATOR_TIMEOUT,
        }
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run a collaborator call under the configured timeout. A timed-out
    /// future is dropped, so this is only for calls with no follow-up work
    /// that depends on whether they committed.
    async fn bounded<T, E>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T, E>>,
    ) -> ServiceResult<T>
    where
        ServiceError: From<E>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(ServiceError::from),
            Err(_) => Err(ServiceError::Timeout {
                operation,
                after: self.timeout,
            }),
        }
    }

    pub async fn create_user(&self, new_user: CreateUser) -> ServiceResult<User> {
        let new_user = CreateUser {
            name: new_user.name.trim().to_string(),
            email: new_user.email.trim().to_string(),
        };
        if new_user.name.is_empty() {
            return Err(ServiceError::InvalidInput("name must not be empty".into()));
        }
        if new_user.email.is_empty() {
            return Err(ServiceError::InvalidInput("email must not be empty".into()));
        }

        let user = self
            .bounded("create user", self.metadata.create_user(&new_user))
            .await?;
        info!("created user {}", user.id);
        Ok(user)
    }

    pub async fn get_user(&self, user_id: &str) -> ServiceResult<User> {
        ensure_id(user_id)?;
        self.bounded("get user", self.metadata.get_user(user_id))
            .await
    }

    /// Delete a user, its links and the images it alone owned. The cache entry
    /// is invalidated after the commit, then the orphaned blobs are removed
    /// best-effort.
    ///
    /// The delete and its follow-up run on their own task, so a commit that
    /// lands after the caller timed out is still invalidated and cleaned up.
    #[tracing::instrument(skip(self))]
    pub async fn delete_user(&self, user_id: &str) -> ServiceResult<()> {
        ensure_id(user_id)?;

        let removal = tokio::spawn({
            let service = self.clone();
            let user_id = user_id.to_string();
            async move {
                let orphaned_keys = service.metadata.delete_user(&user_id).await?;
                service.invalidate_cached(&user_id).await;

                let service = &service;
                futures::stream::iter(orphaned_keys)
                    .for_each_concurrent(BLOB_CLEANUP_CONCURRENCY, |key| async move {
                        service.discard_object(&key).await;
                    })
                    .await;
                Ok::<_, MetadataError>(())
            }
        });

        match tokio::time::timeout(self.timeout, removal).await {
            Ok(joined) => joined??,
            Err(_) => {
                warn!(
                    "delete of user {} still in flight, cleanup continues in background",
                    user_id
                );
                return Err(ServiceError::Timeout {
                    operation: "delete user",
                    after: self.timeout,
                });
            }
        }

        info!("deleted user {}", user_id);
        Ok(())
    }

    /// Store the blob, describe it, persist image + link atomically, then
    /// invalidate the user's cached list. Success is only reported after the
    /// invalidation has run.
    #[tracing::instrument(skip(self, upload), fields(bytes = upload.bytes.len()))]
    pub async fn upload_image(&self, user_id: &str, upload: UploadedImage) -> ServiceResult<Image> {
        ensure_id(user_id)?;
        if upload.bytes.is_empty() {
            return Err(ServiceError::InvalidInput("uploaded file is empty".into()));
        }
        self.bounded("get user", self.metadata.get_user(user_id))
            .await?;

        let image_id = Uuid::new_v4().to_string();
        let content_type = upload.content_type.as_deref();
        let key = object_key(user_id, &image_id, content_type);

        let url = self
            .bounded(
                "store object",
                self.objects
                    .put_object(&key, upload.bytes.clone(), content_type),
            )
            .await?;

        let desc = match tokio::time::timeout(
            self.timeout,
            self.describer.describe(&upload.bytes, content_type),
        )
        .await
        {
            Ok(desc) => desc,
            Err(_) => {
                warn!("description generation timed out for image {}", image_id);
                String::new()
            }
        };

        let image = Image {
            id: image_id,
            url,
            desc,
        };

        // The outcome decides the follow-up: invalidate on commit, drop the
        // blob on a definite failure. Both run on the task even if the caller
        // stops waiting, since a late commit must not lose its blob.
        let persist = tokio::spawn({
            let service = self.clone();
            let user_id = user_id.to_string();
            let image = image.clone();
            let key = key.clone();
            async move {
                match service
                    .metadata
                    .create_image_and_association(&user_id, &image, &key)
                    .await
                {
                    Ok(_) => {
                        service.invalidate_cached(&user_id).await;
                        Ok(())
                    }
                    Err(err) => {
                        service.discard_object(&key).await;
                        Err(err)
                    }
                }
            }
        });

        match tokio::time::timeout(self.timeout, persist).await {
            Ok(joined) => joined??,
            Err(_) => {
                warn!("image {} still being persisted, outcome unknown", image.id);
                return Err(ServiceError::Timeout {
                    operation: "persist image",
                    after: self.timeout,
                });
            }
        }

        info!("stored image {} for user {}", image.id, user_id);
        Ok(image)
    }

    /// Cache-aside read of a user's images.
    #[tracing::instrument(skip(self))]
    pub async fn list_images(&self, user_id: &str) -> ServiceResult<Vec<Image>> {
        ensure_id(user_id)?;

        if let Some(images) = self.cached(user_id).await {
            debug!("image list cache hit");
            return Ok(images);
        }
        debug!("image list cache miss");

        let images = self
            .bounded("list images", self.metadata.list_images_for_user(user_id))
            .await?;
        if images.is_empty() {
            // distinguishes "no images" from "no such user"
            self.bounded("get user", self.metadata.get_user(user_id))
                .await?;
        }

        match tokio::time::timeout(self.timeout, self.cache.put(user_id, &images, self.cache_ttl))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!("cache put failed, serving uncached: {}", err),
            Err(_) => warn!("cache put timed out, serving uncached"),
        }

        Ok(images)
    }

    /// Stream a stored blob back to the client.
    pub async fn open_object(&self, key: &str) -> ServiceResult<ByteStream> {
        self.bounded("open object", self.objects.get_object(key))
            .await
    }

    pub async fn readiness(&self) -> Readiness {
        let (metadata, objects, cache) = tokio::join!(
            self.bounded("metadata ping", self.metadata.ping()),
            self.bounded("object store ping", self.objects.ping()),
            tokio::time::timeout(self.timeout, self.cache.ping()),
        );
        Readiness {
            metadata: metadata.map_err(|e| e.to_string()),
            objects: objects.map_err(|e| e.to_string()),
            cache: match cache {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(err.to_string()),
                Err(_) => Err("timed out".into()),
            },
        }
    }

    /// Cache lookup where every failure reads as a miss.
    async fn cached(&self, user_id: &str) -> Option<Vec<Image>> {
        match tokio::time::timeout(self.timeout, self.cache.get(user_id)).await {
            Ok(Ok(hit)) => hit,
            Ok(Err(err)) => {
                warn!("cache get failed, treating as miss: {}", err);
                None
            }
            Err(_) => {
                warn!("cache get timed out, treating as miss");
                None
            }
        }
    }

    /// Invalidation whose failure is logged and skipped.
    async fn invalidate_cached(&self, user_id: &str) {
        match tokio::time::timeout(self.timeout, self.cache.invalidate(user_id)).await {
            Ok(Ok(())) => debug!("invalidated cached image list for {}", user_id),
            Ok(Err(err)) => warn!(
                "cache invalidation for {} failed, entry may be stale until ttl: {}",
                user_id, err
            ),
            Err(_) => warn!(
                "cache invalidation for {} timed out, entry may be stale until ttl",
                user_id
            ),
        }
    }

    async fn discard_object(&self, key: &str) {
        match tokio::time::timeout(self.timeout, self.objects.delete_object(key)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!("failed to remove object {}: {}", key, err),
            Err(_) => warn!("removing object {} timed out", key),
        }
    }
}

fn ensure_id(id: &str) -> ServiceResult<()> {
    if id.trim().is_empty() {
        return Err(ServiceError::InvalidInput("id must not be empty".into()));
    }
    Ok(())
}

/// Blob key scoped to the owning user so two users can never collide.
pub fn object_key(user_id: &str, image_id: &str, content_type: Option<&str>) -> String {
    format!(
        "users/{}/{}.{}",
        user_id,
        image_id,
        extension_for(content_type)
    )
}

pub fn extension_for(content_type: Option<&str>) -> &'static str {
    match content_type.map(|ct| ct.split(';').next().unwrap_or(ct).trim()) {
        Some("image/png") => "png",
        Some("image/jpeg") | Some("image/jpg") => "jpg",
        Some("image/gif") => "gif",
        Some("image/webp") => "webp",
        _ => "bin",
    }
}

/// Inverse of [`extension_for`], used when serving blobs.
pub fn content_type_for_key(key: &str) -> &'static str {
    match key.rsplit_once('.').map(|(_, ext)| ext) {
        Some("png") => "image/png",
        Some("jpg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}
