//! Blob storage for uploaded image bytes.
//!
//! `FilesystemObjectStore` keeps payloads on local disk sharded beneath
//! `base_path/{shard}/{shard}/{key}` and hands out URLs under
//! `{public_base_url}/objects/{key}`, which the `/objects` route serves.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    pin::Pin,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use uuid::Uuid;

/// A boxed stream of bytes for streaming reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error("object `{0}` not found")]
    ObjectNotFound(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type ObjectStoreResult<T> = Result<T, ObjectStoreError>;

#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Durably store `data` under `key`, replacing any previous payload, and
    /// return the public retrieval URL.
    async fn put_object(
        &self,
        key: &str,
        data: Bytes,
        content_type: Option<&str>,
    ) -> ObjectStoreResult<String>;

    /// Open a stored payload for streaming.
    async fn get_object(&self, key: &str) -> ObjectStoreResult<ByteStream>;

    /// Remove a payload. Missing objects are not an error.
    async fn delete_object(&self, key: &str) -> ObjectStoreResult<()>;

    /// Best-effort write/read/delete probe of the backing storage.
    async fn ping(&self) -> ObjectStoreResult<()>;
}

const MAX_OBJECT_KEY_LEN: usize = 1024;

#[derive(Clone, Debug)]
pub struct FilesystemObjectStore {
    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    /// Prefix for returned URLs, without trailing slash.
    pub public_base_url: String,
}

impl FilesystemObjectStore {
    pub fn new(base_path: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn url_for(&self, key: &str) -> String {
        format!("{}/objects/{}", self.public_base_url, key)
    }

    /// Two-level shard directories from MD5(key), to keep per-directory
    /// file counts small.
    fn object_shards(key: &str) -> (String, String) {
        let digest = md5::compute(key);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(key);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    async fn write_atomically(&self, file_path: &Path, data: &[u8]) -> ObjectStoreResult<()> {
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            ObjectStoreError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let written = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(data).await?;
            file.flush().await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, file_path).await
        }
        .await;

        if let Err(err) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ObjectStoreError::Io(err));
        }
        Ok(())
    }
}

/// Reject keys that could escape the storage root.
pub fn ensure_key_safe(key: &str) -> ObjectStoreResult<()> {
    if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
        return Err(ObjectStoreError::InvalidObjectKey);
    }
    if key.starts_with('/') || key.split('/').any(|seg| seg.is_empty() || seg == "..") {
        return Err(ObjectStoreError::InvalidObjectKey);
    }
    if key
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
    {
        return Err(ObjectStoreError::InvalidObjectKey);
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for FilesystemObjectStore {
    async fn put_object(
        &self,
        key: &str,
        data: Bytes,
        content_type: Option<&str>,
    ) -> ObjectStoreResult<String> {
        ensure_key_safe(key)?;
        let file_path = self.object_path(key);
        self.write_atomically(&file_path, &data).await?;
        tracing::debug!(
            "stored object {} ({} bytes, {})",
            key,
            data.len(),
            content_type.unwrap_or("application/octet-stream")
        );
        Ok(self.url_for(key))
    }

    async fn get_object(&self, key: &str) -> ObjectStoreResult<ByteStream> {
        ensure_key_safe(key)?;
        let file = File::open(self.object_path(key)).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                ObjectStoreError::ObjectNotFound(key.to_string())
            } else {
                ObjectStoreError::Io(err)
            }
        })?;
        Ok(ReaderStream::new(file).boxed())
    }

    async fn delete_object(&self, key: &str) -> ObjectStoreResult<()> {
        ensure_key_safe(key)?;
        match fs::remove_file(self.object_path(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(ObjectStoreError::Io(err)),
        }
    }

    async fn ping(&self) -> ObjectStoreResult<()> {
        fs::create_dir_all(&self.base_path).await?;
        let tmp_path = self.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&tmp_path, b"readyz").await?;
        let read_back = fs::read(&tmp_path).await;
        let _ = fs::remove_file(&tmp_path).await; // best-effort cleanup
        if read_back? != b"readyz" {
            return Err(ObjectStoreError::Io(io::Error::new(
                ErrorKind::InvalidData,
                "file content mismatch",
            )));
        }
        Ok(())
    }
}
