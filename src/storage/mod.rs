mod local;
mod object;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

use crate::config::{StorageBackend, StorageConfig};

pub use self::local::LocalBlobStore;
pub use self::object::ObjectBlobStore;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Blob already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid blob path: {0:?}")]
    InvalidPath(String),

    #[error("Blob operation timed out after {0:?}")]
    TimedOut(std::time::Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),
}

impl BlobError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BlobError::NotFound(_))
    }
}

/// A stored blob as reported by [`BlobStore::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobMeta {
    pub path: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// Key -> bytes storage. Keys are relative, `/`-separated paths.
///
/// Keys are write-once: a reader sees either no value or the complete one,
/// and bytes stored under a key are never replaced. Nothing is transactional
/// across keys.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` under a new key. Fails with `AlreadyExists` if the key is taken.
    async fn save(&self, path: &str, data: Bytes) -> Result<(), BlobError>;

    async fn read(&self, path: &str) -> Result<Bytes, BlobError>;

    async fn list(&self) -> Result<Vec<BlobMeta>, BlobError>;

    /// Removing a key that does not exist succeeds.
    async fn delete(&self, path: &str) -> Result<(), BlobError>;
}

/// Reject anything that is not a plain relative key such as `user_1/post_2_v1.md`.
pub(crate) fn validate_key(path: &str) -> Result<(), BlobError> {
    let valid = !path.is_empty()
        && !path.starts_with('/')
        && !path.contains('\\')
        && path
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..");

    if valid {
        Ok(())
    } else {
        Err(BlobError::InvalidPath(path.to_string()))
    }
}

/// Build the configured backend.
pub fn from_config(config: &StorageConfig) -> anyhow::Result<Arc<dyn BlobStore>> {
    match config.backend {
        StorageBackend::Local => {
            let root = config.path.clone().ok_or_else(|| {
                anyhow::anyhow!("storage.path must be set for the local backend")
            })?;
            tracing::info!(root = %root.display(), "Using local blob storage");
            Ok(Arc::new(LocalBlobStore::new(root)?))
        }
        StorageBackend::S3 => {
            let store = ObjectBlobStore::s3(config)?;
            tracing::info!(
                bucket = config.bucket.as_deref().unwrap_or_default(),
                prefix = %config.prefix,
                "Using S3 blob storage"
            );
            Ok(Arc::new(store))
        }
    }
}
