//! Network object storage backend.
//!
//! All posts share a single bucket; keys such as `user_1/post_2_v1.md` act as
//! per-user prefixes inside it, optionally nested under a deployment prefix.
//! Works against AWS S3 and S3-compatible services (MinIO, LocalStack) through
//! the `object_store` crate.

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::aws::{AmazonS3Builder, S3ConditionalPut};
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutMode, PutOptions};
use std::sync::Arc;

use super::{validate_key, BlobError, BlobMeta, BlobStore};
use crate::config::StorageConfig;

#[derive(Clone)]
pub struct ObjectBlobStore {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl ObjectBlobStore {
    /// Build an S3 client for the configured bucket.
    ///
    /// Credentials come from the usual AWS environment variables
    /// (`AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, `AWS_SESSION_TOKEN`, ...).
    pub fn s3(config: &StorageConfig) -> anyhow::Result<Self> {
        let bucket = config
            .bucket
            .as_deref()
            .filter(|b| !b.is_empty())
            .ok_or_else(|| anyhow::anyhow!("storage.bucket must be set for the s3 backend"))?;

        // Create-only puts are sent as `If-None-Match: *`.
        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .with_region(&config.region)
            .with_conditional_put(S3ConditionalPut::ETagMatch);

        if let Some(endpoint) = &config.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }

        let store = builder.build()?;
        Ok(Self::from_store(Arc::new(store), config.prefix.clone()))
    }

    /// Wrap an existing object store, e.g. `object_store::memory::InMemory` in tests.
    pub fn from_store(store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into().trim_matches('/').to_string();
        Self { store, prefix }
    }

    fn full_path(&self, key: &str) -> ObjectPath {
        if self.prefix.is_empty() {
            ObjectPath::from(key)
        } else {
            ObjectPath::from(format!("{}/{}", self.prefix, key))
        }
    }

    fn strip_prefix(&self, location: &ObjectPath) -> String {
        let full = location.to_string();
        if self.prefix.is_empty() {
            return full;
        }
        full.strip_prefix(&format!("{}/", self.prefix))
            .map(str::to_string)
            .unwrap_or(full)
    }
}

impl std::fmt::Debug for ObjectBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectBlobStore")
            .field("store", &self.store.to_string())
            .field("prefix", &self.prefix)
            .finish()
    }
}

#[async_trait]
impl BlobStore for ObjectBlobStore {
    async fn save(&self, path: &str, data: Bytes) -> Result<(), BlobError> {
        validate_key(path)?;
        let len = data.len();
        let opts = PutOptions {
            mode: PutMode::Create,
            ..Default::default()
        };
        match self
            .store
            .put_opts(&self.full_path(path), data.into(), opts)
            .await
        {
            Ok(_) => {
                tracing::debug!(path, bytes = len, "Saved blob");
                Ok(())
            }
            Err(object_store::Error::AlreadyExists { .. }) => {
                Err(BlobError::AlreadyExists(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self, path: &str) -> Result<Bytes, BlobError> {
        validate_key(path)?;
        let result = match self.store.get(&self.full_path(path)).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => {
                return Err(BlobError::NotFound(path.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(result.bytes().await?)
    }

    async fn list(&self) -> Result<Vec<BlobMeta>, BlobError> {
        let prefix = (!self.prefix.is_empty()).then(|| ObjectPath::from(self.prefix.as_str()));

        let objects: Vec<_> = self.store.list(prefix.as_ref()).try_collect().await?;

        let mut blobs: Vec<BlobMeta> = objects
            .into_iter()
            .map(|meta| BlobMeta {
                path: self.strip_prefix(&meta.location),
                size: meta.size as u64,
                last_modified: meta.last_modified,
            })
            .collect();
        blobs.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(blobs)
    }

    async fn delete(&self, path: &str) -> Result<(), BlobError> {
        validate_key(path)?;
        match self.store.delete(&self.full_path(path)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
