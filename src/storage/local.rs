use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use walkdir::WalkDir;

use super::{validate_key, BlobError, BlobMeta, BlobStore};

/// Blob store rooted at a directory on local disk.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, BlobError> {
        validate_key(path)?;
        Ok(path
            .split('/')
            .fold(self.root.clone(), |full, segment| full.join(segment)))
    }
}

/// Temp files live next to their target so the final rename stays on one filesystem.
fn temp_path_for(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::now_v7()))
}

/// Write a complete temp file, then link it into place. Linking fails with
/// `AlreadyExists` instead of replacing an existing target.
async fn write_then_link(target: &Path, data: &[u8]) -> std::io::Result<()> {
    let tmp = temp_path_for(target);

    let result = async {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::hard_link(&tmp, target).await
    }
    .await;

    let _ = tokio::fs::remove_file(&tmp).await;
    result
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

fn scan(root: &Path) -> std::io::Result<Vec<BlobMeta>> {
    let mut blobs = Vec::new();

    for entry in WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
    {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(std::io::Error::other)?;
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let metadata = entry.metadata()?;
        blobs.push(BlobMeta {
            path: key,
            size: metadata.len(),
            last_modified: DateTime::<Utc>::from(metadata.modified()?),
        });
    }

    blobs.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(blobs)
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn save(&self, path: &str, data: Bytes) -> Result<(), BlobError> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        match write_then_link(&full, &data).await {
            Ok(()) => {
                tracing::debug!(path, bytes = data.len(), "Saved blob");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(BlobError::AlreadyExists(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self, path: &str) -> Result<Bytes, BlobError> {
        let full = self.resolve(path)?;
        match tokio::fs::read(&full).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(BlobError::NotFound(path.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<BlobMeta>, BlobError> {
        let root = self.root.clone();
        let blobs = tokio::task::spawn_blocking(move || scan(&root))
            .await
            .map_err(std::io::Error::other)??;
        Ok(blobs)
    }

    async fn delete(&self, path: &str) -> Result<(), BlobError> {
        let full = self.resolve(path)?;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
