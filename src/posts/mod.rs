//! Post lifecycle: create, update, read, list and search posts whose metadata
//! lives in the relational store and whose bodies live in the blob store.
//!
//! The two stores fail independently and share no commit boundary, so every
//! multi-step write is ordered such that already-committed state is never
//! damaged:
//!
//! - create inserts the row, writes `v1` content, then attaches the key;
//! - update archives the current version into history, writes the new
//!   version under a fresh key, then swaps the row over with a version check.
//!
//! A failure part-way leaves at worst an unmaterialized row or an
//! unreferenced blob; [`sweep`] reports and reclaims those.

mod content_path;
mod error;
pub mod sweep;

use bytes::Bytes;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::db::models::{Post, PostFields, PostHistory};
use crate::db::PostRepository;
use crate::storage::{BlobError, BlobStore};

pub use self::content_path::{content_path, parse_content_path};
pub use self::error::{Phase, PostError};
pub use self::sweep::SweepReport;

pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 100;
pub const MAX_CONTENT_BYTES: usize = 5 * 1024 * 1024;

const MAX_TITLE_CHARS: usize = 200;
const MAX_SUB_TITLE_CHARS: usize = 300;
const MAX_IMAGE_CHARS: usize = 2048;
const MAX_TAGS: usize = 20;
const MAX_TAG_CHARS: usize = 50;

/// Everything a caller supplies to create or update a post.
#[derive(Debug, Clone, Default)]
pub struct PostInput {
    pub title: String,
    pub sub_title: Option<String>,
    pub image: Option<String>,
    pub tags: Vec<String>,
    pub content: Bytes,
}

impl PostInput {
    pub fn new(title: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            ..Default::default()
        }
    }

    fn validate(self) -> Result<(PostFields, Bytes), PostError> {
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err(PostError::Validation("title is required".into()));
        }
        if title.chars().count() > MAX_TITLE_CHARS {
            return Err(PostError::Validation(format!(
                "title must be {MAX_TITLE_CHARS} characters or less"
            )));
        }

        let sub_title = non_blank(self.sub_title);
        if sub_title
            .as_ref()
            .is_some_and(|s| s.chars().count() > MAX_SUB_TITLE_CHARS)
        {
            return Err(PostError::Validation(format!(
                "sub_title must be {MAX_SUB_TITLE_CHARS} characters or less"
            )));
        }

        let image = non_blank(self.image);
        if image.as_ref().is_some_and(|s| s.len() > MAX_IMAGE_CHARS) {
            return Err(PostError::Validation("image reference is too long".into()));
        }

        let tags = normalize_tags(self.tags)?;

        if self.content.len() > MAX_CONTENT_BYTES {
            return Err(PostError::Validation(format!(
                "content must be {MAX_CONTENT_BYTES} bytes or less"
            )));
        }
        if std::str::from_utf8(&self.content).is_err() {
            return Err(PostError::Validation("content must be UTF-8 text".into()));
        }

        let fields = PostFields {
            title,
            sub_title,
            image,
            tags,
        };
        Ok((fields, self.content))
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Tags are a set: trimmed, blanks dropped, de-duplicated, sorted.
fn normalize_tags(tags: Vec<String>) -> Result<Vec<String>, PostError> {
    let set: BTreeSet<String> = tags
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();

    if set.len() > MAX_TAGS {
        return Err(PostError::Validation(format!(
            "at most {MAX_TAGS} tags are allowed"
        )));
    }
    if let Some(tag) = set.iter().find(|t| t.chars().count() > MAX_TAG_CHARS) {
        return Err(PostError::Validation(format!("tag {tag:?} is too long")));
    }

    Ok(set.into_iter().collect())
}

/// A normalized page request. Page numbers start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: i64,
    pub limit: i64,
}

impl Page {
    /// Page below 1 becomes 1; limit below 1 becomes the default and is capped.
    pub fn new(page: i64, limit: i64) -> Self {
        let page = page.max(1);
        let limit = if limit < 1 {
            DEFAULT_PAGE_SIZE
        } else {
            limit.min(MAX_PAGE_SIZE)
        };
        Self { page, limit }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(1, DEFAULT_PAGE_SIZE)
    }
}

#[derive(Debug, Clone)]
pub struct PostWithContent {
    pub post: Post,
    /// `None` while the post's first content write has not landed yet.
    pub content: Option<Bytes>,
}

#[derive(Debug, Clone)]
pub struct VersionContent {
    pub post_id: i64,
    pub version: i64,
    pub content_path: String,
    pub content: Bytes,
}

pub struct PostService {
    posts: Arc<dyn PostRepository>,
    blobs: Arc<dyn BlobStore>,
    io_timeout: Duration,
    update_lease: Duration,
}

impl PostService {
    pub fn new(
        posts: Arc<dyn PostRepository>,
        blobs: Arc<dyn BlobStore>,
        io_timeout: Duration,
    ) -> Self {
        Self {
            posts,
            blobs,
            io_timeout,
            // One bounded blob write plus the metadata calls around it.
            update_lease: io_timeout * 2 + Duration::from_secs(5),
        }
    }

    pub fn with_update_lease(mut self, lease: Duration) -> Self {
        self.update_lease = lease;
        self
    }

    async fn save_blob(&self, path: &str, data: Bytes) -> Result<(), BlobError> {
        tokio::time::timeout(self.io_timeout, self.blobs.save(path, data))
            .await
            .map_err(|_| BlobError::TimedOut(self.io_timeout))?
    }

    async fn read_blob(&self, path: &str) -> Result<Bytes, BlobError> {
        tokio::time::timeout(self.io_timeout, self.blobs.read(path))
            .await
            .map_err(|_| BlobError::TimedOut(self.io_timeout))?
    }

    /// Versioned keys are write-once, so a taken key means another writer
    /// already produced this version.
    fn save_failed(post_id: i64, path: &str, e: BlobError) -> PostError {
        match e {
            BlobError::AlreadyExists(_) => {
                tracing::warn!(post_id, path, "Content key already written by another writer");
                PostError::Conflict { post_id }
            }
            e => PostError::storage(Phase::SaveContent)(e),
        }
    }

    /// Read a blob a metadata row points at. A missing blob means the row and
    /// the store disagree, which is reported as `InconsistentState`.
    async fn read_referenced(&self, post_id: i64, path: &str) -> Result<Bytes, PostError> {
        match self.read_blob(path).await {
            Ok(data) => Ok(data),
            Err(BlobError::NotFound(_)) => {
                tracing::error!(post_id, path, "Post references missing content");
                Err(PostError::InconsistentState {
                    post_id,
                    path: path.to_string(),
                })
            }
            Err(e) => Err(PostError::storage(Phase::ReadContent)(e)),
        }
    }

    pub async fn create(&self, user_id: i64, input: PostInput) -> Result<Post, PostError> {
        let (fields, content) = input.validate()?;

        let post = self
            .posts
            .create(user_id, &fields)
            .await
            .map_err(PostError::metadata(Phase::Insert))?;

        let path = content_path(user_id, post.id, post.version);

        if let Err(e) = self.save_blob(&path, content).await {
            tracing::warn!(post_id = post.id, %path, error = %e, "Post left without content");
            return Err(Self::save_failed(post.id, &path, e));
        }

        let post = self
            .posts
            .attach_content(post.id, &path)
            .await
            .map_err(PostError::metadata(Phase::AttachContent))?
            .ok_or(PostError::NotFound)?;

        tracing::info!(post_id = post.id, user_id, %path, "Created post");
        Ok(post)
    }

    pub async fn update(
        &self,
        post_id: i64,
        user_id: i64,
        input: PostInput,
    ) -> Result<Post, PostError> {
        let (fields, content) = input.validate()?;

        let current = self
            .posts
            .get_by_id(post_id)
            .await
            .map_err(PostError::metadata(Phase::Fetch))?
            .ok_or(PostError::NotFound)?;

        if current.user_id != user_id {
            tracing::warn!(post_id, user_id, owner = current.user_id, "Rejected update by non-owner");
            return Err(PostError::PermissionDenied);
        }

        // Nothing to archive yet; the create that owns this row is still running or failed.
        if !current.is_materialized() {
            return Err(PostError::Conflict { post_id });
        }

        let claimed = self
            .posts
            .claim_update(post_id, current.version, self.update_lease)
            .await
            .map_err(PostError::metadata(Phase::Claim))?;
        let Some(lease_token) = claimed else {
            tracing::warn!(post_id, version = current.version, "Concurrent update rejected");
            return Err(PostError::Conflict { post_id });
        };

        let result = self
            .apply_update(&current, &lease_token, &fields, content)
            .await;

        if result.is_err() {
            if let Err(e) = self.posts.release_update(post_id, &lease_token).await {
                tracing::warn!(post_id, error = %e, "Failed to release update lease; it will expire");
            }
        }

        result
    }

    async fn apply_update(
        &self,
        current: &Post,
        lease_token: &str,
        fields: &PostFields,
        content: Bytes,
    ) -> Result<Post, PostError> {
        // History first, so the old content stays reachable whatever happens next.
        self.posts
            .create_history(current.id, current.version, &current.content_path)
            .await
            .map_err(PostError::metadata(Phase::Archive))?;

        let new_version = current.version + 1;
        let new_path = content_path(current.user_id, current.id, new_version);

        self.save_blob(&new_path, content)
            .await
            .map_err(|e| Self::save_failed(current.id, &new_path, e))?;

        let committed = self
            .posts
            .commit_update(current.id, current.version, lease_token, fields, &new_path)
            .await;

        match committed {
            Ok(Some(post)) => {
                tracing::info!(
                    post_id = post.id,
                    version = post.version,
                    path = %post.content_path,
                    "Updated post"
                );
                Ok(post)
            }
            Ok(None) => {
                tracing::error!(post_id = current.id, path = %new_path, "Lease lost during update; blob is unreferenced");
                Err(PostError::Conflict {
                    post_id: current.id,
                })
            }
            Err(e) => {
                tracing::error!(post_id = current.id, path = %new_path, error = %e, "Commit failed; blob is unreferenced");
                Err(PostError::metadata(Phase::Commit)(e))
            }
        }
    }

    pub async fn get_by_id(&self, post_id: i64) -> Result<PostWithContent, PostError> {
        let post = self
            .posts
            .get_by_id(post_id)
            .await
            .map_err(PostError::metadata(Phase::Fetch))?
            .ok_or(PostError::NotFound)?;

        if !post.is_materialized() {
            return Ok(PostWithContent {
                post,
                content: None,
            });
        }

        let content = self.read_referenced(post.id, &post.content_path).await?;
        Ok(PostWithContent {
            post,
            content: Some(content),
        })
    }

    pub async fn list(&self, page: Page) -> Result<Vec<Post>, PostError> {
        self.posts
            .list(page.limit, page.offset())
            .await
            .map_err(PostError::metadata(Phase::List))
    }

    pub async fn search(&self, query: &str, page: Page) -> Result<Vec<Post>, PostError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(PostError::Validation("search query is required".into()));
        }

        self.posts
            .search(query, page.limit, page.offset())
            .await
            .map_err(PostError::metadata(Phase::Search))
    }

    /// Archived versions of a post, oldest first.
    pub async fn history(&self, post_id: i64) -> Result<Vec<PostHistory>, PostError> {
        self.posts
            .get_by_id(post_id)
            .await
            .map_err(PostError::metadata(Phase::Fetch))?
            .ok_or(PostError::NotFound)?;

        self.posts
            .list_history(post_id)
            .await
            .map_err(PostError::metadata(Phase::History))
    }

    /// Content of any version of a post, current or archived.
    pub async fn get_version(&self, post_id: i64, version: i64) -> Result<VersionContent, PostError> {
        let post = self
            .posts
            .get_by_id(post_id)
            .await
            .map_err(PostError::metadata(Phase::Fetch))?
            .ok_or(PostError::NotFound)?;

        if version < 1 || version > post.version {
            return Err(PostError::NotFound);
        }

        let path = if version == post.version {
            if !post.is_materialized() {
                return Err(PostError::NotFound);
            }
            post.content_path
        } else {
            match self
                .posts
                .get_history(post_id, version)
                .await
                .map_err(PostError::metadata(Phase::History))?
            {
                Some(entry) => entry.content_path,
                None => {
                    return Err(PostError::InconsistentState {
                        post_id,
                        path: content_path(post.user_id, post_id, version),
                    })
                }
            }
        };

        let content = self.read_referenced(post_id, &path).await?;
        Ok(VersionContent {
            post_id,
            version,
            content_path: path,
            content,
        })
    }

    /// Reclaim blobs nothing references any more. See [`sweep::sweep_orphans`].
    pub async fn sweep(&self, grace: Duration, dry_run: bool) -> Result<SweepReport, PostError> {
        sweep::sweep_orphans(self.posts.as_ref(), self.blobs.as_ref(), grace, dry_run).await
    }
}
