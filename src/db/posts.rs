// Post metadata persistence. Every method borrows one pooled connection and
// issues single statements; nothing here spans the blob store.
use async_trait::async_trait;
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use std::collections::HashSet;
use std::time::Duration;

use crate::db::models::{Post, PostFields, PostHistory};
use crate::db::{StoreError, NOW};
use crate::state::DbPool;

const POST_COLUMNS: &str =
    "id, user_id, title, sub_title, image, tags, content_path, version, created_at, updated_at";

const JOINED_POST_COLUMNS: &str = "p.id, p.user_id, p.title, p.sub_title, p.image, p.tags, \
     p.content_path, p.version, p.created_at, p.updated_at";

/// Metadata store for posts and their history.
#[async_trait]
pub trait PostRepository: Send + Sync {
    /// Insert a version-1 post with an empty content path.
    async fn create(&self, user_id: i64, fields: &PostFields) -> Result<Post, StoreError>;

    /// Set the content path of a freshly created post. Returns `None` if the
    /// post is gone or already has content.
    async fn attach_content(
        &self,
        post_id: i64,
        content_path: &str,
    ) -> Result<Option<Post>, StoreError>;

    async fn get_by_id(&self, post_id: i64) -> Result<Option<Post>, StoreError>;

    /// Newest first, ties broken by insertion order.
    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Post>, StoreError>;

    /// Ranked full-text lookup over title and sub-title.
    async fn search(&self, query: &str, limit: i64, offset: i64)
        -> Result<Vec<Post>, StoreError>;

    /// Take the update lease on `post_id` if it is still at `version` and no
    /// live lease exists. Returns the token that identifies this holder.
    async fn claim_update(
        &self,
        post_id: i64,
        version: i64,
        lease: Duration,
    ) -> Result<Option<String>, StoreError>;

    /// Drop the lease if `lease_token` still holds it.
    async fn release_update(&self, post_id: i64, lease_token: &str) -> Result<(), StoreError>;

    /// Archive a superseded version. Archiving the same version twice is a no-op.
    async fn create_history(
        &self,
        post_id: i64,
        version: i64,
        content_path: &str,
    ) -> Result<(), StoreError>;

    /// Compare-and-swap on `expected_version` and `lease_token`: writes the
    /// fields, bumps the version, points at `content_path` and drops the lease.
    /// `None` when the post moved on or the lease passed to another writer.
    async fn commit_update(
        &self,
        post_id: i64,
        expected_version: i64,
        lease_token: &str,
        fields: &PostFields,
        content_path: &str,
    ) -> Result<Option<Post>, StoreError>;

    async fn list_history(&self, post_id: i64) -> Result<Vec<PostHistory>, StoreError>;

    async fn get_history(
        &self,
        post_id: i64,
        version: i64,
    ) -> Result<Option<PostHistory>, StoreError>;

    /// Every blob key referenced by a post or a history row.
    async fn content_paths(&self) -> Result<HashSet<String>, StoreError>;

    /// Ids of posts still without content that were created more than `age` ago.
    async fn unmaterialized_older_than(&self, age: Duration) -> Result<Vec<i64>, StoreError>;
}

pub struct SqlitePostRepository {
    pool: DbPool,
}

impl SqlitePostRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn post_from_row(row: &Row<'_>) -> rusqlite::Result<Post> {
    let tags_json: String = row.get(5)?;
    let tags = serde_json::from_str(&tags_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;

    Ok(Post {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        sub_title: row.get(3)?,
        image: row.get(4)?,
        tags,
        content_path: row.get(6)?,
        version: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn history_from_row(row: &Row<'_>) -> rusqlite::Result<PostHistory> {
    Ok(PostHistory {
        id: row.get(0)?,
        post_id: row.get(1)?,
        version: row.get(2)?,
        content_path: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Turns free text into an FTS5 query: alphanumeric terms, each quoted, all
/// required. Returns `None` when nothing searchable is left.
pub(crate) fn match_expression(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" "))
    }
}

fn sqlite_offset(duration: Duration, sign: char) -> String {
    format!("{}{:.3} seconds", sign, duration.as_secs_f64())
}

#[async_trait]
impl PostRepository for SqlitePostRepository {
    async fn create(&self, user_id: i64, fields: &PostFields) -> Result<Post, StoreError> {
        let conn = self.pool.get()?;
        let tags = serde_json::to_string(&fields.tags)?;

        conn.query_row(
            &format!(
                "INSERT INTO posts (user_id, title, sub_title, image, tags, version, content_path)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1, '')
                 RETURNING {POST_COLUMNS}"
            ),
            params![user_id, fields.title, fields.sub_title, fields.image, tags],
            post_from_row,
        )
        .map_err(|e| StoreError::from_constraint(e, "post owner does not exist"))
    }

    async fn attach_content(
        &self,
        post_id: i64,
        content_path: &str,
    ) -> Result<Option<Post>, StoreError> {
        let conn = self.pool.get()?;

        let post = conn
            .query_row(
                &format!(
                    "UPDATE posts SET content_path = ?2, updated_at = {NOW}
                     WHERE id = ?1 AND content_path = ''
                     RETURNING {POST_COLUMNS}"
                ),
                params![post_id, content_path],
                post_from_row,
            )
            .optional()?;

        Ok(post)
    }

    async fn get_by_id(&self, post_id: i64) -> Result<Option<Post>, StoreError> {
        let conn = self.pool.get()?;

        let post = conn
            .query_row(
                &format!("SELECT {POST_COLUMNS} FROM posts WHERE id = ?1"),
                params![post_id],
                post_from_row,
            )
            .optional()?;

        Ok(post)
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Post>, StoreError> {
        let conn = self.pool.get()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {POST_COLUMNS}
             FROM posts
             ORDER BY created_at DESC, id DESC
             LIMIT ?1 OFFSET ?2"
        ))?;

        let posts = stmt
            .query_map(params![limit, offset], post_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(posts)
    }

    async fn search(
        &self,
        query: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Post>, StoreError> {
        let Some(expression) = match_expression(query) else {
            return Ok(Vec::new());
        };

        let conn = self.pool.get()?;

        // bm25 scores are negative, lower is better; title hits outweigh sub-title hits.
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOINED_POST_COLUMNS}
             FROM posts_fts
             JOIN posts p ON p.id = posts_fts.rowid
             WHERE posts_fts MATCH ?1
             ORDER BY bm25(posts_fts, 10.0, 1.0), p.id DESC
             LIMIT ?2 OFFSET ?3"
        ))?;

        let posts = stmt
            .query_map(params![expression, limit, offset], post_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(posts)
    }

    async fn claim_update(
        &self,
        post_id: i64,
        version: i64,
        lease: Duration,
    ) -> Result<Option<String>, StoreError> {
        let conn = self.pool.get()?;
        let token = hex::encode(rand::random::<[u8; 16]>());

        let rows = conn.execute(
            &format!(
                "UPDATE posts
                 SET update_lease_until = strftime('%Y-%m-%d %H:%M:%f', 'now', ?3),
                     update_lease_token = ?4
                 WHERE id = ?1 AND version = ?2
                   AND (update_lease_until IS NULL OR update_lease_until <= {NOW})"
            ),
            params![post_id, version, sqlite_offset(lease, '+'), token],
        )?;

        Ok((rows == 1).then_some(token))
    }

    async fn release_update(&self, post_id: i64, lease_token: &str) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE posts SET update_lease_until = NULL, update_lease_token = NULL
             WHERE id = ?1 AND update_lease_token = ?2",
            params![post_id, lease_token],
        )?;
        Ok(())
    }

    async fn create_history(
        &self,
        post_id: i64,
        version: i64,
        content_path: &str,
    ) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO post_history (post_id, version, content_path)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (post_id, version) DO NOTHING",
            params![post_id, version, content_path],
        )?;
        Ok(())
    }

    async fn commit_update(
        &self,
        post_id: i64,
        expected_version: i64,
        lease_token: &str,
        fields: &PostFields,
        content_path: &str,
    ) -> Result<Option<Post>, StoreError> {
        let conn = self.pool.get()?;
        let tags = serde_json::to_string(&fields.tags)?;

        let post = conn
            .query_row(
                &format!(
                    "UPDATE posts
                     SET title = ?3, sub_title = ?4, image = ?5, tags = ?6,
                         content_path = ?7, version = version + 1,
                         update_lease_until = NULL, update_lease_token = NULL,
                         updated_at = {NOW}
                     WHERE id = ?1 AND version = ?2 AND update_lease_token = ?8
                     RETURNING {POST_COLUMNS}"
                ),
                params![
                    post_id,
                    expected_version,
                    fields.title,
                    fields.sub_title,
                    fields.image,
                    tags,
                    content_path,
                    lease_token,
                ],
                post_from_row,
            )
            .optional()?;

        Ok(post)
    }

    async fn list_history(&self, post_id: i64) -> Result<Vec<PostHistory>, StoreError> {
        let conn = self.pool.get()?;

        let mut stmt = conn.prepare(
            "SELECT id, post_id, version, content_path, created_at
             FROM post_history
             WHERE post_id = ?1
             ORDER BY version ASC",
        )?;

        let history = stmt
            .query_map(params![post_id], history_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(history)
    }

    async fn get_history(
        &self,
        post_id: i64,
        version: i64,
    ) -> Result<Option<PostHistory>, StoreError> {
        let conn = self.pool.get()?;

        let entry = conn
            .query_row(
                "SELECT id, post_id, version, content_path, created_at
                 FROM post_history
                 WHERE post_id = ?1 AND version = ?2",
                params![post_id, version],
                history_from_row,
            )
            .optional()?;

        Ok(entry)
    }

    async fn content_paths(&self) -> Result<HashSet<String>, StoreError> {
        let conn = self.pool.get()?;

        let mut stmt = conn.prepare(
            "SELECT content_path FROM posts WHERE content_path != ''
             UNION
             SELECT content_path FROM post_history",
        )?;

        let paths = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()?;

        Ok(paths)
    }

    async fn unmaterialized_older_than(&self, age: Duration) -> Result<Vec<i64>, StoreError> {
        let conn = self.pool.get()?;

        let mut stmt = conn.prepare(
            "SELECT id FROM posts
             WHERE content_path = ''
               AND created_at < strftime('%Y-%m-%d %H:%M:%f', 'now', ?1)
             ORDER BY id",
        )?;

        let ids = stmt
            .query_map(params![sqlite_offset(age, '-')], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;

        Ok(ids)
    }
}
