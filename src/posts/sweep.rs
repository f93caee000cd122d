//! Reclaims content blobs left behind by interrupted writes.
//!
//! A blob is removed only when all of these hold:
//! - its key parses as a post content key,
//! - no post row and no history row references it,
//! - it is older than the grace period, which keeps in-flight writes safe.
//!
//! Posts whose first content write never landed are reported, not deleted.

use chrono::Utc;
use std::time::Duration;

use super::{parse_content_path, Phase, PostError};
use crate::db::PostRepository;
use crate::storage::BlobStore;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub dry_run: bool,
    pub scanned: usize,
    /// Unreferenced blobs removed, or that would be removed in a dry run.
    pub deleted: Vec<String>,
    pub skipped_recent: usize,
    pub failed: Vec<String>,
    /// Posts that still have no content after the grace period.
    pub unmaterialized: Vec<i64>,
}

pub async fn sweep_orphans(
    posts: &dyn PostRepository,
    blobs: &dyn BlobStore,
    grace: Duration,
    dry_run: bool,
) -> Result<SweepReport, PostError> {
    // List before loading references: a key committed in between is then
    // seen as referenced rather than orphaned.
    let listed = blobs
        .list()
        .await
        .map_err(PostError::storage(Phase::Sweep))?;

    let referenced = posts
        .content_paths()
        .await
        .map_err(PostError::metadata(Phase::Sweep))?;

    let cutoff = chrono::Duration::from_std(grace)
        .ok()
        .and_then(|g| Utc::now().checked_sub_signed(g));

    let mut report = SweepReport {
        dry_run,
        scanned: listed.len(),
        ..Default::default()
    };

    for blob in listed {
        if parse_content_path(&blob.path).is_none() || referenced.contains(&blob.path) {
            continue;
        }

        if !cutoff.is_some_and(|cutoff| blob.last_modified <= cutoff) {
            report.skipped_recent += 1;
            continue;
        }

        if dry_run {
            tracing::info!(path = %blob.path, size = blob.size, "Would delete orphaned blob");
            report.deleted.push(blob.path);
            continue;
        }

        match blobs.delete(&blob.path).await {
            Ok(()) => {
                tracing::info!(path = %blob.path, size = blob.size, "Deleted orphaned blob");
                report.deleted.push(blob.path);
            }
            Err(e) => {
                tracing::warn!(path = %blob.path, error = %e, "Failed to delete orphaned blob");
                report.failed.push(blob.path);
            }
        }
    }

    report.unmaterialized = posts
        .unmaterialized_older_than(grace)
        .await
        .map_err(PostError::metadata(Phase::Sweep))?;

    for post_id in &report.unmaterialized {
        tracing::warn!(post_id, "Post has no content");
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::PostFields;
    use crate::db::test_support::{insert_user, migrated_pool};
    use crate::db::SqlitePostRepository;
    use crate::posts::content_path;
    use crate::storage::LocalBlobStore;
    use bytes::Bytes;

    struct Fixture {
        _tmp: tempfile::TempDir,
        repo: SqlitePostRepository,
        blobs: LocalBlobStore,
        user_id: i64,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let pool = migrated_pool();
        let user_id = insert_user(&pool, "sweeper@example.com");
        Fixture {
            blobs: LocalBlobStore::new(tmp.path().join("blobs")).unwrap(),
            repo: SqlitePostRepository::new(pool),
            user_id,
            _tmp: tmp,
        }
    }

    async fn materialized_post(f: &Fixture, title: &str) -> (i64, String) {
        let fields = PostFields {
            title: title.into(),
            ..Default::default()
        };
        let post = f.repo.create(f.user_id, &fields).await.unwrap();
        let path = content_path(f.user_id, post.id, 1);
        f.blobs.save(&path, Bytes::from_static(b"body")).await.unwrap();
        f.repo.attach_content(post.id, &path).await.unwrap();
        (post.id, path)
    }

    #[tokio::test]
    async fn deletes_only_unreferenced_content_blobs() {
        let f = fixture();
        let (post_id, live) = materialized_post(&f, "Live").await;

        let orphan = content_path(f.user_id, post_id, 2);
        f.blobs.save(&orphan, Bytes::from_static(b"lost")).await.unwrap();
        f.blobs
            .save("notes/readme.txt", Bytes::from_static(b"not ours"))
            .await
            .unwrap();

        let report = sweep_orphans(&f.repo, &f.blobs, Duration::ZERO, false)
            .await
            .unwrap();

        assert_eq!(report.scanned, 3);
        assert_eq!(report.deleted, vec![orphan.clone()]);
        assert!(report.failed.is_empty());
        assert!(f.blobs.read(&orphan).await.unwrap_err().is_not_found());
        assert!(f.blobs.read(&live).await.is_ok());
        assert!(f.blobs.read("notes/readme.txt").await.is_ok());
    }

    #[tokio::test]
    async fn history_references_are_kept() {
        let f = fixture();
        let (post_id, v1) = materialized_post(&f, "Versioned").await;
        f.repo.create_history(post_id, 1, &v1).await.unwrap();

        let v2 = content_path(f.user_id, post_id, 2);
        f.blobs.save(&v2, Bytes::from_static(b"v2")).await.unwrap();
        let lease = f
            .repo
            .claim_update(post_id, 1, Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        let fields = PostFields {
            title: "Versioned".into(),
            ..Default::default()
        };
        f.repo
            .commit_update(post_id, 1, &lease, &fields, &v2)
            .await
            .unwrap();

        let report = sweep_orphans(&f.repo, &f.blobs, Duration::ZERO, false)
            .await
            .unwrap();
        assert!(report.deleted.is_empty());
        assert!(f.blobs.read(&v1).await.is_ok());
    }

    #[tokio::test]
    async fn dry_run_deletes_nothing() {
        let f = fixture();
        let orphan = content_path(f.user_id, 99, 1);
        f.blobs.save(&orphan, Bytes::from_static(b"x")).await.unwrap();

        let report = sweep_orphans(&f.repo, &f.blobs, Duration::ZERO, true)
            .await
            .unwrap();
        assert!(report.dry_run);
        assert_eq!(report.deleted, vec![orphan.clone()]);
        assert!(f.blobs.read(&orphan).await.is_ok());
    }

    #[tokio::test]
    async fn recent_orphans_are_left_alone() {
        let f = fixture();
        let orphan = content_path(f.user_id, 7, 3);
        f.blobs.save(&orphan, Bytes::from_static(b"x")).await.unwrap();

        let report = sweep_orphans(&f.repo, &f.blobs, Duration::from_secs(3600), false)
            .await
            .unwrap();
        assert!(report.deleted.is_empty());
        assert_eq!(report.skipped_recent, 1);
        assert!(f.blobs.read(&orphan).await.is_ok());
    }

    #[tokio::test]
    async fn unmaterialized_posts_are_reported_not_removed() {
        let f = fixture();
        let fields = PostFields {
            title: "Stuck".into(),
            ..Default::default()
        };
        let post = f.repo.create(f.user_id, &fields).await.unwrap();

        // created_at has millisecond precision; let it fall behind "now".
        tokio::time::sleep(Duration::from_millis(20)).await;

        let report = sweep_orphans(&f.repo, &f.blobs, Duration::ZERO, false)
            .await
            .unwrap();
        assert_eq!(report.unmaterialized, vec![post.id]);
        assert!(f.repo.get_by_id(post.id).await.unwrap().is_some());
    }
}
