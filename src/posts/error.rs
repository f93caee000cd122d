use std::fmt;
use thiserror::Error;

use crate::db::StoreError;
use crate::storage::BlobError;

/// The step of a post operation that was running when a store call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Insert,
    SaveContent,
    AttachContent,
    Fetch,
    Claim,
    Archive,
    Commit,
    ReadContent,
    List,
    Search,
    History,
    Sweep,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Insert => "insert",
            Phase::SaveContent => "save content",
            Phase::AttachContent => "attach content",
            Phase::Fetch => "fetch",
            Phase::Claim => "claim update",
            Phase::Archive => "archive history",
            Phase::Commit => "commit update",
            Phase::ReadContent => "read content",
            Phase::List => "list",
            Phase::Search => "search",
            Phase::History => "history",
            Phase::Sweep => "sweep",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum PostError {
    #[error("Post not found")]
    NotFound,

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Blob storage failed during {phase}: {source}")]
    Storage {
        phase: Phase,
        #[source]
        source: BlobError,
    },

    #[error("Metadata store failed during {phase}: {source}")]
    Metadata {
        phase: Phase,
        #[source]
        source: StoreError,
    },

    /// The row exists but the blob it points at does not.
    #[error("Content for post {post_id} is missing at {path}")]
    InconsistentState { post_id: i64, path: String },

    #[error("Post {post_id} is being modified concurrently")]
    Conflict { post_id: i64 },
}

impl PostError {
    pub(crate) fn storage(phase: Phase) -> impl FnOnce(BlobError) -> PostError {
        move |source| PostError::Storage { phase, source }
    }

    pub(crate) fn metadata(phase: Phase) -> impl FnOnce(StoreError) -> PostError {
        move |source| PostError::Metadata { phase, source }
    }

    pub fn phase(&self) -> Option<Phase> {
        match self {
            PostError::Storage { phase, .. } | PostError::Metadata { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_name_their_phase() {
        let err = PostError::storage(Phase::SaveContent)(BlobError::NotFound("k".into()));
        assert_eq!(err.phase(), Some(Phase::SaveContent));
        assert!(err.to_string().contains("save content"));
    }

    #[test]
    fn inconsistent_state_is_not_not_found() {
        let err = PostError::InconsistentState {
            post_id: 3,
            path: "user_1/post_3_v1.md".into(),
        };
        assert!(!matches!(err, PostError::NotFound));
        assert!(err.to_string().contains("user_1/post_3_v1.md"));
    }
}
