//! Blob keys for post content: `user_<userId>/post_<postId>_v<version>.md`.
//!
//! Every version gets its own key, so archived versions stay readable after
//! an update.

pub const CONTENT_EXTENSION: &str = "md";

pub fn content_path(user_id: i64, post_id: i64, version: i64) -> String {
    format!(
        "user_{}/post_{}_v{}.{}",
        user_id, post_id, version, CONTENT_EXTENSION
    )
}

/// Inverse of [`content_path`]: `(user_id, post_id, version)`.
pub fn parse_content_path(path: &str) -> Option<(i64, i64, i64)> {
    let (user_dir, file) = path.split_once('/')?;
    let user_id = user_dir.strip_prefix("user_")?.parse().ok()?;

    let stem = file
        .strip_prefix("post_")?
        .strip_suffix(CONTENT_EXTENSION)?
        .strip_suffix('.')?;
    let (post_id, version) = stem.split_once("_v")?;

    Some((user_id, post_id.parse().ok()?, version.parse().ok()?))
}
