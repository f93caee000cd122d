use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub sub_title: Option<String>,
    pub image: Option<String>,
    pub tags: Vec<String>,
    /// Blob key of the current version; empty until the first write lands.
    pub content_path: String,
    pub version: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl Post {
    pub fn is_materialized(&self) -> bool {
        !self.content_path.is_empty()
    }
}

/// An archived, superseded version of a post. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostHistory {
    pub id: i64,
    pub post_id: i64,
    pub version: i64,
    pub content_path: String,
    pub created_at: String,
}

/// Owner-editable post fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostFields {
    pub title: String,
    pub sub_title: Option<String>,
    pub image: Option<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub user_id: i64,
    pub expires_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_serialization_omits_password_hash() {
        let user = User {
            id: 1,
            username: "alice".into(),
            email: "alice@example.com".into(),
            password_hash: "$2b$04$secret".into(),
            created_at: "2025-01-01 00:00:00.000".into(),
            updated_at: "2025-01-01 00:00:00.000".into(),
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("password_hash"));
        assert!(!json.contains("secret"));
    }

    #[test]
    fn empty_content_path_is_not_materialized() {
        let mut post = Post {
            id: 1,
            user_id: 1,
            title: "t".into(),
            sub_title: None,
            image: None,
            tags: vec![],
            content_path: String::new(),
            version: 1,
            created_at: String::new(),
            updated_at: String::new(),
        };
        assert!(!post.is_materialized());
        post.content_path = "user_1/post_1_v1.md".into();
        assert!(post.is_materialized());
    }
}
