use async_trait::async_trait;
use rusqlite::{params, OptionalExtension, Row};

use crate::db::models::{NewUser, Session, User};
use crate::db::{StoreError, NOW};
use crate::state::DbPool;

const USER_COLUMNS: &str = "id, username, email, password_hash, created_at, updated_at";

/// Persistence for accounts and their login sessions.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Fails with `StoreError::Conflict` when the email is taken.
    async fn create(&self, user: &NewUser) -> Result<User, StoreError>;

    async fn get_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn get_by_id(&self, user_id: i64) -> Result<Option<User>, StoreError>;

    async fn create_session(
        &self,
        user_id: i64,
        token: &str,
        ttl_hours: u64,
    ) -> Result<Session, StoreError>;

    /// Owner of an unexpired session.
    async fn session_user(&self, token: &str) -> Result<Option<i64>, StoreError>;
}

pub struct SqliteUserRepository {
    pool: DbPool,
}

impl SqliteUserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

#[async_trait]
impl UserRepository for SqliteUserRepository {
    async fn create(&self, user: &NewUser) -> Result<User, StoreError> {
        let conn = self.pool.get()?;

        conn.query_row(
            &format!(
                "INSERT INTO users (username, email, password_hash)
                 VALUES (?1, ?2, ?3)
                 RETURNING {USER_COLUMNS}"
            ),
            params![user.username, user.email, user.password_hash],
            user_from_row,
        )
        .map_err(|e| StoreError::from_constraint(e, "email already registered"))
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let conn = self.pool.get()?;

        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                params![email],
                user_from_row,
            )
            .optional()?;

        Ok(user)
    }

    async fn get_by_id(&self, user_id: i64) -> Result<Option<User>, StoreError> {
        let conn = self.pool.get()?;

        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![user_id],
                user_from_row,
            )
            .optional()?;

        Ok(user)
    }

    async fn create_session(
        &self,
        user_id: i64,
        token: &str,
        ttl_hours: u64,
    ) -> Result<Session, StoreError> {
        let conn = self.pool.get()?;

        let expires_at: String = conn.query_row(
            "INSERT INTO sessions (user_id, token, expires_at)
             VALUES (?1, ?2, strftime('%Y-%m-%d %H:%M:%f', 'now', ?3))
             RETURNING expires_at",
            params![user_id, token, format!("+{} hours", ttl_hours)],
            |row| row.get(0),
        )?;

        Ok(Session {
            token: token.to_string(),
            user_id,
            expires_at,
        })
    }

    async fn session_user(&self, token: &str) -> Result<Option<i64>, StoreError> {
        let conn = self.pool.get()?;

        let user_id = conn
            .query_row(
                &format!("SELECT user_id FROM sessions WHERE token = ?1 AND expires_at > {NOW}"),
                params![token],
                |row| row.get(0),
            )
            .optional()?;

        Ok(user_id)
    }
}
