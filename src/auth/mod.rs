mod password;
pub mod session;

use std::sync::Arc;
use thiserror::Error;

use crate::db::models::{NewUser, Session, User};
use crate::db::{StoreError, UserRepository};

pub use self::session::{bearer_token, generate_token};

const MAX_USERNAME_CHARS: usize = 50;
const MIN_PASSWORD_CHARS: usize = 8;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Email already registered")]
    EmailTaken,

    #[error("User not found")]
    NotFound,

    #[error("Password hashing failed: {0}")]
    Hash(String),

    #[error("Metadata store failed: {0}")]
    Metadata(#[from] StoreError),
}

/// Accounts, password checks and bearer sessions.
pub struct UserService {
    users: Arc<dyn UserRepository>,
    token_hours: u64,
    bcrypt_cost: u32,
    /// Hashed once at `bcrypt_cost` so unknown-email logins cost the same as real ones.
    dummy_hash: Option<String>,
}

impl UserService {
    pub fn new(users: Arc<dyn UserRepository>, token_hours: u64, bcrypt_cost: u32) -> Self {
        let dummy_hash = password::dummy_hash(bcrypt_cost);
        if dummy_hash.is_none() {
            tracing::warn!(bcrypt_cost, "Invalid bcrypt cost; password hashing will fail");
        }
        Self {
            users,
            token_hours,
            bcrypt_cost,
            dummy_hash,
        }
    }

    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<User, AuthError> {
        let username = username.trim();
        if username.is_empty() || username.chars().count() > MAX_USERNAME_CHARS {
            return Err(AuthError::Validation(format!(
                "username must be 1 to {MAX_USERNAME_CHARS} characters"
            )));
        }

        let email = normalize_email(email)
            .ok_or_else(|| AuthError::Validation("email address is invalid".into()))?;

        if password.chars().count() < MIN_PASSWORD_CHARS {
            return Err(AuthError::Validation(format!(
                "password must be at least {MIN_PASSWORD_CHARS} characters"
            )));
        }

        let password_hash = password::hash_password(password.to_string(), self.bcrypt_cost).await?;

        let user = self
            .users
            .create(&NewUser {
                username: username.to_string(),
                email,
                password_hash,
            })
            .await
            .map_err(|e| match e {
                StoreError::Conflict(_) => AuthError::EmailTaken,
                other => AuthError::Metadata(other),
            })?;

        tracing::info!(user_id = user.id, "Registered user");
        Ok(user)
    }

    /// Unknown email and wrong password fail identically.
    pub async fn login(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let user = match normalize_email(email) {
            Some(email) => self.users.get_by_email(&email).await?,
            None => None,
        };

        let Some(user) = user else {
            password::verify_dummy(password.to_string(), self.dummy_hash.as_deref()).await;
            return Err(AuthError::InvalidCredentials);
        };

        if !password::verify_password(password.to_string(), user.password_hash.clone()).await? {
            tracing::warn!(user_id = user.id, "Failed login");
            return Err(AuthError::InvalidCredentials);
        }

        let token = generate_token();
        let session = self
            .users
            .create_session(user.id, &token, self.token_hours)
            .await?;

        tracing::info!(user_id = user.id, "User logged in");
        Ok(session)
    }

    /// Owner of a live session token.
    pub async fn authenticate(&self, token: &str) -> Result<Option<i64>, AuthError> {
        Ok(self.users.session_user(token).await?)
    }

    pub async fn get_by_id(&self, user_id: i64) -> Result<User, AuthError> {
        self.users
            .get_by_id(user_id)
            .await?
            .ok_or(AuthError::NotFound)
    }
}

fn normalize_email(email: &str) -> Option<String> {
    let email = email.trim().to_lowercase();
    let (local, domain) = email.split_once('@')?;
    let plausible = !local.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace);
    plausible.then_some(email)
}
