use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::auth::bearer_token;
use crate::error::AppError;
use crate::state::AppState;

/// The user behind the request's bearer token.
/// Rejects with 401 when the token is missing, unknown or expired.
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser {
    pub id: i64,
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(AppError::Unauthorized)?;

        let id = state
            .users
            .authenticate(token)
            .await?
            .ok_or(AppError::Unauthorized)?;

        Ok(CurrentUser { id })
    }
}
