use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::auth::AuthError;
use crate::posts::PostError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found")]
    NotFound,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Post(#[from] PostError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

const INTERNAL: &str = "Internal server error";

impl AppError {
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            AppError::NotFound => (StatusCode::NOT_FOUND, "Not found".to_string()),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Post(e) => match e {
                PostError::NotFound => (StatusCode::NOT_FOUND, e.to_string()),
                PostError::PermissionDenied => (StatusCode::FORBIDDEN, e.to_string()),
                PostError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
                PostError::Conflict { .. } => (StatusCode::CONFLICT, e.to_string()),
                PostError::Storage { .. }
                | PostError::Metadata { .. }
                | PostError::InconsistentState { .. } => {
                    tracing::error!(error = %e, phase = ?e.phase(), "Post operation failed");
                    (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL.to_string())
                }
            },
            AppError::Auth(e) => match e {
                AuthError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
                AuthError::InvalidCredentials => (StatusCode::UNAUTHORIZED, e.to_string()),
                AuthError::EmailTaken => (StatusCode::CONFLICT, e.to_string()),
                AuthError::NotFound => (StatusCode::NOT_FOUND, e.to_string()),
                AuthError::Hash(_) | AuthError::Metadata(_) => {
                    tracing::error!(error = %e, "Auth operation failed");
                    (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL.to_string())
                }
            },
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error) = self.status_and_message();
        (status, Json(ErrorBody { error })).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::StoreError;
    use crate::posts::Phase;
    use crate::storage::BlobError;

    fn response_status(err: impl Into<AppError>) -> StatusCode {
        err.into().into_response().status()
    }

    #[test]
    fn plain_variants_map_to_their_status() {
        assert_eq!(response_status(AppError::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(response_status(AppError::Unauthorized), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response_status(AppError::BadRequest("oops".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            response_status(AppError::Internal("boom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn post_errors_map_by_kind() {
        assert_eq!(response_status(PostError::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(response_status(PostError::PermissionDenied), StatusCode::FORBIDDEN);
        assert_eq!(
            response_status(PostError::Validation("title".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            response_status(PostError::Conflict { post_id: 1 }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            response_status(PostError::InconsistentState {
                post_id: 1,
                path: "user_1/post_1_v1.md".into()
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            response_status(PostError::storage(Phase::SaveContent)(BlobError::TimedOut(
                std::time::Duration::from_secs(1)
            ))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn auth_errors_map_by_kind() {
        assert_eq!(
            response_status(AuthError::InvalidCredentials),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(response_status(AuthError::EmailTaken), StatusCode::CONFLICT);
        assert_eq!(
            response_status(AuthError::Metadata(StoreError::Conflict("x".into()))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn internal_details_stay_out_of_the_body() {
        let (_, message) = AppError::from(PostError::InconsistentState {
            post_id: 9,
            path: "user_1/post_9_v2.md".into(),
        })
        .status_and_message();
        assert_eq!(message, INTERNAL);
    }
}
