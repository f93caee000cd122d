pub mod posts;
pub mod users;

use axum::extract::State;
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(users::router())
        .merge(posts::router())
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn not_found() -> AppError {
    AppError::NotFound
}

/// Liveness plus a round trip to the metadata store.
async fn health(State(state): State<AppState>) -> AppResult<&'static str> {
    let conn = state.db.get().map_err(|e| AppError::Internal(e.to_string()))?;
    conn.query_row("SELECT 1", [], |_| Ok(()))
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok("ok")
}
