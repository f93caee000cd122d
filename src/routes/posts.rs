use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::db::models::{Post, PostHistory};
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;
use crate::posts::{Page, PostInput, DEFAULT_PAGE_SIZE, MAX_CONTENT_BYTES};
use crate::state::AppState;

/// Multipart framing and the text fields ride on top of the content itself.
const UPLOAD_BODY_LIMIT: usize = MAX_CONTENT_BYTES + 64 * 1024;

// --- Requests ---

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "first_page")]
    pub page: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    #[serde(default = "first_page")]
    pub page: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn first_page() -> i64 {
    1
}

fn default_limit() -> i64 {
    DEFAULT_PAGE_SIZE
}

#[derive(Debug, Deserialize)]
pub struct PostRequest {
    pub title: String,
    #[serde(default)]
    pub sub_title: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub content: String,
}

impl From<PostRequest> for PostInput {
    fn from(req: PostRequest) -> Self {
        PostInput {
            title: req.title,
            sub_title: req.sub_title,
            image: req.image,
            tags: req.tags,
            content: Bytes::from(req.content),
        }
    }
}

// --- Responses ---

#[derive(Debug, Serialize, Deserialize)]
pub struct PostResponse {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub sub_title: Option<String>,
    pub image: Option<String>,
    pub tags: Vec<String>,
    pub version: i64,
    pub content_path: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Post> for PostResponse {
    fn from(post: Post) -> Self {
        PostResponse {
            id: post.id,
            user_id: post.user_id,
            title: post.title,
            sub_title: post.sub_title,
            image: post.image,
            tags: post.tags,
            version: post.version,
            content_path: post.content_path,
            created_at: post.created_at,
            updated_at: post.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PostDetailResponse {
    pub post: PostResponse,
    /// `null` while the post's content has not been written yet.
    pub content: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub version: i64,
    pub content_path: String,
    pub archived_at: String,
}

impl From<PostHistory> for HistoryResponse {
    fn from(entry: PostHistory) -> Self {
        HistoryResponse {
            version: entry.version,
            content_path: entry.content_path,
            archived_at: entry.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VersionResponse {
    pub post_id: i64,
    pub version: i64,
    pub content: String,
}

fn text(content: &Bytes) -> String {
    String::from_utf8_lossy(content).into_owned()
}

// --- Router ---

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/posts", get(list_posts).post(create_post))
        .route("/api/posts/search", get(search_posts))
        .route(
            "/api/posts/upload",
            post(upload_post).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route("/api/posts/{id}", get(get_post).put(update_post))
        .route("/api/posts/{id}/history", get(post_history))
        .route("/api/posts/{id}/versions/{version}", get(post_version))
}

// --- Handlers ---

async fn list_posts(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<Vec<PostResponse>>> {
    let posts = state.posts.list(Page::new(query.page, query.limit)).await?;
    Ok(Json(posts.into_iter().map(PostResponse::from).collect()))
}

async fn search_posts(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> AppResult<Json<Vec<PostResponse>>> {
    if query.q.trim().is_empty() {
        return Err(AppError::BadRequest("Query parameter 'q' is required".into()));
    }

    let posts = state
        .posts
        .search(&query.q, Page::new(query.page, query.limit))
        .await?;
    Ok(Json(posts.into_iter().map(PostResponse::from).collect()))
}

async fn get_post(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<PostDetailResponse>> {
    let found = state.posts.get_by_id(id).await?;
    Ok(Json(PostDetailResponse {
        content: found.content.as_ref().map(text),
        post: found.post.into(),
    }))
}

async fn post_history(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Vec<HistoryResponse>>> {
    let history = state.posts.history(id).await?;
    Ok(Json(history.into_iter().map(HistoryResponse::from).collect()))
}

async fn post_version(
    State(state): State<AppState>,
    Path((id, version)): Path<(i64, i64)>,
) -> AppResult<Json<VersionResponse>> {
    let found = state.posts.get_version(id, version).await?;
    Ok(Json(VersionResponse {
        post_id: found.post_id,
        version: found.version,
        content: text(&found.content),
    }))
}

async fn create_post(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<PostRequest>,
) -> AppResult<(StatusCode, Json<PostResponse>)> {
    let post = state.posts.create(user.id, req.into()).await?;
    Ok((StatusCode::CREATED, Json(post.into())))
}

async fn update_post(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<PostRequest>,
) -> AppResult<Json<PostResponse>> {
    let post = state.posts.update(id, user.id, req.into()).await?;
    Ok(Json(post.into()))
}

/// Multipart form: `title`, optional `sub_title`, `image`, comma separated
/// `tags`, and the markdown file in `contentFile`.
async fn upload_post(
    State(state): State<AppState>,
    user: CurrentUser,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<PostResponse>)> {
    let mut input = PostInput::default();
    let mut has_file = false;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "contentFile" => {
                input.content = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(e.body_text()))?;
                has_file = true;
            }
            "title" | "sub_title" | "image" | "tags" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(e.body_text()))?;
                match name.as_str() {
                    "title" => input.title = value,
                    "sub_title" => input.sub_title = Some(value),
                    "image" => input.image = Some(value),
                    _ => input.tags = value.split(',').map(str::to_string).collect(),
                }
            }
            _ => {}
        }
    }

    if !has_file {
        return Err(AppError::BadRequest("contentFile is required".into()));
    }

    let post = state.posts.create(user.id, input).await?;
    Ok((StatusCode::CREATED, Json(post.into())))
}
