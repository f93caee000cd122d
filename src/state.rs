use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::auth::UserService;
use crate::config::Config;
use crate::db::{SqlitePostRepository, SqliteUserRepository};
use crate::posts::PostService;
use crate::storage::BlobStore;

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Config,
    pub posts: Arc<PostService>,
    pub users: Arc<UserService>,
}

impl AppState {
    /// Wire the services over a migrated pool and a blob backend.
    pub fn new(db: DbPool, config: Config, blobs: Arc<dyn BlobStore>) -> Self {
        let posts = PostService::new(
            Arc::new(SqlitePostRepository::new(db.clone())),
            blobs,
            config.storage.timeout(),
        );
        let users = UserService::new(
            Arc::new(SqliteUserRepository::new(db.clone())),
            config.auth.token_hours,
            config.auth.bcrypt_cost,
        );

        Self {
            db,
            config,
            posts: Arc::new(posts),
            users: Arc::new(users),
        }
    }
}
