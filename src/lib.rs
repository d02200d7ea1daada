use sqlx::SqlitePool;

pub mod db;
pub mod errors;
pub mod models;
pub mod routes;
pub mod utils;

/// Per-request context injected with `web::Data`; holds the only shared
/// resource (the connection pool) instead of any process-wide singleton.
#[derive(Debug, Clone)]
pub struct AppState {
    pub db_pool: SqlitePool,
}
