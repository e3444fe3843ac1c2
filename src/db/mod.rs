//! Database module for SQLite persistence
//!
//! Holds the durable blob index: the mapping from content hash to backend
//! content identifier survives restarts even though the in-process cache
//! does not.

mod schema;

pub use schema::*;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::error::UploadError;

/// Create a new database connection pool
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, UploadError> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| UploadError::Database(e.to_string()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .map_err(|e| UploadError::Database(e.to_string()))?;

    initialize_schema(&pool).await?;

    Ok(pool)
}
