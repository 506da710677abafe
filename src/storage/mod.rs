//! Database pool, migrations and the SQLite-backed stores

pub mod db;
pub mod migrations;
pub mod runs;
pub mod users;

use rusqlite::ErrorCode;
use thiserror::Error;

use crate::core::retry::Retryable;

// Re-exports for convenience
pub use db::{create_pool, get_connection, DbConnection, DbPool};
pub use runs::SqliteRunStore;
pub use users::SqliteUserStore;

/// Failure of the audience or run store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Backend unreachable (non-SQLite stores)
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Stored row does not decode into the model
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Record {0} not found")]
    NotFound(i64),
}

impl Retryable for StoreError {
    fn is_retryable(&self) -> bool {
        match self {
            StoreError::Database(rusqlite::Error::SqliteFailure(err, _)) => {
                matches!(err.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
            }
            StoreError::Pool(_) | StoreError::Unavailable(_) => true,
            StoreError::Database(_) | StoreError::Corrupt(_) | StoreError::NotFound(_) => false,
        }
    }
}
