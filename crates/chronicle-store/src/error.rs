//! Error types for the store module.

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// A referenced record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A record with the same unique key is already present.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Blocking task failed or a lock was poisoned.
    #[error("storage task failed: {0}")]
    Task(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
