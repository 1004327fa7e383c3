//! Store error types.

use thiserror::Error;

/// Errors produced by the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Any `SQLite` failure that is not a constraint violation.
    #[error("database error: {0}")]
    Database(String),

    /// A uniqueness or foreign-key constraint rejected the write.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Input failed validation before reaching the database.
    #[error("invalid input: {0}")]
    Invalid(String),

    /// A stored value could not be decoded.
    #[error("corrupt row: {0}")]
    CorruptRow(String),

    /// Filesystem failure while preparing the database file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(ref code, _)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Conflict(e.to_string())
            }
            other => StoreError::Database(other.to_string()),
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
