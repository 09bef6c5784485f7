//! Database error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("migration error: {0}")]
    Migration(String),

    #[error("query error: {0}")]
    Query(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid stored row: {0}")]
    Corrupt(String),
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

impl From<DbError> for settld_store::StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Query(sqlx::Error::RowNotFound) => settld_store::StoreError::NotFound("row not found".into()),
            other => settld_store::StoreError::Backend(other.to_string()),
        }
    }
}
