//! Database error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl DbError {
    /// Map a unique-constraint violation onto [`DbError::Duplicate`].
    pub(crate) fn from_insert(err: sqlx::Error, what: impl Into<String>) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => DbError::Duplicate(what.into()),
            _ => DbError::Database(err),
        }
    }
}

pub type DbResult<T> = std::result::Result<T, DbError>;
