//! Store error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl DbError {
    /// Whether a retry may succeed. Only transport-level failures qualify;
    /// callers retry create at most once.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DbError::Database(sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut)
        )
    }
}

/// Map an insert error, surfacing unique violations as duplicates.
pub(crate) fn map_insert_err(err: sqlx::Error, what: &str) -> DbError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.is_unique_violation() {
            return DbError::Duplicate(what.to_string());
        }
    }
    DbError::Database(err)
}

pub type DbResult<T> = std::result::Result<T, DbError>;
