//! Database error types.

/// Database operation errors
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// SQL error from sqlx
    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLite vec initialization error
    #[error("SQLite-vec initialization error: {0}")]
    SqliteVec(String),

    /// JSON column or enum value that cannot be encoded/decoded
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for database operations
pub type DbResult<T> = Result<T, DbError>;
