use holocron_core::AliasError;
use holocron_db::DbError;

use crate::llm::LlmError;

#[derive(Debug, thiserror::Error)]
pub enum KnowledgeError {
    #[error("database error: {0}")]
    Db(#[from] DbError),
    #[error("sqlite error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("llm error: {0}")]
    Llm(#[from] LlmError),
    #[error("alias table error: {0}")]
    Alias(#[from] AliasError),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("chunk source: {0}")]
    ChunkSource(String),
}

impl KnowledgeError {
    /// Short variant name for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            KnowledgeError::Db(_) | KnowledgeError::Sqlx(_) => "database",
            KnowledgeError::Io(_) => "io",
            KnowledgeError::Llm(_) => "llm",
            KnowledgeError::Alias(_) => "alias",
            KnowledgeError::InvalidInput(_) => "invalid_input",
            KnowledgeError::ChunkSource(_) => "chunk_source",
        }
    }
}

pub type KnowledgeResult<T> = Result<T, KnowledgeError>;
