//! Per-unit progress records that make long extraction runs resumable.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};

use crate::error::{DbError, DbResult};

/// Progress of one (book, chapter, phase) unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl CheckpointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointStatus::Pending => "pending",
            CheckpointStatus::InProgress => "in_progress",
            CheckpointStatus::Completed => "completed",
            CheckpointStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CheckpointStatus {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CheckpointStatus::Pending),
            "in_progress" => Ok(CheckpointStatus::InProgress),
            "completed" => Ok(CheckpointStatus::Completed),
            "failed" => Ok(CheckpointStatus::Failed),
            _ => Err(DbError::Serialization(format!(
                "invalid checkpoint status: {s}"
            ))),
        }
    }
}

/// A stored checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub book_title: String,
    pub chapter_title: Option<String>,
    pub phase: String,
    pub status: CheckpointStatus,
    pub chunk_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Key plus new state for [`CheckpointRepository::set`].
#[derive(Debug, Clone)]
pub struct CheckpointUpdate {
    pub book_title: String,
    pub chapter_title: Option<String>,
    pub phase: String,
    pub status: CheckpointStatus,
    pub chunk_id: Option<String>,
    pub error_message: Option<String>,
}

impl CheckpointUpdate {
    pub fn new(
        book_title: impl Into<String>,
        chapter_title: Option<&str>,
        phase: impl Into<String>,
        status: CheckpointStatus,
    ) -> Self {
        Self {
            book_title: book_title.into(),
            chapter_title: chapter_title.map(str::to_string),
            phase: phase.into(),
            status,
            chunk_id: None,
            error_message: None,
        }
    }

    pub fn chunk_id(mut self, chunk_id: impl Into<String>) -> Self {
        self.chunk_id = Some(chunk_id.into());
        self
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

/// Checkpoint repository for database operations
pub struct CheckpointRepository;

impl CheckpointRepository {
    /// Insert or overwrite the state of one unit.
    pub async fn set(conn: &mut SqliteConnection, update: &CheckpointUpdate) -> DbResult<Checkpoint> {
        let now = Utc::now().to_rfc3339();
        let row = sqlx::query_as::<_, CheckpointRow>(&format!(
            "INSERT INTO checkpoints
             (book_title, chapter_title, phase, status, chunk_id, error_message, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(book_title, chapter_title, phase) DO UPDATE SET
                status = excluded.status,
                chunk_id = excluded.chunk_id,
                error_message = excluded.error_message,
                updated_at = excluded.updated_at
             RETURNING {CHECKPOINT_COLUMNS}"
        ))
        .bind(&update.book_title)
        .bind(update.chapter_title.as_deref().unwrap_or(""))
        .bind(&update.phase)
        .bind(update.status.as_str())
        .bind(&update.chunk_id)
        .bind(&update.error_message)
        .bind(&now)
        .bind(&now)
        .fetch_one(conn)
        .await?;

        Checkpoint::try_from(row)
    }

    pub async fn get(
        pool: &SqlitePool,
        book_title: &str,
        chapter_title: Option<&str>,
        phase: &str,
    ) -> DbResult<Option<Checkpoint>> {
        let row = sqlx::query_as::<_, CheckpointRow>(&format!(
            "SELECT {CHECKPOINT_COLUMNS} FROM checkpoints
             WHERE book_title = ? AND chapter_title = ? AND phase = ?"
        ))
        .bind(book_title)
        .bind(chapter_title.unwrap_or(""))
        .bind(phase)
        .fetch_optional(pool)
        .await?;

        row.map(Checkpoint::try_from).transpose()
    }

    /// Checkpoints of one phase, optionally narrowed to a status
    pub async fn list(
        pool: &SqlitePool,
        phase: &str,
        status: Option<CheckpointStatus>,
    ) -> DbResult<Vec<Checkpoint>> {
        let rows = sqlx::query_as::<_, CheckpointRow>(&format!(
            "SELECT {CHECKPOINT_COLUMNS} FROM checkpoints
             WHERE phase = ?1 AND (?2 IS NULL OR status = ?2)
             ORDER BY id ASC"
        ))
        .bind(phase)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(pool)
        .await?;

        rows.into_iter().map(Checkpoint::try_from).collect()
    }
}

const CHECKPOINT_COLUMNS: &str =
    "book_title, chapter_title, phase, status, chunk_id, error_message, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct CheckpointRow {
    book_title: String,
    chapter_title: String,
    phase: String,
    status: String,
    chunk_id: Option<String>,
    error_message: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<CheckpointRow> for Checkpoint {
    type Error = DbError;

    fn try_from(row: CheckpointRow) -> Result<Self, Self::Error> {
        Ok(Self {
            status: row.status.parse()?,
            book_title: row.book_title,
            chapter_title: (!row.chapter_title.is_empty()).then_some(row.chapter_title),
            phase: row.phase,
            chunk_id: row.chunk_id,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
