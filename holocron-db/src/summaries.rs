//! Chapter summaries, character arcs and location dossiers.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::{SqliteConnection, SqlitePool};

use crate::entities::{object_from_json, to_json};
use crate::error::{DbError, DbResult};

/// The kind of summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SummaryType {
    Chapter,
    CharacterArc,
    LocationDossier,
}

impl SummaryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryType::Chapter => "CHAPTER",
            SummaryType::CharacterArc => "CHARACTER_ARC",
            SummaryType::LocationDossier => "LOCATION_DOSSIER",
        }
    }
}

impl std::fmt::Display for SummaryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SummaryType {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CHAPTER" => Ok(SummaryType::Chapter),
            "CHARACTER_ARC" => Ok(SummaryType::CharacterArc),
            "LOCATION_DOSSIER" => Ok(SummaryType::LocationDossier),
            _ => Err(DbError::Serialization(format!("invalid summary type: {s}"))),
        }
    }
}

/// A stored summary row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub id: i64,
    pub summary_type: SummaryType,
    pub entity_id: Option<String>,
    pub book_title: Option<String>,
    pub chapter_title: Option<String>,
    pub chapter_index: Option<i64>,
    pub part: i64,
    pub era: String,
    pub text: String,
    pub metadata: Map<String, Value>,
    pub created_at: String,
    pub updated_at: String,
}

/// Input for [`SummaryRepository::upsert`]. Rewrites replace the text.
#[derive(Debug, Clone)]
pub struct SummaryUpsert {
    pub summary_type: SummaryType,
    pub entity_id: Option<String>,
    pub book_title: Option<String>,
    pub chapter_title: Option<String>,
    pub chapter_index: Option<i64>,
    pub part: i64,
    pub era: String,
    pub text: String,
    pub metadata: Map<String, Value>,
}

impl SummaryUpsert {
    pub fn new(summary_type: SummaryType, era: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            summary_type,
            entity_id: None,
            book_title: None,
            chapter_title: None,
            chapter_index: None,
            part: 0,
            era: era.into(),
            text: text.into(),
            metadata: Map::new(),
        }
    }

    pub fn entity(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn chapter(
        mut self,
        book_title: impl Into<String>,
        chapter_title: Option<String>,
        chapter_index: Option<i64>,
    ) -> Self {
        self.book_title = Some(book_title.into());
        self.chapter_title = chapter_title;
        self.chapter_index = chapter_index;
        self
    }

    pub fn part(mut self, part: i64) -> Self {
        self.part = part;
        self
    }

    pub fn metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Optional filters for [`SummaryRepository::list`]; `None` matches anything.
#[derive(Debug, Clone, Default)]
pub struct SummaryFilter {
    pub summary_type: Option<SummaryType>,
    pub entity_id: Option<String>,
    pub book_title: Option<String>,
    pub era: Option<String>,
}

impl SummaryFilter {
    pub fn of_type(summary_type: SummaryType) -> Self {
        Self {
            summary_type: Some(summary_type),
            ..Self::default()
        }
    }

    pub fn entity(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn book(mut self, book_title: impl Into<String>) -> Self {
        self.book_title = Some(book_title.into());
        self
    }

    pub fn era(mut self, era: impl Into<String>) -> Self {
        self.era = Some(era.into());
        self
    }
}

/// Summary repository for database operations
pub struct SummaryRepository;

impl SummaryRepository {
    pub async fn upsert(conn: &mut SqliteConnection, upsert: &SummaryUpsert) -> DbResult<Summary> {
        let now = Utc::now().to_rfc3339();
        let row = sqlx::query_as::<_, SummaryRow>(&format!(
            "INSERT INTO summaries
             (summary_type, entity_id, book_title, chapter_title, chapter_index, part, era,
              summary_text, metadata_json, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(summary_type, entity_id, book_title, chapter_title, part, era)
             DO UPDATE SET
                summary_text = excluded.summary_text,
                metadata_json = excluded.metadata_json,
                chapter_index = COALESCE(excluded.chapter_index, summaries.chapter_index),
                updated_at = excluded.updated_at
             RETURNING {SUMMARY_COLUMNS}"
        ))
        .bind(upsert.summary_type.as_str())
        .bind(upsert.entity_id.as_deref().unwrap_or(""))
        .bind(upsert.book_title.as_deref().unwrap_or(""))
        .bind(upsert.chapter_title.as_deref().unwrap_or(""))
        .bind(upsert.chapter_index)
        .bind(upsert.part)
        .bind(&upsert.era)
        .bind(&upsert.text)
        .bind(to_json(&upsert.metadata)?)
        .bind(&now)
        .bind(&now)
        .fetch_one(conn)
        .await?;

        Summary::try_from(row)
    }

    /// List summaries in book/chapter order
    pub async fn list(pool: &SqlitePool, filter: &SummaryFilter) -> DbResult<Vec<Summary>> {
        let rows = sqlx::query_as::<_, SummaryRow>(&format!(
            "SELECT {SUMMARY_COLUMNS} FROM summaries
             WHERE (?1 IS NULL OR summary_type = ?1)
               AND (?2 IS NULL OR entity_id = ?2)
               AND (?3 IS NULL OR book_title = ?3)
               AND (?4 IS NULL OR era = ?4)
             ORDER BY book_title ASC, chapter_index ASC, chapter_title ASC, part ASC, id ASC"
        ))
        .bind(filter.summary_type.map(|t| t.as_str()))
        .bind(filter.entity_id.as_deref())
        .bind(filter.book_title.as_deref())
        .bind(filter.era.as_deref())
        .fetch_all(pool)
        .await?;

        rows.into_iter().map(Summary::try_from).collect()
    }
}

const SUMMARY_COLUMNS: &str = "id, summary_type, entity_id, book_title, chapter_title, \
     chapter_index, part, era, summary_text, metadata_json, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct SummaryRow {
    id: i64,
    summary_type: String,
    entity_id: String,
    book_title: String,
    chapter_title: String,
    chapter_index: Option<i64>,
    part: i64,
    era: String,
    summary_text: String,
    metadata_json: String,
    created_at: String,
    updated_at: String,
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

impl TryFrom<SummaryRow> for Summary {
    type Error = DbError;

    fn try_from(row: SummaryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            summary_type: row.summary_type.parse()?,
            metadata: object_from_json(&row.metadata_json, "metadata_json"),
            id: row.id,
            entity_id: non_empty(row.entity_id),
            book_title: non_empty(row.book_title),
            chapter_title: non_empty(row.chapter_title),
            chapter_index: row.chapter_index,
            part: row.part,
            era: row.era,
            text: row.summary_text,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
