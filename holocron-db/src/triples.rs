//! Predicate-labeled edges with weight accumulation.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::{SqliteConnection, SqlitePool};

use crate::entities::{object_from_json, to_json};
use crate::error::DbResult;

/// A directed relationship between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Triple {
    pub id: i64,
    pub subject_id: String,
    pub predicate: String,
    pub object_id: String,
    pub era: String,
    pub weight: f64,
    pub confidence: f64,
    pub source_book: Option<String>,
    pub source_chunk: Option<String>,
    pub properties: Map<String, Value>,
    pub created_at: String,
    pub updated_at: String,
}

impl Triple {
    /// The endpoint that is not `entity_id` (the object for self-loops).
    pub fn other_end(&self, entity_id: &str) -> &str {
        if self.subject_id == entity_id {
            &self.object_id
        } else {
            &self.subject_id
        }
    }
}

/// Which edges of an entity to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

/// Input for [`TripleRepository::upsert`].
#[derive(Debug, Clone)]
pub struct TripleUpsert {
    pub subject_id: String,
    pub predicate: String,
    pub object_id: String,
    pub era: String,
    pub confidence: f64,
    pub source_book: Option<String>,
    pub source_chunk: Option<String>,
    pub properties: Map<String, Value>,
}

impl TripleUpsert {
    pub fn new(
        subject_id: impl Into<String>,
        predicate: impl Into<String>,
        object_id: impl Into<String>,
        era: impl Into<String>,
    ) -> Self {
        Self {
            subject_id: subject_id.into(),
            predicate: predicate.into(),
            object_id: object_id.into(),
            era: era.into(),
            confidence: 1.0,
            source_book: None,
            source_chunk: None,
            properties: Map::new(),
        }
    }

    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn source_book(mut self, book: impl Into<String>) -> Self {
        self.source_book = Some(book.into());
        self
    }

    pub fn source_chunk(mut self, chunk: impl Into<String>) -> Self {
        self.source_chunk = Some(chunk.into());
        self
    }

    pub fn properties(mut self, properties: Map<String, Value>) -> Self {
        self.properties = properties;
        self
    }
}

/// Triple repository for database operations
pub struct TripleRepository;

impl TripleRepository {
    /// Insert with weight 1.0, or bump the existing row in one statement.
    ///
    /// Endpoints must already exist; the store takes care of stubs.
    pub async fn upsert(conn: &mut SqliteConnection, upsert: &TripleUpsert) -> DbResult<Triple> {
        let now = Utc::now().to_rfc3339();
        let properties = if upsert.properties.is_empty() {
            String::new()
        } else {
            to_json(&upsert.properties)?
        };

        let row = sqlx::query_as::<_, TripleRow>(&format!(
            "INSERT INTO triples
             (subject_id, predicate, object_id, era, weight, confidence, source_book,
              source_chunk, properties_json, created_at, updated_at)
             VALUES (?, ?, ?, ?, 1.0, ?, ?, ?, COALESCE(NULLIF(?, ''), '{{}}'), ?, ?)
             ON CONFLICT(subject_id, predicate, object_id, era) DO UPDATE SET
                weight = triples.weight + 1.0,
                confidence = MAX(triples.confidence, excluded.confidence),
                source_book = excluded.source_book,
                source_chunk = excluded.source_chunk,
                properties_json = CASE
                    WHEN excluded.properties_json = '{{}}' THEN triples.properties_json
                    ELSE excluded.properties_json
                END,
                updated_at = excluded.updated_at
             RETURNING {TRIPLE_COLUMNS}"
        ))
        .bind(&upsert.subject_id)
        .bind(&upsert.predicate)
        .bind(&upsert.object_id)
        .bind(&upsert.era)
        .bind(upsert.confidence.clamp(0.0, 1.0))
        .bind(&upsert.source_book)
        .bind(&upsert.source_chunk)
        .bind(properties)
        .bind(&now)
        .bind(&now)
        .fetch_one(conn)
        .await?;

        Ok(Triple::from(row))
    }

    /// Edges touching an entity, heaviest first
    pub async fn for_entity(
        pool: &SqlitePool,
        entity_id: &str,
        direction: Direction,
        era: Option<&str>,
    ) -> DbResult<Vec<Triple>> {
        let endpoint_clause = match direction {
            Direction::Outgoing => "subject_id = ?1",
            Direction::Incoming => "object_id = ?1",
            Direction::Both => "(subject_id = ?1 OR object_id = ?1)",
        };
        let rows = sqlx::query_as::<_, TripleRow>(&format!(
            "SELECT {TRIPLE_COLUMNS} FROM triples
             WHERE {endpoint_clause}
               AND (?2 IS NULL OR era = ?2)
             ORDER BY weight DESC, confidence DESC, id ASC"
        ))
        .bind(entity_id)
        .bind(era)
        .fetch_all(pool)
        .await?;

        Ok(rows.into_iter().map(Triple::from).collect())
    }

    /// All edges with one predicate, heaviest first
    pub async fn by_predicate(
        pool: &SqlitePool,
        predicate: &str,
        era: Option<&str>,
    ) -> DbResult<Vec<Triple>> {
        let rows = sqlx::query_as::<_, TripleRow>(&format!(
            "SELECT {TRIPLE_COLUMNS} FROM triples
             WHERE predicate = ?1
               AND (?2 IS NULL OR era = ?2)
             ORDER BY weight DESC, confidence DESC, id ASC"
        ))
        .bind(predicate)
        .bind(era)
        .fetch_all(pool)
        .await?;

        Ok(rows.into_iter().map(Triple::from).collect())
    }

    /// Look up a single edge by its unique key
    pub async fn get(
        pool: &SqlitePool,
        subject_id: &str,
        predicate: &str,
        object_id: &str,
        era: &str,
    ) -> DbResult<Option<Triple>> {
        let row = sqlx::query_as::<_, TripleRow>(&format!(
            "SELECT {TRIPLE_COLUMNS} FROM triples
             WHERE subject_id = ? AND predicate = ? AND object_id = ? AND era = ?"
        ))
        .bind(subject_id)
        .bind(predicate)
        .bind(object_id)
        .bind(era)
        .fetch_optional(pool)
        .await?;

        Ok(row.map(Triple::from))
    }

    pub async fn count(pool: &SqlitePool, era: Option<&str>) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM triples WHERE (?1 IS NULL OR era = ?1)")
            .bind(era)
            .fetch_one(pool)
            .await?;
        Ok(count)
    }
}

const TRIPLE_COLUMNS: &str = "id, subject_id, predicate, object_id, era, weight, confidence, \
     source_book, source_chunk, properties_json, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct TripleRow {
    id: i64,
    subject_id: String,
    predicate: String,
    object_id: String,
    era: String,
    weight: f64,
    confidence: f64,
    source_book: Option<String>,
    source_chunk: Option<String>,
    properties_json: String,
    created_at: String,
    updated_at: String,
}

impl From<TripleRow> for Triple {
    fn from(row: TripleRow) -> Self {
        Self {
            properties: object_from_json(&row.properties_json, "properties_json"),
            id: row.id,
            subject_id: row.subject_id,
            predicate: row.predicate,
            object_id: row.object_id,
            era: row.era,
            weight: row.weight,
            confidence: row.confidence,
            source_book: row.source_book,
            source_chunk: row.source_chunk,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
