//! Entity rows and their merge-on-upsert semantics.

use chrono::Utc;
use holocron_core::resolver::merge_properties;
use holocron_core::vocabulary::EntityType;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::warn;

use crate::error::{DbError, DbResult};

/// A graph node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    /// Raw stored type; see [`Entity::kind`].
    pub entity_type: String,
    pub canonical_name: String,
    pub era: String,
    pub properties: Map<String, Value>,
    pub source_books: Vec<String>,
    pub confidence: f64,
    pub is_stub: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl Entity {
    /// Parsed type, `None` for values outside the vocabulary.
    pub fn kind(&self) -> Option<EntityType> {
        self.entity_type.parse().ok()
    }

    /// A property rendered as text: strings as-is, lists joined by ", ".
    pub fn property_text(&self, key: &str) -> Option<String> {
        let text = match self.properties.get(key)? {
            Value::String(s) => s.trim().to_string(),
            Value::Array(items) => items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.trim().to_string()),
                    Value::Null => None,
                    other => Some(other.to_string()),
                })
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(", "),
            Value::Null => String::new(),
            other => other.to_string(),
        };
        (!text.is_empty()).then_some(text)
    }

    /// A list property as strings; a scalar string becomes a one-element list.
    pub fn property_list(&self, key: &str) -> Vec<String> {
        match self.properties.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| item.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
            _ => Vec::new(),
        }
    }
}

/// Input for [`EntityRepository::upsert`].
#[derive(Debug, Clone)]
pub struct EntityUpsert {
    pub id: String,
    pub entity_type: String,
    pub name: String,
    pub era: String,
    pub properties: Map<String, Value>,
    pub source_book: Option<String>,
    pub confidence: f64,
    pub is_stub: bool,
}

impl EntityUpsert {
    pub fn new(
        id: impl Into<String>,
        entity_type: impl Into<String>,
        name: impl Into<String>,
        era: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            entity_type: entity_type.into(),
            name: name.into(),
            era: era.into(),
            properties: Map::new(),
            source_book: None,
            confidence: 1.0,
            is_stub: false,
        }
    }

    pub fn properties(mut self, properties: Map<String, Value>) -> Self {
        self.properties = properties;
        self
    }

    pub fn source_book(mut self, book: impl Into<String>) -> Self {
        let book = book.into();
        self.source_book = (!book.trim().is_empty()).then_some(book);
        self
    }

    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    /// Mark as an auto-created placeholder.
    pub fn stub(mut self) -> Self {
        self.is_stub = true;
        self
    }
}

/// Entity repository for database operations
pub struct EntityRepository;

impl EntityRepository {
    /// Insert or merge an entity. Runs on a caller-provided connection so the
    /// read and the write happen inside one transaction.
    pub async fn upsert(conn: &mut SqliteConnection, upsert: &EntityUpsert) -> DbResult<Entity> {
        if upsert.entity_type.parse::<EntityType>().is_err() {
            warn!(
                entity = %upsert.id,
                entity_type = %upsert.entity_type,
                "persisting entity with type outside the vocabulary"
            );
        }

        let now = Utc::now().to_rfc3339();
        let confidence = upsert.confidence.clamp(0.0, 1.0);
        let existing = sqlx::query_as::<_, EntityRow>(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entities WHERE id = ?"
        ))
        .bind(&upsert.id)
        .fetch_optional(&mut *conn)
        .await?;

        let Some(row) = existing else {
            let source_books: Vec<&str> = upsert.source_book.iter().map(String::as_str).collect();
            sqlx::query(
                "INSERT INTO entities
                 (id, entity_type, canonical_name, era, properties_json, source_books_json,
                  confidence, is_stub, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&upsert.id)
            .bind(&upsert.entity_type)
            .bind(&upsert.name)
            .bind(&upsert.era)
            .bind(to_json(&upsert.properties)?)
            .bind(to_json(&source_books)?)
            .bind(confidence)
            .bind(upsert.is_stub)
            .bind(&now)
            .bind(&now)
            .execute(&mut *conn)
            .await?;

            return Self::get_on(conn, &upsert.id)
                .await?
                .ok_or_else(|| DbError::Serialization(format!("entity {} vanished", upsert.id)));
        };

        let mut entity = Entity::from(row);
        merge_properties(&mut entity.properties, &upsert.properties);
        if let Some(book) = &upsert.source_book
            && !entity.source_books.contains(book)
        {
            entity.source_books.push(book.clone());
        }
        entity.confidence = entity.confidence.max(confidence);
        if entity.is_stub && !upsert.is_stub {
            entity.entity_type = upsert.entity_type.clone();
            entity.canonical_name = upsert.name.clone();
            entity.is_stub = false;
        }
        if entity.era.is_empty() {
            entity.era = upsert.era.clone();
        }

        sqlx::query(
            "UPDATE entities
             SET entity_type = ?, canonical_name = ?, era = ?, properties_json = ?,
                 source_books_json = ?, confidence = ?, is_stub = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&entity.entity_type)
        .bind(&entity.canonical_name)
        .bind(&entity.era)
        .bind(to_json(&entity.properties)?)
        .bind(to_json(&entity.source_books)?)
        .bind(entity.confidence)
        .bind(entity.is_stub)
        .bind(&now)
        .bind(&entity.id)
        .execute(&mut *conn)
        .await?;

        entity.updated_at = now;
        Ok(entity)
    }

    /// Get entity by ID
    pub async fn get(pool: &SqlitePool, id: &str) -> DbResult<Option<Entity>> {
        let mut conn = pool.acquire().await?;
        Self::get_on(&mut conn, id).await
    }

    pub(crate) async fn get_on(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Entity>> {
        let row = sqlx::query_as::<_, EntityRow>(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entities WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(conn)
        .await?;

        Ok(row.map(Entity::from))
    }

    /// Case-insensitive lookup by canonical name
    pub async fn find_by_name(
        pool: &SqlitePool,
        name: &str,
        era: Option<&str>,
    ) -> DbResult<Vec<Entity>> {
        let rows = sqlx::query_as::<_, EntityRow>(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entities
             WHERE lower(canonical_name) = lower(?)
               AND (? IS NULL OR era = ?)
             ORDER BY confidence DESC, id ASC"
        ))
        .bind(name.trim())
        .bind(era)
        .bind(era)
        .fetch_all(pool)
        .await?;

        Ok(rows.into_iter().map(Entity::from).collect())
    }

    /// List entities of one type, most confident first
    pub async fn list_by_type(
        pool: &SqlitePool,
        entity_type: &str,
        era: Option<&str>,
    ) -> DbResult<Vec<Entity>> {
        let rows = sqlx::query_as::<_, EntityRow>(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entities
             WHERE entity_type = ?
               AND (? IS NULL OR era = ?)
             ORDER BY confidence DESC, id ASC"
        ))
        .bind(entity_type)
        .bind(era)
        .bind(era)
        .fetch_all(pool)
        .await?;

        Ok(rows.into_iter().map(Entity::from).collect())
    }

    pub async fn count(pool: &SqlitePool, era: Option<&str>) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM entities WHERE (? IS NULL OR era = ?)")
                .bind(era)
                .bind(era)
                .fetch_one(pool)
                .await?;
        Ok(count)
    }

    /// Number of stub rows still waiting for a real assertion
    pub async fn count_stubs(pool: &SqlitePool, era: Option<&str>) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM entities WHERE is_stub = 1 AND (? IS NULL OR era = ?)",
        )
        .bind(era)
        .bind(era)
        .fetch_one(pool)
        .await?;
        Ok(count)
    }
}

const ENTITY_COLUMNS: &str = "id, entity_type, canonical_name, era, properties_json, \
     source_books_json, confidence, is_stub, created_at, updated_at";

pub(crate) fn to_json<T: Serialize + ?Sized>(value: &T) -> DbResult<String> {
    serde_json::to_string(value).map_err(|e| DbError::Serialization(e.to_string()))
}

/// Decode a JSON object column; corrupt values read as empty.
pub(crate) fn object_from_json(raw: &str, column: &str) -> Map<String, Value> {
    if raw.trim().is_empty() {
        return Map::new();
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        _ => {
            warn!(column, "ignoring malformed JSON object column");
            Map::new()
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EntityRow {
    id: String,
    entity_type: String,
    canonical_name: String,
    era: String,
    properties_json: String,
    source_books_json: String,
    confidence: f64,
    is_stub: bool,
    created_at: String,
    updated_at: String,
}

impl From<EntityRow> for Entity {
    fn from(row: EntityRow) -> Self {
        let source_books = serde_json::from_str(&row.source_books_json).unwrap_or_else(|_| {
            warn!(entity = %row.id, "ignoring malformed source_books_json");
            Vec::new()
        });
        Self {
            properties: object_from_json(&row.properties_json, "properties_json"),
            id: row.id,
            entity_type: row.entity_type,
            canonical_name: row.canonical_name,
            era: row.era,
            source_books,
            confidence: row.confidence,
            is_stub: row.is_stub,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
