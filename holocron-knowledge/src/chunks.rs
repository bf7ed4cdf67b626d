//! Source text access.
//!
//! Chunks come from an external vector-indexed store and are only read. The
//! reader is a soft dependency: any failure is logged and yields no chunks.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sqlx::Row;
use tracing::{debug, info, warn};

use crate::errors::{KnowledgeError, KnowledgeResult};

/// One parent-level chunk of source text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub chunk_index: i64,
    pub book_title: String,
    pub chapter_title: Option<String>,
    pub era: String,
    pub text: String,
    /// Character names tagged by the indexer, if any
    pub characters: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chapter {
    pub title: Option<String>,
    /// Position in the book, first-seen order
    pub index: i64,
    pub chunks: Vec<Chunk>,
}

impl Chapter {
    /// Chunk batches of at most `size` chunks (a size of 0 is treated as 1).
    pub fn batches(&self, size: usize) -> std::slice::Chunks<'_, Chunk> {
        self.chunks.chunks(size.max(1))
    }

    /// Title for logs and checkpoints.
    pub fn label(&self) -> &str {
        self.title.as_deref().unwrap_or("(untitled)")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Book {
    pub title: String,
    pub chapters: Vec<Chapter>,
}

impl Book {
    pub fn chunk_count(&self) -> usize {
        self.chapters.iter().map(|c| c.chunks.len()).sum()
    }
}

/// Extraction workload projection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkloadEstimate {
    pub total_chunks: usize,
    pub total_chapters: usize,
    pub total_books: usize,
    pub estimated_calls: usize,
    pub estimated_minutes: f64,
}

/// Anything that can list parent chunks for an era.
#[async_trait::async_trait]
pub trait ChunkSource: Send + Sync {
    /// Parent-level chunks whose era matches case-insensitively.
    ///
    /// Implementations never fail; an unreachable source returns nothing.
    async fn parent_chunks(&self, era: &str) -> Vec<Chunk>;
}

/// Fixed chunk list, mostly for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryChunkSource {
    chunks: Vec<Chunk>,
}

impl InMemoryChunkSource {
    pub fn new(chunks: Vec<Chunk>) -> Self {
        Self { chunks }
    }
}

#[async_trait::async_trait]
impl ChunkSource for InMemoryChunkSource {
    async fn parent_chunks(&self, era: &str) -> Vec<Chunk> {
        self.chunks
            .iter()
            .filter(|chunk| chunk.era.eq_ignore_ascii_case(era))
            .cloned()
            .collect()
    }
}

/// Chunk table in a SQLite file, with column names discovered at runtime.
#[derive(Debug, Clone)]
pub struct SqliteChunkSource {
    db_path: PathBuf,
    table: String,
}

/// Resolved column names for one chunk table.
#[derive(Debug, Clone, PartialEq)]
struct ChunkColumns {
    text: String,
    chunk_id: Option<String>,
    chunk_index: Option<String>,
    book: String,
    chapter: Option<String>,
    era: String,
    level: Option<String>,
    characters: Option<String>,
}

impl ChunkColumns {
    fn discover(names: &[String]) -> KnowledgeResult<Self> {
        let pick = |candidates: &[&str]| -> Option<String> {
            candidates.iter().find_map(|wanted| {
                names
                    .iter()
                    .find(|name| name.eq_ignore_ascii_case(wanted))
                    .cloned()
            })
        };

        let required = |candidates: &[&str]| {
            pick(candidates).ok_or_else(|| {
                KnowledgeError::ChunkSource(format!("no {} column", candidates.join("/")))
            })
        };

        Ok(Self {
            text: required(&["text", "content"])?,
            chunk_id: pick(&["chunk_id", "id"]),
            chunk_index: pick(&["chunk_index"]),
            book: required(&["book_title", "source"])?,
            chapter: pick(&["chapter_title", "chapter"]),
            era: required(&["era", "time_period"])?,
            level: pick(&["level", "chunk_level"]),
            characters: pick(&["characters_json"]),
        })
    }

    fn select_sql(&self, table: &str) -> String {
        let text_of = |col: &str| format!("CAST({} AS TEXT)", quote_ident(col));
        let optional_text = |col: &Option<String>| match col {
            Some(col) => text_of(col),
            None => "NULL".to_string(),
        };
        let chunk_id = match &self.chunk_id {
            Some(col) => text_of(col),
            None => "CAST(rowid AS TEXT)".to_string(),
        };
        let chunk_index = match &self.chunk_index {
            Some(col) => format!("CAST({} AS INTEGER)", quote_ident(col)),
            None => "0".to_string(),
        };
        let level_filter = match &self.level {
            Some(col) => format!(" AND lower(CAST({} AS TEXT)) = 'parent'", quote_ident(col)),
            None => String::new(),
        };

        format!(
            "SELECT {text} AS text, {chunk_id} AS chunk_id, {chunk_index} AS chunk_index, \
             {book} AS book_title, {chapter} AS chapter_title, {characters} AS characters_json \
             FROM {table} WHERE lower({era}) = lower(?){level_filter}",
            text = text_of(&self.text),
            book = text_of(&self.book),
            chapter = optional_text(&self.chapter),
            characters = optional_text(&self.characters),
            table = quote_ident(table),
            era = text_of(&self.era),
        )
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

impl SqliteChunkSource {
    pub fn new(db_path: impl Into<PathBuf>, table: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            table: table.into(),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    async fn load(&self, era: &str) -> KnowledgeResult<Vec<Chunk>> {
        let pool = holocron_db::create_read_only_pool(&self.db_path, 1).await?;

        let columns = sqlx::query(&format!("PRAGMA table_info({})", quote_ident(&self.table)))
            .fetch_all(&pool)
            .await?
            .iter()
            .filter_map(|row| row.try_get::<String, _>("name").ok())
            .collect::<Vec<_>>();
        if columns.is_empty() {
            pool.close().await;
            return Err(KnowledgeError::ChunkSource(format!(
                "table '{}' not found",
                self.table
            )));
        }
        let columns = match ChunkColumns::discover(&columns) {
            Ok(columns) => columns,
            Err(e) => {
                pool.close().await;
                return Err(e);
            }
        };
        debug!(?columns, table = %self.table, "chunk columns discovered");

        let rows = sqlx::query(&columns.select_sql(&self.table))
            .bind(era)
            .fetch_all(&pool)
            .await;
        pool.close().await;

        let chunks = rows?
            .iter()
            .filter_map(|row| {
                let text: Option<String> = row.try_get("text").ok().flatten();
                let book: Option<String> = row.try_get("book_title").ok().flatten();
                let (text, book) = (text?, book?);
                let characters_json: Option<String> = row.try_get("characters_json").ok().flatten();
                Some(Chunk {
                    chunk_id: row
                        .try_get::<Option<String>, _>("chunk_id")
                        .ok()
                        .flatten()
                        .unwrap_or_default(),
                    chunk_index: row
                        .try_get::<Option<i64>, _>("chunk_index")
                        .ok()
                        .flatten()
                        .unwrap_or(0),
                    book_title: book.trim().to_string(),
                    chapter_title: row
                        .try_get::<Option<String>, _>("chapter_title")
                        .ok()
                        .flatten()
                        .map(|t| t.trim().to_string())
                        .filter(|t| !t.is_empty()),
                    era: era.to_string(),
                    text,
                    characters: parse_characters(characters_json.as_deref()),
                })
            })
            .collect();
        Ok(chunks)
    }
}

/// Decode a `characters_json` cell; anything but a string list reads as empty.
fn parse_characters(raw: Option<&str>) -> Vec<String> {
    raw.and_then(|raw| serde_json::from_str::<Vec<String>>(raw).ok())
        .unwrap_or_default()
}

#[async_trait::async_trait]
impl ChunkSource for SqliteChunkSource {
    async fn parent_chunks(&self, era: &str) -> Vec<Chunk> {
        match self.load(era).await {
            Ok(chunks) => chunks,
            Err(error) => {
                warn!(
                    path = %self.db_path.display(),
                    table = %self.table,
                    %error,
                    error_kind = error.kind(),
                    "chunk store unavailable, continuing with no chunks"
                );
                Vec::new()
            }
        }
    }
}

/// Groups chunks into books and chapters.
pub struct ChunkReader<S: ChunkSource + ?Sized> {
    source: std::sync::Arc<S>,
}

impl<S: ChunkSource + ?Sized> ChunkReader<S> {
    pub fn new(source: std::sync::Arc<S>) -> Self {
        Self { source }
    }

    /// Books in first-seen order, each with chapters in first-seen order.
    pub async fn books(&self, era: &str) -> Vec<Book> {
        let chunks = self.source.parent_chunks(era).await;
        let books = group_by_book(chunks);
        info!(era, books = books.len(), "chunk store grouped");
        books
    }

    pub async fn estimate(
        &self,
        era: &str,
        chunks_per_call: usize,
        seconds_per_call: f64,
    ) -> WorkloadEstimate {
        estimate_workload(&self.books(era).await, chunks_per_call, seconds_per_call)
    }
}

/// Group chunks by book then chapter; chunks inside a chapter are sorted by
/// index (stable, so ties keep source order).
pub fn group_by_book(chunks: Vec<Chunk>) -> Vec<Book> {
    let mut books: Vec<Book> = Vec::new();
    let mut book_pos: HashMap<String, usize> = HashMap::new();
    let mut chapter_pos: HashMap<(usize, Option<String>), usize> = HashMap::new();

    for chunk in chunks {
        let b = *book_pos.entry(chunk.book_title.clone()).or_insert_with(|| {
            books.push(Book {
                title: chunk.book_title.clone(),
                chapters: Vec::new(),
            });
            books.len() - 1
        });
        let book = &mut books[b];
        let c = *chapter_pos
            .entry((b, chunk.chapter_title.clone()))
            .or_insert_with(|| {
                book.chapters.push(Chapter {
                    title: chunk.chapter_title.clone(),
                    index: book.chapters.len() as i64,
                    chunks: Vec::new(),
                });
                book.chapters.len() - 1
            });
        book.chapters[c].chunks.push(chunk);
    }

    for book in &mut books {
        for chapter in &mut book.chapters {
            chapter.chunks.sort_by_key(|chunk| chunk.chunk_index);
        }
    }
    books
}

/// `calls = ceil(chunks / chunks_per_call) + books`, minutes from the
/// average call latency.
pub fn estimate_workload(
    books: &[Book],
    chunks_per_call: usize,
    seconds_per_call: f64,
) -> WorkloadEstimate {
    let total_chunks: usize = books.iter().map(Book::chunk_count).sum();
    let total_chapters: usize = books.iter().map(|b| b.chapters.len()).sum();
    let total_books = books.len();
    let estimated_calls = total_chunks.div_ceil(chunks_per_call.max(1)) + total_books;
    WorkloadEstimate {
        total_chunks,
        total_chapters,
        total_books,
        estimated_calls,
        estimated_minutes: estimated_calls as f64 * seconds_per_call / 60.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn chunk(book: &str, chapter: Option<&str>, index: i64) -> Chunk {
        Chunk {
            chunk_id: format!("{book}-{index}"),
            chunk_index: index,
            book_title: book.to_string(),
            chapter_title: chapter.map(str::to_string),
            era: "rebellion".to_string(),
            text: format!("text {index}"),
            characters: Vec::new(),
        }
    }

    #[test]
    fn group_keeps_first_seen_order_and_sorts_chunks() {
        let books = group_by_book(vec![
            chunk("B", Some("b1"), 1),
            chunk("A", Some("a2"), 5),
            chunk("A", Some("a1"), 2),
            chunk("A", Some("a2"), 3),
            chunk("B", Some("b1"), 0),
            chunk("A", None, 9),
        ]);

        assert_eq!(books.iter().map(|b| b.title.as_str()).collect::<Vec<_>>(), ["B", "A"]);
        let a = &books[1];
        assert_eq!(
            a.chapters.iter().map(|c| c.title.as_deref()).collect::<Vec<_>>(),
            [Some("a2"), Some("a1"), None]
        );
        assert_eq!(a.chapters[0].chunks.iter().map(|c| c.chunk_index).collect::<Vec<_>>(), [3, 5]);
        assert_eq!(a.chapters[2].index, 2);
        assert_eq!(books[0].chapters[0].chunks[0].chunk_index, 0);
    }

    #[test]
    fn estimate_math() {
        let mut chunks = Vec::new();
        for i in 0..7 {
            chunks.push(chunk("A", Some("1"), i));
        }
        chunks.push(chunk("B", Some("1"), 0));
        chunks.push(chunk("B", Some("2"), 0));
        let books = group_by_book(chunks);

        let estimate = estimate_workload(&books, 3, 12.0);
        assert_eq!(estimate.total_chunks, 9);
        assert_eq!(estimate.total_chapters, 3);
        assert_eq!(estimate.total_books, 2);
        assert_eq!(estimate.estimated_calls, 3 + 2);
        assert!((estimate.estimated_minutes - 1.0).abs() < 1e-9);

        let empty = estimate_workload(&[], 3, 12.0);
        assert_eq!(empty.estimated_calls, 0);
        assert_eq!(empty.estimated_minutes, 0.0);
    }

    #[test]
    fn batches_split_chapters() {
        let books = group_by_book((0..5).map(|i| chunk("A", Some("1"), i)).collect());
        let sizes: Vec<usize> = books[0].chapters[0].batches(2).map(<[Chunk]>::len).collect();
        assert_eq!(sizes, [2, 2, 1]);
        assert_eq!(books[0].chapters[0].batches(0).count(), 5);
    }

    #[test]
    fn column_discovery_accepts_alternate_names() {
        let names: Vec<String> = ["id", "content", "source", "chapter", "time_period", "chunk_level"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let columns = ChunkColumns::discover(&names).unwrap();
        assert_eq!(columns.book, "source");
        assert_eq!(columns.era, "time_period");
        assert_eq!(columns.level.as_deref(), Some("chunk_level"));
        assert!(columns.chunk_index.is_none());

        let sql = columns.select_sql("chunks");
        assert!(sql.contains("FROM \"chunks\""));
        assert!(sql.contains("lower(CAST(\"chunk_level\" AS TEXT)) = 'parent'"));

        let missing: Vec<String> = vec!["text".to_string()];
        let err = ChunkColumns::discover(&missing).unwrap_err();
        assert_eq!(err.kind(), "chunk_source");
        assert_eq!(err.to_string(), "chunk source: no book_title/source column");
    }

    #[test]
    fn characters_json_is_tolerant() {
        assert_eq!(parse_characters(Some(r#"["Luke","Leia"]"#)), ["Luke", "Leia"]);
        assert!(parse_characters(Some("not json")).is_empty());
        assert!(parse_characters(None).is_empty());
    }
}
