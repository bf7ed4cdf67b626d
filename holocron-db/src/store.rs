//! The graph store: one pool, one writer.

use std::path::Path;
use std::sync::Arc;

use holocron_core::resolver::title_case_id;
use holocron_core::vocabulary::{EntityType, Vocabulary};
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::checkpoints::{Checkpoint, CheckpointRepository, CheckpointStatus, CheckpointUpdate};
use crate::entities::{Entity, EntityRepository, EntityUpsert};
use crate::error::{DbError, DbResult};
use crate::sqlite_runtime::{create_file_pool, create_read_only_pool};
use crate::summaries::{Summary, SummaryFilter, SummaryRepository, SummaryUpsert};
use crate::triples::{Direction, Triple, TripleRepository, TripleUpsert};

/// Default confidence of auto-created endpoint stubs.
pub const DEFAULT_STUB_CONFIDENCE: f64 = 0.3;

/// Durable entities, triples, summaries and checkpoints.
///
/// Merges are read-then-write, so every write goes through one async lock
/// shared by all clones of the store.
#[derive(Debug, Clone)]
pub struct GraphStore {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
    vocabulary: Arc<Vocabulary>,
    stub_confidence: f64,
}

impl GraphStore {
    /// Open (creating if needed) a read-write store and run migrations.
    pub async fn open(db_path: &Path) -> DbResult<Self> {
        info!("Initializing graph database at: {}", db_path.display());

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let pool = create_file_pool(db_path, 5).await?;
        Self::run_migrations(&pool).await?;

        info!("Graph database initialized successfully");
        Ok(Self::from_pool(pool))
    }

    /// Open an existing store for reads only. Never creates or migrates.
    pub async fn open_read_only(db_path: &Path) -> DbResult<Self> {
        if !db_path.exists() {
            return Err(DbError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("graph database not found: {}", db_path.display()),
            )));
        }
        let pool = create_read_only_pool(db_path, 4).await?;
        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool (for testing or custom setups).
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
            vocabulary: Arc::new(Vocabulary::standard()),
            stub_confidence: DEFAULT_STUB_CONFIDENCE,
        }
    }

    pub fn with_vocabulary(mut self, vocabulary: Arc<Vocabulary>) -> Self {
        self.vocabulary = vocabulary;
        self
    }

    pub fn with_stub_confidence(mut self, confidence: f64) -> Self {
        self.stub_confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub(crate) async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(|e| DbError::Migration(e.to_string()))?;

        info!("Graph database migrations completed");
        Ok(())
    }

    /// Get the inner SQLx pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn vocabulary(&self) -> &Arc<Vocabulary> {
        &self.vocabulary
    }

    /// Close the pool gracefully
    pub async fn close(&self) {
        self.pool.close().await;
    }

    // --- writes ---

    /// Insert or merge an entity; never produces a second row for an id.
    pub async fn upsert_entity(&self, upsert: EntityUpsert) -> DbResult<Entity> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let entity = EntityRepository::upsert(&mut tx, &upsert).await?;
        tx.commit().await?;
        Ok(entity)
    }

    /// Insert or reinforce a triple, creating stub endpoints as needed.
    pub async fn upsert_triple(&self, upsert: TripleUpsert) -> DbResult<Triple> {
        if !self.vocabulary.is_valid_predicate(&upsert.predicate) {
            warn!(
                predicate = %upsert.predicate,
                subject = %upsert.subject_id,
                object = %upsert.object_id,
                "persisting triple with predicate outside the vocabulary"
            );
        }

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let (subject_type, object_type) = self.vocabulary.endpoint_types(&upsert.predicate);
        for (endpoint, implied) in [
            (&upsert.subject_id, subject_type),
            (&upsert.object_id, object_type),
        ] {
            if EntityRepository::get_on(&mut tx, endpoint).await?.is_none() {
                warn!(entity = %endpoint, "creating stub for missing triple endpoint");
                let stub = EntityUpsert::new(
                    endpoint.as_str(),
                    implied.unwrap_or(EntityType::Character),
                    title_case_id(endpoint),
                    upsert.era.as_str(),
                )
                .confidence(self.stub_confidence)
                .stub();
                EntityRepository::upsert(&mut tx, &stub).await?;
            }
        }
        let triple = TripleRepository::upsert(&mut tx, &upsert).await?;
        tx.commit().await?;
        Ok(triple)
    }

    pub async fn upsert_summary(&self, upsert: SummaryUpsert) -> DbResult<Summary> {
        let _guard = self.write_lock.lock().await;
        let mut conn = self.pool.acquire().await?;
        SummaryRepository::upsert(&mut conn, &upsert).await
    }

    pub async fn set_checkpoint(&self, update: CheckpointUpdate) -> DbResult<Checkpoint> {
        let _guard = self.write_lock.lock().await;
        let mut conn = self.pool.acquire().await?;
        CheckpointRepository::set(&mut conn, &update).await
    }

    // --- reads ---

    pub async fn get_entity(&self, id: &str) -> DbResult<Option<Entity>> {
        EntityRepository::get(&self.pool, id).await
    }

    pub async fn find_entities_by_name(
        &self,
        name: &str,
        era: Option<&str>,
    ) -> DbResult<Vec<Entity>> {
        EntityRepository::find_by_name(&self.pool, name, era).await
    }

    pub async fn entities_by_type(
        &self,
        entity_type: EntityType,
        era: Option<&str>,
    ) -> DbResult<Vec<Entity>> {
        EntityRepository::list_by_type(&self.pool, entity_type.as_str(), era).await
    }

    pub async fn triples_for_entity(
        &self,
        entity_id: &str,
        direction: Direction,
        era: Option<&str>,
    ) -> DbResult<Vec<Triple>> {
        TripleRepository::for_entity(&self.pool, entity_id, direction, era).await
    }

    pub async fn triples_by_predicate(
        &self,
        predicate: &str,
        era: Option<&str>,
    ) -> DbResult<Vec<Triple>> {
        TripleRepository::by_predicate(&self.pool, predicate, era).await
    }

    pub async fn get_triple(
        &self,
        subject_id: &str,
        predicate: &str,
        object_id: &str,
        era: &str,
    ) -> DbResult<Option<Triple>> {
        TripleRepository::get(&self.pool, subject_id, predicate, object_id, era).await
    }

    pub async fn entity_count(&self, era: Option<&str>) -> DbResult<i64> {
        EntityRepository::count(&self.pool, era).await
    }

    pub async fn stub_count(&self, era: Option<&str>) -> DbResult<i64> {
        EntityRepository::count_stubs(&self.pool, era).await
    }

    pub async fn triple_count(&self, era: Option<&str>) -> DbResult<i64> {
        TripleRepository::count(&self.pool, era).await
    }

    pub async fn summaries(&self, filter: &SummaryFilter) -> DbResult<Vec<Summary>> {
        SummaryRepository::list(&self.pool, filter).await
    }

    pub async fn get_checkpoint(
        &self,
        book_title: &str,
        chapter_title: Option<&str>,
        phase: &str,
    ) -> DbResult<Option<Checkpoint>> {
        CheckpointRepository::get(&self.pool, book_title, chapter_title, phase).await
    }

    pub async fn checkpoints(
        &self,
        phase: &str,
        status: Option<CheckpointStatus>,
    ) -> DbResult<Vec<Checkpoint>> {
        CheckpointRepository::list(&self.pool, phase, status).await
    }
}
