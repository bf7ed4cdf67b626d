//! holocron-db: SQLite persistence for the narrative knowledge graph.
//!
//! This crate provides database operations for:
//! - Entities with merge-on-upsert and stub placeholders
//! - Weighted, deduplicated triples
//! - Chapter summaries, character arcs and location dossiers
//! - Extraction checkpoints for resumable runs

pub mod checkpoints;
pub mod entities;
pub mod error;
mod sqlite_runtime;
pub mod store;
pub mod summaries;
pub mod triples;

// Re-export commonly used types
pub use checkpoints::{Checkpoint, CheckpointRepository, CheckpointStatus, CheckpointUpdate};
pub use entities::{Entity, EntityRepository, EntityUpsert};
pub use error::{DbError, DbResult};
pub use sqlite_runtime::create_read_only_pool;
pub use store::{DEFAULT_STUB_CONFIDENCE, GraphStore};
pub use summaries::{Summary, SummaryFilter, SummaryRepository, SummaryType, SummaryUpsert};
pub use triples::{Direction, Triple, TripleRepository, TripleUpsert};

// Re-export test helpers when running tests or when test-helpers feature is enabled
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;
