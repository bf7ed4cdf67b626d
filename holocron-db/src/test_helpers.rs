//! Test helpers for the graph store.

use crate::{error::DbResult, sqlite_runtime::create_in_memory_pool, store::GraphStore};

/// Create an in-memory, migrated graph store for testing.
///
/// Uses a single connection so every query sees the same database.
pub async fn create_test_graph_store() -> DbResult<GraphStore> {
    let pool = create_in_memory_pool(1).await?;
    GraphStore::run_migrations(&pool).await?;
    Ok(GraphStore::from_pool(pool))
}
