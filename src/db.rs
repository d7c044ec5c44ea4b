use anyhow::Result;
use async_trait::async_trait;

use crate::models::query::QueryResult;

/// Statement execution against the externally-owned connection pool.
/// The orchestrator only ever passes SQL that the safety guard accepted,
/// so retries inside an implementation are idempotent-safe.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<QueryResult>;
}
