use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::schema::SchemaSnapshot;

/// Read-through schema cache keyed by database identity. Implementations
/// own refresh and introspection; callers only borrow snapshots.
/// Staleness reported by `cache_age` is advisory.
#[async_trait]
pub trait SchemaCache: Send + Sync {
    async fn get(&self, database: &str) -> Result<Arc<SchemaSnapshot>>;

    fn cache_age(&self, database: &str) -> Option<Duration>;
}
