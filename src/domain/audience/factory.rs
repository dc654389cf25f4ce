//! Audience directory factory

use std::sync::Arc;

use crate::config::StorageConfig;
use crate::postgres::PostgresPool;

use super::directory::AudienceDirectory;
use super::memory_directory::MemoryAudienceDirectory;
use super::postgres_directory::PostgresAudienceDirectory;

/// Create the audience directory matching the storage backend.
pub fn create_audience_directory(
    settings: &StorageConfig,
    postgres_pool: Option<Arc<PostgresPool>>,
) -> Arc<dyn AudienceDirectory> {
    match (settings.backend.as_str(), postgres_pool) {
        ("postgres", Some(pool)) => {
            tracing::info!(backend = "postgres", "Creating PostgreSQL audience directory");
            Arc::new(PostgresAudienceDirectory::new(pool.pool().clone()))
        }
        ("postgres", None) => {
            tracing::warn!(
                "PostgreSQL audience directory requested but no pool provided, falling back to memory"
            );
            Arc::new(MemoryAudienceDirectory::new())
        }
        _ => {
            tracing::info!(backend = "memory", "Creating memory audience directory");
            Arc::new(MemoryAudienceDirectory::new())
        }
    }
}
