//! Access control factory

use std::sync::Arc;

use crate::config::StorageConfig;
use crate::postgres::PostgresPool;

use super::control::AccessControl;
use super::memory_access::MemoryAccessControl;
use super::postgres_access::PostgresAccessControl;

/// Create the access control backend. The memory backend starts with no
/// members, so every check fails until roles are granted.
pub fn create_access_control(
    settings: &StorageConfig,
    postgres_pool: Option<Arc<PostgresPool>>,
) -> Arc<dyn AccessControl> {
    match (settings.backend.as_str(), postgres_pool) {
        ("postgres", Some(pool)) => {
            tracing::info!(backend = "postgres", "Creating PostgreSQL access control");
            Arc::new(PostgresAccessControl::new(pool.pool().clone()))
        }
        (backend, _) => {
            if backend == "postgres" {
                tracing::warn!(
                    "PostgreSQL access control requested but no pool provided, falling back to memory"
                );
            }
            Arc::new(MemoryAccessControl::new())
        }
    }
}
