//! Delivery store factory

use std::sync::Arc;

use crate::config::StorageConfig;
use crate::postgres::PostgresPool;

use super::memory_store::MemoryDeliveryStore;
use super::postgres_store::PostgresDeliveryStore;
use super::store::DeliveryStore;

/// Create a delivery store; follows the same backend choice as campaigns.
pub fn create_delivery_store(
    settings: &StorageConfig,
    postgres_pool: Option<Arc<PostgresPool>>,
) -> Arc<dyn DeliveryStore> {
    match (settings.backend.as_str(), postgres_pool) {
        ("postgres", Some(pool)) => {
            tracing::info!(backend = "postgres", "Creating PostgreSQL delivery store");
            Arc::new(PostgresDeliveryStore::new(pool.pool().clone()))
        }
        ("postgres", None) => {
            tracing::warn!(
                "PostgreSQL delivery store requested but no pool provided, falling back to memory"
            );
            Arc::new(MemoryDeliveryStore::new())
        }
        _ => {
            tracing::info!(backend = "memory", "Creating memory delivery store");
            Arc::new(MemoryDeliveryStore::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_backend() {
        let settings = StorageConfig {
            backend: "memory".to_string(),
        };
        assert_eq!(create_delivery_store(&settings, None).backend_name(), "memory");
    }
}
