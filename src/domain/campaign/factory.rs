//! Campaign store factory

use std::sync::Arc;

use crate::config::StorageConfig;
use crate::postgres::PostgresPool;

use super::memory_store::MemoryCampaignStore;
use super::postgres_store::PostgresCampaignStore;
use super::store::CampaignStore;

/// Create a campaign store based on configuration.
///
/// - `"postgres"`: `PostgresCampaignStore` if a PostgreSQL pool is provided
/// - `"memory"` (default): `MemoryCampaignStore`
pub fn create_campaign_store(
    settings: &StorageConfig,
    postgres_pool: Option<Arc<PostgresPool>>,
) -> Arc<dyn CampaignStore> {
    match settings.backend.as_str() {
        "postgres" => {
            if let Some(pool) = postgres_pool {
                tracing::info!(backend = "postgres", "Creating PostgreSQL campaign store");
                Arc::new(PostgresCampaignStore::new(pool.pool().clone()))
            } else {
                tracing::warn!(
                    "PostgreSQL campaign store requested but no pool provided, falling back to memory"
                );
                Arc::new(MemoryCampaignStore::new())
            }
        }
        _ => {
            tracing::info!(backend = "memory", "Creating memory campaign store");
            Arc::new(MemoryCampaignStore::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postgres_without_pool_falls_back() {
        let settings = StorageConfig {
            backend: "postgres".to_string(),
        };
        let store = create_campaign_store(&settings, None);
        assert_eq!(store.backend_name(), "memory");
    }
}
