//! Schedule index factory

use std::sync::Arc;

use crate::config::SchedulerConfig;
use crate::redis::RedisPool;

use super::index::ScheduleIndex;
use super::memory_index::MemoryScheduleIndex;
use super::redis_index::RedisScheduleIndex;

/// Create a schedule index based on configuration.
///
/// - `"redis"`: `RedisScheduleIndex` (sorted set) if a Redis pool is provided
/// - `"memory"` (default): `MemoryScheduleIndex`
pub fn create_schedule_index(
    settings: &SchedulerConfig,
    redis_pool: Option<Arc<RedisPool>>,
) -> Arc<dyn ScheduleIndex> {
    match settings.backend.as_str() {
        "redis" => {
            if let Some(pool) = redis_pool {
                tracing::info!(
                    backend = "redis",
                    key = %settings.redis_key,
                    "Creating Redis schedule index"
                );
                Arc::new(RedisScheduleIndex::new(pool, settings.redis_key.clone()))
            } else {
                tracing::warn!(
                    "Redis schedule index requested but no pool provided, falling back to memory"
                );
                Arc::new(MemoryScheduleIndex::new())
            }
        }
        _ => {
            tracing::info!(backend = "memory", "Creating memory schedule index");
            Arc::new(MemoryScheduleIndex::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_memory() {
        let index = create_schedule_index(&SchedulerConfig::default(), None);
        assert_eq!(index.backend_name(), "memory");
    }
}
