//! Health check and statistics endpoints.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::domain::delivery::DispatcherStatsSnapshot;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub storage: StorageHealthResponse,
    pub scheduler: SchedulerHealthResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisHealthResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postgres: Option<PostgresHealthResponse>,
}

#[derive(Debug, Serialize)]
pub struct StorageHealthResponse {
    pub campaigns: String,
}

#[derive(Debug, Serialize)]
pub struct SchedulerHealthResponse {
    pub backend: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct RedisHealthResponse {
    pub connected: bool,
}

#[derive(Debug, Serialize)]
pub struct PostgresHealthResponse {
    pub pool_size: u32,
    pub idle_connections: u32,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub dispatcher: DispatcherStatsSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_pending: Option<usize>,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime_seconds = state.start_time.elapsed().as_secs();

    let pending = match state.trigger.pending().await {
        Ok(pending) => Some(pending),
        Err(e) => {
            tracing::warn!(error = %e, "Schedule index unavailable");
            None
        }
    };

    let redis = match state.redis_pool {
        Some(ref pool) => Some(RedisHealthResponse {
            connected: pool.ping().await.is_ok(),
        }),
        None => None,
    };

    let postgres = state.postgres_pool.as_ref().map(|pool| {
        let inner_pool = pool.pool();
        PostgresHealthResponse {
            pool_size: inner_pool.size(),
            idle_connections: inner_pool.num_idle() as u32,
        }
    });

    let degraded = pending.is_none() || redis.as_ref().is_some_and(|r| !r.connected);
    let status = if degraded { "degraded" } else { "healthy" };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        storage: StorageHealthResponse {
            campaigns: state.campaigns.backend_name().to_string(),
        },
        scheduler: SchedulerHealthResponse {
            backend: state.trigger.backend_name().to_string(),
            pending,
        },
        redis,
        postgres,
    })
}

/// GET /stats
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        dispatcher: state.dispatcher.stats(),
        scheduled_pending: state.trigger.pending().await.ok(),
    })
}
