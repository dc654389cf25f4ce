//! Redis sorted-set schedule index.
//!
//! Members are campaign IDs, scores are due times in epoch milliseconds.
//! `ZADD` on an existing member moves it, so one campaign never holds two
//! entries.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use uuid::Uuid;

use crate::metrics::BackendMetrics;
use crate::redis::RedisPool;

use super::index::{ScheduleEntry, ScheduleError, ScheduleIndex};

pub struct RedisScheduleIndex {
    pool: Arc<RedisPool>,
    key: String,
}

impl RedisScheduleIndex {
    pub fn new(pool: Arc<RedisPool>, key: impl Into<String>) -> Self {
        Self {
            pool,
            key: key.into(),
        }
    }

    /// Record the failure and drop the connection so the next call reconnects.
    async fn failed(&self, operation: &'static str, err: redis::RedisError) -> ScheduleError {
        BackendMetrics::record_error("redis", operation);
        tracing::warn!(operation, key = %self.key, error = %err, "Schedule index command failed");
        if err.is_io_error() || err.is_connection_dropped() {
            self.pool.invalidate().await;
        }
        ScheduleError::Redis(err)
    }
}

fn to_entry(member: String, score: f64) -> Result<ScheduleEntry, ScheduleError> {
    let campaign_id = Uuid::parse_str(&member)
        .map_err(|e| ScheduleError::Corrupt(format!("member '{}': {}", member, e)))?;
    let due_at = DateTime::from_timestamp_millis(score as i64)
        .ok_or_else(|| ScheduleError::Corrupt(format!("score {} for {}", score, member)))?;
    Ok(ScheduleEntry {
        campaign_id,
        due_at,
    })
}

#[async_trait]
impl ScheduleIndex for RedisScheduleIndex {
    fn backend_name(&self) -> &'static str {
        "redis"
    }

    async fn arm(&self, campaign_id: Uuid, due_at: DateTime<Utc>) -> Result<(), ScheduleError> {
        let mut conn = self.pool.get_connection().await?;
        let result: Result<(), _> = conn
            .zadd(&self.key, campaign_id.to_string(), due_at.timestamp_millis())
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(e) => Err(self.failed("zadd", e).await),
        }
    }

    async fn disarm(&self, campaign_id: Uuid) -> Result<bool, ScheduleError> {
        let mut conn = self.pool.get_connection().await?;
        let result: Result<i64, _> = conn.zrem(&self.key, campaign_id.to_string()).await;
        match result {
            Ok(removed) => Ok(removed > 0),
            Err(e) => Err(self.failed("zrem", e).await),
        }
    }

    async fn due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ScheduleEntry>, ScheduleError> {
        let mut conn = self.pool.get_connection().await?;
        let result: Result<Vec<(String, f64)>, _> = conn
            .zrangebyscore_limit_withscores(
                &self.key,
                "-inf",
                now.timestamp_millis(),
                0,
                limit as isize,
            )
            .await;
        match result {
            Ok(raw) => raw
                .into_iter()
                .map(|(member, score)| to_entry(member, score))
                .collect(),
            Err(e) => Err(self.failed("zrangebyscore", e).await),
        }
    }

    async fn entry(&self, campaign_id: Uuid) -> Result<Option<DateTime<Utc>>, ScheduleError> {
        let mut conn = self.pool.get_connection().await?;
        let result: Result<Option<f64>, _> = conn.zscore(&self.key, campaign_id.to_string()).await;
        match result {
            Ok(score) => Ok(score.and_then(|s| DateTime::from_timestamp_millis(s as i64))),
            Err(e) => Err(self.failed("zscore", e).await),
        }
    }

    async fn snapshot(&self, limit: usize) -> Result<Vec<ScheduleEntry>, ScheduleError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.pool.get_connection().await?;
        let result: Result<Vec<(String, f64)>, _> = conn
            .zrange_withscores(&self.key, 0, limit as isize - 1)
            .await;
        match result {
            Ok(raw) => raw
                .into_iter()
                .map(|(member, score)| to_entry(member, score))
                .collect(),
            Err(e) => Err(self.failed("zrange", e).await),
        }
    }

    async fn pending(&self) -> Result<usize, ScheduleError> {
        let mut conn = self.pool.get_connection().await?;
        let result: Result<usize, _> = conn.zcard(&self.key).await;
        match result {
            Ok(count) => Ok(count),
            Err(e) => Err(self.failed("zcard", e).await),
        }
    }
}
