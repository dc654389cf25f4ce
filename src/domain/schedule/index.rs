//! Backend trait for the time-ordered schedule index.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::redis::PoolError;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Redis pool error: {0}")]
    Pool(#[from] PoolError),

    /// An index member could not be parsed back into an entry
    #[error("Corrupt schedule entry: {0}")]
    Corrupt(String),
}

/// A campaign waiting to fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScheduleEntry {
    pub campaign_id: Uuid,
    pub due_at: DateTime<Utc>,
}

/// Time-ordered index of pending campaign fires.
///
/// The index is a cache of the campaign store's `scheduled_at`; it holds at
/// most one entry per campaign and can be rebuilt from the store at any time.
#[async_trait]
pub trait ScheduleIndex: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Insert or move the campaign's entry.
    async fn arm(&self, campaign_id: Uuid, due_at: DateTime<Utc>) -> Result<(), ScheduleError>;

    /// Remove the campaign's entry. Returns whether one existed.
    async fn disarm(&self, campaign_id: Uuid) -> Result<bool, ScheduleError>;

    /// Entries due at or before `now`, earliest first. Entries are not removed.
    async fn due(&self, now: DateTime<Utc>, limit: usize)
        -> Result<Vec<ScheduleEntry>, ScheduleError>;

    /// Due time currently held for a campaign.
    async fn entry(&self, campaign_id: Uuid) -> Result<Option<DateTime<Utc>>, ScheduleError>;

    /// Up to `limit` entries, earliest first.
    async fn snapshot(&self, limit: usize) -> Result<Vec<ScheduleEntry>, ScheduleError>;

    async fn pending(&self) -> Result<usize, ScheduleError>;
}
