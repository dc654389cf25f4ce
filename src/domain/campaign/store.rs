//! Backend trait for campaign persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::StoreError;

use super::model::{
    Campaign, CampaignPatch, CampaignQuery, CampaignStatus, DispatchTally, StatusChange,
    TransitionOutcome,
};

/// Durable campaign records and their lifecycle.
///
/// Every status-changing method is a single conditional write: the guard and
/// the update happen atomically in the backend, so two callers racing for the
/// same transition see exactly one `Applied`.
#[async_trait]
pub trait CampaignStore: Send + Sync {
    /// Backend type identifier
    fn backend_name(&self) -> &'static str;

    async fn insert(&self, campaign: Campaign) -> Result<Campaign, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Campaign>, StoreError>;

    /// Campaigns of one business, newest first.
    async fn list(&self, business_id: &str, query: &CampaignQuery)
        -> Result<Vec<Campaign>, StoreError>;

    /// Apply a patch if the campaign is currently in one of `allowed`.
    async fn update_details(
        &self,
        id: Uuid,
        patch: &CampaignPatch,
        allowed: &'static [CampaignStatus],
    ) -> Result<TransitionOutcome, StoreError>;

    /// Atomic conditional status change.
    async fn transition(&self, id: Uuid, change: &StatusChange)
        -> Result<TransitionOutcome, StoreError>;

    /// Take over a `sending` campaign whose `updated_at` is older than
    /// `stale_before`. Applying refreshes `updated_at`, so a concurrent
    /// claimant sees `Rejected`.
    async fn claim_stale(
        &self,
        id: Uuid,
        stale_before: DateTime<Utc>,
    ) -> Result<TransitionOutcome, StoreError>;

    /// Refresh `updated_at` of a `sending` campaign. False once it left `sending`.
    async fn heartbeat(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Overwrite the progress counters of a `sending` campaign.
    async fn set_progress(
        &self,
        id: Uuid,
        recipient_count: u64,
        sent_count: u64,
    ) -> Result<(), StoreError>;

    /// Adjust `sent_count` of a `sending` campaign by `delta` (floored at 0)
    /// and refresh `updated_at`.
    async fn add_sent(&self, id: Uuid, delta: i64) -> Result<(), StoreError>;

    /// Move `sending` to `to`, writing final counts and setting `sent_at` once.
    async fn complete_dispatch(
        &self,
        id: Uuid,
        tally: DispatchTally,
        to: CampaignStatus,
    ) -> Result<TransitionOutcome, StoreError>;

    /// Increment engagement counters.
    async fn add_engagement(&self, id: Uuid, opens: u64, clicks: u64) -> Result<(), StoreError>;

    /// Delete the campaign if its status is one of `allowed`.
    async fn delete(
        &self,
        id: Uuid,
        allowed: &'static [CampaignStatus],
    ) -> Result<TransitionOutcome, StoreError>;

    /// `(id, scheduled_at)` of scheduled campaigns, earliest first.
    async fn scheduled(&self, limit: usize) -> Result<Vec<(Uuid, DateTime<Utc>)>, StoreError>;

    /// Campaigns currently in `status`, oldest update first.
    async fn with_status(
        &self,
        status: CampaignStatus,
        limit: usize,
    ) -> Result<Vec<Campaign>, StoreError>;
}
