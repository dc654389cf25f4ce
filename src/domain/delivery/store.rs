//! Backend trait for delivery persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{StoreError, UserId};

use super::model::{Delivery, DeliveryCounts, DeliveryQuery, EngagementChange};

#[async_trait]
pub trait DeliveryStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Whether `record_open`/`record_click` also add the change to the owning
    /// campaign's `open_count`/`click_count` in the same transaction.
    fn bumps_campaign_engagement(&self) -> bool {
        false
    }

    /// Create a pending delivery for each recipient without one.
    ///
    /// Existing `(campaign, recipient)` rows are left untouched, so a retried
    /// dispatch never duplicates. Returns the number of rows created.
    async fn upsert_many(&self, campaign_id: Uuid, recipients: &[UserId])
        -> Result<usize, StoreError>;

    /// Deliveries of the campaign that have not been sent.
    async fn unsent(&self, campaign_id: Uuid) -> Result<Vec<Delivery>, StoreError>;

    /// Record a successful hand-off. No-op (returns false) if already sent.
    async fn mark_sent(
        &self,
        id: Uuid,
        message_id: &str,
        attempts: u32,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Record exhausted attempts. No-op (returns false) if already sent.
    async fn mark_failed(&self, id: Uuid, attempts: u32, error: &str)
        -> Result<bool, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Delivery>, StoreError>;

    /// Deliveries of a campaign ordered by recipient.
    async fn list(&self, campaign_id: Uuid, query: &DeliveryQuery)
        -> Result<Vec<Delivery>, StoreError>;

    async fn counts(&self, campaign_id: Uuid) -> Result<DeliveryCounts, StoreError>;

    /// Set `opened_at` if null. `None` when the delivery does not exist.
    async fn record_open(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<(Delivery, EngagementChange)>, StoreError>;

    /// Set `clicked_at` (and `opened_at`) if null.
    async fn record_click(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<(Delivery, EngagementChange)>, StoreError>;

    async fn delete_for_campaign(&self, campaign_id: Uuid) -> Result<u64, StoreError>;
}
