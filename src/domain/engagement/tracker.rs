use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::campaign::CampaignStore;
use crate::domain::delivery::{Delivery, DeliveryCounts, DeliveryStore, EngagementChange};
use crate::domain::StoreError;
use crate::metrics::EngagementMetrics;

#[derive(Debug, Error)]
pub enum EngagementError {
    #[error("Delivery not found: {0}")]
    NotFound(Uuid),

    /// The caller is not the delivery's recipient
    #[error("Delivery {0} belongs to another recipient")]
    NotOwner(Uuid),

    #[error("Delivery {0} has not been sent")]
    NotSent(Uuid),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngagementEvent {
    Open,
    Click,
}

impl EngagementEvent {
    fn as_str(&self) -> &'static str {
        match self {
            EngagementEvent::Open => "open",
            EngagementEvent::Click => "click",
        }
    }
}

/// Result of a tracking call. `change` is empty for a repeated event.
#[derive(Debug, Clone, Serialize)]
pub struct EngagementReceipt {
    pub delivery_id: Uuid,
    pub campaign_id: Uuid,
    pub opened_at: Option<DateTime<Utc>>,
    pub clicked_at: Option<DateTime<Utc>>,
    pub change: EngagementChange,
}

impl EngagementReceipt {
    fn new(delivery: &Delivery, change: EngagementChange) -> Self {
        Self {
            delivery_id: delivery.id,
            campaign_id: delivery.campaign_id,
            opened_at: delivery.opened_at,
            clicked_at: delivery.clicked_at,
            change,
        }
    }
}

/// Campaign engagement derived from its delivery rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngagementStats {
    pub campaign_id: Uuid,
    pub recipient_count: u64,
    pub sent_count: u64,
    pub failed_count: u64,
    pub open_count: u64,
    pub click_count: u64,
    /// `open_count / sent_count`, 0 when nothing was sent
    pub open_rate: f64,
    pub click_rate: f64,
}

impl EngagementStats {
    pub fn from_counts(campaign_id: Uuid, counts: &DeliveryCounts) -> Self {
        let rate = |n: u64| {
            if counts.sent == 0 {
                0.0
            } else {
                n as f64 / counts.sent as f64
            }
        };
        Self {
            campaign_id,
            recipient_count: counts.total,
            sent_count: counts.sent,
            failed_count: counts.failed,
            open_count: counts.opened,
            click_count: counts.clicked,
            open_rate: rate(counts.opened),
            click_rate: rate(counts.clicked),
        }
    }
}

/// Records opens and clicks against deliveries.
///
/// Timestamps are first-write-wins and the campaign counters are bumped
/// only for fields a call actually set, so repeated or reordered callbacks
/// never double count. Stores that bump the counters in the delivery write
/// itself are left to do so.
pub struct EngagementTracker {
    deliveries: Arc<dyn DeliveryStore>,
    campaigns: Arc<dyn CampaignStore>,
}

impl EngagementTracker {
    pub fn new(deliveries: Arc<dyn DeliveryStore>, campaigns: Arc<dyn CampaignStore>) -> Self {
        Self {
            deliveries,
            campaigns,
        }
    }

    #[tracing::instrument(name = "engagement.open", skip(self, actor, at), fields(delivery_id = %delivery_id))]
    pub async fn mark_opened(
        &self,
        actor: &str,
        delivery_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<EngagementReceipt, EngagementError> {
        self.track(actor, delivery_id, at, EngagementEvent::Open).await
    }

    /// A click also counts as an open when none was recorded.
    #[tracing::instrument(name = "engagement.click", skip(self, actor, at), fields(delivery_id = %delivery_id))]
    pub async fn mark_clicked(
        &self,
        actor: &str,
        delivery_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<EngagementReceipt, EngagementError> {
        self.track(actor, delivery_id, at, EngagementEvent::Click).await
    }

    pub async fn stats(&self, campaign_id: Uuid) -> Result<EngagementStats, EngagementError> {
        let counts = self.deliveries.counts(campaign_id).await?;
        Ok(EngagementStats::from_counts(campaign_id, &counts))
    }

    async fn track(
        &self,
        actor: &str,
        delivery_id: Uuid,
        at: DateTime<Utc>,
        event: EngagementEvent,
    ) -> Result<EngagementReceipt, EngagementError> {
        let delivery = self
            .deliveries
            .get(delivery_id)
            .await?
            .ok_or(EngagementError::NotFound(delivery_id))?;
        if delivery.recipient_id != actor {
            return Err(EngagementError::NotOwner(delivery_id));
        }
        if !delivery.is_sent() {
            return Err(EngagementError::NotSent(delivery_id));
        }

        let recorded = match event {
            EngagementEvent::Open => self.deliveries.record_open(delivery_id, at).await?,
            EngagementEvent::Click => self.deliveries.record_click(delivery_id, at).await?,
        };
        let (delivery, change) = recorded.ok_or(EngagementError::NotFound(delivery_id))?;

        if change.is_empty() {
            EngagementMetrics::record_duplicate(event.as_str());
            tracing::debug!(event = event.as_str(), "Engagement already recorded");
            return Ok(EngagementReceipt::new(&delivery, change));
        }

        if !self.deliveries.bumps_campaign_engagement() {
            self.campaigns
                .add_engagement(
                    delivery.campaign_id,
                    change.opened as u64,
                    change.clicked as u64,
                )
                .await?;
        }
        if change.opened {
            EngagementMetrics::record_open();
        }
        if change.clicked {
            EngagementMetrics::record_click();
        }
        tracing::debug!(
            campaign_id = %delivery.campaign_id,
            event = event.as_str(),
            opened = change.opened,
            clicked = change.clicked,
            "Engagement recorded"
        );

        Ok(EngagementReceipt::new(&delivery, change))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::campaign::{Campaign, CampaignContent, MemoryCampaignStore};
    use crate::domain::delivery::{DeliveryQuery, MemoryDeliveryStore};
    use crate::domain::UserId;
    use async_trait::async_trait;

    struct Fixture {
        tracker: EngagementTracker,
        campaigns: Arc<MemoryCampaignStore>,
        deliveries: Arc<MemoryDeliveryStore>,
        campaign_id: Uuid,
    }

    async fn fixture() -> Fixture {
        let campaigns = Arc::new(MemoryCampaignStore::new());
        let deliveries = Arc::new(MemoryDeliveryStore::new());
        let campaign = Campaign::draft("biz", "owner", "Promo", CampaignContent::text("hi"), None);
        let campaign_id = campaign.id;
        campaigns.insert(campaign).await.unwrap();
        deliveries
            .upsert_many(campaign_id, &["u1".to_string(), "u2".to_string()])
            .await
            .unwrap();
        Fixture {
            tracker: EngagementTracker::new(deliveries.clone(), campaigns.clone()),
            campaigns,
            deliveries,
            campaign_id,
        }
    }

    async fn sent_delivery(f: &Fixture, recipient: &str) -> Uuid {
        let delivery = f
            .deliveries
            .unsent(f.campaign_id)
            .await
            .unwrap()
            .into_iter()
            .find(|d| d.recipient_id == recipient)
            .unwrap();
        f.deliveries
            .mark_sent(delivery.id, "m", 1, Utc::now())
            .await
            .unwrap();
        delivery.id
    }

    #[tokio::test]
    async fn test_open_twice_counts_once() {
        let f = fixture().await;
        let id = sent_delivery(&f, "u1").await;

        let first = f.tracker.mark_opened("u1", id, Utc::now()).await.unwrap();
        let second = f.tracker.mark_opened("u1", id, Utc::now()).await.unwrap();

        assert!(first.change.opened);
        assert!(second.change.is_empty());
        assert_eq!(second.opened_at, first.opened_at);
        let campaign = f.campaigns.get(f.campaign_id).await.unwrap().unwrap();
        assert_eq!(campaign.metrics.open_count, 1);
    }

    #[tokio::test]
    async fn test_click_before_open_sets_both() {
        let f = fixture().await;
        let id = sent_delivery(&f, "u1").await;

        let receipt = f.tracker.mark_clicked("u1", id, Utc::now()).await.unwrap();
        assert!(receipt.change.opened && receipt.change.clicked);
        assert_eq!(receipt.opened_at, receipt.clicked_at);

        // a late open is a no-op
        let late = f.tracker.mark_opened("u1", id, Utc::now()).await.unwrap();
        assert!(late.change.is_empty());

        let campaign = f.campaigns.get(f.campaign_id).await.unwrap().unwrap();
        assert_eq!(campaign.metrics.open_count, 1);
        assert_eq!(campaign.metrics.click_count, 1);
    }

    #[tokio::test]
    async fn test_wrong_recipient_is_rejected() {
        let f = fixture().await;
        let id = sent_delivery(&f, "u1").await;
        assert!(matches!(
            f.tracker.mark_opened("u2", id, Utc::now()).await,
            Err(EngagementError::NotOwner(_))
        ));
    }

    #[tokio::test]
    async fn test_unsent_and_unknown() {
        let f = fixture().await;
        let unsent = f.deliveries.unsent(f.campaign_id).await.unwrap()[0].clone();
        assert!(matches!(
            f.tracker
                .mark_clicked(&unsent.recipient_id, unsent.id, Utc::now())
                .await,
            Err(EngagementError::NotSent(_))
        ));
        assert!(matches!(
            f.tracker.mark_opened("u1", Uuid::new_v4(), Utc::now()).await,
            Err(EngagementError::NotFound(_))
        ));
    }

    /// Bumps campaign counters inside its own engagement write.
    struct CountingDeliveries {
        inner: MemoryDeliveryStore,
        campaigns: Arc<MemoryCampaignStore>,
    }

    impl CountingDeliveries {
        async fn bump(
            &self,
            recorded: &Option<(Delivery, EngagementChange)>,
        ) -> Result<(), StoreError> {
            if let Some((delivery, change)) = recorded {
                self.campaigns
                    .add_engagement(
                        delivery.campaign_id,
                        change.opened as u64,
                        change.clicked as u64,
                    )
                    .await?;
            }
            Ok(())
        }
    }

    #[async_trait]
    impl DeliveryStore for CountingDeliveries {
        fn backend_name(&self) -> &'static str {
            "counting"
        }

        fn bumps_campaign_engagement(&self) -> bool {
            true
        }

        async fn upsert_many(
            &self,
            campaign_id: Uuid,
            recipients: &[UserId],
        ) -> Result<usize, StoreError> {
            self.inner.upsert_many(campaign_id, recipients).await
        }

        async fn unsent(&self, campaign_id: Uuid) -> Result<Vec<Delivery>, StoreError> {
            self.inner.unsent(campaign_id).await
        }

        async fn mark_sent(
            &self,
            id: Uuid,
            message_id: &str,
            attempts: u32,
            at: DateTime<Utc>,
        ) -> Result<bool, StoreError> {
            self.inner.mark_sent(id, message_id, attempts, at).await
        }

        async fn mark_failed(
            &self,
            id: Uuid,
            attempts: u32,
            error: &str,
        ) -> Result<bool, StoreError> {
            self.inner.mark_failed(id, attempts, error).await
        }

        async fn get(&self, id: Uuid) -> Result<Option<Delivery>, StoreError> {
            self.inner.get(id).await
        }

        async fn list(
            &self,
            campaign_id: Uuid,
            query: &DeliveryQuery,
        ) -> Result<Vec<Delivery>, StoreError> {
            self.inner.list(campaign_id, query).await
        }

        async fn counts(&self, campaign_id: Uuid) -> Result<DeliveryCounts, StoreError> {
            self.inner.counts(campaign_id).await
        }

        async fn record_open(
            &self,
            id: Uuid,
            at: DateTime<Utc>,
        ) -> Result<Option<(Delivery, EngagementChange)>, StoreError> {
            let recorded = self.inner.record_open(id, at).await?;
            self.bump(&recorded).await?;
            Ok(recorded)
        }

        async fn record_click(
            &self,
            id: Uuid,
            at: DateTime<Utc>,
        ) -> Result<Option<(Delivery, EngagementChange)>, StoreError> {
            let recorded = self.inner.record_click(id, at).await?;
            self.bump(&recorded).await?;
            Ok(recorded)
        }

        async fn delete_for_campaign(&self, campaign_id: Uuid) -> Result<u64, StoreError> {
            self.inner.delete_for_campaign(campaign_id).await
        }
    }

    #[tokio::test]
    async fn test_store_owned_counters_are_not_bumped_twice() {
        let campaigns = Arc::new(MemoryCampaignStore::new());
        let campaign = Campaign::draft("biz", "owner", "Promo", CampaignContent::text("hi"), None);
        let campaign_id = campaign.id;
        campaigns.insert(campaign).await.unwrap();
        let deliveries = Arc::new(CountingDeliveries {
            inner: MemoryDeliveryStore::new(),
            campaigns: campaigns.clone(),
        });
        deliveries
            .upsert_many(campaign_id, &["u1".to_string()])
            .await
            .unwrap();
        let id = deliveries.unsent(campaign_id).await.unwrap()[0].id;
        deliveries.mark_sent(id, "m", 1, Utc::now()).await.unwrap();

        let tracker = EngagementTracker::new(deliveries.clone(), campaigns.clone());
        let clicked = tracker.mark_clicked("u1", id, Utc::now()).await.unwrap();
        assert!(clicked.change.opened && clicked.change.clicked);
        // a repeated callback after the first one landed changes nothing
        let retried = tracker.mark_clicked("u1", id, Utc::now()).await.unwrap();
        assert!(retried.change.is_empty());

        let stored = campaigns.get(campaign_id).await.unwrap().unwrap();
        assert_eq!(stored.metrics.open_count, 1);
        assert_eq!(stored.metrics.click_count, 1);
    }

    #[tokio::test]
    async fn test_stats_rates() {
        let f = fixture().await;
        let id = sent_delivery(&f, "u1").await;
        sent_delivery(&f, "u2").await;
        f.tracker.mark_clicked("u1", id, Utc::now()).await.unwrap();

        let stats = f.tracker.stats(f.campaign_id).await.unwrap();
        assert_eq!(stats.sent_count, 2);
        assert_eq!(stats.open_count, 1);
        assert!((stats.open_rate - 0.5).abs() < f64::EPSILON);
        assert!((stats.click_rate - 0.5).abs() < f64::EPSILON);
    }
}
