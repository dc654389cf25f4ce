//! In-memory delivery store backed by DashMap.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::domain::{StoreError, UserId};

use super::model::{
    Delivery, DeliveryCounts, DeliveryQuery, DeliveryStatus, EngagementChange,
};
use super::store::DeliveryStore;

/// Deliveries by ID plus a per-campaign `recipient -> delivery` index.
///
/// The campaign index entry is held while rows are created, which keeps
/// `(campaign, recipient)` unique under concurrent upserts.
#[derive(Default)]
pub struct MemoryDeliveryStore {
    deliveries: DashMap<Uuid, Delivery>,
    by_campaign: DashMap<Uuid, BTreeMap<UserId, Uuid>>,
}

impl MemoryDeliveryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn campaign_rows(&self, campaign_id: Uuid) -> Vec<Delivery> {
        let ids: Vec<Uuid> = self
            .by_campaign
            .get(&campaign_id)
            .map(|index| index.values().copied().collect())
            .unwrap_or_default();
        ids.iter()
            .filter_map(|id| self.deliveries.get(id).map(|d| d.clone()))
            .collect()
    }

    fn engage<F>(&self, id: Uuid, apply: F) -> Option<(Delivery, EngagementChange)>
    where
        F: FnOnce(&mut Delivery) -> EngagementChange,
    {
        self.deliveries.get_mut(&id).map(|mut d| {
            let change = apply(d.value_mut());
            (d.clone(), change)
        })
    }
}

#[async_trait]
impl DeliveryStore for MemoryDeliveryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn upsert_many(
        &self,
        campaign_id: Uuid,
        recipients: &[UserId],
    ) -> Result<usize, StoreError> {
        let mut index = self.by_campaign.entry(campaign_id).or_default();
        let mut created = 0;
        for recipient in recipients {
            if index.contains_key(recipient) {
                continue;
            }
            let delivery = Delivery::new(campaign_id, recipient.clone());
            index.insert(recipient.clone(), delivery.id);
            self.deliveries.insert(delivery.id, delivery);
            created += 1;
        }
        Ok(created)
    }

    async fn unsent(&self, campaign_id: Uuid) -> Result<Vec<Delivery>, StoreError> {
        Ok(self
            .campaign_rows(campaign_id)
            .into_iter()
            .filter(|d| !d.is_sent())
            .collect())
    }

    async fn mark_sent(
        &self,
        id: Uuid,
        message_id: &str,
        attempts: u32,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(match self.deliveries.get_mut(&id) {
            Some(mut d) if !d.is_sent() => {
                d.status = DeliveryStatus::Sent;
                d.message_id = Some(message_id.to_string());
                d.attempts = attempts;
                d.last_error = None;
                d.sent_at = Some(at);
                true
            }
            _ => false,
        })
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        attempts: u32,
        error: &str,
    ) -> Result<bool, StoreError> {
        Ok(match self.deliveries.get_mut(&id) {
            Some(mut d) if !d.is_sent() => {
                d.status = DeliveryStatus::Failed;
                d.attempts = attempts;
                d.last_error = Some(error.to_string());
                true
            }
            _ => false,
        })
    }

    async fn get(&self, id: Uuid) -> Result<Option<Delivery>, StoreError> {
        Ok(self.deliveries.get(&id).map(|d| d.clone()))
    }

    async fn list(
        &self,
        campaign_id: Uuid,
        query: &DeliveryQuery,
    ) -> Result<Vec<Delivery>, StoreError> {
        Ok(self
            .campaign_rows(campaign_id)
            .into_iter()
            .filter(|d| query.filter.matches(d))
            .skip(query.offset)
            .take(query.limit)
            .collect())
    }

    async fn counts(&self, campaign_id: Uuid) -> Result<DeliveryCounts, StoreError> {
        Ok(DeliveryCounts::tally(self.campaign_rows(campaign_id)))
    }

    async fn record_open(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<(Delivery, EngagementChange)>, StoreError> {
        Ok(self.engage(id, |d| d.apply_open(at)))
    }

    async fn record_click(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<(Delivery, EngagementChange)>, StoreError> {
        Ok(self.engage(id, |d| d.apply_click(at)))
    }

    async fn delete_for_campaign(&self, campaign_id: Uuid) -> Result<u64, StoreError> {
        let Some((_, index)) = self.by_campaign.remove(&campaign_id) else {
            return Ok(0);
        };
        let mut removed = 0;
        for id in index.values() {
            if self.deliveries.remove(id).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::delivery::DeliveryFilter;
    use std::sync::Arc;

    fn users(ids: &[&str]) -> Vec<UserId> {
        ids.iter().map(|u| u.to_string()).collect()
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = MemoryDeliveryStore::new();
        let campaign = Uuid::new_v4();

        assert_eq!(store.upsert_many(campaign, &users(&["u1", "u2"])).await.unwrap(), 2);
        assert_eq!(store.upsert_many(campaign, &users(&["u2", "u3"])).await.unwrap(), 1);
        assert_eq!(store.counts(campaign).await.unwrap().total, 3);
    }

    #[tokio::test]
    async fn test_concurrent_upserts_do_not_duplicate() {
        let store = Arc::new(MemoryDeliveryStore::new());
        let campaign = Uuid::new_v4();
        let recipients = users(&["u1", "u2", "u3", "u4"]);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let store = Arc::clone(&store);
            let recipients = recipients.clone();
            handles.push(tokio::spawn(async move {
                store.upsert_many(campaign, &recipients).await.unwrap()
            }));
        }
        let mut created = 0;
        for handle in handles {
            created += handle.await.unwrap();
        }

        assert_eq!(created, 4);
        assert_eq!(store.counts(campaign).await.unwrap().total, 4);
    }

    #[tokio::test]
    async fn test_mark_sent_once() {
        let store = MemoryDeliveryStore::new();
        let campaign = Uuid::new_v4();
        store.upsert_many(campaign, &users(&["u1"])).await.unwrap();
        let delivery = store.unsent(campaign).await.unwrap().remove(0);

        assert!(store.mark_sent(delivery.id, "m-1", 1, Utc::now()).await.unwrap());
        assert!(!store.mark_sent(delivery.id, "m-2", 2, Utc::now()).await.unwrap());
        assert!(!store.mark_failed(delivery.id, 3, "late").await.unwrap());

        let stored = store.get(delivery.id).await.unwrap().unwrap();
        assert_eq!(stored.message_id.as_deref(), Some("m-1"));
        assert!(store.unsent(campaign).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_filters_and_pages() {
        let store = MemoryDeliveryStore::new();
        let campaign = Uuid::new_v4();
        store
            .upsert_many(campaign, &users(&["a", "b", "c"]))
            .await
            .unwrap();
        let first = store.unsent(campaign).await.unwrap().remove(0);
        store.mark_failed(first.id, 3, "timeout").await.unwrap();

        let failed = store
            .list(
                campaign,
                &DeliveryQuery {
                    filter: DeliveryFilter::Failed,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].last_error.as_deref(), Some("timeout"));

        let page = store
            .list(
                campaign,
                &DeliveryQuery {
                    limit: 2,
                    offset: 1,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(
            page.iter().map(|d| d.recipient_id.as_str()).collect::<Vec<_>>(),
            vec!["b", "c"]
        );
    }

    #[tokio::test]
    async fn test_delete_for_campaign() {
        let store = MemoryDeliveryStore::new();
        let campaign = Uuid::new_v4();
        store.upsert_many(campaign, &users(&["a", "b"])).await.unwrap();
        assert_eq!(store.delete_for_campaign(campaign).await.unwrap(), 2);
        assert_eq!(store.counts(campaign).await.unwrap(), DeliveryCounts::default());
    }
}
