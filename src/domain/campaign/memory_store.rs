//! In-memory campaign store backed by DashMap.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::domain::StoreError;

use super::model::{
    Campaign, CampaignPatch, CampaignQuery, CampaignStatus, DispatchTally, StatusChange,
    TransitionOutcome,
};
use super::store::CampaignStore;

/// In-memory campaign store.
///
/// Guards run under the DashMap shard lock held by `get_mut`, which makes
/// every conditional write atomic with respect to other callers.
#[derive(Default)]
pub struct MemoryCampaignStore {
    campaigns: DashMap<Uuid, Campaign>,
}

impl MemoryCampaignStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.campaigns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.campaigns.is_empty()
    }

    fn guarded<F>(&self, id: Uuid, write: F) -> TransitionOutcome
    where
        F: FnOnce(&mut Campaign) -> bool,
    {
        match self.campaigns.get_mut(&id) {
            Some(mut entry) => {
                if write(entry.value_mut()) {
                    TransitionOutcome::Applied(entry.clone())
                } else {
                    TransitionOutcome::Rejected(entry.clone())
                }
            }
            None => TransitionOutcome::Missing,
        }
    }
}

#[async_trait]
impl CampaignStore for MemoryCampaignStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn insert(&self, campaign: Campaign) -> Result<Campaign, StoreError> {
        self.campaigns.insert(campaign.id, campaign.clone());
        Ok(campaign)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Campaign>, StoreError> {
        Ok(self.campaigns.get(&id).map(|c| c.clone()))
    }

    async fn list(
        &self,
        business_id: &str,
        query: &CampaignQuery,
    ) -> Result<Vec<Campaign>, StoreError> {
        let mut matches: Vec<Campaign> = self
            .campaigns
            .iter()
            .filter(|c| c.business_id == business_id)
            .filter(|c| query.status.map_or(true, |s| c.status == s))
            .map(|c| c.clone())
            .collect();

        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));

        Ok(matches
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect())
    }

    async fn update_details(
        &self,
        id: Uuid,
        patch: &CampaignPatch,
        allowed: &'static [CampaignStatus],
    ) -> Result<TransitionOutcome, StoreError> {
        Ok(self.guarded(id, |c| {
            if !allowed.contains(&c.status) {
                return false;
            }
            patch.apply(c);
            true
        }))
    }

    async fn transition(
        &self,
        id: Uuid,
        change: &StatusChange,
    ) -> Result<TransitionOutcome, StoreError> {
        Ok(self.guarded(id, |c| {
            if !change.permits(c) {
                return false;
            }
            change.apply(c);
            true
        }))
    }

    async fn claim_stale(
        &self,
        id: Uuid,
        stale_before: DateTime<Utc>,
    ) -> Result<TransitionOutcome, StoreError> {
        Ok(self.guarded(id, |c| {
            if c.status != CampaignStatus::Sending || c.updated_at >= stale_before {
                return false;
            }
            c.updated_at = Utc::now();
            true
        }))
    }

    async fn heartbeat(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(matches!(
            self.guarded(id, |c| {
                if c.status != CampaignStatus::Sending {
                    return false;
                }
                c.updated_at = Utc::now();
                true
            }),
            TransitionOutcome::Applied(_)
        ))
    }

    async fn set_progress(
        &self,
        id: Uuid,
        recipient_count: u64,
        sent_count: u64,
    ) -> Result<(), StoreError> {
        self.guarded(id, |c| {
            if c.status != CampaignStatus::Sending {
                return false;
            }
            c.metrics.recipient_count = recipient_count;
            c.metrics.sent_count = sent_count;
            c.updated_at = Utc::now();
            true
        });
        Ok(())
    }

    async fn add_sent(&self, id: Uuid, delta: i64) -> Result<(), StoreError> {
        self.guarded(id, |c| {
            if c.status != CampaignStatus::Sending {
                return false;
            }
            c.metrics.sent_count = c.metrics.sent_count.saturating_add_signed(delta);
            c.updated_at = Utc::now();
            true
        });
        Ok(())
    }

    async fn complete_dispatch(
        &self,
        id: Uuid,
        tally: DispatchTally,
        to: CampaignStatus,
    ) -> Result<TransitionOutcome, StoreError> {
        Ok(self.guarded(id, |c| {
            if c.status != CampaignStatus::Sending || !c.status.can_transition_to(to) {
                return false;
            }
            let now = Utc::now();
            c.status = to;
            c.metrics.recipient_count = tally.recipient_count;
            c.metrics.sent_count = tally.sent_count;
            c.metrics.failed_count = tally.failed_count;
            if c.sent_at.is_none() && to == CampaignStatus::Completed {
                c.sent_at = Some(now);
            }
            c.updated_at = now;
            true
        }))
    }

    async fn add_engagement(&self, id: Uuid, opens: u64, clicks: u64) -> Result<(), StoreError> {
        if let Some(mut c) = self.campaigns.get_mut(&id) {
            c.metrics.open_count += opens;
            c.metrics.click_count += clicks;
        }
        Ok(())
    }

    async fn delete(
        &self,
        id: Uuid,
        allowed: &'static [CampaignStatus],
    ) -> Result<TransitionOutcome, StoreError> {
        if let Some((_, removed)) = self
            .campaigns
            .remove_if(&id, |_, c| allowed.contains(&c.status))
        {
            return Ok(TransitionOutcome::Applied(removed));
        }
        Ok(match self.campaigns.get(&id) {
            Some(c) => TransitionOutcome::Rejected(c.clone()),
            None => TransitionOutcome::Missing,
        })
    }

    async fn scheduled(&self, limit: usize) -> Result<Vec<(Uuid, DateTime<Utc>)>, StoreError> {
        let mut entries: Vec<(Uuid, DateTime<Utc>)> = self
            .campaigns
            .iter()
            .filter(|c| c.status == CampaignStatus::Scheduled)
            .filter_map(|c| c.scheduled_at.map(|at| (c.id, at)))
            .collect();
        entries.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));
        entries.truncate(limit);
        Ok(entries)
    }

    async fn with_status(
        &self,
        status: CampaignStatus,
        limit: usize,
    ) -> Result<Vec<Campaign>, StoreError> {
        let mut matches: Vec<Campaign> = self
            .campaigns
            .iter()
            .filter(|c| c.status == status)
            .map(|c| c.clone())
            .collect();
        matches.sort_by_key(|c| c.updated_at);
        matches.truncate(limit);
        Ok(matches)
    }
}
