//! Schedule Trigger: keeps the index consistent with the campaign store.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::campaign::{CampaignStatus, CampaignStore};
use crate::domain::StoreError;
use crate::metrics::ScheduleMetrics;

use super::index::{ScheduleEntry, ScheduleError, ScheduleIndex};

/// Outcome of re-deriving the index from the campaign store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RebuildReport {
    /// Scheduled campaigns seen in the store
    pub scheduled: usize,
    /// Entries that were missing or at the wrong time and got (re-)armed
    pub armed: usize,
    /// Stale entries removed
    pub removed: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error(transparent)]
    Index(#[from] ScheduleError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Wraps a `ScheduleIndex` with the campaign store it mirrors.
///
/// The store's `status = scheduled` + `scheduled_at` is authoritative; the
/// index only decides when to look. Anything lost from the index is restored
/// by `rebuild`.
pub struct ScheduleTrigger {
    index: Arc<dyn ScheduleIndex>,
    campaigns: Arc<dyn CampaignStore>,
}

impl ScheduleTrigger {
    pub fn new(index: Arc<dyn ScheduleIndex>, campaigns: Arc<dyn CampaignStore>) -> Self {
        Self { index, campaigns }
    }

    pub fn backend_name(&self) -> &'static str {
        self.index.backend_name()
    }

    pub async fn arm(&self, campaign_id: Uuid, due_at: DateTime<Utc>) -> Result<(), ScheduleError> {
        self.index.arm(campaign_id, due_at).await?;
        ScheduleMetrics::record_armed();
        tracing::debug!(campaign_id = %campaign_id, due_at = %due_at, "Schedule entry armed");
        Ok(())
    }

    /// Arm at `due_at`, then re-read the campaign and correct the entry if the
    /// stored schedule moved meanwhile.
    ///
    /// Each writer re-checks after its own arm, so the entry written last
    /// always matches the final stored `scheduled_at`.
    pub async fn arm_checked(
        &self,
        campaign_id: Uuid,
        due_at: DateTime<Utc>,
    ) -> Result<(), TriggerError> {
        self.arm(campaign_id, due_at).await?;

        let current = self.campaigns.get(campaign_id).await?;
        match current
            .filter(|c| c.status == CampaignStatus::Scheduled)
            .and_then(|c| c.scheduled_at)
        {
            Some(stored) if same_instant(stored, due_at) => {}
            Some(stored) => {
                tracing::debug!(
                    campaign_id = %campaign_id,
                    armed = %due_at,
                    stored = %stored,
                    "Schedule moved while arming, re-arming at stored time"
                );
                self.arm(campaign_id, stored).await?;
            }
            None => {
                self.disarm(campaign_id).await?;
            }
        }
        Ok(())
    }

    /// Remove a campaign's entry. Disarming a fired or unknown entry is a no-op.
    pub async fn disarm(&self, campaign_id: Uuid) -> Result<bool, ScheduleError> {
        let removed = self.index.disarm(campaign_id).await?;
        if removed {
            ScheduleMetrics::record_disarmed();
            tracing::debug!(campaign_id = %campaign_id, "Schedule entry disarmed");
        }
        Ok(removed)
    }

    pub async fn due_now(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ScheduleEntry>, ScheduleError> {
        self.index.due(now, limit).await
    }

    pub async fn entry(&self, campaign_id: Uuid) -> Result<Option<DateTime<Utc>>, ScheduleError> {
        self.index.entry(campaign_id).await
    }

    pub async fn pending(&self) -> Result<usize, ScheduleError> {
        let pending = self.index.pending().await?;
        ScheduleMetrics::set_pending(pending);
        Ok(pending)
    }

    /// Re-derive the index from the campaign store.
    ///
    /// Arms every scheduled campaign whose entry is missing or differs from
    /// its stored time and removes entries whose campaign is no longer
    /// scheduled. Campaigns rescheduled or scheduled while the rebuild runs
    /// are re-checked before their entry is changed.
    #[tracing::instrument(name = "schedule.rebuild", skip(self))]
    pub async fn rebuild(&self, scan_limit: usize) -> Result<RebuildReport, TriggerError> {
        let scheduled: HashMap<Uuid, DateTime<Utc>> =
            self.campaigns.scheduled(scan_limit).await?.into_iter().collect();

        let mut report = RebuildReport {
            scheduled: scheduled.len(),
            ..Default::default()
        };
        for (campaign_id, due_at) in &scheduled {
            let indexed = self.index.entry(*campaign_id).await?;
            if indexed.is_some_and(|at| same_instant(at, *due_at)) {
                continue;
            }
            self.arm_checked(*campaign_id, *due_at).await?;
            report.armed += 1;
        }

        for entry in self.index.snapshot(scan_limit).await? {
            if scheduled.contains_key(&entry.campaign_id) {
                continue;
            }
            let still_scheduled = self
                .campaigns
                .get(entry.campaign_id)
                .await?
                .is_some_and(|c| c.status == CampaignStatus::Scheduled);
            if !still_scheduled && self.disarm(entry.campaign_id).await? {
                report.removed += 1;
            }
        }

        self.pending().await?;
        tracing::info!(
            scheduled = report.scheduled,
            armed = report.armed,
            removed = report.removed,
            backend = self.backend_name(),
            "Schedule index rebuilt from campaign store"
        );
        Ok(report)
    }
}

/// Index backends may keep only millisecond precision.
fn same_instant(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    a.timestamp_millis() == b.timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::campaign::{
        Campaign, CampaignContent, MemoryCampaignStore, StatusChange, CANCELLABLE,
    };
    use crate::domain::schedule::MemoryScheduleIndex;
    use async_trait::async_trait;
    use chrono::Duration;

    async fn scheduled_campaign(store: &MemoryCampaignStore, at: DateTime<Utc>) -> Uuid {
        let c = Campaign::draft("biz", "owner", "Promo", CampaignContent::text("hi"), None);
        let id = c.id;
        store.insert(c).await.unwrap();
        store
            .transition(id, &StatusChange::schedule(at))
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn test_rebuild_restores_lost_entries_and_drops_stale() {
        let store = Arc::new(MemoryCampaignStore::new());
        let index = Arc::new(MemoryScheduleIndex::new());
        let trigger = ScheduleTrigger::new(index.clone(), store.clone());
        let now = Utc::now();

        let kept = scheduled_campaign(&store, now + Duration::minutes(10)).await;
        let cancelled = scheduled_campaign(&store, now + Duration::minutes(20)).await;
        trigger.arm(cancelled, now + Duration::minutes(20)).await.unwrap();
        store
            .transition(
                cancelled,
                &StatusChange::to(CANCELLABLE, CampaignStatus::Cancelled),
            )
            .await
            .unwrap();

        let report = trigger.rebuild(1_000).await.unwrap();
        assert_eq!(
            report,
            RebuildReport {
                scheduled: 1,
                armed: 1,
                removed: 1
            }
        );
        assert_eq!(
            trigger.entry(kept).await.unwrap(),
            Some(now + Duration::minutes(10))
        );
        assert_eq!(trigger.entry(cancelled).await.unwrap(), None);
    }

    /// Keeps only whole milliseconds, like a sorted-set score.
    struct MillisIndex(MemoryScheduleIndex);

    #[async_trait]
    impl ScheduleIndex for MillisIndex {
        fn backend_name(&self) -> &'static str {
            "millis"
        }

        async fn arm(&self, campaign_id: Uuid, due_at: DateTime<Utc>) -> Result<(), ScheduleError> {
            let truncated = DateTime::from_timestamp_millis(due_at.timestamp_millis())
                .unwrap_or(due_at);
            self.0.arm(campaign_id, truncated).await
        }

        async fn disarm(&self, campaign_id: Uuid) -> Result<bool, ScheduleError> {
            self.0.disarm(campaign_id).await
        }

        async fn due(
            &self,
            now: DateTime<Utc>,
            limit: usize,
        ) -> Result<Vec<ScheduleEntry>, ScheduleError> {
            self.0.due(now, limit).await
        }

        async fn entry(&self, campaign_id: Uuid) -> Result<Option<DateTime<Utc>>, ScheduleError> {
            self.0.entry(campaign_id).await
        }

        async fn pending(&self) -> Result<usize, ScheduleError> {
            self.0.pending().await
        }

        async fn snapshot(&self, limit: usize) -> Result<Vec<ScheduleEntry>, ScheduleError> {
            self.0.snapshot(limit).await
        }
    }

    #[tokio::test]
    async fn test_rebuild_ignores_sub_millisecond_differences() {
        let store = Arc::new(MemoryCampaignStore::new());
        let trigger = ScheduleTrigger::new(
            Arc::new(MillisIndex(MemoryScheduleIndex::new())),
            store.clone(),
        );
        let at = DateTime::from_timestamp_micros(
            (Utc::now() + Duration::minutes(10)).timestamp_micros() / 1000 * 1000 + 123,
        )
        .unwrap();
        scheduled_campaign(&store, at).await;

        let first = trigger.rebuild(1_000).await.unwrap();
        assert_eq!(first.armed, 1);
        let second = trigger.rebuild(1_000).await.unwrap();
        assert_eq!(second.scheduled, 1);
        assert_eq!(second.armed, 0);
    }

    #[tokio::test]
    async fn test_arm_with_outdated_time_follows_store() {
        let store = Arc::new(MemoryCampaignStore::new());
        let trigger = ScheduleTrigger::new(Arc::new(MemoryScheduleIndex::new()), store.clone());
        let now = Utc::now();
        let late = now + Duration::hours(2);
        let early = now + Duration::minutes(5);

        // Rescheduled earlier after someone read the old time
        let id = scheduled_campaign(&store, late).await;
        store
            .transition(id, &StatusChange::schedule(early))
            .await
            .unwrap();
        trigger.arm_checked(id, late).await.unwrap();
        assert_eq!(trigger.entry(id).await.unwrap(), Some(early));

        // Cancelled before the stale arm landed
        store
            .transition(id, &StatusChange::to(CANCELLABLE, CampaignStatus::Cancelled))
            .await
            .unwrap();
        trigger.arm_checked(id, late).await.unwrap();
        assert_eq!(trigger.entry(id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_disarm_unknown_is_noop() {
        let trigger = ScheduleTrigger::new(
            Arc::new(MemoryScheduleIndex::new()),
            Arc::new(MemoryCampaignStore::new()),
        );
        assert!(!trigger.disarm(Uuid::new_v4()).await.unwrap());
    }
}
