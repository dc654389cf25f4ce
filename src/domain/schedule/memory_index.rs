//! In-memory schedule index.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::index::{ScheduleEntry, ScheduleError, ScheduleIndex};

#[derive(Default)]
struct Timeline {
    ordered: BTreeSet<(DateTime<Utc>, Uuid)>,
    by_campaign: HashMap<Uuid, DateTime<Utc>>,
}

/// Ordered set keyed by `(due_at, campaign_id)` plus a reverse map so a
/// reschedule replaces the old entry instead of adding a second one.
#[derive(Default)]
pub struct MemoryScheduleIndex {
    timeline: Mutex<Timeline>,
}

impl MemoryScheduleIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScheduleIndex for MemoryScheduleIndex {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn arm(&self, campaign_id: Uuid, due_at: DateTime<Utc>) -> Result<(), ScheduleError> {
        let mut timeline = self.timeline.lock().await;
        if let Some(previous) = timeline.by_campaign.insert(campaign_id, due_at) {
            timeline.ordered.remove(&(previous, campaign_id));
        }
        timeline.ordered.insert((due_at, campaign_id));
        Ok(())
    }

    async fn disarm(&self, campaign_id: Uuid) -> Result<bool, ScheduleError> {
        let mut timeline = self.timeline.lock().await;
        match timeline.by_campaign.remove(&campaign_id) {
            Some(due_at) => {
                timeline.ordered.remove(&(due_at, campaign_id));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ScheduleEntry>, ScheduleError> {
        let timeline = self.timeline.lock().await;
        Ok(timeline
            .ordered
            .iter()
            .take_while(|(due_at, _)| *due_at <= now)
            .take(limit)
            .map(|(due_at, campaign_id)| ScheduleEntry {
                campaign_id: *campaign_id,
                due_at: *due_at,
            })
            .collect())
    }

    async fn entry(&self, campaign_id: Uuid) -> Result<Option<DateTime<Utc>>, ScheduleError> {
        Ok(self.timeline.lock().await.by_campaign.get(&campaign_id).copied())
    }

    async fn snapshot(&self, limit: usize) -> Result<Vec<ScheduleEntry>, ScheduleError> {
        let timeline = self.timeline.lock().await;
        Ok(timeline
            .ordered
            .iter()
            .take(limit)
            .map(|(due_at, campaign_id)| ScheduleEntry {
                campaign_id: *campaign_id,
                due_at: *due_at,
            })
            .collect())
    }

    async fn pending(&self) -> Result<usize, ScheduleError> {
        Ok(self.timeline.lock().await.by_campaign.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_rearm_replaces_entry() {
        let index = MemoryScheduleIndex::new();
        let id = Uuid::new_v4();
        let now = Utc::now();

        index.arm(id, now + Duration::minutes(5)).await.unwrap();
        index.arm(id, now + Duration::minutes(1)).await.unwrap();

        assert_eq!(index.pending().await.unwrap(), 1);
        assert_eq!(
            index.entry(id).await.unwrap(),
            Some(now + Duration::minutes(1))
        );
        assert!(index
            .due(now + Duration::minutes(2), 10)
            .await
            .unwrap()
            .iter()
            .any(|e| e.campaign_id == id));
    }

    #[tokio::test]
    async fn test_disarm_is_idempotent() {
        let index = MemoryScheduleIndex::new();
        let id = Uuid::new_v4();
        index.arm(id, Utc::now()).await.unwrap();

        assert!(index.disarm(id).await.unwrap());
        assert!(!index.disarm(id).await.unwrap());
        assert!(!index.disarm(Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn test_due_respects_time_and_limit() {
        let index = MemoryScheduleIndex::new();
        let now = Utc::now();
        for offset in [-3, -2, -1, 5] {
            index
                .arm(Uuid::new_v4(), now + Duration::seconds(offset))
                .await
                .unwrap();
        }

        let due = index.due(now, 10).await.unwrap();
        assert_eq!(due.len(), 3);
        assert!(due.windows(2).all(|w| w[0].due_at <= w[1].due_at));
        assert_eq!(index.due(now, 2).await.unwrap().len(), 2);
    }
}
