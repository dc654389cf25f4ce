use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::domain::campaign::{CampaignStatus, CampaignStore};
use crate::domain::delivery::{DispatchError, DispatchOutcome, Dispatcher};
use crate::domain::schedule::{ScheduleEntry, ScheduleTrigger};
use crate::metrics::ScheduleMetrics;

/// Background due-scan and recovery loop.
///
/// On start the schedule index is rebuilt from the campaign store and
/// `sending` campaigns whose dispatch heartbeat has lapsed are taken over.
/// Afterwards due entries are polled every `poll_interval_ms`, and the
/// rebuild plus the stale `sending` sweep repeat every
/// `reconcile_interval_secs`.
pub struct SchedulerTask {
    config: SchedulerConfig,
    trigger: Arc<ScheduleTrigger>,
    dispatcher: Arc<Dispatcher>,
    campaigns: Arc<dyn CampaignStore>,
    shutdown: broadcast::Receiver<()>,
    permits: Arc<Semaphore>,
    running: JoinSet<()>,
}

impl SchedulerTask {
    pub fn new(
        config: SchedulerConfig,
        trigger: Arc<ScheduleTrigger>,
        dispatcher: Arc<Dispatcher>,
        campaigns: Arc<dyn CampaignStore>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_campaigns.max(1)));
        Self {
            config,
            trigger,
            dispatcher,
            campaigns,
            shutdown,
            permits,
            running: JoinSet::new(),
        }
    }

    /// Run until the shutdown signal, then wait for started dispatches.
    pub async fn run(mut self) {
        let mut poll_timer =
            tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms.max(10)));
        poll_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut reconcile_timer =
            tokio::time::interval(Duration::from_secs(self.config.reconcile_interval_secs.max(1)));
        reconcile_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Skip immediate first tick; startup recovery covers it
        reconcile_timer.tick().await;

        tracing::info!(
            backend = self.trigger.backend_name(),
            poll_interval_ms = self.config.poll_interval_ms,
            reconcile_interval_secs = self.config.reconcile_interval_secs,
            max_concurrent_campaigns = self.config.max_concurrent_campaigns,
            "Scheduler task started"
        );

        self.reconcile().await;

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Scheduler task received shutdown signal");
                    break;
                }
                _ = poll_timer.tick() => {
                    self.scan_due().await;
                }
                _ = reconcile_timer.tick() => {
                    self.reconcile().await;
                }
                Some(joined) = self.running.join_next(), if !self.running.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Dispatch task panicked");
                    }
                }
            }
        }

        if !self.running.is_empty() {
            tracing::info!(
                in_flight = self.running.len(),
                "Waiting for in-flight dispatches to finish"
            );
        }
        while self.running.join_next().await.is_some() {}

        tracing::info!("Scheduler task stopped");
    }

    /// Fire every due entry a permit is available for.
    async fn scan_due(&mut self) {
        let available = self.permits.available_permits();
        if available == 0 {
            return;
        }

        let now = Utc::now();
        let due = match self
            .trigger
            .due_now(now, available.min(self.config.scan_batch_size.max(1)))
            .await
        {
            Ok(due) => due,
            Err(e) => {
                tracing::warn!(error = %e, "Due scan failed");
                return;
            }
        };

        for entry in due {
            let Ok(permit) = self.permits.clone().try_acquire_owned() else {
                break;
            };
            // Whoever removes the entry fires it; a lost race means another worker has it
            match self.trigger.disarm(entry.campaign_id).await {
                Ok(true) => self.fire(entry, permit),
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        campaign_id = %entry.campaign_id,
                        error = %e,
                        "Failed to take due entry"
                    );
                }
            }
        }
    }

    fn fire(&mut self, entry: ScheduleEntry, permit: OwnedSemaphorePermit) {
        let lag = (Utc::now() - entry.due_at).num_milliseconds().max(0) as f64 / 1000.0;
        ScheduleMetrics::record_fired(lag);

        let dispatcher = self.dispatcher.clone();
        let trigger = self.trigger.clone();
        let campaign_id = entry.campaign_id;
        self.running.spawn(async move {
            let _permit = permit;
            let outcome = dispatcher.fire_due(campaign_id, Utc::now()).await;
            match outcome {
                Ok(DispatchOutcome::NotDue {
                    scheduled_at: Some(at),
                }) => {
                    if let Err(e) = trigger.arm_checked(campaign_id, at).await {
                        tracing::warn!(campaign_id = %campaign_id, error = %e, "Failed to re-arm");
                    }
                }
                Ok(outcome) => log_outcome(campaign_id, &outcome),
                Err(DispatchError::NotFound(_)) => {
                    tracing::debug!(campaign_id = %campaign_id, "Fired campaign no longer exists");
                }
                Err(e) => {
                    tracing::error!(
                        campaign_id = %campaign_id,
                        error = %e,
                        "Scheduled dispatch failed, campaign will be re-driven"
                    );
                }
            }
        });
    }

    /// Rebuild the index and take over `sending` campaigns whose heartbeat is
    /// older than `stale_dispatch_secs`.
    async fn reconcile(&mut self) {
        match self.trigger.rebuild(self.config.scan_batch_size.max(1)).await {
            Ok(report) if report.armed > 0 || report.removed > 0 => {
                tracing::info!(
                    armed = report.armed,
                    removed = report.removed,
                    "Schedule index reconciled"
                );
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Schedule reconcile failed"),
        }

        let sending = match self
            .campaigns
            .with_status(CampaignStatus::Sending, self.config.scan_batch_size.max(1))
            .await
        {
            Ok(sending) => sending,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list sending campaigns");
                return;
            }
        };

        let stale_before =
            Utc::now() - chrono::Duration::seconds(self.config.stale_dispatch_secs as i64);
        for campaign in sending {
            if self.dispatcher.is_in_flight(campaign.id) || campaign.updated_at >= stale_before {
                continue;
            }
            let Ok(permit) = self.permits.clone().try_acquire_owned() else {
                break;
            };
            self.resume(campaign.id, stale_before, permit);
        }
    }

    /// The claim inside `Dispatcher::resume` re-checks staleness atomically.
    fn resume(
        &mut self,
        campaign_id: Uuid,
        stale_before: DateTime<Utc>,
        permit: OwnedSemaphorePermit,
    ) {
        let dispatcher = self.dispatcher.clone();
        self.running.spawn(async move {
            let _permit = permit;
            match dispatcher.resume(campaign_id, stale_before).await {
                Ok(outcome) => log_outcome(campaign_id, &outcome),
                Err(e) => {
                    tracing::error!(campaign_id = %campaign_id, error = %e, "Resumed dispatch failed");
                }
            }
        });
    }
}

fn log_outcome(campaign_id: Uuid, outcome: &DispatchOutcome) {
    match outcome {
        DispatchOutcome::Finished(summary) => {
            tracing::info!(
                campaign_id = %campaign_id,
                status = %summary.status,
                sent = summary.sent_count,
                failed = summary.failed_count,
                "Background dispatch finished"
            );
        }
        other => {
            tracing::debug!(campaign_id = %campaign_id, outcome = ?other, "Background dispatch skipped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatchConfig;
    use crate::domain::audience::{AudienceResolver, MemoryAudienceDirectory, TargetingSpec};
    use crate::domain::campaign::{Campaign, CampaignContent, MemoryCampaignStore, StatusChange};
    use crate::domain::delivery::{LogMessageSender, MemoryDeliveryStore};
    use crate::domain::schedule::MemoryScheduleIndex;

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            poll_interval_ms: 20,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_due_campaign_is_dispatched_and_shutdown_stops_task() {
        let directory = Arc::new(MemoryAudienceDirectory::new());
        directory.add_follower("biz", "u1");
        let campaigns = Arc::new(MemoryCampaignStore::new());
        let trigger = Arc::new(ScheduleTrigger::new(
            Arc::new(MemoryScheduleIndex::new()),
            campaigns.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            campaigns.clone(),
            Arc::new(MemoryDeliveryStore::new()),
            Arc::new(AudienceResolver::with_timeout(directory, Duration::from_secs(1))),
            Arc::new(LogMessageSender),
            DispatchConfig::default(),
        ));

        let campaign = Campaign::draft(
            "biz",
            "owner",
            "Flash sale",
            CampaignContent::text("now"),
            Some(TargetingSpec::All),
        );
        let id = campaign.id;
        campaigns.insert(campaign).await.unwrap();
        let at = Utc::now() + chrono::Duration::milliseconds(50);
        campaigns
            .transition(id, &StatusChange::schedule(at))
            .await
            .unwrap();
        trigger.arm(id, at).await.unwrap();

        let (tx, rx) = broadcast::channel(1);
        let task = SchedulerTask::new(config(), trigger.clone(), dispatcher, campaigns.clone(), rx);
        let handle = tokio::spawn(task.run());

        let mut status = CampaignStatus::Scheduled;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            status = campaigns.get(id).await.unwrap().unwrap().status;
            if status == CampaignStatus::Completed {
                break;
            }
        }
        assert_eq!(status, CampaignStatus::Completed);
        assert_eq!(trigger.pending().await.unwrap(), 0);

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
