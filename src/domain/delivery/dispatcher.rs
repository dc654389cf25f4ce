use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::backoff::{BackoffConfig, ExponentialBackoff};
use crate::config::DispatchConfig;
use crate::domain::audience::{AudienceError, AudienceResolver};
use crate::domain::campaign::{
    Campaign, CampaignContent, CampaignStatus, CampaignStore, DispatchTally, StatusChange,
    TransitionOutcome, DISPATCHABLE,
};
use crate::domain::{StoreError, UserId};
use crate::metrics::DispatchMetrics;

use super::model::Delivery;
use super::sender::{MessageSender, OutboundMessage, SendError};
use super::store::DeliveryStore;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Campaign not found: {0}")]
    NotFound(Uuid),

    /// Persistence failed mid-dispatch; the campaign stays `sending` and is re-driven later
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Totals for one finished fan-out.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchSummary {
    pub campaign_id: Uuid,
    pub status: CampaignStatus,
    pub recipient_count: u64,
    pub sent_count: u64,
    pub failed_count: u64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// This call ran the fan-out to completion
    Finished(DispatchSummary),
    /// Another caller owns (or already finished) this campaign's dispatch
    AlreadyHandled { status: CampaignStatus },
    /// A scheduled fire arrived before the stored `scheduled_at`
    NotDue { scheduled_at: Option<DateTime<Utc>> },
}

/// Statistics for the dispatcher
#[derive(Debug, Default)]
pub struct DispatcherStats {
    pub campaigns_completed: AtomicU64,
    pub campaigns_failed: AtomicU64,
    pub campaigns_skipped: AtomicU64,
    pub deliveries_sent: AtomicU64,
    pub deliveries_failed: AtomicU64,
    pub send_retries: AtomicU64,
}

impl DispatcherStats {
    pub fn snapshot(&self) -> DispatcherStatsSnapshot {
        DispatcherStatsSnapshot {
            campaigns_completed: self.campaigns_completed.load(Ordering::Relaxed),
            campaigns_failed: self.campaigns_failed.load(Ordering::Relaxed),
            campaigns_skipped: self.campaigns_skipped.load(Ordering::Relaxed),
            deliveries_sent: self.deliveries_sent.load(Ordering::Relaxed),
            deliveries_failed: self.deliveries_failed.load(Ordering::Relaxed),
            send_retries: self.send_retries.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of dispatcher statistics
#[derive(Debug, Clone, Serialize)]
pub struct DispatcherStatsSnapshot {
    pub campaigns_completed: u64,
    pub campaigns_failed: u64,
    pub campaigns_skipped: u64,
    pub deliveries_sent: u64,
    pub deliveries_failed: u64,
    pub send_retries: u64,
}

/// Marks a campaign as owned by this process until dropped.
struct InFlightGuard<'a> {
    in_flight: &'a DashSet<Uuid>,
    campaign_id: Uuid,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(in_flight: &'a DashSet<Uuid>, campaign_id: Uuid) -> Option<Self> {
        if !in_flight.insert(campaign_id) {
            return None;
        }
        DispatchMetrics::campaign_started();
        Some(Self {
            in_flight,
            campaign_id,
        })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.remove(&self.campaign_id);
        DispatchMetrics::campaign_finished();
    }
}

struct SendAttempt {
    campaign_id: Uuid,
    delivery_id: Uuid,
    recipient_id: UserId,
    attempts: u32,
    latency: Duration,
    result: Result<String, SendError>,
}

/// Dispatcher / fan-out engine.
///
/// The `draft|scheduled → sending` transition is the mutual-exclusion point:
/// whoever applies it runs the fan-out, everyone else gets `AlreadyHandled`.
/// While it runs the fan-out keeps the campaign's `updated_at` fresh, and a
/// stranded `sending` campaign is only taken over through `claim_stale` once
/// that heartbeat has lapsed. Deliveries are upserted, so a taken-over
/// campaign only sends what is still unsent.
pub struct Dispatcher {
    campaigns: Arc<dyn CampaignStore>,
    deliveries: Arc<dyn DeliveryStore>,
    resolver: Arc<AudienceResolver>,
    sender: Arc<dyn MessageSender>,
    config: DispatchConfig,
    in_flight: DashSet<Uuid>,
    stats: DispatcherStats,
}

impl Dispatcher {
    pub fn new(
        campaigns: Arc<dyn CampaignStore>,
        deliveries: Arc<dyn DeliveryStore>,
        resolver: Arc<AudienceResolver>,
        sender: Arc<dyn MessageSender>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            campaigns,
            deliveries,
            resolver,
            sender,
            config,
            in_flight: DashSet::new(),
            stats: DispatcherStats::default(),
        }
    }

    pub fn stats(&self) -> DispatcherStatsSnapshot {
        self.stats.snapshot()
    }

    /// Whether this process is currently fanning out the campaign.
    pub fn is_in_flight(&self, campaign_id: Uuid) -> bool {
        self.in_flight.contains(&campaign_id)
    }

    /// Immediate dispatch from `draft` or `scheduled`.
    #[tracing::instrument(name = "dispatcher.dispatch", skip(self), fields(campaign_id = %campaign_id))]
    pub async fn dispatch(&self, campaign_id: Uuid) -> Result<DispatchOutcome, DispatchError> {
        let change = StatusChange::to(DISPATCHABLE, CampaignStatus::Sending);
        match self.campaigns.transition(campaign_id, &change).await? {
            TransitionOutcome::Applied(campaign) => self.run(campaign).await,
            TransitionOutcome::Rejected(current) => Ok(self.skipped(&current)),
            TransitionOutcome::Missing => Err(DispatchError::NotFound(campaign_id)),
        }
    }

    /// Dispatch fired by the schedule trigger; only claims a due `scheduled` campaign.
    #[tracing::instrument(name = "dispatcher.fire_due", skip(self, now), fields(campaign_id = %campaign_id))]
    pub async fn fire_due(
        &self,
        campaign_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<DispatchOutcome, DispatchError> {
        match self
            .campaigns
            .transition(campaign_id, &StatusChange::fire_due(now))
            .await?
        {
            TransitionOutcome::Applied(campaign) => self.run(campaign).await,
            TransitionOutcome::Rejected(current) if current.status == CampaignStatus::Scheduled => {
                tracing::debug!(
                    scheduled_at = ?current.scheduled_at,
                    "Fire arrived before scheduled time"
                );
                Ok(DispatchOutcome::NotDue {
                    scheduled_at: current.scheduled_at,
                })
            }
            TransitionOutcome::Rejected(current) => Ok(self.skipped(&current)),
            TransitionOutcome::Missing => Err(DispatchError::NotFound(campaign_id)),
        }
    }

    /// Take over a `sending` campaign whose heartbeat is older than
    /// `stale_before` (e.g. its worker crashed) and finish the fan-out.
    #[tracing::instrument(name = "dispatcher.resume", skip(self, stale_before), fields(campaign_id = %campaign_id))]
    pub async fn resume(
        &self,
        campaign_id: Uuid,
        stale_before: DateTime<Utc>,
    ) -> Result<DispatchOutcome, DispatchError> {
        match self.campaigns.claim_stale(campaign_id, stale_before).await? {
            TransitionOutcome::Applied(campaign) => {
                tracing::info!("Resuming stranded campaign dispatch");
                self.run(campaign).await
            }
            TransitionOutcome::Rejected(current) => Ok(self.skipped(&current)),
            TransitionOutcome::Missing => Err(DispatchError::NotFound(campaign_id)),
        }
    }

    fn skipped(&self, current: &Campaign) -> DispatchOutcome {
        self.stats.campaigns_skipped.fetch_add(1, Ordering::Relaxed);
        DispatchMetrics::record_skipped();
        tracing::debug!(
            campaign_id = %current.id,
            status = %current.status,
            "Dispatch already handled"
        );
        DispatchOutcome::AlreadyHandled {
            status: current.status,
        }
    }

    async fn run(&self, campaign: Campaign) -> Result<DispatchOutcome, DispatchError> {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, campaign.id) else {
            return Ok(self.skipped(&campaign));
        };
        let start = Instant::now();

        match self.resolve_with_retry(&campaign).await {
            Ok(recipients) => {
                let created = self.deliveries.upsert_many(campaign.id, &recipients).await?;
                tracing::info!(
                    campaign_id = %campaign.id,
                    recipients = recipients.len(),
                    created,
                    "Audience resolved, deliveries prepared"
                );
            }
            Err(e) => {
                let existing = self.deliveries.counts(campaign.id).await?;
                if existing.total == 0 {
                    tracing::warn!(
                        campaign_id = %campaign.id,
                        error = %e,
                        "Audience resolution failed, marking campaign failed"
                    );
                    return self
                        .finish(&campaign, DispatchTally::default(), CampaignStatus::Failed, start)
                        .await;
                }
                tracing::warn!(
                    campaign_id = %campaign.id,
                    error = %e,
                    deliveries = existing.total,
                    "Audience resolution failed, continuing with existing deliveries"
                );
            }
        }

        let prepared = self.deliveries.counts(campaign.id).await?;
        self.campaigns
            .set_progress(campaign.id, prepared.total, prepared.sent)
            .await?;

        let unsent = self.deliveries.unsent(campaign.id).await?;
        self.fan_out(&campaign, unsent).await?;

        let counts = self.deliveries.counts(campaign.id).await?;
        let tally = DispatchTally {
            recipient_count: counts.total,
            sent_count: counts.sent,
            failed_count: counts.total - counts.sent,
        };
        self.finish(&campaign, tally, tally.final_status(), start).await
    }

    async fn resolve_with_retry(&self, campaign: &Campaign) -> Result<Vec<UserId>, AudienceError> {
        let Some(ref targeting) = campaign.targeting else {
            return Err(AudienceError::InvalidTargeting(
                "campaign has no targeting".to_string(),
            ));
        };

        let mut backoff = ExponentialBackoff::with_config(BackoffConfig::from(&self.config));
        let max_attempts = self.config.max_attempts.max(1);
        loop {
            match self
                .resolver
                .resolve_current(targeting, &campaign.business_id)
                .await
            {
                Ok(set) => return Ok(set.into_iter().collect()),
                Err(e) if e.is_transient() && backoff.attempt() + 1 < max_attempts => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        campaign_id = %campaign.id,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Audience resolution failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Send every delivery with at most `max_concurrent_sends` in flight,
    /// refreshing the campaign heartbeat until the last send settles.
    async fn fan_out(&self, campaign: &Campaign, unsent: Vec<Delivery>) -> Result<(), StoreError> {
        let limit = self.config.max_concurrent_sends.max(1);
        let mut pending = unsent.into_iter();
        let mut futures = FuturesUnordered::new();
        let mut first_store_error = None;

        let mut heartbeat =
            tokio::time::interval(Duration::from_millis(self.config.heartbeat_interval_ms.max(1)));
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await;

        loop {
            while futures.len() < limit {
                let Some(delivery) = pending.next() else {
                    break;
                };
                futures.push(self.send_with_retry(&campaign.business_id, delivery, &campaign.content));
            }
            if futures.is_empty() {
                break;
            }

            tokio::select! {
                Some(attempt) = futures.next() => {
                    if let Err(e) = self.record(attempt).await {
                        first_store_error.get_or_insert(e);
                    }
                }
                _ = heartbeat.tick() => {
                    self.heartbeat(campaign.id).await;
                }
            }
        }

        match first_store_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn heartbeat(&self, campaign_id: Uuid) {
        match self.campaigns.heartbeat(campaign_id).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(campaign_id = %campaign_id, "Campaign left sending during fan-out");
            }
            Err(e) => {
                tracing::warn!(campaign_id = %campaign_id, error = %e, "Dispatch heartbeat failed");
            }
        }
    }

    async fn send_with_retry(
        &self,
        business_id: &str,
        delivery: Delivery,
        content: &CampaignContent,
    ) -> SendAttempt {
        let message = OutboundMessage {
            campaign_id: delivery.campaign_id,
            delivery_id: delivery.id,
            content: content.clone(),
        };
        let timeout = Duration::from_millis(self.config.send_timeout_ms);
        let max_attempts = self.config.max_attempts.max(1);
        let mut backoff = ExponentialBackoff::with_config(BackoffConfig::from(&self.config));
        let start = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = match tokio::time::timeout(
                timeout,
                self.sender
                    .send_as_business(business_id, &delivery.recipient_id, &message),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(SendError::Transient(format!(
                    "send timed out after {}ms",
                    self.config.send_timeout_ms
                ))),
            };

            match result {
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = backoff.next_delay();
                    self.stats.send_retries.fetch_add(1, Ordering::Relaxed);
                    DispatchMetrics::record_retry();
                    tracing::debug!(
                        delivery_id = %delivery.id,
                        attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Send failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                result => {
                    return SendAttempt {
                        campaign_id: delivery.campaign_id,
                        delivery_id: delivery.id,
                        recipient_id: delivery.recipient_id,
                        attempts: delivery.attempts + attempt,
                        latency: start.elapsed(),
                        result,
                    };
                }
            }
        }
    }

    async fn record(&self, attempt: SendAttempt) -> Result<(), StoreError> {
        match attempt.result {
            Ok(message_id) => {
                self.stats.deliveries_sent.fetch_add(1, Ordering::Relaxed);
                DispatchMetrics::record_sent(attempt.latency.as_secs_f64());

                // Counted before the delivery reads as sent: engagement on a
                // sent delivery never outruns the campaign's sent_count
                let counted = match self.campaigns.add_sent(attempt.campaign_id, 1).await {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(
                            delivery_id = %attempt.delivery_id,
                            error = %e,
                            "Failed to count sent delivery"
                        );
                        false
                    }
                };
                let marked = self
                    .deliveries
                    .mark_sent(attempt.delivery_id, &message_id, attempt.attempts, Utc::now())
                    .await;
                if counted && !matches!(marked, Ok(true)) {
                    if let Err(e) = self.campaigns.add_sent(attempt.campaign_id, -1).await {
                        tracing::warn!(
                            delivery_id = %attempt.delivery_id,
                            error = %e,
                            "Failed to release sent count"
                        );
                    }
                }
                marked?;
            }
            Err(e) => {
                self.stats.deliveries_failed.fetch_add(1, Ordering::Relaxed);
                DispatchMetrics::record_failed();
                tracing::warn!(
                    delivery_id = %attempt.delivery_id,
                    recipient_id = %attempt.recipient_id,
                    attempts = attempt.attempts,
                    error = %e,
                    "Delivery failed"
                );
                self.deliveries
                    .mark_failed(attempt.delivery_id, attempt.attempts, &e.to_string())
                    .await?;
            }
        }
        Ok(())
    }

    async fn finish(
        &self,
        campaign: &Campaign,
        tally: DispatchTally,
        status: CampaignStatus,
        start: Instant,
    ) -> Result<DispatchOutcome, DispatchError> {
        match self
            .campaigns
            .complete_dispatch(campaign.id, tally, status)
            .await?
        {
            TransitionOutcome::Applied(done) => {
                let elapsed = start.elapsed();
                DispatchMetrics::record_outcome(done.status.as_str(), elapsed.as_secs_f64());
                match done.status {
                    CampaignStatus::Failed => {
                        self.stats.campaigns_failed.fetch_add(1, Ordering::Relaxed)
                    }
                    _ => self.stats.campaigns_completed.fetch_add(1, Ordering::Relaxed),
                };
                tracing::info!(
                    campaign_id = %done.id,
                    status = %done.status,
                    recipients = tally.recipient_count,
                    sent = tally.sent_count,
                    failed = tally.failed_count,
                    duration_ms = elapsed.as_millis() as u64,
                    "Campaign dispatch finished"
                );
                Ok(DispatchOutcome::Finished(DispatchSummary {
                    campaign_id: done.id,
                    status: done.status,
                    recipient_count: tally.recipient_count,
                    sent_count: tally.sent_count,
                    failed_count: tally.failed_count,
                    duration_ms: elapsed.as_millis() as u64,
                }))
            }
            TransitionOutcome::Rejected(current) => Ok(self.skipped(&current)),
            TransitionOutcome::Missing => Err(DispatchError::NotFound(campaign.id)),
        }
    }
}
