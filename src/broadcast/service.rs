use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::access::{AccessControl, AccessRole, MANAGE_ROLES, READ_ROLES};
use crate::domain::audience::{AudienceResolver, TargetingSpec};
use crate::domain::campaign::{
    validate_name, Campaign, CampaignContent, CampaignPatch, CampaignQuery, CampaignStatus,
    CampaignStore, StatusChange, TransitionOutcome, CANCELLABLE, DELETABLE, DISPATCHABLE,
};
use crate::domain::delivery::{
    Delivery, DeliveryQuery, DeliveryStore, DispatchOutcome, Dispatcher,
};
use crate::domain::engagement::{EngagementReceipt, EngagementStats, EngagementTracker};
use crate::domain::schedule::ScheduleTrigger;
use crate::domain::BusinessId;

use super::error::BroadcastError;

/// How far in the past a requested `scheduled_at` may lie (clock skew)
const SCHEDULE_GRACE_SECS: i64 = 5;

/// Furthest a campaign can be scheduled ahead
const MAX_SCHEDULE_AHEAD_DAYS: i64 = 365;

const MAX_CAMPAIGN_PAGE: usize = 100;
const MAX_DELIVERY_PAGE: usize = 1000;

/// Input for creating a draft campaign.
#[derive(Debug, Clone, Deserialize)]
pub struct NewCampaign {
    pub business_id: BusinessId,
    pub name: String,
    pub content: CampaignContent,
    #[serde(default)]
    pub targeting: Option<TargetingSpec>,
}

/// Result of a cancel request. Only finished campaigns make cancel an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    Cancelled,
    /// The trigger already fired; the running dispatch is not interrupted
    AlreadyDispatching,
    AlreadyCancelled,
}

/// Content as the send collaborator would receive it, plus the audience size.
#[derive(Debug, Clone, Serialize)]
pub struct CampaignPreview {
    pub campaign_id: Uuid,
    pub name: String,
    pub content: CampaignContent,
    pub estimated_recipients: Option<u64>,
}

/// Every operation the engine exposes to the HTTP layer.
///
/// Each call authorizes the actor against the campaign's business before
/// touching state; tracking calls instead require the actor to be the
/// delivery's recipient.
pub struct BroadcastService {
    campaigns: Arc<dyn CampaignStore>,
    deliveries: Arc<dyn DeliveryStore>,
    resolver: Arc<AudienceResolver>,
    trigger: Arc<ScheduleTrigger>,
    dispatcher: Arc<Dispatcher>,
    tracker: EngagementTracker,
    access: Arc<dyn AccessControl>,
}

impl BroadcastService {
    pub fn new(
        campaigns: Arc<dyn CampaignStore>,
        deliveries: Arc<dyn DeliveryStore>,
        resolver: Arc<AudienceResolver>,
        trigger: Arc<ScheduleTrigger>,
        dispatcher: Arc<Dispatcher>,
        access: Arc<dyn AccessControl>,
    ) -> Self {
        let tracker = EngagementTracker::new(deliveries.clone(), campaigns.clone());
        Self {
            campaigns,
            deliveries,
            resolver,
            trigger,
            dispatcher,
            tracker,
            access,
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn trigger(&self) -> &Arc<ScheduleTrigger> {
        &self.trigger
    }

    async fn authorize(
        &self,
        actor: &str,
        business_id: &str,
        roles: &[AccessRole],
    ) -> Result<(), BroadcastError> {
        if self.access.is_business_admin(actor, business_id, roles).await? {
            Ok(())
        } else {
            tracing::debug!(actor = %actor, business_id = %business_id, "Access denied");
            Err(BroadcastError::Unauthorized(format!(
                "user {} lacks the required role in business {}",
                actor, business_id
            )))
        }
    }

    async fn load(&self, actor: &str, id: Uuid, roles: &[AccessRole]) -> Result<Campaign, BroadcastError> {
        let campaign = self
            .campaigns
            .get(id)
            .await?
            .ok_or_else(|| BroadcastError::campaign_not_found(id))?;
        self.authorize(actor, &campaign.business_id, roles).await?;
        Ok(campaign)
    }

    async fn validate_targeting(
        &self,
        spec: &TargetingSpec,
        business_id: &str,
    ) -> Result<(), BroadcastError> {
        self.resolver.validate(spec, business_id).await?;
        Ok(())
    }

    #[tracing::instrument(
        name = "broadcast.create",
        skip(self, actor, input),
        fields(business_id = %input.business_id)
    )]
    pub async fn create_campaign(
        &self,
        actor: &str,
        input: NewCampaign,
    ) -> Result<Campaign, BroadcastError> {
        self.authorize(actor, &input.business_id, MANAGE_ROLES).await?;
        validate_name(&input.name).map_err(BroadcastError::Validation)?;
        input.content.validate().map_err(BroadcastError::Validation)?;
        if let Some(ref spec) = input.targeting {
            self.validate_targeting(spec, &input.business_id).await?;
        }

        let campaign = Campaign::draft(
            input.business_id,
            actor,
            input.name.trim(),
            input.content,
            input.targeting,
        );
        let campaign = self.campaigns.insert(campaign).await?;
        tracing::info!(campaign_id = %campaign.id, "Campaign created");
        Ok(campaign)
    }

    pub async fn get_campaign(&self, actor: &str, id: Uuid) -> Result<Campaign, BroadcastError> {
        self.load(actor, id, READ_ROLES).await
    }

    pub async fn list_campaigns(
        &self,
        actor: &str,
        business_id: &str,
        mut query: CampaignQuery,
    ) -> Result<Vec<Campaign>, BroadcastError> {
        self.authorize(actor, business_id, READ_ROLES).await?;
        query.limit = query.limit.clamp(1, MAX_CAMPAIGN_PAGE);
        Ok(self.campaigns.list(business_id, &query).await?)
    }

    /// Edit name/content (draft or scheduled) and targeting (draft only).
    #[tracing::instrument(name = "broadcast.update", skip(self, actor, patch), fields(campaign_id = %id))]
    pub async fn update_campaign(
        &self,
        actor: &str,
        id: Uuid,
        mut patch: CampaignPatch,
    ) -> Result<Campaign, BroadcastError> {
        let campaign = self.load(actor, id, MANAGE_ROLES).await?;
        if patch.is_empty() {
            return Err(BroadcastError::Validation("nothing to update".to_string()));
        }
        if let Some(ref name) = patch.name {
            validate_name(name).map_err(BroadcastError::Validation)?;
            patch.name = Some(name.trim().to_string());
        }
        if let Some(ref content) = patch.content {
            content.validate().map_err(BroadcastError::Validation)?;
        }
        if let Some(ref spec) = patch.targeting {
            self.validate_targeting(spec, &campaign.business_id).await?;
        }

        match self
            .campaigns
            .update_details(id, &patch, patch.allowed_statuses())
            .await?
        {
            TransitionOutcome::Applied(updated) => Ok(updated),
            TransitionOutcome::Rejected(current) => Err(BroadcastError::Validation(format!(
                "campaign in status {} cannot be edited this way",
                current.status
            ))),
            TransitionOutcome::Missing => Err(BroadcastError::campaign_not_found(id)),
        }
    }

    /// Replace the targeting of a draft campaign.
    pub async fn set_target(
        &self,
        actor: &str,
        id: Uuid,
        spec: TargetingSpec,
    ) -> Result<Campaign, BroadcastError> {
        let patch = CampaignPatch {
            targeting: Some(spec),
            ..Default::default()
        };
        self.update_campaign(actor, id, patch).await
    }

    /// Audience size for a spec without creating anything.
    pub async fn estimate_target(
        &self,
        actor: &str,
        business_id: &str,
        spec: &TargetingSpec,
    ) -> Result<u64, BroadcastError> {
        self.authorize(actor, business_id, READ_ROLES).await?;
        Ok(self.resolver.estimate(spec, business_id).await?)
    }

    /// Delete a campaign in any status but `sending`, with its deliveries.
    #[tracing::instrument(name = "broadcast.delete", skip(self, actor), fields(campaign_id = %id))]
    pub async fn delete_campaign(&self, actor: &str, id: Uuid) -> Result<(), BroadcastError> {
        self.load(actor, id, MANAGE_ROLES).await?;

        match self.campaigns.delete(id, DELETABLE).await? {
            TransitionOutcome::Applied(removed) => {
                if removed.status == CampaignStatus::Scheduled {
                    self.disarm_quietly(id).await;
                }
                let deliveries = self.deliveries.delete_for_campaign(id).await?;
                tracing::info!(status = %removed.status, deliveries, "Campaign deleted");
                Ok(())
            }
            TransitionOutcome::Rejected(current) => Err(BroadcastError::Validation(format!(
                "campaign in status {} cannot be deleted",
                current.status
            ))),
            TransitionOutcome::Missing => Err(BroadcastError::campaign_not_found(id)),
        }
    }

    /// Schedule or reschedule. The store is updated first; the index entry
    /// for the campaign is then replaced, never duplicated, and re-checked
    /// against the store in case a concurrent reschedule landed in between.
    #[tracing::instrument(name = "broadcast.schedule", skip(self, actor), fields(campaign_id = %id))]
    pub async fn schedule(
        &self,
        actor: &str,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Campaign, BroadcastError> {
        let campaign = self.load(actor, id, MANAGE_ROLES).await?;

        let now = Utc::now();
        if at < now - Duration::seconds(SCHEDULE_GRACE_SECS) {
            return Err(BroadcastError::Validation(
                "scheduled_at must be in the future".to_string(),
            ));
        }
        if at > now + Duration::days(MAX_SCHEDULE_AHEAD_DAYS) {
            return Err(BroadcastError::Validation(format!(
                "scheduled_at must be within {} days",
                MAX_SCHEDULE_AHEAD_DAYS
            )));
        }
        let Some(ref spec) = campaign.targeting else {
            return Err(BroadcastError::Validation(
                "campaign has no targeting".to_string(),
            ));
        };
        self.validate_targeting(spec, &campaign.business_id).await?;

        let scheduled = match self
            .campaigns
            .transition(id, &StatusChange::schedule(at))
            .await?
        {
            TransitionOutcome::Applied(scheduled) => scheduled,
            TransitionOutcome::Rejected(current) => {
                return Err(BroadcastError::Validation(format!(
                    "campaign in status {} cannot be scheduled",
                    current.status
                )))
            }
            TransitionOutcome::Missing => return Err(BroadcastError::campaign_not_found(id)),
        };

        let due_at = scheduled.scheduled_at.unwrap_or(at);
        if let Err(e) = self.trigger.arm_checked(id, due_at).await {
            tracing::warn!(
                error = %e,
                "Failed to arm schedule entry, reconcile will restore it"
            );
        }
        tracing::info!(scheduled_at = %due_at, "Campaign scheduled");
        Ok(scheduled)
    }

    #[tracing::instrument(name = "broadcast.cancel", skip(self, actor), fields(campaign_id = %id))]
    pub async fn cancel_schedule(
        &self,
        actor: &str,
        id: Uuid,
    ) -> Result<CancelOutcome, BroadcastError> {
        self.load(actor, id, MANAGE_ROLES).await?;

        let change = StatusChange::to(CANCELLABLE, CampaignStatus::Cancelled);
        match self.campaigns.transition(id, &change).await? {
            TransitionOutcome::Applied(_) => {
                self.disarm_quietly(id).await;
                tracing::info!("Campaign cancelled");
                Ok(CancelOutcome::Cancelled)
            }
            TransitionOutcome::Rejected(current) => match current.status {
                CampaignStatus::Sending => Ok(CancelOutcome::AlreadyDispatching),
                CampaignStatus::Cancelled => Ok(CancelOutcome::AlreadyCancelled),
                CampaignStatus::Completed | CampaignStatus::Failed => {
                    Err(BroadcastError::Validation(format!(
                        "campaign already {}",
                        current.status
                    )))
                }
                CampaignStatus::Draft | CampaignStatus::Scheduled => Err(BroadcastError::Conflict(
                    "campaign changed during cancel, retry".to_string(),
                )),
            },
            TransitionOutcome::Missing => Err(BroadcastError::campaign_not_found(id)),
        }
    }

    /// Dispatch immediately and wait for the fan-out to finish.
    ///
    /// A campaign another caller is already dispatching reports
    /// `AlreadyHandled` rather than an error.
    #[tracing::instrument(name = "broadcast.send_now", skip(self, actor), fields(campaign_id = %id))]
    pub async fn send_now(&self, actor: &str, id: Uuid) -> Result<DispatchOutcome, BroadcastError> {
        let campaign = self.load(actor, id, MANAGE_ROLES).await?;

        if campaign.status == CampaignStatus::Sending {
            return Ok(DispatchOutcome::AlreadyHandled {
                status: campaign.status,
            });
        }
        if !DISPATCHABLE.contains(&campaign.status) {
            return Err(BroadcastError::Validation(format!(
                "campaign in status {} cannot be sent",
                campaign.status
            )));
        }
        let Some(ref spec) = campaign.targeting else {
            return Err(BroadcastError::Validation(
                "campaign has no targeting".to_string(),
            ));
        };
        self.validate_targeting(spec, &campaign.business_id).await?;

        if campaign.status == CampaignStatus::Scheduled {
            self.disarm_quietly(id).await;
        }
        Ok(self.dispatcher.dispatch(id).await?)
    }

    pub async fn preview(&self, actor: &str, id: Uuid) -> Result<CampaignPreview, BroadcastError> {
        let campaign = self.load(actor, id, READ_ROLES).await?;
        let estimated_recipients = match campaign.targeting {
            Some(ref spec) => Some(self.resolver.estimate(spec, &campaign.business_id).await?),
            None => None,
        };
        Ok(CampaignPreview {
            campaign_id: campaign.id,
            name: campaign.name,
            content: campaign.content,
            estimated_recipients,
        })
    }

    /// New draft with the same content and targeting.
    pub async fn duplicate(&self, actor: &str, id: Uuid) -> Result<Campaign, BroadcastError> {
        let source = self.load(actor, id, MANAGE_ROLES).await?;
        let copy = self.campaigns.insert(source.duplicate(actor)).await?;
        tracing::info!(campaign_id = %copy.id, source_id = %id, "Campaign duplicated");
        Ok(copy)
    }

    pub async fn list_deliveries(
        &self,
        actor: &str,
        id: Uuid,
        mut query: DeliveryQuery,
    ) -> Result<Vec<Delivery>, BroadcastError> {
        self.load(actor, id, READ_ROLES).await?;
        query.limit = query.limit.clamp(1, MAX_DELIVERY_PAGE);
        Ok(self.deliveries.list(id, &query).await?)
    }

    pub async fn track_open(
        &self,
        actor: &str,
        delivery_id: Uuid,
    ) -> Result<EngagementReceipt, BroadcastError> {
        Ok(self.tracker.mark_opened(actor, delivery_id, Utc::now()).await?)
    }

    pub async fn track_click(
        &self,
        actor: &str,
        delivery_id: Uuid,
    ) -> Result<EngagementReceipt, BroadcastError> {
        Ok(self.tracker.mark_clicked(actor, delivery_id, Utc::now()).await?)
    }

    pub async fn stats(&self, actor: &str, id: Uuid) -> Result<EngagementStats, BroadcastError> {
        self.load(actor, id, READ_ROLES).await?;
        Ok(self.tracker.stats(id).await?)
    }

    /// The store change already happened; a stale entry is dropped by the
    /// not-due/already-handled checks at fire time and by reconcile.
    async fn disarm_quietly(&self, id: Uuid) {
        if let Err(e) = self.trigger.disarm(id).await {
            tracing::warn!(campaign_id = %id, error = %e, "Failed to disarm schedule entry");
        }
    }
}
