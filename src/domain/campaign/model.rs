//! Campaign records, content and the lifecycle state machine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::audience::TargetingSpec;
use crate::domain::{BusinessId, UserId};

/// Maximum length of a campaign name
pub const MAX_NAME_LEN: usize = 200;

/// Maximum length of a text body
pub const MAX_TEXT_LEN: usize = 4000;

/// Kind of message a campaign sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Image,
    Bubble,
}

/// Message content carried by a campaign, handed unchanged to the sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignContent {
    pub message_type: MessageType,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    /// Structured card payload for `bubble` messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bubble: Option<serde_json::Value>,
}

impl CampaignContent {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            message_type: MessageType::Text,
            body: body.into(),
            media_url: None,
            bubble: None,
        }
    }

    /// Check the content is sendable for its message type.
    pub fn validate(&self) -> Result<(), String> {
        if self.body.chars().count() > MAX_TEXT_LEN {
            return Err(format!("body exceeds {} characters", MAX_TEXT_LEN));
        }

        match self.message_type {
            MessageType::Text => {
                if self.body.trim().is_empty() {
                    return Err("text content requires a body".to_string());
                }
            }
            MessageType::Image => {
                let url = self.media_url.as_deref().map(str::trim).unwrap_or("");
                if url.is_empty() {
                    return Err("image content requires media_url".to_string());
                }
            }
            MessageType::Bubble => match &self.bubble {
                Some(serde_json::Value::Object(fields)) if !fields.is_empty() => {}
                _ => return Err("bubble content requires a non-empty object payload".to_string()),
            },
        }

        Ok(())
    }
}

/// Campaign lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Sending,
    Completed,
    Cancelled,
    Failed,
}

/// Allowed `(from, to)` lifecycle edges.
const TRANSITIONS: &[(CampaignStatus, CampaignStatus)] = &[
    (CampaignStatus::Draft, CampaignStatus::Scheduled),
    (CampaignStatus::Draft, CampaignStatus::Sending),
    (CampaignStatus::Draft, CampaignStatus::Cancelled),
    (CampaignStatus::Scheduled, CampaignStatus::Scheduled),
    (CampaignStatus::Scheduled, CampaignStatus::Sending),
    (CampaignStatus::Scheduled, CampaignStatus::Cancelled),
    (CampaignStatus::Sending, CampaignStatus::Completed),
    (CampaignStatus::Sending, CampaignStatus::Failed),
];

impl CampaignStatus {
    pub const ALL: [CampaignStatus; 6] = [
        CampaignStatus::Draft,
        CampaignStatus::Scheduled,
        CampaignStatus::Sending,
        CampaignStatus::Completed,
        CampaignStatus::Cancelled,
        CampaignStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Scheduled => "scheduled",
            CampaignStatus::Sending => "sending",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Cancelled => "cancelled",
            CampaignStatus::Failed => "failed",
        }
    }

    pub fn can_transition_to(&self, to: CampaignStatus) -> bool {
        TRANSITIONS.iter().any(|(f, t)| f == self && *t == to)
    }

    /// No further transitions leave this status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CampaignStatus::Completed | CampaignStatus::Cancelled | CampaignStatus::Failed
        )
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CampaignStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CampaignStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown campaign status '{}'", s))
    }
}

/// Aggregate counters kept on the campaign row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignMetrics {
    pub recipient_count: u64,
    pub sent_count: u64,
    pub failed_count: u64,
    pub open_count: u64,
    pub click_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub business_id: BusinessId,
    pub created_by: UserId,
    pub name: String,
    pub content: CampaignContent,
    pub targeting: Option<TargetingSpec>,
    pub status: CampaignStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub metrics: CampaignMetrics,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    /// Build a new draft campaign.
    pub fn draft(
        business_id: impl Into<BusinessId>,
        created_by: impl Into<UserId>,
        name: impl Into<String>,
        content: CampaignContent,
        targeting: Option<TargetingSpec>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            business_id: business_id.into(),
            created_by: created_by.into(),
            name: name.into(),
            content,
            targeting,
            status: CampaignStatus::Draft,
            scheduled_at: None,
            sent_at: None,
            metrics: CampaignMetrics::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// New draft copying content and targeting, with fresh identity and zeroed metrics.
    pub fn duplicate(&self, created_by: impl Into<UserId>) -> Self {
        let mut name = format!("{} (copy)", self.name);
        if name.chars().count() > MAX_NAME_LEN {
            name = name.chars().take(MAX_NAME_LEN).collect();
        }
        Self::draft(
            self.business_id.clone(),
            created_by,
            name,
            self.content.clone(),
            self.targeting.clone(),
        )
    }

    /// Whether a scheduled campaign's time has arrived.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == CampaignStatus::Scheduled && self.scheduled_at.is_some_and(|at| at <= now)
    }
}

pub fn validate_name(name: &str) -> Result<(), String> {
    let len = name.trim().chars().count();
    if len == 0 {
        return Err("campaign name must not be empty".to_string());
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(format!("campaign name exceeds {} characters", MAX_NAME_LEN));
    }
    Ok(())
}

/// A guarded status change applied atomically by a `CampaignStore`.
///
/// The change only applies when the current status is one of `from`, the edge
/// is allowed by the state machine, and (with `due_by`) the stored
/// `scheduled_at` is at or before that instant.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub from: &'static [CampaignStatus],
    pub to: CampaignStatus,
    /// New `scheduled_at` when moving into `scheduled`; cleared otherwise
    pub scheduled_at: Option<DateTime<Utc>>,
    pub due_by: Option<DateTime<Utc>>,
}

impl StatusChange {
    pub fn to(from: &'static [CampaignStatus], to: CampaignStatus) -> Self {
        Self {
            from,
            to,
            scheduled_at: None,
            due_by: None,
        }
    }

    pub fn schedule(at: DateTime<Utc>) -> Self {
        Self {
            from: SCHEDULABLE,
            to: CampaignStatus::Scheduled,
            scheduled_at: Some(at),
            due_by: None,
        }
    }

    /// Claim a scheduled campaign for dispatch only if it is due at `now`.
    pub fn fire_due(now: DateTime<Utc>) -> Self {
        Self {
            from: &[CampaignStatus::Scheduled],
            to: CampaignStatus::Sending,
            scheduled_at: None,
            due_by: Some(now),
        }
    }

    pub fn permits(&self, campaign: &Campaign) -> bool {
        if !self.from.contains(&campaign.status) || !campaign.status.can_transition_to(self.to) {
            return false;
        }
        match self.due_by {
            Some(now) => campaign.scheduled_at.is_some_and(|at| at <= now),
            None => true,
        }
    }

    /// Apply the change to an in-memory record. Callers check `permits` first.
    pub fn apply(&self, campaign: &mut Campaign) {
        campaign.status = self.to;
        campaign.scheduled_at = if self.to == CampaignStatus::Scheduled {
            self.scheduled_at
        } else {
            None
        };
        campaign.updated_at = Utc::now();
    }
}

/// Statuses a campaign can be scheduled (or rescheduled) from
pub const SCHEDULABLE: &[CampaignStatus] = &[CampaignStatus::Draft, CampaignStatus::Scheduled];

/// Statuses a dispatch can claim
pub const DISPATCHABLE: &[CampaignStatus] = &[CampaignStatus::Draft, CampaignStatus::Scheduled];

/// Statuses a cancel can move from
pub const CANCELLABLE: &[CampaignStatus] = &[CampaignStatus::Draft, CampaignStatus::Scheduled];

/// Statuses where name and content may still change
pub const CONTENT_EDITABLE: &[CampaignStatus] = &[CampaignStatus::Draft, CampaignStatus::Scheduled];

/// Statuses where targeting may still change
pub const TARGETING_EDITABLE: &[CampaignStatus] = &[CampaignStatus::Draft];

/// Statuses a campaign can be deleted from
pub const DELETABLE: &[CampaignStatus] = &[
    CampaignStatus::Draft,
    CampaignStatus::Scheduled,
    CampaignStatus::Completed,
    CampaignStatus::Cancelled,
    CampaignStatus::Failed,
];

/// Partial update of the editable campaign fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CampaignPatch {
    pub name: Option<String>,
    pub content: Option<CampaignContent>,
    pub targeting: Option<TargetingSpec>,
}

impl CampaignPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.content.is_none() && self.targeting.is_none()
    }

    /// Statuses in which this patch may be applied.
    pub fn allowed_statuses(&self) -> &'static [CampaignStatus] {
        if self.targeting.is_some() {
            TARGETING_EDITABLE
        } else {
            CONTENT_EDITABLE
        }
    }

    pub fn apply(&self, campaign: &mut Campaign) {
        if let Some(ref name) = self.name {
            campaign.name = name.clone();
        }
        if let Some(ref content) = self.content {
            campaign.content = content.clone();
        }
        if let Some(ref targeting) = self.targeting {
            campaign.targeting = Some(targeting.clone());
        }
        campaign.updated_at = Utc::now();
    }
}

/// Final counts written when a fan-out finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchTally {
    pub recipient_count: u64,
    pub sent_count: u64,
    pub failed_count: u64,
}

impl DispatchTally {
    /// `failed` only when there were recipients and none were reached.
    pub fn final_status(&self) -> CampaignStatus {
        if self.recipient_count > 0 && self.sent_count == 0 {
            CampaignStatus::Failed
        } else {
            CampaignStatus::Completed
        }
    }
}

/// Listing filter for a business's campaigns.
#[derive(Debug, Clone, Deserialize)]
pub struct CampaignQuery {
    #[serde(default)]
    pub status: Option<CampaignStatus>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

impl Default for CampaignQuery {
    fn default() -> Self {
        Self {
            status: None,
            limit: default_limit(),
            offset: 0,
        }
    }
}

/// Result of a guarded write against a campaign row.
#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    /// The guard held and the write was applied
    Applied(Campaign),
    /// The guard did not hold; carries the current record
    Rejected(Campaign),
    /// No campaign with that ID
    Missing,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn campaign() -> Campaign {
        Campaign::draft("biz-1", "owner", "Spring sale", CampaignContent::text("hi"), None)
    }

    #[test]
    fn test_state_machine_edges() {
        use CampaignStatus::*;
        assert!(Draft.can_transition_to(Scheduled));
        assert!(Draft.can_transition_to(Sending));
        assert!(Scheduled.can_transition_to(Scheduled));
        assert!(Scheduled.can_transition_to(Cancelled));
        assert!(Sending.can_transition_to(Failed));

        assert!(!Sending.can_transition_to(Cancelled));
        assert!(!Completed.can_transition_to(Sending));
        assert!(!Cancelled.can_transition_to(Scheduled));
        assert!(!Draft.can_transition_to(Completed));
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in CampaignStatus::ALL {
            assert_eq!(status.as_str().parse::<CampaignStatus>().unwrap(), status);
        }
        assert!("paused".parse::<CampaignStatus>().is_err());
    }

    #[test]
    fn test_content_validation() {
        assert!(CampaignContent::text("hello").validate().is_ok());
        assert!(CampaignContent::text("   ").validate().is_err());
        assert!(CampaignContent::text("x".repeat(MAX_TEXT_LEN + 1)).validate().is_err());

        let image = CampaignContent {
            message_type: MessageType::Image,
            body: String::new(),
            media_url: None,
            bubble: None,
        };
        assert!(image.validate().is_err());

        let bubble = CampaignContent {
            message_type: MessageType::Bubble,
            body: String::new(),
            media_url: None,
            bubble: Some(serde_json::json!({"title": "Sale"})),
        };
        assert!(bubble.validate().is_ok());
    }

    #[test]
    fn test_name_validation() {
        assert!(validate_name("Launch").is_ok());
        assert!(validate_name("  ").is_err());
        assert!(validate_name(&"n".repeat(MAX_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn test_fire_due_requires_elapsed_schedule() {
        let now = Utc::now();
        let mut c = campaign();
        StatusChange::schedule(now + Duration::seconds(10)).apply(&mut c);
        assert_eq!(c.status, CampaignStatus::Scheduled);

        assert!(!StatusChange::fire_due(now).permits(&c));
        assert!(StatusChange::fire_due(now + Duration::seconds(10)).permits(&c));
    }

    #[test]
    fn test_leaving_scheduled_clears_time() {
        let mut c = campaign();
        StatusChange::schedule(Utc::now()).apply(&mut c);
        StatusChange::to(CANCELLABLE, CampaignStatus::Cancelled).apply(&mut c);
        assert_eq!(c.status, CampaignStatus::Cancelled);
        assert!(c.scheduled_at.is_none());
    }

    #[test]
    fn test_duplicate_resets_state() {
        let mut original = campaign();
        original.status = CampaignStatus::Completed;
        original.sent_at = Some(Utc::now());
        original.metrics.sent_count = 12;

        let copy = original.duplicate("editor");
        assert_ne!(copy.id, original.id);
        assert_eq!(copy.status, CampaignStatus::Draft);
        assert_eq!(copy.name, "Spring sale (copy)");
        assert!(copy.sent_at.is_none());
        assert_eq!(copy.metrics, CampaignMetrics::default());
        assert_eq!(copy.content, original.content);
    }

    #[test]
    fn test_tally_final_status() {
        let empty = DispatchTally::default();
        assert_eq!(empty.final_status(), CampaignStatus::Completed);

        let partial = DispatchTally {
            recipient_count: 3,
            sent_count: 2,
            failed_count: 1,
        };
        assert_eq!(partial.final_status(), CampaignStatus::Completed);

        let none_sent = DispatchTally {
            recipient_count: 3,
            sent_count: 0,
            failed_count: 3,
        };
        assert_eq!(none_sent.final_status(), CampaignStatus::Failed);
    }

    #[test]
    fn test_targeting_patch_limited_to_draft() {
        let patch = CampaignPatch {
            targeting: Some(TargetingSpec::All),
            ..Default::default()
        };
        assert_eq!(patch.allowed_statuses(), TARGETING_EDITABLE);
        assert_eq!(CampaignPatch::default().allowed_statuses(), CONTENT_EDITABLE);
    }
}
