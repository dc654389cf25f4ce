use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Created, not yet handed off successfully
    Pending,
    Sent,
    /// Every attempt failed; retried if the campaign is re-driven
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeliveryStatus::Pending),
            "sent" => Ok(DeliveryStatus::Sent),
            "failed" => Ok(DeliveryStatus::Failed),
            other => Err(format!("unknown delivery status '{}'", other)),
        }
    }
}

/// One recipient's copy of a campaign. Unique per `(campaign_id, recipient_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub recipient_id: UserId,
    pub status: DeliveryStatus,
    /// Conversation message ID returned by the sender
    pub message_id: Option<String>,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub clicked_at: Option<DateTime<Utc>>,
}

/// Which engagement fields a tracking call set for the first time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngagementChange {
    pub opened: bool,
    pub clicked: bool,
}

impl EngagementChange {
    pub fn is_empty(&self) -> bool {
        !self.opened && !self.clicked
    }
}

impl Delivery {
    pub fn new(campaign_id: Uuid, recipient_id: impl Into<UserId>) -> Self {
        Self {
            id: Uuid::new_v4(),
            campaign_id,
            recipient_id: recipient_id.into(),
            status: DeliveryStatus::Pending,
            message_id: None,
            attempts: 0,
            last_error: None,
            created_at: Utc::now(),
            sent_at: None,
            opened_at: None,
            clicked_at: None,
        }
    }

    pub fn is_sent(&self) -> bool {
        self.sent_at.is_some()
    }

    /// First-write-wins open. No effect on an unsent delivery.
    pub fn apply_open(&mut self, at: DateTime<Utc>) -> EngagementChange {
        if !self.is_sent() || self.opened_at.is_some() {
            return EngagementChange::default();
        }
        self.opened_at = Some(at);
        EngagementChange {
            opened: true,
            clicked: false,
        }
    }

    /// First-write-wins click; also sets `opened_at` if no open was recorded.
    pub fn apply_click(&mut self, at: DateTime<Utc>) -> EngagementChange {
        if !self.is_sent() {
            return EngagementChange::default();
        }
        let mut change = EngagementChange::default();
        if self.clicked_at.is_none() {
            self.clicked_at = Some(at);
            change.clicked = true;
        }
        if self.opened_at.is_none() {
            self.opened_at = Some(at);
            change.opened = true;
        }
        change
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryFilter {
    #[default]
    All,
    Pending,
    Sent,
    Failed,
    Opened,
    Clicked,
}

impl DeliveryFilter {
    pub fn matches(&self, delivery: &Delivery) -> bool {
        match self {
            DeliveryFilter::All => true,
            DeliveryFilter::Pending => delivery.status == DeliveryStatus::Pending,
            DeliveryFilter::Sent => delivery.status == DeliveryStatus::Sent,
            DeliveryFilter::Failed => delivery.status == DeliveryStatus::Failed,
            DeliveryFilter::Opened => delivery.opened_at.is_some(),
            DeliveryFilter::Clicked => delivery.clicked_at.is_some(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryQuery {
    #[serde(default)]
    pub filter: DeliveryFilter,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    100
}

impl Default for DeliveryQuery {
    fn default() -> Self {
        Self {
            filter: DeliveryFilter::All,
            limit: default_limit(),
            offset: 0,
        }
    }
}

/// Per-campaign totals derived from delivery rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryCounts {
    pub total: u64,
    pub pending: u64,
    pub sent: u64,
    pub failed: u64,
    pub opened: u64,
    pub clicked: u64,
}

impl DeliveryCounts {
    pub fn tally(deliveries: impl IntoIterator<Item = impl std::borrow::Borrow<Delivery>>) -> Self {
        let mut counts = DeliveryCounts::default();
        for delivery in deliveries {
            let d = delivery.borrow();
            counts.total += 1;
            match d.status {
                DeliveryStatus::Pending => counts.pending += 1,
                DeliveryStatus::Sent => counts.sent += 1,
                DeliveryStatus::Failed => counts.failed += 1,
            }
            if d.opened_at.is_some() {
                counts.opened += 1;
            }
            if d.clicked_at.is_some() {
                counts.clicked += 1;
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sent_delivery() -> Delivery {
        let mut d = Delivery::new(Uuid::new_v4(), "u1");
        d.status = DeliveryStatus::Sent;
        d.sent_at = Some(Utc::now());
        d
    }

    #[test]
    fn test_open_is_first_write_wins() {
        let mut d = sent_delivery();
        let first = Utc::now();
        assert!(d.apply_open(first).opened);
        assert!(d.apply_open(Utc::now()).is_empty());
        assert_eq!(d.opened_at, Some(first));
    }

    #[test]
    fn test_click_implies_open() {
        let mut d = sent_delivery();
        let change = d.apply_click(Utc::now());
        assert_eq!(
            change,
            EngagementChange {
                opened: true,
                clicked: true
            }
        );
        assert!(d.opened_at.is_some());

        assert!(d.apply_click(Utc::now()).is_empty());
        assert!(d.apply_open(Utc::now()).is_empty());
    }

    #[test]
    fn test_click_after_open_counts_click_only() {
        let mut d = sent_delivery();
        d.apply_open(Utc::now());
        let change = d.apply_click(Utc::now());
        assert!(change.clicked);
        assert!(!change.opened);
    }

    #[test]
    fn test_unsent_delivery_ignores_engagement() {
        let mut d = Delivery::new(Uuid::new_v4(), "u1");
        assert!(d.apply_open(Utc::now()).is_empty());
        assert!(d.apply_click(Utc::now()).is_empty());
        assert!(d.opened_at.is_none());
    }

    #[test]
    fn test_filter_and_tally() {
        let mut opened = sent_delivery();
        opened.apply_open(Utc::now());
        let pending = Delivery::new(Uuid::new_v4(), "u2");
        let rows = vec![opened.clone(), pending.clone()];

        assert!(DeliveryFilter::Opened.matches(&opened));
        assert!(!DeliveryFilter::Opened.matches(&pending));
        assert!(DeliveryFilter::Pending.matches(&pending));

        let counts = DeliveryCounts::tally(&rows);
        assert_eq!(counts.total, 2);
        assert_eq!(counts.sent, 1);
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.opened, 1);
    }
}
