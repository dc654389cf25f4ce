//! Engagement Tracker: per-delivery open/click tracking and campaign stats.

mod tracker;

pub use tracker::{EngagementError, EngagementReceipt, EngagementStats, EngagementTracker};
