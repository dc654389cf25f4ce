//! API layer - HTTP endpoint handlers organized by domain.

mod campaigns;
mod engagement;
mod health;
mod metrics;
mod routes;

pub use campaigns::{
    campaign_stats, cancel_schedule, create_campaign, delete_campaign, duplicate_campaign,
    estimate_target, get_campaign, list_campaigns, list_deliveries, preview_campaign,
    schedule_campaign, send_now, set_target, update_campaign,
};
pub use engagement::{track_click, track_open};
pub use health::{health, stats};
pub use metrics::prometheus_metrics;
pub use routes::api_routes;
