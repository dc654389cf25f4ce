//! Campaign store and lifecycle state machine.
//!
//! A campaign moves `draft → scheduled → sending → completed`, or straight
//! from `draft` to `sending` for an immediate send. `draft` and `scheduled`
//! can be cancelled; `sending` ends in `completed` or `failed`.
//!
//! Backends:
//!
//! - `MemoryCampaignStore`: DashMap storage (default)
//! - `PostgresCampaignStore`: `broadcast_campaigns` table
//!
//! Use `create_campaign_store()` to pick one from configuration.

mod factory;
pub mod memory_store;
mod model;
pub mod postgres_store;
mod store;

pub use factory::create_campaign_store;
pub use memory_store::MemoryCampaignStore;
pub use model::{
    validate_name, Campaign, CampaignContent, CampaignMetrics, CampaignPatch, CampaignQuery,
    CampaignStatus, DispatchTally, MessageType, StatusChange, TransitionOutcome, CANCELLABLE,
    CONTENT_EDITABLE, DELETABLE, DISPATCHABLE, MAX_NAME_LEN, MAX_TEXT_LEN, SCHEDULABLE,
    TARGETING_EDITABLE,
};
pub use postgres_store::PostgresCampaignStore;
pub use store::CampaignStore;
