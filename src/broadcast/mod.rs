//! Broadcast service facade.
//!
//! `BroadcastService` wires the campaign store, audience resolver, schedule
//! trigger, dispatcher and engagement tracker behind one authorized API.

mod error;
mod service;

pub use error::BroadcastError;
pub use service::{BroadcastService, CampaignPreview, CancelOutcome, NewCampaign};
