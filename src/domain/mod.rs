//! Domain layer modules
//!
//! This module contains the broadcast engine's business logic:
//! - `access`: Business role checks (authorization collaborator)
//! - `audience`: Targeting specs and audience resolution
//! - `campaign`: Campaign store and lifecycle state machine
//! - `delivery`: Delivery rows, the message-send collaborator and the dispatcher
//! - `engagement`: Open/click tracking
//! - `schedule`: Time-ordered schedule index and trigger

pub mod access;
pub mod audience;
pub mod campaign;
pub mod delivery;
pub mod engagement;
pub mod schedule;
mod store;

pub use store::StoreError;

/// Identifier of an end user (follower, recipient or actor)
pub type UserId = String;

/// Identifier of a business account
pub type BusinessId = String;
