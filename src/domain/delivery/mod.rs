//! Deliveries and the campaign dispatcher.
//!
//! One `Delivery` row exists per `(campaign, recipient)`. The `Dispatcher`
//! claims a campaign, resolves its audience, upserts deliveries and fans out
//! through a `MessageSender` with bounded concurrency and per-recipient retry.

mod dispatcher;
mod factory;
pub mod memory_store;
mod model;
pub mod postgres_store;
mod sender;
mod store;

pub use dispatcher::{
    DispatchError, DispatchOutcome, DispatchSummary, Dispatcher, DispatcherStats,
    DispatcherStatsSnapshot,
};
pub use factory::create_delivery_store;
pub use memory_store::MemoryDeliveryStore;
pub use model::{
    Delivery, DeliveryCounts, DeliveryFilter, DeliveryQuery, DeliveryStatus, EngagementChange,
};
pub use postgres_store::PostgresDeliveryStore;
pub use sender::{
    create_message_sender, LogMessageSender, MessageSender, OutboundMessage, RedisMessageSender,
    SendError,
};
pub use store::DeliveryStore;
