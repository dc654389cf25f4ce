//! Redis connectivity shared by the schedule index and the message sender.

pub mod pool;

pub use pool::{PoolError, RedisPool};
