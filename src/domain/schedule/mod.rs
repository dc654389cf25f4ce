//! Schedule Trigger.
//!
//! A time-ordered index of `(campaign, due_at)` entries polled by the
//! scheduler task. The index is re-derivable from the campaign store, which
//! makes firing at-least-once across restarts.
//!
//! - `MemoryScheduleIndex`: ordered in-process set (default)
//! - `RedisScheduleIndex`: Redis sorted set shared by all workers

mod factory;
mod index;
pub mod memory_index;
pub mod redis_index;
mod trigger;

pub use factory::create_schedule_index;
pub use index::{ScheduleEntry, ScheduleError, ScheduleIndex};
pub use memory_index::MemoryScheduleIndex;
pub use redis_index::RedisScheduleIndex;
pub use trigger::{RebuildReport, ScheduleTrigger, TriggerError};
