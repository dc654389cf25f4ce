//! Audience resolution.
//!
//! A `TargetingSpec` names who receives a campaign; `AudienceResolver` turns
//! it into a recipient set (at dispatch) or a count (for previews) by querying
//! an `AudienceDirectory`.

pub mod directory;
mod factory;
pub mod memory_directory;
pub mod postgres_directory;
mod resolver;
mod targeting;

pub use directory::{AudienceDirectory, DirectoryError};
pub use factory::create_audience_directory;
pub use memory_directory::MemoryAudienceDirectory;
pub use postgres_directory::PostgresAudienceDirectory;
pub use resolver::{combine_tags, AudienceError, AudienceResolver};
pub use targeting::{
    ContactRange, CustomerProfile, MatchType, ProfileFilter, TargetingSpec, MAX_EXPLICIT_USERS,
    MAX_TARGET_TAGS,
};
