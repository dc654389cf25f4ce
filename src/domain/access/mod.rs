//! Authorization collaborator: business roles.

mod control;
mod factory;
pub mod memory_access;
pub mod postgres_access;

pub use control::{AccessControl, AccessError, AccessRole, MANAGE_ROLES, READ_ROLES};
pub use factory::create_access_control;
pub use memory_access::MemoryAccessControl;
pub use postgres_access::PostgresAccessControl;
