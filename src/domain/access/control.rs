use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AccessError {
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),
}

/// A member's role within a business account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessRole {
    Owner,
    Admin,
    Editor,
    Viewer,
}

/// Roles allowed to create, change, schedule or send campaigns
pub const MANAGE_ROLES: &[AccessRole] = &[AccessRole::Owner, AccessRole::Admin, AccessRole::Editor];

/// Roles allowed to read campaigns, deliveries and stats
pub const READ_ROLES: &[AccessRole] = &[
    AccessRole::Owner,
    AccessRole::Admin,
    AccessRole::Editor,
    AccessRole::Viewer,
];

impl AccessRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessRole::Owner => "owner",
            AccessRole::Admin => "admin",
            AccessRole::Editor => "editor",
            AccessRole::Viewer => "viewer",
        }
    }
}

impl fmt::Display for AccessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(AccessRole::Owner),
            "admin" => Ok(AccessRole::Admin),
            "editor" => Ok(AccessRole::Editor),
            "viewer" => Ok(AccessRole::Viewer),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// Authorization collaborator consulted before every campaign operation.
#[async_trait]
pub trait AccessControl: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Whether `user_id` holds one of `allowed` in `business_id`.
    async fn is_business_admin(
        &self,
        user_id: &str,
        business_id: &str,
        allowed: &[AccessRole],
    ) -> Result<bool, AccessError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_sets() {
        assert!(!MANAGE_ROLES.contains(&AccessRole::Viewer));
        assert!(READ_ROLES.contains(&AccessRole::Viewer));
    }

    #[test]
    fn test_role_parse() {
        for role in READ_ROLES {
            assert_eq!(role.as_str().parse::<AccessRole>().unwrap(), *role);
        }
        assert!("root".parse::<AccessRole>().is_err());
    }
}
