//! In-memory business membership.

use async_trait::async_trait;
use dashmap::DashMap;

use super::control::{AccessControl, AccessError, AccessRole};

/// `(business, user) -> role`
#[derive(Default)]
pub struct MemoryAccessControl {
    members: DashMap<(String, String), AccessRole>,
}

impl MemoryAccessControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant (or replace) a member's role.
    pub fn grant(&self, business_id: &str, user_id: &str, role: AccessRole) {
        self.members
            .insert((business_id.to_string(), user_id.to_string()), role);
    }

    pub fn revoke(&self, business_id: &str, user_id: &str) {
        self.members
            .remove(&(business_id.to_string(), user_id.to_string()));
    }
}

#[async_trait]
impl AccessControl for MemoryAccessControl {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn is_business_admin(
        &self,
        user_id: &str,
        business_id: &str,
        allowed: &[AccessRole],
    ) -> Result<bool, AccessError> {
        Ok(self
            .members
            .get(&(business_id.to_string(), user_id.to_string()))
            .is_some_and(|role| allowed.contains(role.value())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::access::{MANAGE_ROLES, READ_ROLES};

    #[tokio::test]
    async fn test_roles_are_scoped_to_business() {
        let access = MemoryAccessControl::new();
        access.grant("biz", "alice", AccessRole::Editor);
        access.grant("biz", "bob", AccessRole::Viewer);

        assert!(access.is_business_admin("alice", "biz", MANAGE_ROLES).await.unwrap());
        assert!(!access.is_business_admin("alice", "other", MANAGE_ROLES).await.unwrap());
        assert!(!access.is_business_admin("bob", "biz", MANAGE_ROLES).await.unwrap());
        assert!(access.is_business_admin("bob", "biz", READ_ROLES).await.unwrap());

        access.revoke("biz", "bob");
        assert!(!access.is_business_admin("bob", "biz", READ_ROLES).await.unwrap());
    }
}
