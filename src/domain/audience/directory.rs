//! Read-only follower, tag and customer-profile queries.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::UserId;

use super::targeting::ProfileFilter;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    #[error("Directory unavailable: {0}")]
    Unavailable(String),
}

/// Audience data owned by the follower/tag/profile services.
///
/// Every method is scoped to one business; nothing here mutates.
#[async_trait]
pub trait AudienceDirectory: Send + Sync {
    /// Active followers of the business.
    async fn followers(&self, business_id: &str) -> Result<HashSet<UserId>, DirectoryError>;

    async fn follower_count(&self, business_id: &str) -> Result<u64, DirectoryError>;

    /// Members of each requested tag. Tags with no members may be omitted.
    async fn users_by_tags(
        &self,
        business_id: &str,
        tag_ids: &[String],
    ) -> Result<HashMap<String, HashSet<UserId>>, DirectoryError>;

    async fn users_matching_profile(
        &self,
        business_id: &str,
        filter: &ProfileFilter,
    ) -> Result<HashSet<UserId>, DirectoryError>;

    async fn count_matching_profile(
        &self,
        business_id: &str,
        filter: &ProfileFilter,
    ) -> Result<u64, DirectoryError> {
        Ok(self.users_matching_profile(business_id, filter).await?.len() as u64)
    }

    /// Requested tag IDs that the business does not own.
    async fn unknown_tags(
        &self,
        business_id: &str,
        tag_ids: &[String],
    ) -> Result<Vec<String>, DirectoryError>;

    /// Requested user IDs that do not follow the business.
    async fn unknown_users(
        &self,
        business_id: &str,
        user_ids: &[UserId],
    ) -> Result<Vec<UserId>, DirectoryError>;
}
