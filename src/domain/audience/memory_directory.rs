//! In-memory audience directory.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::domain::{BusinessId, UserId};

use super::directory::{AudienceDirectory, DirectoryError};
use super::targeting::{CustomerProfile, ProfileFilter};

/// DashMap-backed directory used by default and in tests.
///
/// Tag and profile audiences only ever contain current followers.
#[derive(Default)]
pub struct MemoryAudienceDirectory {
    followers: DashMap<BusinessId, HashSet<UserId>>,
    /// (business, tag) -> tagged users
    tags: DashMap<(BusinessId, String), HashSet<UserId>>,
    profiles: DashMap<BusinessId, HashMap<UserId, CustomerProfile>>,
}

impl MemoryAudienceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_follower(&self, business_id: &str, user_id: &str) {
        self.followers
            .entry(business_id.to_string())
            .or_default()
            .insert(user_id.to_string());
    }

    pub fn remove_follower(&self, business_id: &str, user_id: &str) {
        if let Some(mut set) = self.followers.get_mut(business_id) {
            set.remove(user_id);
        }
    }

    /// Register a tag owned by the business, with no members yet.
    pub fn define_tag(&self, business_id: &str, tag_id: &str) {
        self.tags
            .entry((business_id.to_string(), tag_id.to_string()))
            .or_default();
    }

    /// Tag a user, defining the tag if needed.
    pub fn tag_user(&self, business_id: &str, tag_id: &str, user_id: &str) {
        self.tags
            .entry((business_id.to_string(), tag_id.to_string()))
            .or_default()
            .insert(user_id.to_string());
    }

    pub fn untag_user(&self, business_id: &str, tag_id: &str, user_id: &str) {
        if let Some(mut set) = self
            .tags
            .get_mut(&(business_id.to_string(), tag_id.to_string()))
        {
            set.remove(user_id);
        }
    }

    pub fn upsert_profile(&self, business_id: &str, profile: CustomerProfile) {
        self.profiles
            .entry(business_id.to_string())
            .or_default()
            .insert(profile.user_id.clone(), profile);
    }
}

#[async_trait]
impl AudienceDirectory for MemoryAudienceDirectory {
    async fn followers(&self, business_id: &str) -> Result<HashSet<UserId>, DirectoryError> {
        Ok(self
            .followers
            .get(business_id)
            .map(|set| set.clone())
            .unwrap_or_default())
    }

    async fn follower_count(&self, business_id: &str) -> Result<u64, DirectoryError> {
        Ok(self
            .followers
            .get(business_id)
            .map(|set| set.len() as u64)
            .unwrap_or(0))
    }

    async fn users_by_tags(
        &self,
        business_id: &str,
        tag_ids: &[String],
    ) -> Result<HashMap<String, HashSet<UserId>>, DirectoryError> {
        let followers = self.followers(business_id).await?;
        let mut members = HashMap::with_capacity(tag_ids.len());
        for tag in tag_ids {
            if let Some(set) = self.tags.get(&(business_id.to_string(), tag.clone())) {
                members.insert(tag.clone(), set.intersection(&followers).cloned().collect());
            }
        }
        Ok(members)
    }

    async fn users_matching_profile(
        &self,
        business_id: &str,
        filter: &ProfileFilter,
    ) -> Result<HashSet<UserId>, DirectoryError> {
        let followers = self.followers(business_id).await?;
        Ok(self
            .profiles
            .get(business_id)
            .map(|profiles| {
                profiles
                    .values()
                    .filter(|p| followers.contains(&p.user_id) && filter.matches(p))
                    .map(|p| p.user_id.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn unknown_tags(
        &self,
        business_id: &str,
        tag_ids: &[String],
    ) -> Result<Vec<String>, DirectoryError> {
        Ok(tag_ids
            .iter()
            .filter(|t| {
                !self
                    .tags
                    .contains_key(&(business_id.to_string(), (*t).clone()))
            })
            .cloned()
            .collect())
    }

    async fn unknown_users(
        &self,
        business_id: &str,
        user_ids: &[UserId],
    ) -> Result<Vec<UserId>, DirectoryError> {
        let followers = self.followers.get(business_id);
        Ok(user_ids
            .iter()
            .filter(|u| followers.as_ref().map_or(true, |set| !set.contains(*u)))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tag_members_are_limited_to_followers() {
        let dir = MemoryAudienceDirectory::new();
        dir.add_follower("biz", "u1");
        dir.add_follower("biz", "u2");
        dir.tag_user("biz", "vip", "u1");
        dir.tag_user("biz", "vip", "u2");
        dir.remove_follower("biz", "u2");

        let members = dir
            .users_by_tags("biz", &["vip".to_string()])
            .await
            .unwrap();
        assert_eq!(members["vip"], HashSet::from(["u1".to_string()]));
        assert!(dir
            .unknown_tags("biz", &["vip".to_string()])
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_profile_matches_skip_former_followers() {
        let dir = MemoryAudienceDirectory::new();
        dir.add_follower("biz", "u1");
        for user in ["u1", "u2"] {
            dir.upsert_profile(
                "biz",
                CustomerProfile {
                    user_id: user.to_string(),
                    customer_type: Some("regular".to_string()),
                    ..Default::default()
                },
            );
        }

        let filter = ProfileFilter::default();
        let matched = dir.users_matching_profile("biz", &filter).await.unwrap();
        assert_eq!(matched, HashSet::from(["u1".to_string()]));
        assert_eq!(dir.count_matching_profile("biz", &filter).await.unwrap(), 1);
    }
}
