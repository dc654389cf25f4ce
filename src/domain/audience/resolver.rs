//! Turns a targeting specification into a recipient set or a count.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::config::AudienceConfig;
use crate::domain::UserId;
use crate::metrics::AudienceMetrics;

use super::directory::{AudienceDirectory, DirectoryError};
use super::targeting::{MatchType, TargetingSpec};

#[derive(Debug, Error)]
pub enum AudienceError {
    /// The targeting is malformed or references tags/users outside the business
    #[error("Invalid targeting: {0}")]
    InvalidTargeting(String),

    #[error("Audience query timed out after {0:?}")]
    Timeout(Duration),

    #[error("Audience directory unavailable: {0}")]
    Unavailable(String),
}

impl AudienceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, AudienceError::Timeout(_) | AudienceError::Unavailable(_))
    }

    fn kind(&self) -> &'static str {
        match self {
            AudienceError::InvalidTargeting(_) => "invalid",
            AudienceError::Timeout(_) => "timeout",
            AudienceError::Unavailable(_) => "unavailable",
        }
    }
}

impl From<DirectoryError> for AudienceError {
    fn from(err: DirectoryError) -> Self {
        AudienceError::Unavailable(err.to_string())
    }
}

/// Apply tag rules to per-tag membership.
///
/// An empty include set selects nobody regardless of `match_type`; exclude
/// is applied last.
pub fn combine_tags(
    include: &[String],
    exclude: &[String],
    match_type: MatchType,
    members: &HashMap<String, HashSet<UserId>>,
) -> BTreeSet<UserId> {
    if include.is_empty() {
        return BTreeSet::new();
    }

    let empty = HashSet::new();
    let member_set = |tag: &String| members.get(tag).unwrap_or(&empty);

    let mut selected: BTreeSet<UserId> = match match_type {
        MatchType::Any => include
            .iter()
            .flat_map(|tag| member_set(tag).iter().cloned())
            .collect(),
        MatchType::All => match include.split_first() {
            Some((first, rest)) => member_set(first)
                .iter()
                .filter(|user| rest.iter().all(|tag| member_set(tag).contains(*user)))
                .cloned()
                .collect(),
            None => BTreeSet::new(),
        },
    };

    for tag in exclude {
        for user in member_set(tag) {
            selected.remove(user);
        }
    }

    selected
}

/// Audience Resolver.
///
/// Results follow the directory's current data: two calls return the same set
/// only while followers and tags are unchanged, so a dispatch resolves once
/// and keeps that set.
pub struct AudienceResolver {
    directory: Arc<dyn AudienceDirectory>,
    query_timeout: Duration,
}

impl AudienceResolver {
    pub fn new(directory: Arc<dyn AudienceDirectory>, config: &AudienceConfig) -> Self {
        Self::with_timeout(directory, Duration::from_millis(config.query_timeout_ms))
    }

    pub fn with_timeout(directory: Arc<dyn AudienceDirectory>, query_timeout: Duration) -> Self {
        Self {
            directory,
            query_timeout,
        }
    }

    async fn query<T, F>(&self, fut: F) -> Result<T, AudienceError>
    where
        F: Future<Output = Result<T, DirectoryError>>,
    {
        match tokio::time::timeout(self.query_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(AudienceError::Timeout(self.query_timeout)),
        }
    }

    /// Check the targeting's shape and that every referenced tag/user belongs to the business.
    pub async fn validate(
        &self,
        spec: &TargetingSpec,
        business_id: &str,
    ) -> Result<(), AudienceError> {
        let result = self.validate_inner(spec, business_id).await;
        if let Err(ref e) = result {
            AudienceMetrics::record_error(e.kind());
        }
        result
    }

    async fn validate_inner(
        &self,
        spec: &TargetingSpec,
        business_id: &str,
    ) -> Result<(), AudienceError> {
        spec.validate_shape()
            .map_err(AudienceError::InvalidTargeting)?;

        match spec {
            TargetingSpec::Tags { .. } => {
                let tags = spec.referenced_tags();
                let unknown = self
                    .query(self.directory.unknown_tags(business_id, &tags))
                    .await?;
                if !unknown.is_empty() {
                    return Err(AudienceError::InvalidTargeting(format!(
                        "tags not owned by business: {}",
                        unknown.join(", ")
                    )));
                }
            }
            TargetingSpec::Users { ids } => {
                let unique: Vec<UserId> = ids
                    .iter()
                    .cloned()
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect();
                let unknown = self
                    .query(self.directory.unknown_users(business_id, &unique))
                    .await?;
                if !unknown.is_empty() {
                    return Err(AudienceError::InvalidTargeting(format!(
                        "users not following business: {}",
                        unknown.join(", ")
                    )));
                }
            }
            TargetingSpec::All | TargetingSpec::CustomerProfile(_) => {}
        }

        Ok(())
    }

    /// Resolve the recipient set.
    #[tracing::instrument(
        name = "audience.resolve",
        skip(self, spec, business_id),
        fields(business_id = %business_id, targeting = spec.kind())
    )]
    pub async fn resolve(
        &self,
        spec: &TargetingSpec,
        business_id: &str,
    ) -> Result<BTreeSet<UserId>, AudienceError> {
        self.validate(spec, business_id).await?;
        self.collect(spec, business_id, false).await
    }

    /// Resolve targeting that was validated earlier against the directory as
    /// it is now.
    ///
    /// Listed users who stopped following are dropped and tags that no longer
    /// exist select nobody; only a malformed spec is an error.
    #[tracing::instrument(
        name = "audience.resolve_current",
        skip(self, spec, business_id),
        fields(business_id = %business_id, targeting = spec.kind())
    )]
    pub async fn resolve_current(
        &self,
        spec: &TargetingSpec,
        business_id: &str,
    ) -> Result<BTreeSet<UserId>, AudienceError> {
        if let Err(reason) = spec.validate_shape() {
            let err = AudienceError::InvalidTargeting(reason);
            AudienceMetrics::record_error(err.kind());
            return Err(err);
        }
        self.collect(spec, business_id, true).await
    }

    async fn collect(
        &self,
        spec: &TargetingSpec,
        business_id: &str,
        drop_unfollowed: bool,
    ) -> Result<BTreeSet<UserId>, AudienceError> {
        let start = Instant::now();

        let result = match spec {
            TargetingSpec::All => self
                .query(self.directory.followers(business_id))
                .await
                .map(|set| set.into_iter().collect()),
            TargetingSpec::Tags {
                include,
                exclude,
                match_type,
            } => {
                if include.is_empty() {
                    Ok(BTreeSet::new())
                } else {
                    let tags = spec.referenced_tags();
                    self.query(self.directory.users_by_tags(business_id, &tags))
                        .await
                        .map(|members| combine_tags(include, exclude, *match_type, &members))
                }
            }
            TargetingSpec::Users { ids } => {
                let listed: BTreeSet<UserId> = ids.iter().cloned().collect();
                if drop_unfollowed {
                    let unique: Vec<UserId> = listed.iter().cloned().collect();
                    self.query(self.directory.unknown_users(business_id, &unique))
                        .await
                        .map(|gone| {
                            if !gone.is_empty() {
                                tracing::info!(
                                    dropped = gone.len(),
                                    "Listed users no longer follow the business"
                                );
                            }
                            let gone: HashSet<UserId> = gone.into_iter().collect();
                            listed.into_iter().filter(|u| !gone.contains(u)).collect()
                        })
                } else {
                    Ok(listed)
                }
            }
            TargetingSpec::CustomerProfile(filter) => self
                .query(self.directory.users_matching_profile(business_id, filter))
                .await
                .map(|set| set.into_iter().collect()),
        };

        match result {
            Ok(recipients) => {
                AudienceMetrics::record_resolve(start.elapsed().as_secs_f64());
                tracing::debug!(recipients = recipients.len(), "Audience resolved");
                Ok(recipients)
            }
            Err(e) => {
                AudienceMetrics::record_error(e.kind());
                Err(e)
            }
        }
    }

    /// Count the audience, using directory counts where no set is needed.
    pub async fn estimate(
        &self,
        spec: &TargetingSpec,
        business_id: &str,
    ) -> Result<u64, AudienceError> {
        match spec {
            TargetingSpec::All => {
                self.validate(spec, business_id).await?;
                self.query(self.directory.follower_count(business_id)).await
            }
            TargetingSpec::CustomerProfile(filter) => {
                self.validate(spec, business_id).await?;
                self.query(self.directory.count_matching_profile(business_id, filter))
                    .await
            }
            TargetingSpec::Tags { .. } | TargetingSpec::Users { .. } => {
                Ok(self.resolve(spec, business_id).await?.len() as u64)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::audience::MemoryAudienceDirectory;

    fn members(pairs: &[(&str, &[&str])]) -> HashMap<String, HashSet<UserId>> {
        pairs
            .iter()
            .map(|(tag, users)| {
                (
                    tag.to_string(),
                    users.iter().map(|u| u.to_string()).collect(),
                )
            })
            .collect()
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_exclude_beats_any_match() {
        let m = members(&[("A", &["u1", "u2"]), ("B", &["u3"]), ("C", &["u1"])]);
        let result = combine_tags(&strings(&["A", "B"]), &strings(&["C"]), MatchType::Any, &m);
        assert_eq!(result, strings(&["u2", "u3"]).into_iter().collect());
    }

    #[test]
    fn test_all_match_requires_every_tag() {
        let m = members(&[("A", &["u1", "u2"]), ("B", &["u2", "u3"])]);
        let result = combine_tags(&strings(&["A", "B"]), &[], MatchType::All, &m);
        assert_eq!(result, strings(&["u2"]).into_iter().collect());

        let missing_tag = combine_tags(&strings(&["A", "Z"]), &[], MatchType::All, &m);
        assert!(missing_tag.is_empty());
    }

    #[test]
    fn test_empty_include_selects_nobody() {
        let m = members(&[("A", &["u1"])]);
        assert!(combine_tags(&[], &[], MatchType::Any, &m).is_empty());
        assert!(combine_tags(&[], &[], MatchType::All, &m).is_empty());
    }

    fn directory() -> Arc<MemoryAudienceDirectory> {
        let dir = MemoryAudienceDirectory::new();
        for user in ["u1", "u2", "u3"] {
            dir.add_follower("biz", user);
        }
        dir.tag_user("biz", "vip", "u1");
        dir.define_tag("biz", "dormant");
        dir.tag_user("other", "secret", "u9");
        Arc::new(dir)
    }

    #[tokio::test]
    async fn test_resolve_is_repeatable() {
        let resolver = AudienceResolver::with_timeout(directory(), Duration::from_secs(1));
        let first = resolver.resolve(&TargetingSpec::All, "biz").await.unwrap();
        let second = resolver.resolve(&TargetingSpec::All, "biz").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
    }

    #[tokio::test]
    async fn test_foreign_tag_is_invalid() {
        let resolver = AudienceResolver::with_timeout(directory(), Duration::from_secs(1));
        let spec = TargetingSpec::Tags {
            include: strings(&["secret"]),
            exclude: vec![],
            match_type: MatchType::All,
        };
        let err = resolver.resolve(&spec, "biz").await.unwrap_err();
        assert!(matches!(err, AudienceError::InvalidTargeting(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_unknown_user_is_invalid() {
        let resolver = AudienceResolver::with_timeout(directory(), Duration::from_secs(1));
        let spec = TargetingSpec::Users {
            ids: strings(&["u1", "stranger"]),
        };
        assert!(matches!(
            resolver.validate(&spec, "biz").await,
            Err(AudienceError::InvalidTargeting(_))
        ));
    }

    #[tokio::test]
    async fn test_estimate_of_empty_tag_is_zero() {
        let resolver = AudienceResolver::with_timeout(directory(), Duration::from_secs(1));
        let spec = TargetingSpec::Tags {
            include: strings(&["dormant"]),
            exclude: vec![],
            match_type: MatchType::All,
        };
        assert_eq!(resolver.estimate(&spec, "biz").await.unwrap(), 0);
        assert_eq!(resolver.estimate(&TargetingSpec::All, "biz").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_current_resolution_drops_unfollowed_users() {
        let dir = directory();
        let resolver = AudienceResolver::with_timeout(dir.clone(), Duration::from_secs(1));
        let spec = TargetingSpec::Users {
            ids: strings(&["u1", "u2", "u3"]),
        };
        resolver.validate(&spec, "biz").await.unwrap();

        dir.remove_follower("biz", "u3");
        let current = resolver.resolve_current(&spec, "biz").await.unwrap();
        assert_eq!(current, strings(&["u1", "u2"]).into_iter().collect());
        assert!(resolver.resolve(&spec, "biz").await.is_err());
    }

    #[tokio::test]
    async fn test_current_resolution_treats_missing_tags_as_empty() {
        let resolver = AudienceResolver::with_timeout(directory(), Duration::from_secs(1));
        let spec = TargetingSpec::Tags {
            include: strings(&["vip", "deleted"]),
            exclude: strings(&["also-deleted"]),
            match_type: MatchType::Any,
        };
        let current = resolver.resolve_current(&spec, "biz").await.unwrap();
        assert_eq!(current, strings(&["u1"]).into_iter().collect());

        let malformed = TargetingSpec::Users {
            ids: strings(&["u1", " "]),
        };
        assert!(matches!(
            resolver.resolve_current(&malformed, "biz").await,
            Err(AudienceError::InvalidTargeting(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_user_ids_collapse() {
        let resolver = AudienceResolver::with_timeout(directory(), Duration::from_secs(1));
        let spec = TargetingSpec::Users {
            ids: strings(&["u1", "u1", "u2"]),
        };
        assert_eq!(resolver.estimate(&spec, "biz").await.unwrap(), 2);
    }
}
