//! Targeting specifications and customer-profile filters.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::UserId;

/// Maximum number of explicit recipients in a `users` target
pub const MAX_EXPLICIT_USERS: usize = 10_000;

/// Maximum number of tags referenced by a `tags` target
pub const MAX_TARGET_TAGS: usize = 100;

/// How `include` tags combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    /// The user must carry every include tag
    #[default]
    All,
    /// The user must carry at least one include tag
    Any,
}

/// Who a campaign is sent to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TargetingSpec {
    /// Every active follower of the business
    All,
    /// Users selected by tag membership; `exclude` always removes
    Tags {
        include: Vec<String>,
        #[serde(default)]
        exclude: Vec<String>,
        #[serde(default)]
        match_type: MatchType,
    },
    /// An explicit recipient list
    Users { ids: Vec<UserId> },
    /// Customers matching CRM attributes
    CustomerProfile(ProfileFilter),
}

impl TargetingSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            TargetingSpec::All => "all",
            TargetingSpec::Tags { .. } => "tags",
            TargetingSpec::Users { .. } => "users",
            TargetingSpec::CustomerProfile(_) => "customer_profile",
        }
    }

    /// Structural checks that need no directory lookups.
    pub fn validate_shape(&self) -> Result<(), String> {
        match self {
            TargetingSpec::All => Ok(()),
            TargetingSpec::Tags {
                include, exclude, ..
            } => {
                if include.len() + exclude.len() > MAX_TARGET_TAGS {
                    return Err(format!("at most {} tags may be referenced", MAX_TARGET_TAGS));
                }
                if include.iter().chain(exclude).any(|t| t.trim().is_empty()) {
                    return Err("tag IDs must not be empty".to_string());
                }
                Ok(())
            }
            TargetingSpec::Users { ids } => {
                if ids.len() > MAX_EXPLICIT_USERS {
                    return Err(format!(
                        "at most {} explicit recipients are allowed",
                        MAX_EXPLICIT_USERS
                    ));
                }
                if ids.iter().any(|u| u.trim().is_empty()) {
                    return Err("user IDs must not be empty".to_string());
                }
                Ok(())
            }
            TargetingSpec::CustomerProfile(filter) => filter.validate(),
        }
    }

    /// Tag IDs referenced by include and exclude, deduplicated.
    pub fn referenced_tags(&self) -> Vec<String> {
        match self {
            TargetingSpec::Tags {
                include, exclude, ..
            } => include
                .iter()
                .chain(exclude)
                .cloned()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Inclusive window on a customer's last contact time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContactRange {
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
}

impl ContactRange {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| from <= at) && self.to.map_or(true, |to| at <= to)
    }
}

/// Filter over customer attributes.
///
/// An absent (or empty) field places no constraint on that attribute.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_types: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statuses: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_contact: Option<ContactRange>,
    /// Business-defined attributes, passed through to the profile store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_query: Option<serde_json::Map<String, serde_json::Value>>,
}

impl ProfileFilter {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(ContactRange {
            from: Some(from),
            to: Some(to),
        }) = self.last_contact
        {
            if from > to {
                return Err("last_contact range starts after it ends".to_string());
            }
        }
        Ok(())
    }

    /// Constrained customer types, `None` when unconstrained.
    pub fn customer_types(&self) -> Option<&[String]> {
        self.customer_types.as_deref().filter(|v| !v.is_empty())
    }

    pub fn statuses(&self) -> Option<&[String]> {
        self.statuses.as_deref().filter(|v| !v.is_empty())
    }

    pub fn custom_query(&self) -> Option<&serde_json::Map<String, serde_json::Value>> {
        self.custom_query.as_ref().filter(|q| !q.is_empty())
    }

    pub fn matches(&self, profile: &CustomerProfile) -> bool {
        if let Some(types) = self.customer_types() {
            match &profile.customer_type {
                Some(t) if types.contains(t) => {}
                _ => return false,
            }
        }

        if let Some(statuses) = self.statuses() {
            match &profile.status {
                Some(s) if statuses.contains(s) => {}
                _ => return false,
            }
        }

        if let Some(range) = self.last_contact {
            match profile.last_contact_at {
                Some(at) if range.contains(at) => {}
                _ => return false,
            }
        }

        if let Some(query) = self.custom_query() {
            return query
                .iter()
                .all(|(key, expected)| profile.attributes.get(key) == Some(expected));
        }

        true
    }
}

/// CRM attributes of one customer of a business.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomerProfile {
    pub user_id: UserId,
    pub customer_type: Option<String>,
    pub status: Option<String>,
    pub last_contact_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn profile() -> CustomerProfile {
        CustomerProfile {
            user_id: "u1".to_string(),
            customer_type: Some("retail".to_string()),
            status: Some("active".to_string()),
            last_contact_at: Some(Utc::now() - Duration::days(3)),
            attributes: json!({"tier": "gold", "region": "north"})
                .as_object()
                .cloned()
                .unwrap(),
        }
    }

    #[test]
    fn test_tagged_serialization() {
        let spec: TargetingSpec = serde_json::from_value(json!({
            "type": "tags",
            "include": ["vip"],
            "match_type": "any"
        }))
        .unwrap();
        assert_eq!(
            spec,
            TargetingSpec::Tags {
                include: vec!["vip".to_string()],
                exclude: vec![],
                match_type: MatchType::Any,
            }
        );

        let profile: TargetingSpec = serde_json::from_value(json!({
            "type": "customer_profile",
            "statuses": ["active"]
        }))
        .unwrap();
        assert_eq!(profile.kind(), "customer_profile");
    }

    #[test]
    fn test_absent_fields_do_not_constrain() {
        assert!(ProfileFilter::default().matches(&profile()));

        let empty_lists = ProfileFilter {
            customer_types: Some(vec![]),
            statuses: Some(vec![]),
            ..Default::default()
        };
        assert!(empty_lists.matches(&CustomerProfile::default()));
    }

    #[test]
    fn test_profile_filter_matching() {
        let filter = ProfileFilter {
            customer_types: Some(vec!["retail".to_string()]),
            last_contact: Some(ContactRange {
                from: Some(Utc::now() - Duration::days(7)),
                to: None,
            }),
            custom_query: json!({"tier": "gold"}).as_object().cloned(),
            ..Default::default()
        };
        assert!(filter.matches(&profile()));

        let wrong_tier = ProfileFilter {
            custom_query: json!({"tier": "silver"}).as_object().cloned(),
            ..Default::default()
        };
        assert!(!wrong_tier.matches(&profile()));

        let no_contact = CustomerProfile {
            last_contact_at: None,
            ..profile()
        };
        assert!(!filter.matches(&no_contact));
    }

    #[test]
    fn test_shape_validation() {
        assert!(TargetingSpec::Users { ids: vec!["".into()] }
            .validate_shape()
            .is_err());

        let inverted = ProfileFilter {
            last_contact: Some(ContactRange {
                from: Some(Utc::now()),
                to: Some(Utc::now() - Duration::days(1)),
            }),
            ..Default::default()
        };
        assert!(TargetingSpec::CustomerProfile(inverted)
            .validate_shape()
            .is_err());
    }

    #[test]
    fn test_referenced_tags_deduplicated() {
        let spec = TargetingSpec::Tags {
            include: vec!["b".into(), "a".into()],
            exclude: vec!["a".into()],
            match_type: MatchType::All,
        };
        assert_eq!(spec.referenced_tags(), vec!["a".to_string(), "b".to_string()]);
    }
}
