//! PostgreSQL audience directory.
//!
//! Reads the follower, tag and customer-profile tables maintained by the
//! services that own them. `custom_query` is matched with JSONB containment.
//! Every audience is limited to active followers.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::UserId;

use super::directory::{AudienceDirectory, DirectoryError};
use super::targeting::ProfileFilter;

const PROFILE_PREDICATE: &str = r#"
    business_id = $1
    AND ($2::text[] IS NULL OR customer_type = ANY($2))
    AND ($3::text[] IS NULL OR status = ANY($3))
    AND (NOT $4 OR last_contact_at IS NOT NULL)
    AND ($5::timestamptz IS NULL OR last_contact_at >= $5)
    AND ($6::timestamptz IS NULL OR last_contact_at <= $6)
    AND ($7::jsonb IS NULL OR attributes @> $7)
    AND EXISTS (
        SELECT 1 FROM business_followers bf
        WHERE bf.business_id = customer_profiles.business_id
          AND bf.user_id = customer_profiles.user_id
          AND bf.active
    )
"#;

struct ProfileBinds {
    customer_types: Option<Vec<String>>,
    statuses: Option<Vec<String>>,
    has_range: bool,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    custom_query: Option<serde_json::Value>,
}

impl From<&ProfileFilter> for ProfileBinds {
    fn from(filter: &ProfileFilter) -> Self {
        Self {
            customer_types: filter.customer_types().map(|v| v.to_vec()),
            statuses: filter.statuses().map(|v| v.to_vec()),
            has_range: filter.last_contact.is_some(),
            from: filter.last_contact.and_then(|r| r.from),
            to: filter.last_contact.and_then(|r| r.to),
            custom_query: filter
                .custom_query()
                .map(|q| serde_json::Value::Object(q.clone())),
        }
    }
}

pub struct PostgresAudienceDirectory {
    pool: PgPool,
}

impl PostgresAudienceDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AudienceDirectory for PostgresAudienceDirectory {
    async fn followers(&self, business_id: &str) -> Result<HashSet<UserId>, DirectoryError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT user_id FROM business_followers WHERE business_id = $1 AND active",
        )
        .bind(business_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(u,)| u).collect())
    }

    async fn follower_count(&self, business_id: &str) -> Result<u64, DirectoryError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM business_followers WHERE business_id = $1 AND active",
        )
        .bind(business_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }

    async fn users_by_tags(
        &self,
        business_id: &str,
        tag_ids: &[String],
    ) -> Result<HashMap<String, HashSet<UserId>>, DirectoryError> {
        if tag_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT ut.tag_id, ut.user_id
            FROM user_tags ut
            JOIN business_followers bf
              ON bf.business_id = ut.business_id AND bf.user_id = ut.user_id AND bf.active
            WHERE ut.business_id = $1 AND ut.tag_id = ANY($2)
            "#,
        )
        .bind(business_id)
        .bind(tag_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut members: HashMap<String, HashSet<UserId>> = HashMap::new();
        for (tag, user) in rows {
            members.entry(tag).or_default().insert(user);
        }
        Ok(members)
    }

    async fn users_matching_profile(
        &self,
        business_id: &str,
        filter: &ProfileFilter,
    ) -> Result<HashSet<UserId>, DirectoryError> {
        let binds = ProfileBinds::from(filter);
        let rows: Vec<(String,)> = sqlx::query_as(&format!(
            "SELECT user_id FROM customer_profiles WHERE {}",
            PROFILE_PREDICATE
        ))
        .bind(business_id)
        .bind(binds.customer_types)
        .bind(binds.statuses)
        .bind(binds.has_range)
        .bind(binds.from)
        .bind(binds.to)
        .bind(binds.custom_query)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(u,)| u).collect())
    }

    async fn count_matching_profile(
        &self,
        business_id: &str,
        filter: &ProfileFilter,
    ) -> Result<u64, DirectoryError> {
        let binds = ProfileBinds::from(filter);
        let (count,): (i64,) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FROM customer_profiles WHERE {}",
            PROFILE_PREDICATE
        ))
        .bind(business_id)
        .bind(binds.customer_types)
        .bind(binds.statuses)
        .bind(binds.has_range)
        .bind(binds.from)
        .bind(binds.to)
        .bind(binds.custom_query)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }

    async fn unknown_tags(
        &self,
        business_id: &str,
        tag_ids: &[String],
    ) -> Result<Vec<String>, DirectoryError> {
        if tag_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT tag_id FROM business_tags WHERE business_id = $1 AND tag_id = ANY($2)",
        )
        .bind(business_id)
        .bind(tag_ids)
        .fetch_all(&self.pool)
        .await?;

        let known: HashSet<String> = rows.into_iter().map(|(t,)| t).collect();
        Ok(tag_ids
            .iter()
            .filter(|t| !known.contains(*t))
            .cloned()
            .collect())
    }

    async fn unknown_users(
        &self,
        business_id: &str,
        user_ids: &[UserId],
    ) -> Result<Vec<UserId>, DirectoryError> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT user_id FROM business_followers
            WHERE business_id = $1 AND active AND user_id = ANY($2)
            "#,
        )
        .bind(business_id)
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;

        let known: HashSet<String> = rows.into_iter().map(|(u,)| u).collect();
        Ok(user_ids
            .iter()
            .filter(|u| !known.contains(*u))
            .cloned()
            .collect())
    }
}
