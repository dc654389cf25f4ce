//! Business membership read from the `business_members` table.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::metrics::BackendMetrics;

use super::control::{AccessControl, AccessError, AccessRole};

pub struct PostgresAccessControl {
    pool: PgPool,
}

impl PostgresAccessControl {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccessControl for PostgresAccessControl {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn is_business_admin(
        &self,
        user_id: &str,
        business_id: &str,
        allowed: &[AccessRole],
    ) -> Result<bool, AccessError> {
        let roles: Vec<String> = allowed.iter().map(|r| r.as_str().to_string()).collect();
        let (member,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM business_members
                WHERE business_id = $1 AND user_id = $2 AND role = ANY($3)
            )
            "#,
        )
        .bind(business_id)
        .bind(user_id)
        .bind(&roles)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            BackendMetrics::record_error("postgres", "is_business_admin");
            AccessError::Postgres(e)
        })?;
        Ok(member)
    }
}
