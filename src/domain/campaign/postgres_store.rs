//! PostgreSQL-based campaign store.
//!
//! Campaigns live in `broadcast_campaigns`; content and targeting are JSONB.
//! Every guarded write is one `UPDATE ... WHERE status = ANY(..) RETURNING`
//! so the status check and the write cannot interleave with another worker.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::StoreError;
use crate::metrics::BackendMetrics;

use super::model::{
    Campaign, CampaignMetrics, CampaignPatch, CampaignQuery, CampaignStatus, DispatchTally,
    StatusChange, TransitionOutcome,
};
use super::store::CampaignStore;

const COLUMNS: &str = "id, business_id, created_by, name, content, targeting, status, \
     scheduled_at, sent_at, recipient_count, sent_count, failed_count, open_count, \
     click_count, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct CampaignRow {
    id: Uuid,
    business_id: String,
    created_by: String,
    name: String,
    content: serde_json::Value,
    targeting: Option<serde_json::Value>,
    status: String,
    scheduled_at: Option<DateTime<Utc>>,
    sent_at: Option<DateTime<Utc>>,
    recipient_count: i64,
    sent_count: i64,
    failed_count: i64,
    open_count: i64,
    click_count: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CampaignRow> for Campaign {
    type Error = StoreError;

    fn try_from(row: CampaignRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<CampaignStatus>()
            .map_err(StoreError::Corrupt)?;
        let targeting = row.targeting.map(serde_json::from_value).transpose()?;

        Ok(Campaign {
            id: row.id,
            business_id: row.business_id,
            created_by: row.created_by,
            name: row.name,
            content: serde_json::from_value(row.content)?,
            targeting,
            status,
            scheduled_at: row.scheduled_at,
            sent_at: row.sent_at,
            metrics: CampaignMetrics {
                recipient_count: row.recipient_count.max(0) as u64,
                sent_count: row.sent_count.max(0) as u64,
                failed_count: row.failed_count.max(0) as u64,
                open_count: row.open_count.max(0) as u64,
                click_count: row.click_count.max(0) as u64,
            },
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn status_list(statuses: &[CampaignStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

fn pg_error(operation: &'static str) -> impl Fn(sqlx::Error) -> StoreError {
    move |e| {
        BackendMetrics::record_error("postgres", operation);
        tracing::warn!(operation, error = %e, "Campaign store query failed");
        StoreError::Postgres(e)
    }
}

/// PostgreSQL-based campaign store.
pub struct PostgresCampaignStore {
    pool: PgPool,
}

impl PostgresCampaignStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<Campaign>, StoreError> {
        let row: Option<CampaignRow> =
            sqlx::query_as(&format!("SELECT {} FROM broadcast_campaigns WHERE id = $1", COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(pg_error("get"))?;
        row.map(Campaign::try_from).transpose()
    }

    /// Map the row returned by a guarded write to an outcome.
    async fn settle(
        &self,
        id: Uuid,
        updated: Option<CampaignRow>,
    ) -> Result<TransitionOutcome, StoreError> {
        if let Some(row) = updated {
            return Ok(TransitionOutcome::Applied(Campaign::try_from(row)?));
        }
        Ok(match self.fetch(id).await? {
            Some(current) => TransitionOutcome::Rejected(current),
            None => TransitionOutcome::Missing,
        })
    }
}

#[async_trait]
impl CampaignStore for PostgresCampaignStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn insert(&self, campaign: Campaign) -> Result<Campaign, StoreError> {
        let content = serde_json::to_value(&campaign.content)?;
        let targeting = campaign
            .targeting
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO broadcast_campaigns
                (id, business_id, created_by, name, content, targeting, status,
                 scheduled_at, sent_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(campaign.id)
        .bind(&campaign.business_id)
        .bind(&campaign.created_by)
        .bind(&campaign.name)
        .bind(&content)
        .bind(&targeting)
        .bind(campaign.status.as_str())
        .bind(campaign.scheduled_at)
        .bind(campaign.sent_at)
        .bind(campaign.created_at)
        .bind(campaign.updated_at)
        .execute(&self.pool)
        .await
        .map_err(pg_error("insert"))?;

        Ok(campaign)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Campaign>, StoreError> {
        self.fetch(id).await
    }

    async fn list(
        &self,
        business_id: &str,
        query: &CampaignQuery,
    ) -> Result<Vec<Campaign>, StoreError> {
        let rows: Vec<CampaignRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM broadcast_campaigns
            WHERE business_id = $1 AND ($2::text IS NULL OR status = $2)
            ORDER BY created_at DESC, id
            LIMIT $3 OFFSET $4
            "#,
            COLUMNS
        ))
        .bind(business_id)
        .bind(query.status.map(|s| s.as_str()))
        .bind(query.limit as i64)
        .bind(query.offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(pg_error("list"))?;

        rows.into_iter().map(Campaign::try_from).collect()
    }

    async fn update_details(
        &self,
        id: Uuid,
        patch: &CampaignPatch,
        allowed: &'static [CampaignStatus],
    ) -> Result<TransitionOutcome, StoreError> {
        let content = patch.content.as_ref().map(serde_json::to_value).transpose()?;
        let targeting = patch
            .targeting
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        let updated: Option<CampaignRow> = sqlx::query_as(&format!(
            r#"
            UPDATE broadcast_campaigns
            SET name = COALESCE($2, name),
                content = COALESCE($3, content),
                targeting = COALESCE($4, targeting),
                updated_at = NOW()
            WHERE id = $1 AND status = ANY($5)
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(id)
        .bind(patch.name.as_deref())
        .bind(&content)
        .bind(&targeting)
        .bind(status_list(allowed))
        .fetch_optional(&self.pool)
        .await
        .map_err(pg_error("update_details"))?;

        self.settle(id, updated).await
    }

    async fn transition(
        &self,
        id: Uuid,
        change: &StatusChange,
    ) -> Result<TransitionOutcome, StoreError> {
        let from: Vec<CampaignStatus> = change
            .from
            .iter()
            .copied()
            .filter(|s| s.can_transition_to(change.to))
            .collect();
        let scheduled_at = if change.to == CampaignStatus::Scheduled {
            change.scheduled_at
        } else {
            None
        };

        let updated: Option<CampaignRow> = sqlx::query_as(&format!(
            r#"
            UPDATE broadcast_campaigns
            SET status = $2, scheduled_at = $3, updated_at = NOW()
            WHERE id = $1
              AND status = ANY($4)
              AND ($5::timestamptz IS NULL OR (scheduled_at IS NOT NULL AND scheduled_at <= $5))
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(id)
        .bind(change.to.as_str())
        .bind(scheduled_at)
        .bind(status_list(&from))
        .bind(change.due_by)
        .fetch_optional(&self.pool)
        .await
        .map_err(pg_error("transition"))?;

        self.settle(id, updated).await
    }

    async fn claim_stale(
        &self,
        id: Uuid,
        stale_before: DateTime<Utc>,
    ) -> Result<TransitionOutcome, StoreError> {
        let claimed: Option<CampaignRow> = sqlx::query_as(&format!(
            r#"
            UPDATE broadcast_campaigns
            SET updated_at = NOW()
            WHERE id = $1 AND status = 'sending' AND updated_at < $2
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(id)
        .bind(stale_before)
        .fetch_optional(&self.pool)
        .await
        .map_err(pg_error("claim_stale"))?;

        self.settle(id, claimed).await
    }

    async fn heartbeat(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE broadcast_campaigns SET updated_at = NOW() WHERE id = $1 AND status = 'sending'",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(pg_error("heartbeat"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_progress(
        &self,
        id: Uuid,
        recipient_count: u64,
        sent_count: u64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE broadcast_campaigns
            SET recipient_count = $2, sent_count = $3, updated_at = NOW()
            WHERE id = $1 AND status = 'sending'
            "#,
        )
        .bind(id)
        .bind(recipient_count as i64)
        .bind(sent_count as i64)
        .execute(&self.pool)
        .await
        .map_err(pg_error("set_progress"))?;
        Ok(())
    }

    async fn add_sent(&self, id: Uuid, delta: i64) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE broadcast_campaigns
            SET sent_count = GREATEST(sent_count + $2, 0), updated_at = NOW()
            WHERE id = $1 AND status = 'sending'
            "#,
        )
        .bind(id)
        .bind(delta)
        .execute(&self.pool)
        .await
        .map_err(pg_error("add_sent"))?;
        Ok(())
    }

    async fn complete_dispatch(
        &self,
        id: Uuid,
        tally: DispatchTally,
        to: CampaignStatus,
    ) -> Result<TransitionOutcome, StoreError> {
        if !CampaignStatus::Sending.can_transition_to(to) {
            return self.settle(id, None).await;
        }

        let updated: Option<CampaignRow> = sqlx::query_as(&format!(
            r#"
            UPDATE broadcast_campaigns
            SET status = $2,
                recipient_count = $3,
                sent_count = $4,
                failed_count = $5,
                sent_at = CASE WHEN $2 = 'completed' THEN COALESCE(sent_at, NOW()) ELSE sent_at END,
                scheduled_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'sending'
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(id)
        .bind(to.as_str())
        .bind(tally.recipient_count as i64)
        .bind(tally.sent_count as i64)
        .bind(tally.failed_count as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(pg_error("complete_dispatch"))?;

        self.settle(id, updated).await
    }

    async fn add_engagement(&self, id: Uuid, opens: u64, clicks: u64) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE broadcast_campaigns
            SET open_count = open_count + $2, click_count = click_count + $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(opens as i64)
        .bind(clicks as i64)
        .execute(&self.pool)
        .await
        .map_err(pg_error("add_engagement"))?;
        Ok(())
    }

    async fn delete(
        &self,
        id: Uuid,
        allowed: &'static [CampaignStatus],
    ) -> Result<TransitionOutcome, StoreError> {
        let deleted: Option<CampaignRow> = sqlx::query_as(&format!(
            "DELETE FROM broadcast_campaigns WHERE id = $1 AND status = ANY($2) RETURNING {}",
            COLUMNS
        ))
        .bind(id)
        .bind(status_list(allowed))
        .fetch_optional(&self.pool)
        .await
        .map_err(pg_error("delete"))?;

        self.settle(id, deleted).await
    }

    async fn scheduled(&self, limit: usize) -> Result<Vec<(Uuid, DateTime<Utc>)>, StoreError> {
        let rows: Vec<(Uuid, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT id, scheduled_at FROM broadcast_campaigns
            WHERE status = 'scheduled' AND scheduled_at IS NOT NULL
            ORDER BY scheduled_at, id
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(pg_error("scheduled"))?;
        Ok(rows)
    }

    async fn with_status(
        &self,
        status: CampaignStatus,
        limit: usize,
    ) -> Result<Vec<Campaign>, StoreError> {
        let rows: Vec<CampaignRow> = sqlx::query_as(&format!(
            "SELECT {} FROM broadcast_campaigns WHERE status = $1 ORDER BY updated_at LIMIT $2",
            COLUMNS
        ))
        .bind(status.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(pg_error("with_status"))?;

        rows.into_iter().map(Campaign::try_from).collect()
    }
}
