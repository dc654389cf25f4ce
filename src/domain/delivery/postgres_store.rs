//! PostgreSQL-based delivery store.
//!
//! Rows live in `broadcast_deliveries` with a unique constraint on
//! `(campaign_id, recipient_id)`; upserts use `ON CONFLICT DO NOTHING`.
//! Engagement updates lock the row so concurrent open/click calls observe
//! each other's writes, and bump the campaign's counters in the same
//! transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{StoreError, UserId};
use crate::metrics::BackendMetrics;

use super::model::{Delivery, DeliveryCounts, DeliveryFilter, DeliveryQuery, EngagementChange};
use super::store::DeliveryStore;

/// Rows inserted per upsert statement
const UPSERT_CHUNK: usize = 1000;

const COLUMNS: &str = "id, campaign_id, recipient_id, status, message_id, attempts, \
     last_error, created_at, sent_at, opened_at, clicked_at";

#[derive(sqlx::FromRow)]
struct DeliveryRow {
    id: Uuid,
    campaign_id: Uuid,
    recipient_id: String,
    status: String,
    message_id: Option<String>,
    attempts: i32,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    sent_at: Option<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
    clicked_at: Option<DateTime<Utc>>,
}

impl TryFrom<DeliveryRow> for Delivery {
    type Error = StoreError;

    fn try_from(row: DeliveryRow) -> Result<Self, Self::Error> {
        Ok(Delivery {
            id: row.id,
            campaign_id: row.campaign_id,
            recipient_id: row.recipient_id,
            status: row.status.parse().map_err(StoreError::Corrupt)?,
            message_id: row.message_id,
            attempts: row.attempts.max(0) as u32,
            last_error: row.last_error,
            created_at: row.created_at,
            sent_at: row.sent_at,
            opened_at: row.opened_at,
            clicked_at: row.clicked_at,
        })
    }
}

fn filter_clause(filter: DeliveryFilter) -> &'static str {
    match filter {
        DeliveryFilter::All => "TRUE",
        DeliveryFilter::Pending => "status = 'pending'",
        DeliveryFilter::Sent => "status = 'sent'",
        DeliveryFilter::Failed => "status = 'failed'",
        DeliveryFilter::Opened => "opened_at IS NOT NULL",
        DeliveryFilter::Clicked => "clicked_at IS NOT NULL",
    }
}

fn pg_error(operation: &'static str) -> impl Fn(sqlx::Error) -> StoreError {
    move |e| {
        BackendMetrics::record_error("postgres", operation);
        tracing::warn!(operation, error = %e, "Delivery store query failed");
        StoreError::Postgres(e)
    }
}

pub struct PostgresDeliveryStore {
    pool: PgPool,
}

impl PostgresDeliveryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn engage<F>(
        &self,
        id: Uuid,
        operation: &'static str,
        apply: F,
    ) -> Result<Option<(Delivery, EngagementChange)>, StoreError>
    where
        F: FnOnce(&mut Delivery) -> EngagementChange + Send,
    {
        let mut tx = self.pool.begin().await.map_err(pg_error(operation))?;

        let row: Option<DeliveryRow> = sqlx::query_as(&format!(
            "SELECT {} FROM broadcast_deliveries WHERE id = $1 FOR UPDATE",
            COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(pg_error(operation))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut delivery = Delivery::try_from(row)?;
        let change = apply(&mut delivery);

        if !change.is_empty() {
            sqlx::query(
                "UPDATE broadcast_deliveries SET opened_at = $2, clicked_at = $3 WHERE id = $1",
            )
            .bind(id)
            .bind(delivery.opened_at)
            .bind(delivery.clicked_at)
            .execute(&mut *tx)
            .await
            .map_err(pg_error(operation))?;

            sqlx::query(
                r#"
                UPDATE broadcast_campaigns
                SET open_count = open_count + $2, click_count = click_count + $3
                WHERE id = $1
                "#,
            )
            .bind(delivery.campaign_id)
            .bind(change.opened as i64)
            .bind(change.clicked as i64)
            .execute(&mut *tx)
            .await
            .map_err(pg_error(operation))?;
        }

        tx.commit().await.map_err(pg_error(operation))?;
        Ok(Some((delivery, change)))
    }
}

#[async_trait]
impl DeliveryStore for PostgresDeliveryStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    fn bumps_campaign_engagement(&self) -> bool {
        true
    }

    async fn upsert_many(
        &self,
        campaign_id: Uuid,
        recipients: &[UserId],
    ) -> Result<usize, StoreError> {
        let mut created = 0usize;
        for chunk in recipients.chunks(UPSERT_CHUNK) {
            let ids: Vec<Uuid> = chunk.iter().map(|_| Uuid::new_v4()).collect();
            let result = sqlx::query(
                r#"
                INSERT INTO broadcast_deliveries (id, campaign_id, recipient_id, status, attempts, created_at)
                SELECT d.id, $1, d.recipient_id, 'pending', 0, NOW()
                FROM UNNEST($2::uuid[], $3::text[]) AS d(id, recipient_id)
                ON CONFLICT (campaign_id, recipient_id) DO NOTHING
                "#,
            )
            .bind(campaign_id)
            .bind(&ids)
            .bind(chunk)
            .execute(&self.pool)
            .await
            .map_err(pg_error("upsert_many"))?;
            created += result.rows_affected() as usize;
        }
        Ok(created)
    }

    async fn unsent(&self, campaign_id: Uuid) -> Result<Vec<Delivery>, StoreError> {
        let rows: Vec<DeliveryRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM broadcast_deliveries
            WHERE campaign_id = $1 AND sent_at IS NULL
            ORDER BY recipient_id
            "#,
            COLUMNS
        ))
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await
        .map_err(pg_error("unsent"))?;

        rows.into_iter().map(Delivery::try_from).collect()
    }

    async fn mark_sent(
        &self,
        id: Uuid,
        message_id: &str,
        attempts: u32,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE broadcast_deliveries
            SET status = 'sent', message_id = $2, attempts = $3, last_error = NULL, sent_at = $4
            WHERE id = $1 AND sent_at IS NULL
            "#,
        )
        .bind(id)
        .bind(message_id)
        .bind(attempts as i32)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(pg_error("mark_sent"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        attempts: u32,
        error: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE broadcast_deliveries
            SET status = 'failed', attempts = $2, last_error = $3
            WHERE id = $1 AND sent_at IS NULL
            "#,
        )
        .bind(id)
        .bind(attempts as i32)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(pg_error("mark_failed"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Delivery>, StoreError> {
        let row: Option<DeliveryRow> = sqlx::query_as(&format!(
            "SELECT {} FROM broadcast_deliveries WHERE id = $1",
            COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(pg_error("get"))?;
        row.map(Delivery::try_from).transpose()
    }

    async fn list(
        &self,
        campaign_id: Uuid,
        query: &DeliveryQuery,
    ) -> Result<Vec<Delivery>, StoreError> {
        let rows: Vec<DeliveryRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM broadcast_deliveries
            WHERE campaign_id = $1 AND {}
            ORDER BY recipient_id
            LIMIT $2 OFFSET $3
            "#,
            COLUMNS,
            filter_clause(query.filter)
        ))
        .bind(campaign_id)
        .bind(query.limit as i64)
        .bind(query.offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(pg_error("list"))?;

        rows.into_iter().map(Delivery::try_from).collect()
    }

    async fn counts(&self, campaign_id: Uuid) -> Result<DeliveryCounts, StoreError> {
        let (total, pending, sent, failed, opened, clicked): (i64, i64, i64, i64, i64, i64) =
            sqlx::query_as(
                r#"
                SELECT COUNT(*),
                       COUNT(*) FILTER (WHERE status = 'pending'),
                       COUNT(*) FILTER (WHERE status = 'sent'),
                       COUNT(*) FILTER (WHERE status = 'failed'),
                       COUNT(opened_at),
                       COUNT(clicked_at)
                FROM broadcast_deliveries
                WHERE campaign_id = $1
                "#,
            )
            .bind(campaign_id)
            .fetch_one(&self.pool)
            .await
            .map_err(pg_error("counts"))?;

        Ok(DeliveryCounts {
            total: total as u64,
            pending: pending as u64,
            sent: sent as u64,
            failed: failed as u64,
            opened: opened as u64,
            clicked: clicked as u64,
        })
    }

    async fn record_open(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<(Delivery, EngagementChange)>, StoreError> {
        self.engage(id, "record_open", |d| d.apply_open(at)).await
    }

    async fn record_click(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<(Delivery, EngagementChange)>, StoreError> {
        self.engage(id, "record_click", |d| d.apply_click(at)).await
    }

    async fn delete_for_campaign(&self, campaign_id: Uuid) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM broadcast_deliveries WHERE campaign_id = $1")
            .bind(campaign_id)
            .execute(&self.pool)
            .await
            .map_err(pg_error("delete_for_campaign"))?;
        Ok(result.rows_affected())
    }
}
