//! Campaign management endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::broadcast::{CampaignPreview, CancelOutcome, NewCampaign};
use crate::domain::audience::TargetingSpec;
use crate::domain::campaign::{Campaign, CampaignPatch, CampaignQuery};
use crate::domain::delivery::{Delivery, DeliveryQuery, DispatchOutcome};
use crate::domain::engagement::EngagementStats;
use crate::error::Result;
use crate::server::{AppState, AuthUser};

#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    pub scheduled_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub campaign_id: Uuid,
    pub outcome: CancelOutcome,
}

#[derive(Debug, Serialize)]
pub struct EstimateResponse {
    pub business_id: String,
    pub estimated_recipients: u64,
}

#[derive(Debug, Serialize)]
pub struct CampaignListResponse {
    pub campaigns: Vec<Campaign>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct DeliveryListResponse {
    pub campaign_id: Uuid,
    pub deliveries: Vec<Delivery>,
    pub total: usize,
}

/// POST /api/v1/campaigns
#[tracing::instrument(name = "http.create_campaign", skip(state, user, body))]
pub async fn create_campaign(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<NewCampaign>,
) -> Result<(StatusCode, Json<Campaign>)> {
    let campaign = state.broadcast.create_campaign(&user.0, body).await?;
    Ok((StatusCode::CREATED, Json(campaign)))
}

/// GET /api/v1/businesses/{business_id}/campaigns
#[tracing::instrument(name = "http.list_campaigns", skip(state, user, query))]
pub async fn list_campaigns(
    State(state): State<AppState>,
    user: AuthUser,
    Path(business_id): Path<String>,
    Query(query): Query<CampaignQuery>,
) -> Result<Json<CampaignListResponse>> {
    let campaigns = state
        .broadcast
        .list_campaigns(&user.0, &business_id, query)
        .await?;
    let total = campaigns.len();
    Ok(Json(CampaignListResponse { campaigns, total }))
}

/// POST /api/v1/businesses/{business_id}/audience/estimate
pub async fn estimate_target(
    State(state): State<AppState>,
    user: AuthUser,
    Path(business_id): Path<String>,
    Json(spec): Json<TargetingSpec>,
) -> Result<Json<EstimateResponse>> {
    let estimated_recipients = state
        .broadcast
        .estimate_target(&user.0, &business_id, &spec)
        .await?;
    Ok(Json(EstimateResponse {
        business_id,
        estimated_recipients,
    }))
}

/// GET /api/v1/campaigns/{id}
pub async fn get_campaign(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Campaign>> {
    Ok(Json(state.broadcast.get_campaign(&user.0, id).await?))
}

/// PATCH /api/v1/campaigns/{id}
#[tracing::instrument(name = "http.update_campaign", skip(state, user, patch))]
pub async fn update_campaign(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(patch): Json<CampaignPatch>,
) -> Result<Json<Campaign>> {
    Ok(Json(state.broadcast.update_campaign(&user.0, id, patch).await?))
}

/// DELETE /api/v1/campaigns/{id}
#[tracing::instrument(name = "http.delete_campaign", skip(state, user))]
pub async fn delete_campaign(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    state.broadcast.delete_campaign(&user.0, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /api/v1/campaigns/{id}/target
pub async fn set_target(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(spec): Json<TargetingSpec>,
) -> Result<Json<Campaign>> {
    Ok(Json(state.broadcast.set_target(&user.0, id, spec).await?))
}

/// POST /api/v1/campaigns/{id}/schedule
#[tracing::instrument(name = "http.schedule_campaign", skip(state, user, body))]
pub async fn schedule_campaign(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<ScheduleRequest>,
) -> Result<Json<Campaign>> {
    Ok(Json(
        state
            .broadcast
            .schedule(&user.0, id, body.scheduled_at)
            .await?,
    ))
}

/// DELETE /api/v1/campaigns/{id}/schedule
#[tracing::instrument(name = "http.cancel_schedule", skip(state, user))]
pub async fn cancel_schedule(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<CancelResponse>> {
    let outcome = state.broadcast.cancel_schedule(&user.0, id).await?;
    Ok(Json(CancelResponse {
        campaign_id: id,
        outcome,
    }))
}

/// POST /api/v1/campaigns/{id}/send
#[tracing::instrument(name = "http.send_now", skip(state, user))]
pub async fn send_now(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<DispatchOutcome>> {
    Ok(Json(state.broadcast.send_now(&user.0, id).await?))
}

/// GET /api/v1/campaigns/{id}/preview
pub async fn preview_campaign(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<CampaignPreview>> {
    Ok(Json(state.broadcast.preview(&user.0, id).await?))
}

/// POST /api/v1/campaigns/{id}/duplicate
pub async fn duplicate_campaign(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<Campaign>)> {
    let copy = state.broadcast.duplicate(&user.0, id).await?;
    Ok((StatusCode::CREATED, Json(copy)))
}

/// GET /api/v1/campaigns/{id}/deliveries?filter=opened&limit=100&offset=0
pub async fn list_deliveries(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Query(query): Query<DeliveryQuery>,
) -> Result<Json<DeliveryListResponse>> {
    let deliveries = state.broadcast.list_deliveries(&user.0, id, query).await?;
    let total = deliveries.len();
    Ok(Json(DeliveryListResponse {
        campaign_id: id,
        deliveries,
        total,
    }))
}

/// GET /api/v1/campaigns/{id}/stats
pub async fn campaign_stats(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<EngagementStats>> {
    Ok(Json(state.broadcast.stats(&user.0, id).await?))
}
