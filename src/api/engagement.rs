//! Recipient-scoped tracking endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::domain::engagement::EngagementReceipt;
use crate::error::Result;
use crate::server::{AppState, AuthUser};

/// POST /api/v1/deliveries/{id}/open
#[tracing::instrument(name = "http.track_open", skip(state, user))]
pub async fn track_open(
    State(state): State<AppState>,
    user: AuthUser,
    Path(delivery_id): Path<Uuid>,
) -> Result<Json<EngagementReceipt>> {
    Ok(Json(state.broadcast.track_open(&user.0, delivery_id).await?))
}

/// POST /api/v1/deliveries/{id}/click
#[tracing::instrument(name = "http.track_click", skip(state, user))]
pub async fn track_click(
    State(state): State<AppState>,
    user: AuthUser,
    Path(delivery_id): Path<Uuid>,
) -> Result<Json<EngagementReceipt>> {
    Ok(Json(state.broadcast.track_click(&user.0, delivery_id).await?))
}
