use axum::{
    routing::{get, post, put},
    Router,
};

use crate::server::AppState;

use super::campaigns::{
    campaign_stats, cancel_schedule, create_campaign, delete_campaign, duplicate_campaign,
    estimate_target, get_campaign, list_campaigns, list_deliveries, preview_campaign,
    schedule_campaign, send_now, set_target, update_campaign,
};
use super::engagement::{track_click, track_open};
use super::health::{health, stats};
use super::metrics::prometheus_metrics;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health, stats & metrics
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(prometheus_metrics))
        .nest(
            "/api/v1",
            Router::new()
                // Business-scoped
                .route("/businesses/{business_id}/campaigns", get(list_campaigns))
                .route(
                    "/businesses/{business_id}/audience/estimate",
                    post(estimate_target),
                )
                // Campaign lifecycle
                .route("/campaigns", post(create_campaign))
                .route(
                    "/campaigns/{id}",
                    get(get_campaign)
                        .patch(update_campaign)
                        .delete(delete_campaign),
                )
                .route("/campaigns/{id}/target", put(set_target))
                .route(
                    "/campaigns/{id}/schedule",
                    post(schedule_campaign).delete(cancel_schedule),
                )
                .route("/campaigns/{id}/send", post(send_now))
                .route("/campaigns/{id}/preview", get(preview_campaign))
                .route("/campaigns/{id}/duplicate", post(duplicate_campaign))
                .route("/campaigns/{id}/deliveries", get(list_deliveries))
                .route("/campaigns/{id}/stats", get(campaign_stats))
                // Recipient tracking
                .route("/deliveries/{id}/open", post(track_open))
                .route("/deliveries/{id}/click", post(track_click)),
        )
}
