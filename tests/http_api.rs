//! HTTP surface tests: routing, bearer auth and error mapping.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use tower::ServiceExt;

use broadcast_campaign_service::auth::Claims;
use broadcast_campaign_service::config::{
    AudienceConfig, DatabaseConfig, DispatchConfig, JwtConfig, OtelConfig, RedisConfig,
    SchedulerConfig, ServerConfig, Settings, StorageConfig,
};
use broadcast_campaign_service::domain::access::{AccessRole, MemoryAccessControl};
use broadcast_campaign_service::domain::audience::MemoryAudienceDirectory;
use broadcast_campaign_service::domain::campaign::MemoryCampaignStore;
use broadcast_campaign_service::domain::delivery::{LogMessageSender, MemoryDeliveryStore};
use broadcast_campaign_service::domain::schedule::MemoryScheduleIndex;
use broadcast_campaign_service::server::{create_app, AppState, Backends};

const SECRET: &str = "test-secret-key-for-http-tests";

fn test_settings() -> Settings {
    Settings {
        server: ServerConfig::default(),
        jwt: JwtConfig {
            secret: SECRET.to_string(),
            issuer: None,
            audience: None,
        },
        storage: StorageConfig::default(),
        database: DatabaseConfig::default(),
        redis: RedisConfig::default(),
        scheduler: SchedulerConfig::default(),
        dispatch: DispatchConfig::default(),
        audience: AudienceConfig::default(),
        otel: OtelConfig::default(),
    }
}

fn token_for(user: &str) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: user.to_string(),
        exp: now + 3600,
        iat: now,
        extra: HashMap::new(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

fn create_test_app() -> Router {
    let directory = Arc::new(MemoryAudienceDirectory::new());
    directory.add_follower("biz-1", "u1");
    directory.add_follower("biz-1", "u2");
    let access = Arc::new(MemoryAccessControl::new());
    access.grant("biz-1", "owner-1", AccessRole::Owner);

    let backends = Backends {
        campaigns: Arc::new(MemoryCampaignStore::new()),
        deliveries: Arc::new(MemoryDeliveryStore::new()),
        directory,
        schedule_index: Arc::new(MemoryScheduleIndex::new()),
        sender: Arc::new(LogMessageSender),
        access,
    };
    create_app(AppState::with_backends(test_settings(), backends, None, None))
}

fn request(method: &str, uri: &str, user: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token_for(user)));
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn call(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

fn new_campaign_body() -> Value {
    json!({
        "business_id": "biz-1",
        "name": "Weekend promo",
        "content": { "message_type": "text", "body": "See you this weekend" },
        "targeting": { "type": "users", "ids": ["u1", "u2"] }
    })
}

#[tokio::test]
async fn test_health_is_public() {
    let app = create_test_app();
    let (status, body) = call(&app, request("GET", "/health", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["storage"]["campaigns"], "memory");
    assert_eq!(body["scheduler"]["pending"], 0);
}

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let app = create_test_app();
    let (status, body) = call(
        &app,
        request("POST", "/api/v1/campaigns", None, Some(new_campaign_body())),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_non_member_is_forbidden() {
    let app = create_test_app();
    let (status, body) = call(
        &app,
        request(
            "POST",
            "/api/v1/campaigns",
            Some("stranger"),
            Some(new_campaign_body()),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "FORBIDDEN");
}

#[tokio::test]
async fn test_create_send_and_track_over_http() {
    let app = create_test_app();

    let (status, campaign) = call(
        &app,
        request(
            "POST",
            "/api/v1/campaigns",
            Some("owner-1"),
            Some(new_campaign_body()),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(campaign["status"], "draft");
    let id = campaign["id"].as_str().unwrap().to_string();

    let (status, outcome) = call(
        &app,
        request("POST", &format!("/api/v1/campaigns/{}/send", id), Some("owner-1"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["outcome"], "finished");
    assert_eq!(outcome["status"], "completed");
    assert_eq!(outcome["sent_count"], 2);

    let (status, listing) = call(
        &app,
        request(
            "GET",
            &format!("/api/v1/campaigns/{}/deliveries", id),
            Some("owner-1"),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing["total"], 2);
    let delivery = listing["deliveries"]
        .as_array()
        .unwrap()
        .iter()
        .find(|d| d["recipient_id"] == "u1")
        .unwrap()
        .clone();
    let delivery_id = delivery["id"].as_str().unwrap();

    // Only the recipient may report engagement
    let (status, _) = call(
        &app,
        request(
            "POST",
            &format!("/api/v1/deliveries/{}/open", delivery_id),
            Some("owner-1"),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, receipt) = call(
        &app,
        request(
            "POST",
            &format!("/api/v1/deliveries/{}/click", delivery_id),
            Some("u1"),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(receipt["change"]["opened"], true);
    assert_eq!(receipt["change"]["clicked"], true);

    let (status, stats) = call(
        &app,
        request("GET", &format!("/api/v1/campaigns/{}/stats", id), Some("owner-1"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["open_count"], 1);
    assert_eq!(stats["click_count"], 1);
}

#[tokio::test]
async fn test_schedule_in_past_is_bad_request() {
    let app = create_test_app();
    let (_, campaign) = call(
        &app,
        request(
            "POST",
            "/api/v1/campaigns",
            Some("owner-1"),
            Some(new_campaign_body()),
        ),
    )
    .await;
    let id = campaign["id"].as_str().unwrap().to_string();

    let (status, body) = call(
        &app,
        request(
            "POST",
            &format!("/api/v1/campaigns/{}/schedule", id),
            Some("owner-1"),
            Some(json!({ "scheduled_at": "2020-01-01T00:00:00Z" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_unknown_campaign_is_not_found() {
    let app = create_test_app();
    let (status, _) = call(
        &app,
        request(
            "GET",
            &format!("/api/v1/campaigns/{}", uuid::Uuid::new_v4()),
            Some("owner-1"),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
