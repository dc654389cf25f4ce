//! Prometheus metrics for the broadcast engine.
//!
//! - Dispatch metrics (campaign outcomes, per-recipient sends, retries, latency)
//! - Schedule metrics (armed/disarmed/fired entries, fire lag)
//! - Audience metrics (resolution latency, dependency errors)
//! - Engagement metrics (opens, clicks)

mod helpers;

pub use helpers::{
    encode_metrics, AudienceMetrics, BackendMetrics, DispatchMetrics, EngagementMetrics,
    ScheduleMetrics,
};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "broadcast";

lazy_static! {
    // ============================================================================
    // Dispatch Metrics
    // ============================================================================

    /// Campaign dispatch attempts by outcome
    pub static ref CAMPAIGNS_DISPATCHED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_campaigns_dispatched_total", METRIC_PREFIX),
        "Campaign dispatch attempts by outcome",
        &["outcome"]
    ).unwrap();

    /// Campaigns currently fanning out in this process
    pub static ref CAMPAIGNS_IN_FLIGHT: IntGauge = register_int_gauge!(
        format!("{}_campaigns_in_flight", METRIC_PREFIX),
        "Campaigns currently being dispatched by this process"
    ).unwrap();

    /// Deliveries handed to the message-send collaborator successfully
    pub static ref DELIVERIES_SENT_TOTAL: IntCounter = register_int_counter!(
        format!("{}_deliveries_sent_total", METRIC_PREFIX),
        "Total deliveries sent successfully"
    ).unwrap();

    /// Deliveries left unsent after exhausting retries
    pub static ref DELIVERIES_FAILED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_deliveries_failed_total", METRIC_PREFIX),
        "Total deliveries that failed after all attempts"
    ).unwrap();

    /// Per-recipient send retries
    pub static ref SEND_RETRIES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_send_retries_total", METRIC_PREFIX),
        "Total per-recipient send retries"
    ).unwrap();

    /// Latency of a single send attempt
    pub static ref SEND_LATENCY: Histogram = register_histogram!(
        format!("{}_send_latency_seconds", METRIC_PREFIX),
        "Latency of a single message-send attempt in seconds",
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    ).unwrap();

    /// Wall time of a complete fan-out
    pub static ref DISPATCH_DURATION: Histogram = register_histogram!(
        format!("{}_dispatch_duration_seconds", METRIC_PREFIX),
        "Duration of a campaign fan-out in seconds",
        vec![0.01, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]
    ).unwrap();

    // ============================================================================
    // Schedule Metrics
    // ============================================================================

    /// Schedule entries armed (including re-arms)
    pub static ref SCHEDULE_ARMED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_schedule_armed_total", METRIC_PREFIX),
        "Total schedule entries armed"
    ).unwrap();

    /// Schedule entries removed by cancel or fire
    pub static ref SCHEDULE_DISARMED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_schedule_disarmed_total", METRIC_PREFIX),
        "Total schedule entries disarmed"
    ).unwrap();

    /// Due entries handed to the dispatcher
    pub static ref SCHEDULE_FIRED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_schedule_fired_total", METRIC_PREFIX),
        "Total schedule entries fired"
    ).unwrap();

    /// Entries currently held by the schedule index
    pub static ref SCHEDULE_PENDING: IntGauge = register_int_gauge!(
        format!("{}_schedule_pending", METRIC_PREFIX),
        "Schedule entries currently armed"
    ).unwrap();

    /// Delay between scheduled_at and the moment the due-scan fired it
    pub static ref SCHEDULE_FIRE_LAG: Histogram = register_histogram!(
        format!("{}_schedule_fire_lag_seconds", METRIC_PREFIX),
        "Delay between scheduled time and fire time in seconds",
        vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 300.0]
    ).unwrap();

    // ============================================================================
    // Audience Metrics
    // ============================================================================

    /// Audience resolution latency
    pub static ref AUDIENCE_RESOLVE_LATENCY: Histogram = register_histogram!(
        format!("{}_audience_resolve_latency_seconds", METRIC_PREFIX),
        "Audience resolution latency in seconds",
        vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]
    ).unwrap();

    /// Audience resolution failures by kind
    pub static ref AUDIENCE_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_audience_errors_total", METRIC_PREFIX),
        "Audience resolution failures",
        &["kind"]
    ).unwrap();

    // ============================================================================
    // Engagement Metrics
    // ============================================================================

    /// First-time engagement events recorded
    pub static ref ENGAGEMENT_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_engagement_total", METRIC_PREFIX),
        "First-time engagement events recorded",
        &["event"]
    ).unwrap();

    /// Engagement calls that changed nothing (repeat open/click)
    pub static ref ENGAGEMENT_DUPLICATE_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_engagement_duplicate_total", METRIC_PREFIX),
        "Engagement calls ignored because the event was already recorded",
        &["event"]
    ).unwrap();

    // ============================================================================
    // Backend Metrics
    // ============================================================================

    /// Storage backend errors
    pub static ref BACKEND_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_backend_errors_total", METRIC_PREFIX),
        "Storage backend errors",
        &["backend", "operation"]
    ).unwrap();
}
