//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::{
    AUDIENCE_ERRORS_TOTAL, AUDIENCE_RESOLVE_LATENCY, BACKEND_ERRORS_TOTAL,
    CAMPAIGNS_DISPATCHED_TOTAL, CAMPAIGNS_IN_FLIGHT, DELIVERIES_FAILED_TOTAL,
    DELIVERIES_SENT_TOTAL, DISPATCH_DURATION, ENGAGEMENT_DUPLICATE_TOTAL, ENGAGEMENT_TOTAL,
    SCHEDULE_ARMED_TOTAL, SCHEDULE_DISARMED_TOTAL, SCHEDULE_FIRED_TOTAL, SCHEDULE_FIRE_LAG,
    SCHEDULE_PENDING, SEND_LATENCY, SEND_RETRIES_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording dispatch metrics
pub struct DispatchMetrics;

impl DispatchMetrics {
    /// Record a finished fan-out ("completed" or "failed")
    pub fn record_outcome(outcome: &str, duration_secs: f64) {
        CAMPAIGNS_DISPATCHED_TOTAL.with_label_values(&[outcome]).inc();
        DISPATCH_DURATION.observe(duration_secs);
    }

    /// Record a dispatch call that lost the state-transition race or was not due
    pub fn record_skipped() {
        CAMPAIGNS_DISPATCHED_TOTAL.with_label_values(&["skipped"]).inc();
    }

    pub fn campaign_started() {
        CAMPAIGNS_IN_FLIGHT.inc();
    }

    pub fn campaign_finished() {
        CAMPAIGNS_IN_FLIGHT.dec();
    }

    pub fn record_sent(latency_secs: f64) {
        DELIVERIES_SENT_TOTAL.inc();
        SEND_LATENCY.observe(latency_secs);
    }

    pub fn record_failed() {
        DELIVERIES_FAILED_TOTAL.inc();
    }

    pub fn record_retry() {
        SEND_RETRIES_TOTAL.inc();
    }
}

/// Helper struct for recording schedule metrics
pub struct ScheduleMetrics;

impl ScheduleMetrics {
    pub fn record_armed() {
        SCHEDULE_ARMED_TOTAL.inc();
    }

    pub fn record_disarmed() {
        SCHEDULE_DISARMED_TOTAL.inc();
    }

    /// Record a fired entry with the lag behind its due time
    pub fn record_fired(lag_secs: f64) {
        SCHEDULE_FIRED_TOTAL.inc();
        SCHEDULE_FIRE_LAG.observe(lag_secs.max(0.0));
    }

    pub fn set_pending(count: usize) {
        SCHEDULE_PENDING.set(count as i64);
    }
}

/// Helper struct for recording audience metrics
pub struct AudienceMetrics;

impl AudienceMetrics {
    pub fn record_resolve(latency_secs: f64) {
        AUDIENCE_RESOLVE_LATENCY.observe(latency_secs);
    }

    /// Record a failure ("invalid", "timeout", "unavailable")
    pub fn record_error(kind: &str) {
        AUDIENCE_ERRORS_TOTAL.with_label_values(&[kind]).inc();
    }
}

/// Helper struct for recording engagement metrics
pub struct EngagementMetrics;

impl EngagementMetrics {
    pub fn record_open() {
        ENGAGEMENT_TOTAL.with_label_values(&["open"]).inc();
    }

    pub fn record_click() {
        ENGAGEMENT_TOTAL.with_label_values(&["click"]).inc();
    }

    pub fn record_duplicate(event: &str) {
        ENGAGEMENT_DUPLICATE_TOTAL.with_label_values(&[event]).inc();
    }
}

/// Helper struct for backend error metrics
pub struct BackendMetrics;

impl BackendMetrics {
    pub fn record_error(backend: &str, operation: &str) {
        BACKEND_ERRORS_TOTAL
            .with_label_values(&[backend, operation])
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_contains_prefix() {
        DispatchMetrics::record_sent(0.01);
        ScheduleMetrics::record_armed();
        let output = encode_metrics().unwrap();
        assert!(output.contains("broadcast_deliveries_sent_total"));
        assert!(output.contains("broadcast_schedule_armed_total"));
    }

    #[test]
    fn test_engagement_labels() {
        let before = ENGAGEMENT_TOTAL.with_label_values(&["click"]).get();
        EngagementMetrics::record_click();
        assert!(ENGAGEMENT_TOTAL.with_label_values(&["click"]).get() > before);
    }
}
