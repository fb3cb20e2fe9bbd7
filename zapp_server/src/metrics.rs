//! Prometheus metrics for build observability.

use metrics::{counter, gauge, histogram};

use crate::models::status::BuildStatus;

/// Initialize metrics exporter (Prometheus).
pub fn init_metrics() {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    if let Err(e) = builder.install() {
        tracing::warn!("Failed to install Prometheus exporter: {}", e);
    }
}

/// Record a webhook received event.
pub fn webhook_received(event_type: &str) {
    counter!("zapp_webhooks_received_total", "event" => event_type.to_string()).increment(1);
}

/// Record a build state transition.
pub fn build_status_changed(status: BuildStatus) {
    counter!("zapp_builds_total", "status" => status.as_str()).increment(1);
}

/// Record build duration.
pub fn build_duration(duration_ms: i64) {
    histogram!("zapp_build_duration_ms").record(duration_ms.max(0) as f64);
}

/// Set the number of builds currently in flight.
pub fn builds_in_flight(count: usize) {
    gauge!("zapp_builds_in_flight").set(count as f64);
}
