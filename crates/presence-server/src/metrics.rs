//! Metrics collection and export.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use presence_hub_core::{HubStats, ResponseOutcome};
use presence_protocol::Stanza;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const SESSIONS_TOTAL: &str = "presence_hub_sessions_total";
    pub const SESSIONS_ACTIVE: &str = "presence_hub_sessions_active";
    pub const STANZAS_TOTAL: &str = "presence_hub_stanzas_total";
    pub const RESOURCES_ONLINE: &str = "presence_hub_resources_online";
    pub const PENDING_DISCOVERY: &str = "presence_hub_pending_discovery";
    pub const DISCOVERY_RESPONSES: &str = "presence_hub_discovery_responses_total";
    pub const DISCOVERY_EXPIRED: &str = "presence_hub_discovery_expired_total";
    pub const LATENCY_SECONDS: &str = "presence_hub_latency_seconds";
    pub const ERRORS_TOTAL: &str = "presence_hub_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::SESSIONS_TOTAL,
        "Total number of sessions since server start"
    );
    metrics::describe_gauge!(names::SESSIONS_ACTIVE, "Current number of bound sessions");
    metrics::describe_counter!(names::STANZAS_TOTAL, "Total number of stanzas processed");
    metrics::describe_gauge!(
        names::RESOURCES_ONLINE,
        "Current number of registered resources"
    );
    metrics::describe_gauge!(
        names::PENDING_DISCOVERY,
        "Current number of outstanding disco#info queries"
    );
    metrics::describe_counter!(
        names::DISCOVERY_RESPONSES,
        "disco#info responses by outcome"
    );
    metrics::describe_counter!(
        names::DISCOVERY_EXPIRED,
        "disco#info queries dropped without a response"
    );
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Inbound frame processing latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Label for a stanza kind.
#[must_use]
pub fn stanza_kind(stanza: &Stanza) -> &'static str {
    match stanza {
        Stanza::Presence(_) => "presence",
        Stanza::Iq(_) => "iq",
    }
}

/// Record a stanza.
pub fn record_stanza(kind: &'static str, direction: &'static str) {
    counter!(names::STANZAS_TOTAL, "kind" => kind, "direction" => direction).increment(1);
}

/// Record a discovery response.
pub fn record_discovery_response(outcome: ResponseOutcome) {
    counter!(names::DISCOVERY_RESPONSES, "outcome" => outcome.as_str()).increment(1);
}

/// Record swept discovery queries.
pub fn record_discovery_expired(count: usize) {
    counter!(names::DISCOVERY_EXPIRED).increment(count as u64);
}

/// Publish hub gauges.
pub fn set_hub_stats(stats: HubStats) {
    gauge!(names::RESOURCES_ONLINE).set(stats.resources as f64);
    gauge!(names::PENDING_DISCOVERY).set(stats.pending_requests as f64);
}

/// Record frame processing latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that records the session end on drop.
pub struct SessionMetricsGuard;

impl SessionMetricsGuard {
    /// Create a new metrics guard, recording a session.
    #[must_use]
    pub fn new() -> Self {
        counter!(names::SESSIONS_TOTAL).increment(1);
        gauge!(names::SESSIONS_ACTIVE).increment(1.0);
        Self
    }
}

impl Default for SessionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SessionMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::SESSIONS_ACTIVE).decrement(1.0);
    }
}
