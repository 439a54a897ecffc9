//! Prometheus Metrics
//!
//! Metrics tracked:
//! - `svcmirror_store_events_total` - counter of store events by kind
//! - `svcmirror_stale_events_total` - counter of events dropped by session fencing
//! - `svcmirror_store_failures_total` - counter of failed store reads by error code
//! - `svcmirror_parse_failures_total` - counter of rejected instance payloads
//! - `svcmirror_unrecognized_events_total` - counter of events on unrecognized paths
//! - `svcmirror_resyncs_total` - counter of full resynchronizations
//! - `svcmirror_services` - gauge of services in the registry
//! - `svcmirror_instances` - gauge of instances in the registry
//! - `svcmirror_connection_state` - gauge of the session state (0 disconnected, 1 connecting, 2 connected)

use crate::sync::ConnectionState;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// State containing the Prometheus handle for metrics export
#[derive(Clone)]
pub struct MetricsState {
    pub prometheus_handle: PrometheusHandle,
}

/// Install the Prometheus recorder and describe every metric.
pub fn init_metrics() -> Result<MetricsState, Box<dyn std::error::Error + Send + Sync>> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_metric_descriptions();

    Ok(MetricsState {
        prometheus_handle: handle,
    })
}

fn register_metric_descriptions() {
    // Event metrics
    describe_counter!(
        "svcmirror_store_events_total",
        "Total number of store events received, by kind"
    );
    describe_counter!(
        "svcmirror_stale_events_total",
        "Total number of events discarded because they belong to a superseded session"
    );
    describe_counter!(
        "svcmirror_unrecognized_events_total",
        "Total number of events on paths outside the service layout"
    );

    // Failure metrics
    describe_counter!(
        "svcmirror_store_failures_total",
        "Total number of failed store reads, by error code"
    );
    describe_counter!(
        "svcmirror_parse_failures_total",
        "Total number of instance payloads rejected by the parser"
    );

    // Sync metrics
    describe_counter!(
        "svcmirror_resyncs_total",
        "Total number of full resynchronizations, by outcome"
    );
    describe_gauge!("svcmirror_services", "Number of services in the registry");
    describe_gauge!("svcmirror_instances", "Number of instances in the registry");
    describe_gauge!(
        "svcmirror_connection_state",
        "Session state: 0 disconnected, 1 connecting, 2 connected"
    );
}

/// Record a received store event
pub fn record_store_event(kind: &'static str) {
    counter!("svcmirror_store_events_total", "kind" => kind).increment(1);
}

/// Record an event dropped by session fencing
pub fn record_stale_event(kind: &'static str) {
    counter!("svcmirror_stale_events_total", "kind" => kind).increment(1);
}

/// Record a failed store read
pub fn record_store_failure(operation: &'static str, code: &'static str) {
    counter!(
        "svcmirror_store_failures_total",
        "operation" => operation,
        "code" => code
    )
    .increment(1);
}

pub fn record_parse_failure() {
    counter!("svcmirror_parse_failures_total").increment(1);
}

pub fn record_unrecognized_event(kind: &'static str) {
    counter!("svcmirror_unrecognized_events_total", "kind" => kind).increment(1);
}

/// Record a completed resynchronization; `complete` is false when the
/// services listing itself failed
pub fn record_resync(complete: bool) {
    let outcome = if complete { "complete" } else { "root_failed" };
    counter!("svcmirror_resyncs_total", "outcome" => outcome).increment(1);
}

/// Update the registry size gauges
pub fn set_registry_size(services: usize, instances: usize) {
    gauge!("svcmirror_services").set(services as f64);
    gauge!("svcmirror_instances").set(instances as f64);
}

pub fn set_connection_state(state: ConnectionState) {
    let value = match state {
        ConnectionState::Disconnected => 0.0,
        ConnectionState::Connecting => 1.0,
        ConnectionState::Connected => 2.0,
    };
    gauge!("svcmirror_connection_state").set(value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_recording() {
        // No recorder installed; these must still not panic
        record_store_event("children_changed");
        record_stale_event("node_deleted");
        record_store_failure("get_children", "connection_loss");
        record_parse_failure();
        record_unrecognized_event("node_deleted");
        record_resync(true);
        record_resync(false);
        set_registry_size(3, 10);
        set_connection_state(ConnectionState::Connected);
    }
}
