//! Structured Events
//!
//! One function per domain event, each tagged with an `event_type` field so
//! JSON log pipelines can filter on it.
//!
//! Event types:
//! - `session_state_changed` - Connection state transitions
//! - `session_expired` - Session loss and replacement
//! - `resync_completed` - Full resynchronization finished
//! - `instance_added` - Instance entered the registry
//! - `instance_updated` - Known instance payload replaced
//! - `instance_removed` - Instance left the registry
//! - `service_removed` - Whole service left the registry

use tracing::{info, warn};

/// Emit a session state changed event
pub fn session_state_changed(session_id: Option<i64>, previous_state: &str, new_state: &str) {
    info!(
        event_type = "session_state_changed",
        session_id = ?session_id,
        previous_state = %previous_state,
        new_state = %new_state,
        "Session state changed"
    );
}

/// Emit a session expired event
pub fn session_expired(expired_session_id: i64, new_session_id: Option<i64>) {
    warn!(
        event_type = "session_expired",
        expired_session_id = expired_session_id,
        new_session_id = ?new_session_id,
        "Session expired, cached registry kept"
    );
}

/// Emit a resync completed event
pub fn resync_completed(
    session_id: i64,
    services: usize,
    instances: usize,
    failures: usize,
    reconnect: bool,
) {
    info!(
        event_type = "resync_completed",
        session_id = session_id,
        services = services,
        instances = instances,
        failures = failures,
        reconnect = reconnect,
        "Resync completed"
    );
}

pub fn instance_added(service: &str, node: &str, address: &str) {
    info!(
        event_type = "instance_added",
        service = %service,
        node = %node,
        address = %address,
        "Instance added"
    );
}

pub fn instance_updated(service: &str, node: &str, address: &str) {
    info!(
        event_type = "instance_updated",
        service = %service,
        node = %node,
        address = %address,
        "Instance updated"
    );
}

pub fn instance_removed(service: &str, node: &str) {
    info!(
        event_type = "instance_removed",
        service = %service,
        node = %node,
        "Instance removed"
    );
}

pub fn service_removed(service: &str, instance_count: usize) {
    info!(
        event_type = "service_removed",
        service = %service,
        instance_count = instance_count,
        "Service removed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_do_not_panic() {
        session_state_changed(Some(1), "disconnected", "connecting");
        session_state_changed(None, "connecting", "disconnected");
        session_expired(1, Some(2));
        resync_completed(2, 3, 10, 0, true);
        instance_added("checkout", "host1", "10.0.0.1:8080");
        instance_updated("checkout", "host1", "10.0.0.1:8081");
        instance_removed("checkout", "host1");
        service_removed("checkout", 2);
    }
}
