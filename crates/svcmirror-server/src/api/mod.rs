//! HTTP API Module
//!
//! Read-only REST surface over the mirrored registry.
//!
//! This module contains:
//! - `state`: Shared application state
//! - `health`: Liveness and readiness probes
//! - `services`: Service listing, lookup and instance selection
//! - `metrics`: Prometheus metrics endpoint

mod health;
mod metrics;
mod services;
mod state;

pub use services::{InstanceEntry, ServiceResponse, ServiceSummary, ServicesResponse};
pub use state::AppState;

use axum::{routing::get, Router};

/// Create the API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health checks
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        // Observability
        .route("/metrics", get(metrics::get_metrics))
        // Registry
        .route("/services", get(services::list_services))
        .route("/services/{service}", get(services::get_service))
        .route("/services/{service}/select", get(services::select_instance))
        .with_state(state)
}
