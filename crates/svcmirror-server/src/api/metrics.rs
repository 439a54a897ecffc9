//! Prometheus Metrics Endpoint
//!
//! GET /metrics renders the exposition text. Registry size and session state
//! gauges are refreshed from the live handles first, so a scrape never shows
//! values older than the request.

use super::AppState;
use crate::observability::metrics::{set_connection_state, set_registry_size};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};

const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// GET /metrics
#[tracing::instrument(skip(state))]
pub async fn get_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let Some(metrics) = &state.metrics_state else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            "metrics recorder not installed".to_string(),
        );
    };

    let registry = state.directory.registry();
    set_registry_size(registry.service_count(), registry.instance_count());
    set_connection_state(state.session.borrow().state);

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)],
        metrics.prometheus_handle.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::MetricsState;
    use crate::sync::Session;
    use axum::body::to_bytes;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use svcmirror_core::{ServiceDirectory, ServiceRegistry};
    use tokio::sync::watch;

    fn state(metrics_state: Option<MetricsState>) -> AppState {
        let (_tx, rx) = watch::channel(Session::default());
        AppState {
            directory: ServiceDirectory::new(Arc::new(ServiceRegistry::new())),
            session: rx,
            readiness: Arc::new(AtomicBool::new(true)),
            metrics_state,
        }
    }

    #[tokio::test]
    async fn test_metrics_without_recorder() {
        let response = get_metrics(State(state(None))).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"metrics recorder not installed");
    }

    #[tokio::test]
    async fn test_metrics_exposition_content_type() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let metrics_state = MetricsState {
            prometheus_handle: recorder.handle(),
        };

        let response = get_metrics(State(state(Some(metrics_state))))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            EXPOSITION_CONTENT_TYPE
        );
    }
}
