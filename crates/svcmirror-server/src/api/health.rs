//! Health Check Endpoints
//!
//! Liveness and readiness probe handlers.

use super::state::AppState;
use crate::sync::{ConnectionState, Session};
use axum::{extract::State, http::StatusCode, Json};
use std::sync::atomic::Ordering;

/// Liveness probe endpoint. Fails while no store session exists; a
/// connecting session still counts as alive.
#[tracing::instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<Session>) {
    let session = *state.session.borrow();
    match session.state {
        ConnectionState::Disconnected => {
            tracing::warn!("Health check failed: no store session");
            (StatusCode::SERVICE_UNAVAILABLE, Json(session))
        }
        ConnectionState::Connecting | ConnectionState::Connected => {
            (StatusCode::OK, Json(session))
        }
    }
}

/// Readiness probe endpoint. Returns OK after the first resync completes.
#[tracing::instrument(skip(state))]
pub async fn readiness_check(State(state): State<AppState>) -> Result<&'static str, StatusCode> {
    if state.readiness.load(Ordering::Acquire) {
        Ok("READY")
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use svcmirror_core::{ServiceDirectory, ServiceRegistry};
    use tokio::sync::watch;

    fn state(session: Session, ready: bool) -> AppState {
        let (_tx, rx) = watch::channel(session);
        AppState {
            directory: ServiceDirectory::new(Arc::new(ServiceRegistry::new())),
            session: rx,
            readiness: Arc::new(AtomicBool::new(ready)),
            metrics_state: None,
        }
    }

    #[tokio::test]
    async fn test_health_follows_session_state() {
        let (status, Json(session)) = health_check(State(state(Session::default(), false))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(session.state, ConnectionState::Disconnected);

        let connecting = Session {
            id: Some(1),
            state: ConnectionState::Connecting,
        };
        let (status, _) = health_check(State(state(connecting, false))).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_readiness() {
        assert_eq!(
            readiness_check(State(state(Session::default(), false))).await,
            Err(StatusCode::SERVICE_UNAVAILABLE)
        );
        assert_eq!(
            readiness_check(State(state(Session::default(), true))).await,
            Ok("READY")
        );
    }
}
