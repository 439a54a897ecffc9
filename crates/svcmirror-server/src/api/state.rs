//! Application State
//!
//! Shared state passed to all API handlers.

use crate::observability::MetricsState;
use crate::sync::Session;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use svcmirror_core::ServiceDirectory;
use tokio::sync::watch;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub directory: ServiceDirectory,
    /// Latest session published by the sync actor
    pub session: watch::Receiver<Session>,
    pub readiness: Arc<AtomicBool>,
    pub metrics_state: Option<MetricsState>,
}
