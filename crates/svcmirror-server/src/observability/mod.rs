//! Observability Module
//!
//! - `metrics`: Prometheus metrics for the mirror and its store session
//! - `events`: Structured event logging with consistent fields
//! - `tracing`: Subscriber setup (text or JSON console output)

pub mod events;
pub mod metrics;
pub mod tracing;

pub use self::metrics::{init_metrics, MetricsState};
pub use self::tracing::{init_tracing, TracingConfig};
