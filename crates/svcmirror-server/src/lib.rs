//! svcmirror server
//!
//! Keeps a local mirror of the services published in a coordination store
//! and serves it over HTTP:
//! - `store`: client seam plus in-memory and etcd adapters
//! - `sync`: the actor that owns the session and writes the registry
//! - `config`: runtime configuration with environment overrides
//! - `observability`: tracing, Prometheus metrics and structured events
//! - `api`: axum routes over the service directory

pub mod api;
pub mod config;
pub mod observability;
pub mod store;
pub mod sync;

pub use config::SyncConfig;
pub use sync::{ConnectionState, Session, SyncActor, SyncError, SyncOptions};
