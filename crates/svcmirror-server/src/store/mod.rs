//! Coordination Store Client
//!
//! The seam between the synchronization actor and whatever client library
//! talks to the coordination store. A connector opens sessions; a session
//! answers `get`/`get_children` and reports session and watch activity as
//! [`StoreEvent`]s on the channel handed to [`StoreConnector::connect`].
//!
//! Implementations:
//! - `memory`: in-process tree with one-shot watches (tests and embedding)
//! - `etcd`: etcd key space mapped onto the tree (feature `etcd`)

#[cfg(feature = "etcd")]
pub mod etcd;
pub mod memory;

use std::future::Future;
use thiserror::Error;
use tokio::sync::mpsc;

/// Identifier of a coordination-store session
pub type SessionId = i64;

/// Channel the store uses to report events into the actor
pub type EventSender = mpsc::UnboundedSender<StoreEvent>;

/// Session and watch notifications, each tagged with the session it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// Session established (or re-established after a connection loss)
    Connected { session_id: SessionId, reconnect: bool },
    /// Connection lost; the session may still recover
    Reconnecting { session_id: SessionId },
    /// Session is gone for good
    Expired { session_id: SessionId },
    /// Children of a watched node changed
    ChildrenChanged { session_id: SessionId, path: String },
    /// A watched node was created
    NodeCreated { session_id: SessionId, path: String },
    /// A watched node was deleted
    NodeDeleted { session_id: SessionId, path: String },
    /// Payload of a watched node changed
    DataChanged { session_id: SessionId, path: String },
}

impl StoreEvent {
    pub fn session_id(&self) -> SessionId {
        match *self {
            StoreEvent::Connected { session_id, .. }
            | StoreEvent::Reconnecting { session_id }
            | StoreEvent::Expired { session_id }
            | StoreEvent::ChildrenChanged { session_id, .. }
            | StoreEvent::NodeCreated { session_id, .. }
            | StoreEvent::NodeDeleted { session_id, .. }
            | StoreEvent::DataChanged { session_id, .. } => session_id,
        }
    }

    /// Short label used in logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            StoreEvent::Connected { .. } => "connected",
            StoreEvent::Reconnecting { .. } => "reconnecting",
            StoreEvent::Expired { .. } => "expired",
            StoreEvent::ChildrenChanged { .. } => "children_changed",
            StoreEvent::NodeCreated { .. } => "node_created",
            StoreEvent::NodeDeleted { .. } => "node_deleted",
            StoreEvent::DataChanged { .. } => "data_changed",
        }
    }
}

/// Failed store operation. Every variant is handled the same way by the
/// actor (log and continue); the code only feeds diagnostics.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("no node at {0}")]
    NoNode(String),
    #[error("connection loss: {0}")]
    ConnectionLoss(String),
    #[error("session expired")]
    SessionExpired,
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::NoNode(_) => "no_node",
            StoreError::ConnectionLoss(_) => "connection_loss",
            StoreError::SessionExpired => "session_expired",
            StoreError::Connect(_) => "connect",
            StoreError::Backend(_) => "backend",
        }
    }
}

/// One open session against the coordination store
pub trait CoordinationStore: Send + Sync + 'static {
    fn session_id(&self) -> SessionId;

    /// Payload of `path`; `watch` arms a one-shot data watch
    fn get(
        &self,
        path: &str,
        watch: bool,
    ) -> impl Future<Output = Result<Vec<u8>, StoreError>> + Send;

    /// Child names of `path`; `watch` arms a one-shot children watch
    fn get_children(
        &self,
        path: &str,
        watch: bool,
    ) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;
}

/// Opens sessions against the configured servers
pub trait StoreConnector: Send + 'static {
    type Store: CoordinationStore;

    /// Open a new session. The store reports `Connected` on `events` once the
    /// session is usable.
    fn connect(
        &mut self,
        events: EventSender,
    ) -> impl Future<Output = Result<Self::Store, StoreError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_accessors() {
        let event = StoreEvent::NodeDeleted {
            session_id: 7,
            path: "/services/a/services/b".into(),
        };
        assert_eq!(event.session_id(), 7);
        assert_eq!(event.kind(), "node_deleted");

        let event = StoreEvent::Connected {
            session_id: 9,
            reconnect: true,
        };
        assert_eq!(event.session_id(), 9);
        assert_eq!(event.kind(), "connected");
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(StoreError::NoNode("/x".into()).code(), "no_node");
        assert_eq!(StoreError::SessionExpired.code(), "session_expired");
        assert_eq!(StoreError::NoNode("/x".into()).to_string(), "no node at /x");
    }
}
