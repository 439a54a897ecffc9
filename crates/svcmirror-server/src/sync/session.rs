//! Session State

use crate::store::SessionId;
use serde::Serialize;
use std::fmt;

/// Connection state of the current session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No session (initial, or just expired)
    #[default]
    Disconnected,
    /// Session opened or connection lost, waiting for `Connected`
    Connecting,
    /// Resynchronized and following watch events
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The one current session as seen by observers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Session {
    /// Id of the current session; `None` before the first connect
    pub id: Option<SessionId>,
    pub state: ConnectionState,
}

impl Session {
    /// Whether an event from `session_id` belongs to this session
    pub fn is_current(&self, session_id: SessionId) -> bool {
        self.id == Some(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_session() {
        let session = Session::default();
        assert_eq!(session.state, ConnectionState::Disconnected);
        assert!(!session.is_current(0));
    }

    #[test]
    fn test_is_current() {
        let session = Session {
            id: Some(42),
            state: ConnectionState::Connecting,
        };
        assert!(session.is_current(42));
        assert!(!session.is_current(41));
    }

    #[test]
    fn test_state_serializes_snake_case() {
        let session = Session {
            id: Some(7),
            state: ConnectionState::Connected,
        };
        let json = serde_json::to_value(session).unwrap();
        assert_eq!(json["state"], "connected");
        assert_eq!(json["id"], 7);
        assert_eq!(ConnectionState::Disconnected.to_string(), "disconnected");
    }
}
