//! Store Synchronization
//!
//! The [`SyncActor`] owns the store session and is the only writer of the
//! service registry:
//! - `session`: connection state machine values
//! - `mirror`: resynchronization and incremental event handlers
//! - `actor`: session fencing, state transitions and the run loop

pub mod actor;
mod mirror;
pub mod session;

pub use actor::{SyncActor, SyncError};
pub use mirror::ResyncReport;
pub use session::{ConnectionState, Session};

/// Behavior switches for the mirror
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Re-fetch already known instances on children and data changes
    pub refresh_known_nodes: bool,
    /// Drop cached services and instances that are gone upstream on resync
    pub purge_on_resync: bool,
}
