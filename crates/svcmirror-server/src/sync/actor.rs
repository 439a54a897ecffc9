//! Synchronization Actor
//!
//! Drives the session state machine and funnels every store event through one
//! sequential handler:
//!
//! ```text
//! Disconnected --start--> Connecting --Connected--> Connected
//!                              ^                        |
//!                              +------Reconnecting------+
//! Connecting/Connected --Expired--> Disconnected --new session--> Connecting
//! ```
//!
//! Events carrying a session id other than the current one are dropped
//! before anything else happens.

use super::mirror::{Mirror, ResyncReport};
use super::session::{ConnectionState, Session};
use super::SyncOptions;
use crate::observability::{events, metrics};
use crate::store::{CoordinationStore, SessionId, StoreConnector, StoreError, StoreEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use svcmirror_core::{PathLayout, ServiceDirectory, ServiceRegistry};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace};

/// Conditions that stop the actor
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to open a store session")]
    Connect(#[source] StoreError),
    #[error("store event channel closed")]
    ChannelClosed,
    #[error("store event receiver already taken by a running actor")]
    ReceiverTaken,
}

/// Sole writer of the service registry
pub struct SyncActor<C: StoreConnector> {
    connector: C,
    /// Handle of the current session (None while disconnected)
    store: Option<C::Store>,
    session: Session,
    layout: PathLayout,
    registry: Arc<ServiceRegistry>,
    options: SyncOptions,
    /// Handed to the connector for every new session
    events_tx: mpsc::UnboundedSender<StoreEvent>,
    /// None while extracted by `run()` or `drain_events()`
    events_rx: Option<mpsc::UnboundedReceiver<StoreEvent>>,
    state_tx: watch::Sender<Session>,
    /// Set once the first resync completes
    readiness: Arc<AtomicBool>,
}

impl<C: StoreConnector> SyncActor<C> {
    pub fn new(
        connector: C,
        layout: PathLayout,
        registry: Arc<ServiceRegistry>,
        options: SyncOptions,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(Session::default());

        debug!(
            prefix = %layout.services_prefix(),
            refresh_known_nodes = options.refresh_known_nodes,
            purge_on_resync = options.purge_on_resync,
            "Creating sync actor"
        );

        Self {
            connector,
            store: None,
            session: Session::default(),
            layout,
            registry,
            options,
            events_tx,
            events_rx: Some(events_rx),
            state_tx,
            readiness: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn session(&self) -> Session {
        self.session
    }

    pub fn state(&self) -> ConnectionState {
        self.session.state
    }

    /// Observe session changes from other tasks
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.state_tx.subscribe()
    }

    pub fn readiness(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.readiness)
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Read handle over the registry this actor maintains
    pub fn directory(&self) -> ServiceDirectory {
        ServiceDirectory::new(Arc::clone(&self.registry))
    }

    fn set_session(&mut self, id: Option<SessionId>, state: ConnectionState) {
        let previous = self.session;
        self.session = Session { id, state };

        if previous.state != state {
            events::session_state_changed(id, previous.state.as_str(), state.as_str());
        }
        metrics::set_connection_state(state);
        self.state_tx.send_replace(self.session);
    }

    /// Open the first session. Connect failures are returned; retrying is
    /// the connector's business.
    pub async fn start(&mut self) -> Result<(), SyncError> {
        self.open_session().await
    }

    async fn open_session(&mut self) -> Result<(), SyncError> {
        let store = self
            .connector
            .connect(self.events_tx.clone())
            .await
            .map_err(SyncError::Connect)?;

        let session_id = store.session_id();
        info!(session_id = session_id, "Store session opened");
        self.store = Some(store);
        self.set_session(Some(session_id), ConnectionState::Connecting);
        Ok(())
    }

    /// Handle one store event. Only a failed reconnect after expiry is fatal.
    pub async fn handle_event(&mut self, event: StoreEvent) -> Result<(), SyncError> {
        let kind = event.kind();
        metrics::record_store_event(kind);

        if !self.session.is_current(event.session_id()) {
            trace!(
                kind = kind,
                event_session_id = event.session_id(),
                current_session_id = ?self.session.id,
                "Dropping event from stale session"
            );
            metrics::record_stale_event(kind);
            return Ok(());
        }

        match event {
            StoreEvent::Connected {
                session_id,
                reconnect,
            } => {
                self.connected(session_id, reconnect).await;
            }
            StoreEvent::Reconnecting { session_id } => {
                info!(session_id = session_id, "Store connection lost, waiting for reconnect");
                self.set_session(Some(session_id), ConnectionState::Connecting);
            }
            StoreEvent::Expired { session_id } => {
                self.expired(session_id).await?;
            }
            StoreEvent::ChildrenChanged { path, .. } => {
                if let Some(mirror) = self.mirror() {
                    mirror.children_changed(&path).await;
                }
            }
            StoreEvent::NodeCreated { path, .. } => {
                debug!(path = %path, "Node created");
            }
            StoreEvent::NodeDeleted { path, .. } => {
                if let Some(mirror) = self.mirror() {
                    mirror.node_deleted(&path);
                }
            }
            StoreEvent::DataChanged { path, .. } => {
                if let Some(mirror) = self.mirror() {
                    mirror.data_changed(&path).await;
                }
            }
        }

        metrics::set_registry_size(self.registry.service_count(), self.registry.instance_count());
        Ok(())
    }

    fn mirror(&self) -> Option<Mirror<'_, C::Store>> {
        let store = self.store.as_ref()?;
        Some(Mirror::new(store, &self.layout, &self.registry, self.options))
    }

    async fn connected(&mut self, session_id: SessionId, reconnect: bool) {
        info!(session_id = session_id, reconnect = reconnect, "Store session connected, resyncing");

        let report = match self.mirror() {
            Some(mirror) => mirror.resync().await,
            None => ResyncReport::default(),
        };

        metrics::record_resync(report.services_listed);
        events::resync_completed(
            session_id,
            report.services,
            report.instances,
            report.failures,
            reconnect,
        );

        self.readiness.store(true, Ordering::Release);
        self.set_session(Some(session_id), ConnectionState::Connected);
    }

    /// Replace an expired session. The registry keeps its contents.
    async fn expired(&mut self, session_id: SessionId) -> Result<(), SyncError> {
        self.store = None;
        self.set_session(None, ConnectionState::Disconnected);

        let result = self.open_session().await;
        events::session_expired(session_id, self.session.id);
        if let Err(e) = &result {
            error!(error = %e, "Could not replace expired session");
        }
        result
    }

    /// Handle every event already queued, without waiting for more.
    /// Returns how many events were handled.
    pub async fn drain_events(&mut self) -> Result<usize, SyncError> {
        let mut events_rx = self.events_rx.take().ok_or(SyncError::ReceiverTaken)?;

        let mut handled = 0;
        let result = loop {
            let Ok(event) = events_rx.try_recv() else {
                break Ok(handled);
            };
            if let Err(e) = self.handle_event(event).await {
                break Err(e);
            }
            handled += 1;
        };

        self.events_rx = Some(events_rx);
        result
    }

    /// Open a session if none is open yet, then handle events until a
    /// shutdown signal arrives or a fatal error occurs.
    pub async fn run(mut self, mut shutdown_rx: mpsc::UnboundedReceiver<()>) -> Result<(), SyncError> {
        let mut events_rx = self.events_rx.take().ok_or(SyncError::ReceiverTaken)?;

        if self.store.is_none() {
            self.start().await?;
        }

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Sync actor: received shutdown signal");
                    return Ok(());
                }

                event = events_rx.recv() => {
                    let Some(event) = event else {
                        return Err(SyncError::ChannelClosed);
                    };
                    self.handle_event(event).await?;
                }
            }
        }
    }
}
