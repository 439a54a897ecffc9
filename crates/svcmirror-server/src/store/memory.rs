//! In-Memory Coordination Store
//!
//! A ZooKeeper-like tree kept in process memory. Watches are one-shot and
//! per session, as in ZooKeeper:
//! - `get(path, true)` arms a data watch: fires `DataChanged` on `set` and
//!   `NodeDeleted` on `delete`
//! - `get_children(path, true)` arms a children watch: fires
//!   `ChildrenChanged` when a child is created or deleted, `NodeDeleted` when
//!   the node itself goes away
//!
//! The tree side (`create`, `set`, `delete`, failure injection, session
//! expiry) stands in for other clients and the server; the mirror itself only
//! ever reads.

use super::{CoordinationStore, EventSender, SessionId, StoreConnector, StoreError, StoreEvent};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, trace};

/// First session id handed out; keeps ids visibly distinct from counters
const FIRST_SESSION_ID: SessionId = 0x1000;

#[derive(Debug)]
struct SessionEntry {
    events: EventSender,
    alive: bool,
}

#[derive(Debug)]
struct Tree {
    /// Every node, including intermediate ones, keyed by absolute path
    nodes: BTreeMap<String, Vec<u8>>,
    sessions: HashMap<SessionId, SessionEntry>,
    next_session_id: SessionId,
    data_watches: HashMap<String, HashSet<SessionId>>,
    child_watches: HashMap<String, HashSet<SessionId>>,
    /// Paths whose reads fail with a connection loss
    failing: HashSet<String>,
}

impl Default for Tree {
    fn default() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Vec::new());
        Self {
            nodes,
            sessions: HashMap::new(),
            next_session_id: FIRST_SESSION_ID,
            data_watches: HashMap::new(),
            child_watches: HashMap::new(),
            failing: HashSet::new(),
        }
    }
}

/// Pending notification, delivered after the tree lock is released
type Notification = (EventSender, StoreEvent);

fn parent_of(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(index) => Some(&path[..index]),
        None => None,
    }
}

fn child_prefix(path: &str) -> String {
    if path == "/" {
        "/".to_string()
    } else {
        format!("{path}/")
    }
}

impl Tree {
    fn children(&self, path: &str) -> Vec<String> {
        let prefix = child_prefix(path);
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, _)| {
                let rest = &key[prefix.len()..];
                (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
            })
            .collect()
    }

    fn check_session(&self, session_id: SessionId) -> Result<(), StoreError> {
        match self.sessions.get(&session_id) {
            Some(entry) if entry.alive => Ok(()),
            _ => Err(StoreError::SessionExpired),
        }
    }

    /// Drain one-shot watches on `path` into notifications.
    fn fire(
        watches: &mut HashMap<String, HashSet<SessionId>>,
        sessions: &HashMap<SessionId, SessionEntry>,
        path: &str,
        make_event: impl Fn(SessionId) -> StoreEvent,
        out: &mut Vec<Notification>,
    ) {
        let Some(watchers) = watches.remove(path) else {
            return;
        };
        for session_id in watchers {
            if let Some(entry) = sessions.get(&session_id).filter(|e| e.alive) {
                out.push((entry.events.clone(), make_event(session_id)));
            }
        }
    }

    fn children_changed(&mut self, parent: &str, out: &mut Vec<Notification>) {
        Self::fire(
            &mut self.child_watches,
            &self.sessions,
            parent,
            |session_id| StoreEvent::ChildrenChanged {
                session_id,
                path: parent.to_string(),
            },
            out,
        );
    }

    fn node_deleted(&mut self, path: &str, out: &mut Vec<Notification>) {
        let make = |session_id| StoreEvent::NodeDeleted {
            session_id,
            path: path.to_string(),
        };
        Self::fire(&mut self.data_watches, &self.sessions, path, make, out);
        Self::fire(&mut self.child_watches, &self.sessions, path, make, out);
    }
}

/// Shared in-memory tree; cloning yields another handle to the same tree
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tree: Arc<Mutex<Tree>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector opening sessions against this tree. Sessions report
    /// `Connected` as soon as they are opened.
    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            store: self.clone(),
            auto_connect: true,
        }
    }

    fn deliver(notifications: Vec<Notification>) {
        for (sender, event) in notifications {
            trace!(kind = event.kind(), session_id = event.session_id(), "Delivering store event");
            // The receiving actor may already be gone
            let _ = sender.send(event);
        }
    }

    /// Create `path` with `data`, creating missing ancestors with empty
    /// payloads. An existing node just has its payload replaced.
    pub fn create(&self, path: &str, data: impl Into<Vec<u8>>) {
        let data = data.into();
        let mut notifications = Vec::new();
        {
            let mut tree = self.tree.lock();
            if tree.nodes.contains_key(path) {
                drop(tree);
                self.set(path, data);
                return;
            }

            let mut missing = vec![path.to_string()];
            let mut cursor = path;
            while let Some(parent) = parent_of(cursor) {
                if tree.nodes.contains_key(parent) {
                    break;
                }
                missing.push(parent.to_string());
                cursor = parent;
            }

            for node in missing.iter().rev() {
                let payload = if node == path { data.clone() } else { Vec::new() };
                tree.nodes.insert(node.clone(), payload);
                if let Some(parent) = parent_of(node) {
                    tree.children_changed(parent, &mut notifications);
                }
            }
            debug!(path = %path, "Created node");
        }
        Self::deliver(notifications);
    }

    /// Replace the payload of an existing node. Returns false if absent.
    pub fn set(&self, path: &str, data: impl Into<Vec<u8>>) -> bool {
        let mut notifications = Vec::new();
        {
            let mut tree = self.tree.lock();
            let Some(payload) = tree.nodes.get_mut(path) else {
                return false;
            };
            *payload = data.into();

            let tree = &mut *tree;
            Tree::fire(
                &mut tree.data_watches,
                &tree.sessions,
                path,
                |session_id| StoreEvent::DataChanged {
                    session_id,
                    path: path.to_string(),
                },
                &mut notifications,
            );
        }
        Self::deliver(notifications);
        true
    }

    /// Delete `path` and everything below it. Returns false if absent.
    pub fn delete(&self, path: &str) -> bool {
        let mut notifications = Vec::new();
        {
            let mut tree = self.tree.lock();
            if path == "/" || !tree.nodes.contains_key(path) {
                return false;
            }

            let prefix = child_prefix(path);
            let mut doomed: Vec<String> = tree
                .nodes
                .range(prefix.clone()..)
                .take_while(|(key, _)| key.starts_with(&prefix))
                .map(|(key, _)| key.clone())
                .collect();
            // Deepest nodes go first, then the node itself
            doomed.sort_by_key(|p| std::cmp::Reverse(p.matches('/').count()));
            doomed.push(path.to_string());

            for node in &doomed {
                tree.nodes.remove(node);
                tree.node_deleted(node, &mut notifications);
                if let Some(parent) = parent_of(node) {
                    tree.children_changed(parent, &mut notifications);
                }
            }
            debug!(path = %path, removed = doomed.len(), "Deleted node");
        }
        Self::deliver(notifications);
        true
    }

    pub fn exists(&self, path: &str) -> bool {
        self.tree.lock().nodes.contains_key(path)
    }

    /// Make reads of `path` fail with a connection loss until cleared.
    pub fn fail_reads(&self, path: &str) {
        self.tree.lock().failing.insert(path.to_string());
    }

    pub fn clear_failure(&self, path: &str) {
        self.tree.lock().failing.remove(path);
    }

    /// Most recently opened session
    pub fn latest_session(&self) -> Option<SessionId> {
        let tree = self.tree.lock();
        (tree.next_session_id > FIRST_SESSION_ID).then(|| tree.next_session_id - 1)
    }

    /// Expire a session: its watches are dropped and it receives `Expired`.
    pub fn expire_session(&self, session_id: SessionId) {
        let notification = {
            let mut tree = self.tree.lock();
            for watchers in tree.data_watches.values_mut() {
                watchers.remove(&session_id);
            }
            for watchers in tree.child_watches.values_mut() {
                watchers.remove(&session_id);
            }
            tree.sessions.get_mut(&session_id).map(|entry| {
                entry.alive = false;
                (entry.events.clone(), StoreEvent::Expired { session_id })
            })
        };
        Self::deliver(notification.into_iter().collect());
    }

    /// Report a connection loss on a session; the session survives.
    pub fn disconnect_session(&self, session_id: SessionId) {
        self.notify(session_id, StoreEvent::Reconnecting { session_id });
    }

    /// Report that a previously disconnected session is usable again.
    pub fn reconnect_session(&self, session_id: SessionId) {
        self.notify(
            session_id,
            StoreEvent::Connected {
                session_id,
                reconnect: true,
            },
        );
    }

    fn notify(&self, session_id: SessionId, event: StoreEvent) {
        let sender = self
            .tree
            .lock()
            .sessions
            .get(&session_id)
            .filter(|entry| entry.alive)
            .map(|entry| entry.events.clone());
        if let Some(sender) = sender {
            Self::deliver(vec![(sender, event)]);
        }
    }

    fn open_session(&self, events: EventSender) -> SessionId {
        let mut tree = self.tree.lock();
        let session_id = tree.next_session_id;
        tree.next_session_id += 1;
        tree.sessions.insert(
            session_id,
            SessionEntry {
                events,
                alive: true,
            },
        );
        session_id
    }
}

/// Opens [`MemorySession`]s on a [`MemoryStore`]
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    store: MemoryStore,
    auto_connect: bool,
}

impl MemoryConnector {
    /// Keep new sessions silent; the test announces `Connected` itself.
    pub fn without_auto_connect(mut self) -> Self {
        self.auto_connect = false;
        self
    }
}

impl StoreConnector for MemoryConnector {
    type Store = MemorySession;

    async fn connect(&mut self, events: EventSender) -> Result<MemorySession, StoreError> {
        let session_id = self.store.open_session(events.clone());
        debug!(session_id = session_id, "Opened in-memory session");

        if self.auto_connect {
            let _ = events.send(StoreEvent::Connected {
                session_id,
                reconnect: false,
            });
        }

        Ok(MemorySession {
            store: self.store.clone(),
            session_id,
        })
    }
}

/// One session on a [`MemoryStore`]
#[derive(Debug, Clone)]
pub struct MemorySession {
    store: MemoryStore,
    session_id: SessionId,
}

impl CoordinationStore for MemorySession {
    fn session_id(&self) -> SessionId {
        self.session_id
    }

    async fn get(&self, path: &str, watch: bool) -> Result<Vec<u8>, StoreError> {
        let mut tree = self.store.tree.lock();
        tree.check_session(self.session_id)?;
        if tree.failing.contains(path) {
            return Err(StoreError::ConnectionLoss(path.to_string()));
        }

        let data = tree
            .nodes
            .get(path)
            .cloned()
            .ok_or_else(|| StoreError::NoNode(path.to_string()))?;
        if watch {
            tree.data_watches
                .entry(path.to_string())
                .or_default()
                .insert(self.session_id);
        }
        Ok(data)
    }

    async fn get_children(&self, path: &str, watch: bool) -> Result<Vec<String>, StoreError> {
        let mut tree = self.store.tree.lock();
        tree.check_session(self.session_id)?;
        if tree.failing.contains(path) {
            return Err(StoreError::ConnectionLoss(path.to_string()));
        }
        if !tree.nodes.contains_key(path) {
            return Err(StoreError::NoNode(path.to_string()));
        }

        let children = tree.children(path);
        if watch {
            tree.child_watches
                .entry(path.to_string())
                .or_default()
                .insert(self.session_id);
        }
        Ok(children)
    }
}
