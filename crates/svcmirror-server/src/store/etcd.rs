//! Etcd Store Adapter
//!
//! Maps the etcd key space onto the tree the mirror expects:
//! - Keys are tree paths; intermediate nodes are implicit (a path exists when
//!   it is a key or prefixes one)
//! - A session is a lease kept alive by a background task; losing the lease
//!   raises `Expired`
//! - One prefix watch over the services tree feeds ZooKeeper-style one-shot
//!   watches armed by `get`/`get_children`
//!
//! Watch translation:
//! - PUT of a new key: `NodeCreated`, then `ChildrenChanged` on its ancestors
//! - PUT of an existing key: `DataChanged`
//! - DELETE: `NodeDeleted`, then `ChildrenChanged` on its ancestors

use super::{CoordinationStore, EventSender, SessionId, StoreConnector, StoreError, StoreEvent};
use crate::config::SyncConfig;
use backoff::{future::retry, ExponentialBackoff};
use etcd_client::{
    Client, EventType, GetOptions, LeaseKeepAliveStream, LeaseKeeper, WatchOptions, WatchStream,
    Watcher,
};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use svcmirror_core::PathLayout;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// One-shot watches armed by reads, consumed when they fire
#[derive(Debug, Default)]
struct ArmedWatches {
    data: HashSet<String>,
    children: HashSet<String>,
}

/// What happened to a key, as far as the tree is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyChange {
    Created,
    Updated,
    Deleted,
}

fn parent_of(path: &str) -> Option<&str> {
    match path.rfind('/') {
        Some(0) | None => None,
        Some(index) => Some(&path[..index]),
    }
}

impl ArmedWatches {
    /// Turn one key change into the notifications of the watches it fires.
    /// Ancestors up to and including `prefix` are checked for children
    /// watches, since creating or deleting a key can create or remove
    /// implicit intermediate nodes.
    fn translate(
        &mut self,
        change: KeyChange,
        key: &str,
        prefix: &str,
        session_id: SessionId,
    ) -> Vec<StoreEvent> {
        let mut fired = Vec::new();
        let path = key.to_string();

        match change {
            KeyChange::Created => fired.push(StoreEvent::NodeCreated { session_id, path }),
            KeyChange::Updated => {
                if self.data.remove(key) {
                    fired.push(StoreEvent::DataChanged { session_id, path });
                }
                return fired;
            }
            KeyChange::Deleted => {
                if self.data.remove(key) | self.children.remove(key) {
                    fired.push(StoreEvent::NodeDeleted { session_id, path });
                }
            }
        }

        let mut cursor = key;
        while let Some(parent) = parent_of(cursor) {
            if parent.len() < prefix.len() {
                break;
            }
            if self.children.remove(parent) {
                fired.push(StoreEvent::ChildrenChanged {
                    session_id,
                    path: parent.to_string(),
                });
            }
            cursor = parent;
        }
        fired
    }
}

/// Opens lease-backed sessions against an etcd cluster
#[derive(Debug, Clone)]
pub struct EtcdConnector {
    config: SyncConfig,
    services_prefix: String,
}

impl EtcdConnector {
    pub fn new(config: SyncConfig) -> Self {
        let services_prefix = PathLayout::new(&config.root).services_prefix();
        Self {
            config,
            services_prefix,
        }
    }

    /// Connect to etcd with exponential backoff
    async fn connect_client(&self) -> Result<Client, StoreError> {
        let backoff = ExponentialBackoff {
            initial_interval: self.config.backoff_initial,
            max_interval: self.config.backoff_max,
            max_elapsed_time: Some(self.config.backoff_max_elapsed),
            multiplier: self.config.backoff_multiplier,
            ..Default::default()
        };
        let servers = &self.config.servers;

        retry(backoff, || async {
            match Client::connect(servers, None).await {
                Ok(client) => {
                    debug!(servers = ?servers, "Connected to etcd");
                    Ok(client)
                }
                Err(e) => {
                    warn!(error = %e, "etcd connection failed, retrying");
                    Err(backoff::Error::transient(e))
                }
            }
        })
        .await
        .map_err(|e| StoreError::Connect(format!("etcd unreachable after retries: {e}")))
    }
}

impl StoreConnector for EtcdConnector {
    type Store = EtcdSession;

    async fn connect(&mut self, events: EventSender) -> Result<EtcdSession, StoreError> {
        let mut client = self.connect_client().await?;

        let ttl = i64::try_from(self.config.session_timeout.as_secs())
            .unwrap_or(i64::MAX)
            .max(1);
        let lease_id = client
            .lease_grant(ttl, None)
            .await
            .map_err(|e| StoreError::Connect(e.to_string()))?
            .id();
        debug!(lease_id = lease_id, ttl = ttl, "Lease granted");

        let (keeper, keeper_stream) = client
            .lease_keep_alive(lease_id)
            .await
            .map_err(|e| StoreError::Connect(e.to_string()))?;

        let watch_prefix = format!("{}/", self.services_prefix);
        let (watcher, watch_stream) = open_watch(&mut client, &watch_prefix)
            .await
            .map_err(|e| StoreError::Connect(e.to_string()))?;

        let watches = Arc::new(Mutex::new(ArmedWatches::default()));
        let keepalive_interval = (self.config.session_timeout / 3).max(Duration::from_secs(1));

        let tasks = vec![
            spawn_keepalive_task(keeper, keeper_stream, lease_id, keepalive_interval, events.clone()),
            spawn_watch_task(WatchTask {
                client: client.clone(),
                watcher,
                stream: watch_stream,
                watch_prefix,
                services_prefix: self.services_prefix.clone(),
                session_id: lease_id,
                watches: Arc::clone(&watches),
                events: events.clone(),
                reconnect_delay: self.config.reconnect_delay,
            }),
        ];

        info!(lease_id = lease_id, "etcd session established");
        let _ = events.send(StoreEvent::Connected {
            session_id: lease_id,
            reconnect: false,
        });

        Ok(EtcdSession {
            client,
            session_id: lease_id,
            watches,
            tasks,
        })
    }
}

async fn open_watch(
    client: &mut Client,
    prefix: &str,
) -> Result<(Watcher, WatchStream), etcd_client::Error> {
    let options = WatchOptions::new().with_prefix();
    client.watch(prefix, Some(options)).await
}

/// Keep the lease alive; report `Expired` once it cannot be renewed.
fn spawn_keepalive_task(
    mut keeper: LeaseKeeper,
    mut keeper_stream: LeaseKeepAliveStream,
    lease_id: i64,
    keepalive_interval: Duration,
    events: EventSender,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(keepalive_interval);
        interval.tick().await; // Skip first immediate tick

        loop {
            interval.tick().await;

            if let Err(e) = keeper.keep_alive().await {
                error!(lease_id = lease_id, error = %e, "Keep-alive send failed");
                break;
            }

            match keeper_stream.message().await {
                Ok(Some(resp)) if resp.ttl() > 0 => {
                    trace!(lease_id = lease_id, ttl = resp.ttl(), "Keep-alive OK");
                }
                Ok(Some(_)) => {
                    error!(lease_id = lease_id, "Lease expired on the server");
                    break;
                }
                Ok(None) => {
                    error!(lease_id = lease_id, "Keep-alive stream closed");
                    break;
                }
                Err(e) => {
                    error!(lease_id = lease_id, error = %e, "Keep-alive failed");
                    break;
                }
            }
        }

        let _ = events.send(StoreEvent::Expired {
            session_id: lease_id,
        });
    })
}

struct WatchTask {
    client: Client,
    watcher: Watcher,
    stream: WatchStream,
    watch_prefix: String,
    services_prefix: String,
    session_id: SessionId,
    watches: Arc<Mutex<ArmedWatches>>,
    events: EventSender,
    reconnect_delay: Duration,
}

/// Translate the prefix watch into tree events. A broken stream is reported
/// as `Reconnecting` and re-established after the reconnect delay.
fn spawn_watch_task(mut task: WatchTask) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if let Err(e) = task.pump().await {
                warn!(error = %e, "Watch stream failed, reconnecting");
                let _ = task.events.send(StoreEvent::Reconnecting {
                    session_id: task.session_id,
                });

                loop {
                    tokio::time::sleep(task.reconnect_delay).await;
                    match open_watch(&mut task.client, &task.watch_prefix).await {
                        Ok((watcher, stream)) => {
                            task.watcher = watcher;
                            task.stream = stream;
                            break;
                        }
                        Err(e) => warn!(error = %e, "Failed to re-establish watch stream"),
                    }
                }

                debug!(watch_id = task.watcher.watch_id(), "Watch stream re-established");
                let _ = task.events.send(StoreEvent::Connected {
                    session_id: task.session_id,
                    reconnect: true,
                });
            }
        }
    })
}

impl WatchTask {
    /// Process watch responses until the stream fails.
    async fn pump(&mut self) -> Result<(), StoreError> {
        loop {
            let resp = self
                .stream
                .message()
                .await
                .map_err(|e| StoreError::ConnectionLoss(e.to_string()))?
                .ok_or_else(|| StoreError::ConnectionLoss("watch stream closed".into()))?;

            if resp.canceled() {
                return Err(StoreError::ConnectionLoss("watch canceled".into()));
            }

            for event in resp.events() {
                let Some(kv) = event.kv() else { continue };
                let key = match kv.key_str() {
                    Ok(key) => key,
                    Err(e) => {
                        warn!(error = %e, "Invalid key encoding");
                        continue;
                    }
                };

                let change = match event.event_type() {
                    EventType::Put if kv.version() == 1 => KeyChange::Created,
                    EventType::Put => KeyChange::Updated,
                    EventType::Delete => KeyChange::Deleted,
                };

                let fired = self.watches.lock().translate(
                    change,
                    key,
                    &self.services_prefix,
                    self.session_id,
                );
                for store_event in fired {
                    let _ = self.events.send(store_event);
                }
            }
        }
    }
}

fn read_error(e: etcd_client::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// One lease-backed session
pub struct EtcdSession {
    client: Client,
    session_id: SessionId,
    watches: Arc<Mutex<ArmedWatches>>,
    tasks: Vec<JoinHandle<()>>,
}

impl EtcdSession {
    /// Whether any key sits below `path`
    async fn has_descendants(&self, path: &str) -> Result<bool, StoreError> {
        let options = GetOptions::new().with_prefix().with_count_only();
        let resp = self
            .client
            .clone()
            .get(format!("{path}/"), Some(options))
            .await
            .map_err(read_error)?;
        Ok(resp.count() > 0)
    }
}

impl Drop for EtcdSession {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl CoordinationStore for EtcdSession {
    fn session_id(&self) -> SessionId {
        self.session_id
    }

    async fn get(&self, path: &str, watch: bool) -> Result<Vec<u8>, StoreError> {
        if watch {
            self.watches.lock().data.insert(path.to_string());
        }

        let resp = self
            .client
            .clone()
            .get(path, None)
            .await
            .map_err(read_error)?;

        match resp.kvs().first() {
            Some(kv) => Ok(kv.value().to_vec()),
            None if self.has_descendants(path).await? => Ok(Vec::new()),
            None => {
                self.watches.lock().data.remove(path);
                Err(StoreError::NoNode(path.to_string()))
            }
        }
    }

    async fn get_children(&self, path: &str, watch: bool) -> Result<Vec<String>, StoreError> {
        if watch {
            self.watches.lock().children.insert(path.to_string());
        }

        let child_prefix = format!("{path}/");
        let options = GetOptions::new().with_prefix().with_keys_only();
        let resp = self
            .client
            .clone()
            .get(child_prefix.as_str(), Some(options))
            .await
            .map_err(read_error)?;

        let children: BTreeSet<String> = resp
            .kvs()
            .iter()
            .filter_map(|kv| kv.key_str().ok())
            .filter_map(|key| key.strip_prefix(child_prefix.as_str()))
            .filter_map(|rest| rest.split('/').next())
            .filter(|child| !child.is_empty())
            .map(String::from)
            .collect();

        if children.is_empty() {
            let exact = self
                .client
                .clone()
                .get(path, Some(GetOptions::new().with_count_only()))
                .await
                .map_err(read_error)?;
            if exact.count() == 0 {
                self.watches.lock().children.remove(path);
                return Err(StoreError::NoNode(path.to_string()));
            }
        }

        Ok(children.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX: &str = "/services";

    #[test]
    fn test_parent_of() {
        assert_eq!(parent_of("/services"), None);
        assert_eq!(parent_of("/services/a"), Some("/services"));
    }

    #[test]
    fn test_new_key_fires_ancestor_children_watches() {
        let mut watches = ArmedWatches::default();
        watches.children.insert("/services".into());
        watches.children.insert("/services/search/services".into());

        let fired = watches.translate(
            KeyChange::Created,
            "/services/search/services/s1",
            PREFIX,
            7,
        );
        assert_eq!(
            fired,
            vec![
                StoreEvent::NodeCreated {
                    session_id: 7,
                    path: "/services/search/services/s1".into()
                },
                StoreEvent::ChildrenChanged {
                    session_id: 7,
                    path: "/services/search/services".into()
                },
                StoreEvent::ChildrenChanged {
                    session_id: 7,
                    path: "/services".into()
                },
            ]
        );
        // One-shot: both watches are consumed
        assert!(watches.children.is_empty());
    }

    #[test]
    fn test_update_fires_only_armed_data_watch() {
        let mut watches = ArmedWatches::default();
        let key = "/services/checkout/services/host1";
        assert!(watches.translate(KeyChange::Updated, key, PREFIX, 1).is_empty());

        watches.data.insert(key.into());
        watches.children.insert("/services/checkout/services".into());
        assert_eq!(
            watches.translate(KeyChange::Updated, key, PREFIX, 1),
            vec![StoreEvent::DataChanged {
                session_id: 1,
                path: key.into()
            }]
        );
        // Payload updates leave children watches alone
        assert!(watches.children.contains("/services/checkout/services"));
    }

    #[test]
    fn test_delete_fires_node_deleted_then_parent() {
        let mut watches = ArmedWatches::default();
        let key = "/services/checkout/services/host1";
        watches.data.insert(key.into());
        watches.children.insert("/services/checkout/services".into());

        assert_eq!(
            watches.translate(KeyChange::Deleted, key, PREFIX, 3),
            vec![
                StoreEvent::NodeDeleted {
                    session_id: 3,
                    path: key.into()
                },
                StoreEvent::ChildrenChanged {
                    session_id: 3,
                    path: "/services/checkout/services".into()
                },
            ]
        );
    }

    #[test]
    fn test_ancestors_above_prefix_are_not_checked() {
        let mut watches = ArmedWatches::default();
        watches.children.insert("/nerve".into());
        let fired = watches.translate(
            KeyChange::Deleted,
            "/nerve/services/a/services/b",
            "/nerve/services",
            1,
        );
        assert!(fired.is_empty());
        assert!(watches.children.contains("/nerve"));
    }
}
