//! Registry Mirroring
//!
//! Reads the store tree and applies what it finds to the registry:
//! 1. Resync - walk the whole services tree after a (re)connect
//! 2. Children changed - pick up new services and instances
//! 3. Node deleted - drop instances or whole services
//! 4. Data changed - optionally refresh a known instance
//!
//! Every read re-arms its watch. Failures are logged and counted, never
//! propagated: a failed subtree keeps whatever the registry already had.

use super::SyncOptions;
use crate::observability::{events, metrics};
use crate::store::{CoordinationStore, StoreError};
use svcmirror_core::{InstanceConfig, PathKind, PathLayout, ServiceInstances, ServiceRegistry};
use tracing::{debug, info, trace, warn};

/// Outcome of one full resynchronization
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResyncReport {
    /// Whether the services prefix could be listed at all
    pub services_listed: bool,
    /// Services in the registry afterwards
    pub services: usize,
    /// Instances in the registry afterwards
    pub instances: usize,
    /// Failed store reads and rejected payloads
    pub failures: usize,
}

/// Borrowed view over one session, the layout and the registry
pub(crate) struct Mirror<'a, S> {
    store: &'a S,
    layout: &'a PathLayout,
    registry: &'a ServiceRegistry,
    options: SyncOptions,
}

impl<'a, S: CoordinationStore> Mirror<'a, S> {
    pub fn new(
        store: &'a S,
        layout: &'a PathLayout,
        registry: &'a ServiceRegistry,
        options: SyncOptions,
    ) -> Self {
        Self {
            store,
            layout,
            registry,
            options,
        }
    }

    fn store_failure(&self, operation: &'static str, path: &str, error: &StoreError) {
        warn!(
            session_id = self.store.session_id(),
            operation = operation,
            path = %path,
            code = error.code(),
            error = %error,
            "Store read failed"
        );
        metrics::record_store_failure(operation, error.code());
    }

    fn unrecognized(&self, kind: &'static str, path: &str) {
        warn!(kind = kind, path = %path, "Ignoring event on unrecognized path");
        metrics::record_unrecognized_event(kind);
    }

    fn report(&self, services_listed: bool, failures: usize) -> ResyncReport {
        ResyncReport {
            services_listed,
            services: self.registry.service_count(),
            instances: self.registry.instance_count(),
            failures,
        }
    }

    /// Walk every service and instance under the prefix, re-arming all
    /// watches. Cached entries missing upstream survive unless purging.
    pub async fn resync(&self) -> ResyncReport {
        let prefix = self.layout.services_prefix();
        debug!(prefix = %prefix, "Resynchronizing registry");

        let services = match self.store.get_children(&prefix, true).await {
            Ok(services) => services,
            Err(e) => {
                self.store_failure("get_children", &prefix, &e);
                warn!("Keeping last known registry contents");
                return self.report(false, 1);
            }
        };

        let mut failures = 0;
        for service in &services {
            failures += match self.sync_service(service, self.options.purge_on_resync).await {
                Ok(node_failures) => node_failures,
                Err(_) => 1,
            };
        }

        if self.options.purge_on_resync {
            for cached in self.registry.service_names() {
                if !services.contains(&cached) {
                    self.remove_service(&cached);
                }
            }
        }

        self.report(true, failures)
    }

    /// Ensure `service` exists, list its instances and sync each one.
    /// The merged instance set is swapped in once. Returns the number of
    /// instances that could not be synced.
    async fn sync_service(&self, service: &str, purge: bool) -> Result<usize, StoreError> {
        self.registry.ensure_service(service);

        let list_path = self.layout.instance_list_path(service);
        let nodes = self
            .store
            .get_children(&list_path, true)
            .await
            .inspect_err(|e| self.store_failure("get_children", &list_path, e))?;

        let mut instances = self
            .registry
            .get(service)
            .map(|current| ServiceInstances::clone(&current))
            .unwrap_or_default();

        if purge {
            instances.retain(|node, _| {
                let listed = nodes.contains(node);
                if !listed {
                    events::instance_removed(service, node);
                }
                listed
            });
        }

        let mut failures = 0;
        for node in &nodes {
            match self.fetch_instance(service, node).await {
                Some(config) => {
                    let previous = instances.insert(node.clone(), config.clone());
                    instance_applied(service, node, &config, previous);
                }
                None => failures += 1,
            }
        }

        self.registry.replace_service(service, instances);
        trace!(service = %service, nodes = nodes.len(), failures = failures, "Synced service");
        Ok(failures)
    }

    /// Fetch and parse one instance, re-arming its data watch. None when the
    /// read or the payload failed.
    async fn fetch_instance(&self, service: &str, node: &str) -> Option<InstanceConfig> {
        let path = self.layout.instance_path(service, node);
        let data = match self.store.get(&path, true).await {
            Ok(data) => data,
            Err(e) => {
                self.store_failure("get", &path, &e);
                return None;
            }
        };

        match InstanceConfig::parse(&data) {
            Ok(config) => Some(config),
            Err(e) => {
                warn!(
                    service = %service,
                    node = %node,
                    error = %e,
                    "Skipping instance with invalid payload"
                );
                metrics::record_parse_failure();
                None
            }
        }
    }

    /// Fetch, parse and upsert one instance. The registry is untouched when
    /// the instance is skipped.
    async fn sync_instance(&self, service: &str, node: &str) {
        if let Some(config) = self.fetch_instance(service, node).await {
            let previous = self.registry.upsert(service, node, config.clone());
            instance_applied(service, node, &config, previous);
        }
    }

    fn remove_service(&self, service: &str) {
        if let Some(instances) = self.registry.remove_service(service) {
            events::service_removed(service, instances.len());
        }
    }

    pub async fn children_changed(&self, path: &str) {
        match self.layout.classify(path) {
            PathKind::ServicesRoot => {
                let services = match self.store.get_children(path, true).await {
                    Ok(services) => services,
                    Err(e) => return self.store_failure("get_children", path, &e),
                };

                for service in services {
                    if !self.registry.contains_service(&service) {
                        info!(service = %service, "Discovered new service");
                        // Listing failures are already logged
                        if let Ok(failures) = self.sync_service(&service, false).await {
                            debug!(
                                service = %service,
                                failures = failures,
                                "Synced discovered service"
                            );
                        }
                    }
                }
            }
            PathKind::Service { service } | PathKind::InstanceList { service } => {
                let list_path = self.layout.instance_list_path(&service);
                let nodes = match self.store.get_children(&list_path, true).await {
                    Ok(nodes) => nodes,
                    Err(StoreError::NoNode(_)) => {
                        debug!(service = %service, "Instance list is gone");
                        return self.remove_service(&service);
                    }
                    Err(e) => return self.store_failure("get_children", &list_path, &e),
                };

                self.registry.ensure_service(&service);
                for node in nodes {
                    let known = self.registry.contains(&service, &node);
                    if !known || self.options.refresh_known_nodes {
                        self.sync_instance(&service, &node).await;
                    }
                }
            }
            PathKind::Instance { .. } | PathKind::Unrecognized => {
                self.unrecognized("children_changed", path)
            }
        }
    }

    pub fn node_deleted(&self, path: &str) {
        match self.layout.classify(path) {
            PathKind::Instance { service, node } => {
                if !self.registry.contains_service(&service) {
                    debug!(service = %service, node = %node, "Deleted node of unknown service");
                    return;
                }
                if self.registry.remove(&service, &node).is_some() {
                    events::instance_removed(&service, &node);
                }
            }
            PathKind::Service { service } | PathKind::InstanceList { service } => {
                self.remove_service(&service)
            }
            PathKind::ServicesRoot => {
                warn!(path = %path, "Services prefix deleted, keeping cached registry")
            }
            PathKind::Unrecognized => self.unrecognized("node_deleted", path),
        }
    }

    pub async fn data_changed(&self, path: &str) {
        match self.layout.classify(path) {
            PathKind::Instance { service, node } => {
                if self.options.refresh_known_nodes && self.registry.contains(&service, &node) {
                    self.sync_instance(&service, &node).await;
                    return;
                }

                debug!(service = %service, node = %node, "Instance payload changed, not refreshing");
                // Re-arm the data watch so a later delete is still seen
                if let Err(e) = self.store.get(path, true).await {
                    self.store_failure("get", path, &e);
                }
            }
            PathKind::ServicesRoot
            | PathKind::Service { .. }
            | PathKind::InstanceList { .. } => {
                trace!(path = %path, "Ignoring data change on structural node")
            }
            PathKind::Unrecognized => self.unrecognized("data_changed", path),
        }
    }
}

fn instance_applied(
    service: &str,
    node: &str,
    config: &InstanceConfig,
    previous: Option<InstanceConfig>,
) {
    match previous {
        None => events::instance_added(service, node, &config.address()),
        Some(previous) if previous != *config => {
            events::instance_updated(service, node, &config.address())
        }
        Some(_) => trace!(service = %service, node = %node, "Instance unchanged"),
    }
}
