//! Service Registry
//!
//! Shared mapping from service name to its instance set. Written only by the
//! synchronization actor, read concurrently by any number of callers.
//!
//! Each service's instance map is an immutable `Arc` snapshot. Mutations build
//! a new map and swap it in under the write lock, so a reader holding a
//! snapshot never observes a half-applied change.

use crate::instance::InstanceConfig;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, trace};

/// Instances of one service keyed by node name (node-name order is canonical)
pub type ServiceInstances = BTreeMap<String, InstanceConfig>;

/// Concurrent service → instances registry
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: RwLock<HashMap<String, Arc<ServiceInstances>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one service's instances
    pub fn get(&self, service: &str) -> Option<Arc<ServiceInstances>> {
        self.services.read().get(service).cloned()
    }

    /// Snapshot of every service
    pub fn get_all(&self) -> BTreeMap<String, Arc<ServiceInstances>> {
        self.services
            .read()
            .iter()
            .map(|(name, instances)| (name.clone(), Arc::clone(instances)))
            .collect()
    }

    pub fn contains_service(&self, service: &str) -> bool {
        self.services.read().contains_key(service)
    }

    pub fn contains(&self, service: &str, node: &str) -> bool {
        self.services
            .read()
            .get(service)
            .is_some_and(|instances| instances.contains_key(node))
    }

    /// Names of all known services
    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn service_count(&self) -> usize {
        self.services.read().len()
    }

    /// Total number of instances across all services
    pub fn instance_count(&self) -> usize {
        self.services.read().values().map(|i| i.len()).sum()
    }

    /// Make sure a (possibly empty) entry exists for `service`.
    pub fn ensure_service(&self, service: &str) {
        let mut services = self.services.write();
        if !services.contains_key(service) {
            debug!(service = %service, "Adding service to registry");
            services.insert(service.to_string(), Arc::new(ServiceInstances::new()));
        }
    }

    /// Insert or overwrite one instance. Returns the previous config, if any.
    pub fn upsert(
        &self,
        service: &str,
        node: &str,
        config: InstanceConfig,
    ) -> Option<InstanceConfig> {
        let mut services = self.services.write();
        let entry = services
            .entry(service.to_string())
            .or_insert_with(|| Arc::new(ServiceInstances::new()));

        let mut instances = (**entry).clone();
        let previous = instances.insert(node.to_string(), config);
        *entry = Arc::new(instances);

        trace!(service = %service, node = %node, replaced = previous.is_some(), "Upserted instance");
        previous
    }

    /// Remove one instance. Unknown services and nodes are a no-op.
    pub fn remove(&self, service: &str, node: &str) -> Option<InstanceConfig> {
        let mut services = self.services.write();
        let entry = services.get_mut(service)?;
        if !entry.contains_key(node) {
            return None;
        }

        let mut instances = (**entry).clone();
        let removed = instances.remove(node);
        *entry = Arc::new(instances);
        removed
    }

    /// Swap in a complete instance set for `service`.
    pub fn replace_service(&self, service: &str, instances: ServiceInstances) {
        self.services
            .write()
            .insert(service.to_string(), Arc::new(instances));
    }

    /// Drop a service with all of its instances.
    pub fn remove_service(&self, service: &str) -> Option<Arc<ServiceInstances>> {
        self.services.write().remove(service)
    }

    pub fn clear(&self) {
        self.services.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(host: &str) -> InstanceConfig {
        InstanceConfig::new(host, 8080)
    }

    #[test]
    fn test_empty_registry() {
        let registry = ServiceRegistry::new();
        assert!(registry.get("checkout").is_none());
        assert!(registry.get_all().is_empty());
        assert_eq!(registry.instance_count(), 0);
    }

    #[test]
    fn test_upsert_and_get() {
        let registry = ServiceRegistry::new();
        assert!(registry
            .upsert("checkout", "host1", instance("10.0.0.1"))
            .is_none());
        registry.upsert("checkout", "host2", instance("10.0.0.2"));

        let previous = registry.upsert("checkout", "host1", instance("10.0.0.9"));
        assert_eq!(previous.map(|p| p.host), Some("10.0.0.1".to_string()));

        let instances = registry.get("checkout").unwrap();
        assert_eq!(instances.len(), 2);
        assert_eq!(instances["host1"].host, "10.0.0.9");
        assert!(registry.contains("checkout", "host2"));
        assert_eq!(registry.service_count(), 1);
        assert_eq!(registry.instance_count(), 2);
    }

    #[test]
    fn test_ensure_service_keeps_instances() {
        let registry = ServiceRegistry::new();
        registry.ensure_service("search");
        assert_eq!(registry.get("search").map(|i| i.len()), Some(0));

        registry.upsert("search", "a", instance("a"));
        registry.ensure_service("search");
        assert_eq!(registry.get("search").map(|i| i.len()), Some(1));
    }

    #[test]
    fn test_remove_leaves_other_services() {
        let registry = ServiceRegistry::new();
        registry.upsert("svcA", "node1", instance("a1"));
        registry.upsert("svcA", "node2", instance("a2"));
        registry.upsert("svcB", "node1", instance("b1"));

        assert!(registry.remove("svcA", "node1").is_some());
        assert!(!registry.contains("svcA", "node1"));
        assert!(registry.contains("svcA", "node2"));
        assert!(registry.contains("svcB", "node1"));

        assert!(registry.remove("svcA", "missing").is_none());
        assert!(registry.remove("unknown", "node1").is_none());
        assert!(!registry.contains_service("unknown"));
    }

    #[test]
    fn test_snapshots_are_isolated_from_later_writes() {
        let registry = ServiceRegistry::new();
        registry.upsert("checkout", "host1", instance("10.0.0.1"));

        let snapshot = registry.get("checkout").unwrap();
        registry.upsert("checkout", "host2", instance("10.0.0.2"));
        registry.remove("checkout", "host1");

        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains_key("host1"));
        let current = registry.get("checkout").unwrap();
        assert_eq!(current.keys().collect::<Vec<_>>(), vec!["host2"]);
    }

    #[test]
    fn test_replace_and_remove_service() {
        let registry = ServiceRegistry::new();
        registry.upsert("checkout", "old", instance("old"));

        let mut fresh = ServiceInstances::new();
        fresh.insert("new".to_string(), instance("new"));
        registry.replace_service("checkout", fresh);
        assert_eq!(
            registry.get("checkout").unwrap().keys().collect::<Vec<_>>(),
            vec!["new"]
        );

        assert!(registry.remove_service("checkout").is_some());
        assert!(registry.remove_service("checkout").is_none());
        assert_eq!(registry.service_names(), Vec::<String>::new());
    }

    #[test]
    fn test_concurrent_readers_see_whole_service_maps() {
        let registry = Arc::new(ServiceRegistry::new());
        let writer = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                for round in 0..500u16 {
                    let mut instances = ServiceInstances::new();
                    instances.insert("a".into(), InstanceConfig::new("a", round));
                    instances.insert("b".into(), InstanceConfig::new("b", round));
                    registry.replace_service("pair", instances);
                }
            })
        };

        for _ in 0..500 {
            if let Some(snapshot) = registry.get("pair") {
                // Both instances always come from the same write
                assert_eq!(snapshot.len(), 2);
                assert_eq!(snapshot["a"].port, snapshot["b"].port);
            }
        }
        writer.join().unwrap();
    }
}
