//! Service Directory
//!
//! Read-only view of the registry handed to embedding hosts: list a
//! service's instances, pick one of them, or take a full snapshot.

use crate::instance::InstanceConfig;
use crate::registry::{ServiceInstances, ServiceRegistry};
use crate::selector::WeightedSelector;
use rand::Rng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One instance chosen by [`ServiceDirectory::select_one`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectedInstance {
    pub service: String,
    pub node: String,
    #[serde(flatten)]
    pub config: InstanceConfig,
}

/// Cheaply cloneable read handle over a shared registry
#[derive(Debug, Clone)]
pub struct ServiceDirectory {
    registry: Arc<ServiceRegistry>,
}

impl ServiceDirectory {
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Instances of `service` in canonical order; empty when unknown.
    pub fn lookup(&self, service: &str) -> Arc<ServiceInstances> {
        self.registry.get(service).unwrap_or_default()
    }

    /// Weighted random pick using the thread-local RNG.
    pub fn select_one(&self, service: &str) -> Option<SelectedInstance> {
        self.select_one_with(service, &mut rand::thread_rng())
    }

    /// Weighted random pick using the caller's RNG.
    pub fn select_one_with<R: Rng + ?Sized>(
        &self,
        service: &str,
        rng: &mut R,
    ) -> Option<SelectedInstance> {
        let instances = self.registry.get(service)?;
        let (node, config) = WeightedSelector::select(&instances, rng)?;
        Some(SelectedInstance {
            service: service.to_string(),
            node: node.clone(),
            config: config.clone(),
        })
    }

    /// Snapshot of every known service.
    pub fn list_all(&self) -> BTreeMap<String, Arc<ServiceInstances>> {
        self.registry.get_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn checkout_directory() -> ServiceDirectory {
        let registry = Arc::new(ServiceRegistry::new());
        registry.upsert(
            "checkout",
            "host1",
            InstanceConfig::new("10.0.0.1", 8080).with_weight(2),
        );
        registry.upsert(
            "checkout",
            "host2",
            InstanceConfig::new("10.0.0.2", 8080).with_weight(1),
        );
        ServiceDirectory::new(registry)
    }

    #[test]
    fn test_lookup() {
        let directory = checkout_directory();
        let instances = directory.lookup("checkout");
        assert_eq!(instances.len(), 2);
        assert_eq!(instances["host2"].host, "10.0.0.2");
        assert!(directory.lookup("unknown").is_empty());
    }

    #[test]
    fn test_select_one_unknown_or_empty_service() {
        let directory = checkout_directory();
        assert!(directory.select_one("unknown").is_none());

        directory.registry().ensure_service("empty");
        assert!(directory.select_one("empty").is_none());
    }

    #[test]
    fn test_select_one_with_fixed_draw() {
        let directory = checkout_directory();
        // StepRng(0, 0) always yields 0, so the draw lands on host1
        let mut rng = StepRng::new(0, 0);
        let selected = directory.select_one_with("checkout", &mut rng).unwrap();
        assert_eq!(selected.service, "checkout");
        assert_eq!(selected.node, "host1");
        assert_eq!(selected.config.address(), "10.0.0.1:8080");
    }

    #[test]
    fn test_select_one_returns_known_instance() {
        let directory = checkout_directory();
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..20 {
            let selected = directory.select_one_with("checkout", &mut rng).unwrap();
            assert!(selected.node == "host1" || selected.node == "host2");
        }
        assert!(directory.select_one("checkout").is_some());
    }

    #[test]
    fn test_list_all() {
        let directory = checkout_directory();
        directory
            .registry()
            .upsert("search", "s1", InstanceConfig::new("10.0.1.1", 9200));

        let all = directory.list_all();
        assert_eq!(all.keys().collect::<Vec<_>>(), vec!["checkout", "search"]);
        assert_eq!(all["checkout"].len(), 2);
    }

    #[test]
    fn test_selected_instance_serializes_flat() {
        let selected = SelectedInstance {
            service: "checkout".into(),
            node: "host1".into(),
            config: InstanceConfig::new("10.0.0.1", 8080).with_weight(2),
        };
        let json = serde_json::to_value(&selected).unwrap();
        assert_eq!(json["node"], "host1");
        assert_eq!(json["host"], "10.0.0.1");
        assert_eq!(json["port"], 8080);
        assert_eq!(json["weight"], 2);
    }
}
