//! Coordination-store path layout
//!
//! Services are published under a configurable root:
//!
//! ```text
//! <root>/services                                  services prefix
//! <root>/services/<service>                        service node
//! <root>/services/<service>/services               instance list
//! <root>/services/<service>/services/<node>        instance node
//! ```
//!
//! Depths are counted on the root-relative path split on `/`, including the
//! leading empty segment, so `/services/checkout` has depth 3 and
//! `/services/checkout/services/host1` has depth 5.

const SEPARATOR: char = '/';
const SERVICES_SEGMENT: &str = "services";

/// Depth of the services prefix (`/services`)
pub const SERVICES_ROOT_DEPTH: usize = 2;
/// Depth of a service node (`/services/<service>`)
pub const SERVICE_PATH_DEPTH: usize = 3;
/// Depth of a service's instance list (`/services/<service>/services`)
pub const INSTANCE_LIST_PATH_DEPTH: usize = 4;
/// Depth of an instance node (`/services/<service>/services/<node>`)
pub const SERVICE_NODE_PATH_DEPTH: usize = 5;

/// Structural role of a path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathKind {
    /// The services prefix; its children are service names
    ServicesRoot,
    /// A service node
    Service { service: String },
    /// A service's instance list; its children are node names
    InstanceList { service: String },
    /// A single instance node
    Instance { service: String, node: String },
    /// Anything outside the layout
    Unrecognized,
}

impl PathKind {
    pub fn service(&self) -> Option<&str> {
        match self {
            PathKind::Service { service }
            | PathKind::InstanceList { service }
            | PathKind::Instance { service, .. } => Some(service),
            PathKind::ServicesRoot | PathKind::Unrecognized => None,
        }
    }
}

/// Path layout anchored at a root znode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathLayout {
    /// Root with trailing separators removed (`/` becomes empty)
    root: String,
}

impl Default for PathLayout {
    fn default() -> Self {
        Self::new("/")
    }
}

impl PathLayout {
    pub fn new(root: &str) -> Self {
        Self {
            root: root.trim_end_matches(SEPARATOR).to_string(),
        }
    }

    /// Normalized root (empty for `/`)
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn services_prefix(&self) -> String {
        format!("{}/{}", self.root, SERVICES_SEGMENT)
    }

    pub fn service_path(&self, service: &str) -> String {
        format!("{}/{}", self.services_prefix(), service)
    }

    pub fn instance_list_path(&self, service: &str) -> String {
        format!("{}/{}", self.service_path(service), SERVICES_SEGMENT)
    }

    pub fn instance_path(&self, service: &str, node: &str) -> String {
        format!("{}/{}", self.instance_list_path(service), node)
    }

    /// Root-relative form of `path`, if it lies under the root
    fn relative<'a>(&self, path: &'a str) -> Option<&'a str> {
        let rest = path.strip_prefix(self.root.as_str())?;
        rest.starts_with(SEPARATOR).then_some(rest)
    }

    /// Classify a path by segment depth.
    pub fn classify(&self, path: &str) -> PathKind {
        let Some(relative) = self.relative(path) else {
            return PathKind::Unrecognized;
        };

        let segments: Vec<&str> = relative.split(SEPARATOR).collect();
        if segments[1] != SERVICES_SEGMENT || segments.iter().skip(1).any(|s| s.is_empty()) {
            return PathKind::Unrecognized;
        }

        match segments.len() {
            SERVICES_ROOT_DEPTH => PathKind::ServicesRoot,
            SERVICE_PATH_DEPTH => PathKind::Service {
                service: segments[2].to_string(),
            },
            INSTANCE_LIST_PATH_DEPTH if segments[3] == SERVICES_SEGMENT => PathKind::InstanceList {
                service: segments[2].to_string(),
            },
            SERVICE_NODE_PATH_DEPTH if segments[3] == SERVICES_SEGMENT => PathKind::Instance {
                service: segments[2].to_string(),
                node: segments[4].to_string(),
            },
            _ => PathKind::Unrecognized,
        }
    }

    /// Service name of a service, instance-list or instance path
    pub fn service_name(&self, path: &str) -> Option<String> {
        self.classify(path).service().map(str::to_string)
    }

    /// Node name of an instance path
    pub fn node_name(&self, path: &str) -> Option<String> {
        match self.classify(path) {
            PathKind::Instance { node, .. } => Some(node),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_root_paths() {
        let layout = PathLayout::default();
        assert_eq!(layout.root(), "");
        assert_eq!(layout.services_prefix(), "/services");
        assert_eq!(layout.service_path("checkout"), "/services/checkout");
        assert_eq!(
            layout.instance_list_path("checkout"),
            "/services/checkout/services"
        );
        assert_eq!(
            layout.instance_path("checkout", "host1"),
            "/services/checkout/services/host1"
        );
    }

    #[test]
    fn test_classify_default_root() {
        let layout = PathLayout::default();

        assert_eq!(layout.classify("/services"), PathKind::ServicesRoot);
        assert_eq!(
            layout.classify("/services/checkout"),
            PathKind::Service {
                service: "checkout".into()
            }
        );
        assert_eq!(
            layout.classify("/services/checkout/services"),
            PathKind::InstanceList {
                service: "checkout".into()
            }
        );
        assert_eq!(
            layout.classify("/services/checkout/services/host1"),
            PathKind::Instance {
                service: "checkout".into(),
                node: "host1".into()
            }
        );
    }

    #[test]
    fn test_classify_nested_root() {
        let layout = PathLayout::new("/nerve/");
        assert_eq!(layout.root(), "/nerve");
        assert_eq!(
            layout.classify("/nerve/services/hello/services/localhost_0000000109"),
            PathKind::Instance {
                service: "hello".into(),
                node: "localhost_0000000109".into()
            }
        );
        assert_eq!(
            layout.service_name("/nerve/services/hello"),
            Some("hello".to_string())
        );
        // Outside the root
        assert_eq!(
            layout.classify("/services/hello/services/x"),
            PathKind::Unrecognized
        );
        assert_eq!(layout.classify("/nervous/services"), PathKind::Unrecognized);
    }

    #[test]
    fn test_unrecognized_paths() {
        let layout = PathLayout::default();
        for path in [
            "",
            "/",
            "/other",
            "/other/checkout",
            "/services/",
            "/services//services/x",
            "/services/checkout/nodes",
            "/services/checkout/nodes/host1",
            "/services/checkout/services/host1/extra",
            "/services/checkout/services/",
        ] {
            assert_eq!(layout.classify(path), PathKind::Unrecognized, "{path}");
        }
    }

    #[test]
    fn test_name_helpers() {
        let layout = PathLayout::default();
        let path = "/services/svcA/services/node1";
        assert_eq!(layout.service_name(path), Some("svcA".to_string()));
        assert_eq!(layout.node_name(path), Some("node1".to_string()));
        assert_eq!(layout.node_name("/services/svcA"), None);
        assert_eq!(layout.service_name("/services"), None);
    }
}
