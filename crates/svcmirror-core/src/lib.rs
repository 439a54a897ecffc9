//! svcmirror core
//!
//! Runtime-independent building blocks of the service mirror:
//! - `instance`: instance payload parsing and validation
//! - `paths`: coordination-store path layout and classification
//! - `registry`: the shared service → instance map
//! - `selector`: weighted random instance selection
//! - `directory`: the read API handed to embedding hosts

pub mod directory;
pub mod instance;
pub mod paths;
pub mod registry;
pub mod selector;

pub use directory::{SelectedInstance, ServiceDirectory};
pub use instance::{InstanceConfig, ParseError};
pub use paths::{PathKind, PathLayout, SERVICE_NODE_PATH_DEPTH, SERVICE_PATH_DEPTH};
pub use registry::{ServiceInstances, ServiceRegistry};
pub use selector::WeightedSelector;
