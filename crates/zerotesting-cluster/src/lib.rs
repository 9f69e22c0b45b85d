//! Zerotesting-Cluster: the control-plane surface consumed by the harness
//!
//! The experiment runner never talks to the Kubernetes API directly. It
//! consumes the narrow [`ClusterClient`] trait defined here.
//!
//! ## Key Components
//!
//! - `Manifest`: frozen deployable object (StatefulSet, Pod, Service)
//! - `ClusterClient`: apply / delete / list-pods / read-node / read-service / rollout wait
//! - `KubeClusterClient`: implementation over `kube`
//! - `fakes::MemoryClusterClient`: in-memory fake for tests

mod client_traits;
mod error;
pub mod fakes;
mod kube_client;
mod manifest;
mod node_port;

pub use client_traits::{
    ClusterClient, NodeInfo, PodInfo, ReadyCondition, ServiceInfo, ServicePortInfo,
};
pub use error::ClusterError;
pub use kube_client::{pod_satisfies, stateful_set_satisfies, KubeClusterClient};
pub use manifest::{to_multi_document_yaml, Manifest, ManifestKind, ObjectRef};
pub use node_port::resolve_node_port;

/// Result type for cluster operations
pub type ClusterResult<T> = std::result::Result<T, ClusterError>;
