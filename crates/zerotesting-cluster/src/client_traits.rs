//! Cluster client trait definitions
//!
//! The experiment runner consumes only this narrow surface of the control
//! plane:
//! - `apply` / `delete` for deployable manifests
//! - `list_pods`, `read_node`, `read_service` for address resolution
//! - `wait_for_condition` for rollout waits
//!
//! A `kube`-backed implementation lives in `kube_client`; an in-memory fake is
//! provided for tests via the `fakes` module.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::manifest::{Manifest, ObjectRef};
use crate::ClusterResult;

/// Condition a rollout must reach, e.g. `(Ready, True)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyCondition {
    pub type_: String,
    pub status: String,
}

impl ReadyCondition {
    pub fn new(type_: &str, status: &str) -> Self {
        Self {
            type_: type_.to_string(),
            status: status.to_string(),
        }
    }
}

impl Default for ReadyCondition {
    fn default() -> Self {
        Self::new("Ready", "True")
    }
}

impl std::fmt::Display for ReadyCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.type_, self.status)
    }
}

/// Pod summary returned by `list_pods`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodInfo {
    pub name: String,
    pub node_name: Option<String>,
    pub pod_ip: Option<String>,
    pub phase: Option<String>,
    pub labels: std::collections::BTreeMap<String, String>,
    pub ready: bool,
}

/// Node summary returned by `read_node`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    /// `(type, address)` pairs, e.g. `("InternalIP", "10.0.0.4")`.
    pub addresses: Vec<(String, String)>,
}

impl NodeInfo {
    /// ExternalIP if present, otherwise InternalIP.
    pub fn preferred_address(&self) -> Option<&str> {
        ["ExternalIP", "InternalIP"].iter().find_map(|wanted| {
            self.addresses
                .iter()
                .find(|(kind, _)| kind == wanted)
                .map(|(_, addr)| addr.as_str())
        })
    }
}

/// One port of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePortInfo {
    pub name: Option<String>,
    pub port: i32,
    pub node_port: Option<i32>,
}

/// Service summary returned by `read_service`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    pub cluster_ip: Option<String>,
    pub selector: std::collections::BTreeMap<String, String>,
    pub ports: Vec<ServicePortInfo>,
}

impl ServiceInfo {
    /// First node port exposed by the service.
    pub fn first_node_port(&self) -> Option<i32> {
        self.ports.iter().find_map(|p| p.node_port)
    }
}

/// Minimal control-plane interface.
///
/// Guarantees:
/// - `apply` is idempotent (server-side apply).
/// - `delete` of an absent object succeeds.
/// - `wait_for_condition` returns `ClusterError::Timeout` once `timeout`
///   elapses without the condition holding.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Create or update the object described by `manifest` in `namespace`.
    async fn apply(&self, manifest: &Manifest, namespace: &str) -> ClusterResult<()>;

    /// Delete an object. No-op if absent.
    async fn delete(&self, target: &ObjectRef) -> ClusterResult<()>;

    /// List the pods of a namespace.
    async fn list_pods(&self, namespace: &str) -> ClusterResult<Vec<PodInfo>>;

    /// Read a node by name.
    async fn read_node(&self, name: &str) -> ClusterResult<NodeInfo>;

    /// Read a service by name.
    async fn read_service(&self, namespace: &str, name: &str) -> ClusterResult<ServiceInfo>;

    /// Block until `target` satisfies `condition` or `timeout` elapses.
    async fn wait_for_condition(
        &self,
        target: &ObjectRef,
        condition: &ReadyCondition,
        timeout: Duration,
    ) -> ClusterResult<()>;
}
