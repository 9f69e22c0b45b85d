//! Error types for zerotesting-cluster

use thiserror::Error;

use crate::manifest::ManifestKind;

/// Errors surfaced by the cluster control-plane interface
#[derive(Error, Debug)]
pub enum ClusterError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Kubeconfig could not be loaded
    #[error("Kubeconfig error: {0}")]
    Config(String),

    /// Object absent from the cluster
    #[error("{kind} not found: {namespace}/{name}")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    /// Rollout or namespace wait exceeded its deadline
    #[error("Timed out after {seconds}s waiting for {what}")]
    Timeout { what: String, seconds: u64 },

    /// Service exposes no node port
    #[error("Service {service} has no node port")]
    NoNodePort { service: String },

    /// Node reports no usable address
    #[error("Node {node} has no usable address")]
    NoAddress { node: String },

    /// Manifest missing a required field (name, spec, ...)
    #[error("Invalid {kind} manifest: {reason}")]
    InvalidManifest { kind: ManifestKind, reason: String },

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),
}

impl From<serde_yaml::Error> for ClusterError {
    fn from(err: serde_yaml::Error) -> Self {
        ClusterError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for ClusterError {
    fn from(err: serde_json::Error) -> Self {
        ClusterError::Serialization(err.to_string())
    }
}

impl ClusterError {
    /// True when the API answered 404 for the requested object.
    pub fn is_not_found(&self) -> bool {
        match self {
            ClusterError::NotFound { .. } => true,
            ClusterError::Kube(kube::Error::Api(resp)) => resp.code == 404,
            _ => false,
        }
    }
}
