//! Domain presets: named fragments that shape a config into a role.
//!
//! Role presets (`bootstrap_node`, `regression_node`, `publisher_pod`) create
//! the main container. Add-on presets (`store_node`, `discovery_sidecar`,
//! `netem_init_container`, `bandwidth_annotations`) require it and fail with
//! [`ConfigError::Precondition`](crate::error::ConfigError::Precondition)
//! when it is missing.

mod bandwidth;
mod discovery;
mod netem;
mod nodes;
mod publisher;
mod store;

pub use bandwidth::{bandwidth_annotations, BandwidthConfig, BANDWIDTH_ANNOTATION_PREFIX};
pub use discovery::{discovery_sidecar, DiscoveryMode};
pub use netem::{netem_init_container, NetemConfig};
pub use nodes::{bootstrap_node, node_container, regression_node, NodeOptions};
pub use publisher::{
    default_publisher_for, publisher_pod, PublisherConfig, PUBLISHER_APP, PUBLISHER_PROGRAM,
};
pub use store::{store_node, StoreOptions, STORE_SERVICE};

use crate::error::{ConfigError, Result};
use crate::workload::PodSpecConfig;

/// Name of the peer container in every node role.
pub const NODE_CONTAINER: &str = "waku";

/// Peer node binary.
pub const NODE_PROGRAM: &str = "/usr/bin/wakunode";

pub const NODE_IMAGE_REPO: &str = "wakuorg/nwaku";
pub const NODE_IMAGE_TAG: &str = "v0.35.1";

pub const BOOTSTRAP_SERVICE: &str = "zerotesting-bootstrap";
pub const BOOTSTRAP_APP: &str = "zerotesting-bootstrap";
pub const NODES_SERVICE: &str = "zerotesting-service";
pub const NODES_APP: &str = "zerotesting-nodes";

pub const REST_PORT: i32 = 8645;
pub const METRICS_PORT: i32 = 8008;
pub const P2P_PORT: i32 = 60000;
pub const DISCV5_PORT: i32 = 9000;

pub const DEFAULT_CLUSTER_ID: u32 = 2;

/// Fail unless the pod spec has container `name`.
pub(crate) fn require_container(spec: &PodSpecConfig, name: &str, preset: &str) -> Result<()> {
    if spec.has_container(name) {
        Ok(())
    } else {
        Err(ConfigError::Precondition(format!(
            "{preset} needs container {name}; apply a node role preset first"
        )))
    }
}
