//! In-memory fake cluster (testing only)
//!
//! `MemoryClusterClient` satisfies the [`ClusterClient`] contract without an
//! API server. Applied manifests are kept in a map; pods, nodes and services
//! are seeded by the test. Objects can be marked as never becoming ready or as
//! failing on delete to exercise timeout and cleanup paths.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::client_traits::{ClusterClient, NodeInfo, PodInfo, ReadyCondition, ServiceInfo};
use crate::error::ClusterError;
use crate::manifest::{Manifest, ObjectRef};
use crate::ClusterResult;

#[derive(Debug, Default)]
struct FakeState {
    applied: BTreeMap<ObjectRef, Manifest>,
    operations: Vec<String>,
    pods: BTreeMap<String, Vec<PodInfo>>,
    nodes: BTreeMap<String, NodeInfo>,
    services: BTreeMap<(String, String), ServiceInfo>,
    never_ready: BTreeSet<String>,
    failing_deletes: BTreeSet<String>,
    pod_list_drains: usize,
}

/// In-memory cluster backed by a `BTreeMap<ObjectRef, Manifest>`.
#[derive(Debug, Default)]
pub struct MemoryClusterClient {
    state: Mutex<FakeState>,
}

impl MemoryClusterClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed pods returned by `list_pods`.
    pub fn set_pods(&self, namespace: &str, pods: Vec<PodInfo>) {
        let mut state = self.state.lock().unwrap();
        state.pods.insert(namespace.to_string(), pods);
    }

    /// Clear the seeded pods after `polls` calls to `list_pods`.
    pub fn drain_pods_after(&self, polls: usize) {
        self.state.lock().unwrap().pod_list_drains = polls;
    }

    pub fn add_node(&self, node: NodeInfo) {
        let mut state = self.state.lock().unwrap();
        state.nodes.insert(node.name.clone(), node);
    }

    pub fn add_service(&self, namespace: &str, service: ServiceInfo) {
        let mut state = self.state.lock().unwrap();
        state
            .services
            .insert((namespace.to_string(), service.name.clone()), service);
    }

    /// Objects with this name never satisfy a rollout condition.
    pub fn never_ready(&self, name: &str) {
        self.state.lock().unwrap().never_ready.insert(name.to_string());
    }

    /// Deleting an object with this name fails.
    pub fn fail_delete(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_deletes
            .insert(name.to_string());
    }

    /// Currently applied objects.
    pub fn applied(&self) -> Vec<ObjectRef> {
        self.state.lock().unwrap().applied.keys().cloned().collect()
    }

    pub fn manifest(&self, target: &ObjectRef) -> Option<Manifest> {
        self.state.lock().unwrap().applied.get(target).cloned()
    }

    /// Ordered log of `apply`/`delete`/`wait` calls, e.g. `"apply Pod ns/name"`.
    pub fn operations(&self) -> Vec<String> {
        self.state.lock().unwrap().operations.clone()
    }
}

#[async_trait]
impl ClusterClient for MemoryClusterClient {
    async fn apply(&self, manifest: &Manifest, namespace: &str) -> ClusterResult<()> {
        let target = manifest.object_ref(namespace);
        let mut state = self.state.lock().unwrap();
        state.operations.push(format!("apply {target}"));
        state.applied.insert(target, manifest.clone());
        Ok(())
    }

    async fn delete(&self, target: &ObjectRef) -> ClusterResult<()> {
        let mut state = self.state.lock().unwrap();
        state.operations.push(format!("delete {target}"));
        if state.failing_deletes.contains(&target.name) {
            return Err(ClusterError::Serialization(format!(
                "injected delete failure for {target}"
            )));
        }
        state.applied.remove(target);
        Ok(())
    }

    async fn list_pods(&self, namespace: &str) -> ClusterResult<Vec<PodInfo>> {
        let mut state = self.state.lock().unwrap();
        let pods = state.pods.get(namespace).cloned().unwrap_or_default();
        if state.pod_list_drains > 0 {
            state.pod_list_drains -= 1;
            if state.pod_list_drains == 0 {
                state.pods.remove(namespace);
            }
        }
        Ok(pods)
    }

    async fn read_node(&self, name: &str) -> ClusterResult<NodeInfo> {
        let state = self.state.lock().unwrap();
        state
            .nodes
            .get(name)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound {
                kind: "Node".to_string(),
                namespace: String::new(),
                name: name.to_string(),
            })
    }

    async fn read_service(&self, namespace: &str, name: &str) -> ClusterResult<ServiceInfo> {
        let state = self.state.lock().unwrap();
        state
            .services
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| ClusterError::NotFound {
                kind: "Service".to_string(),
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }

    async fn wait_for_condition(
        &self,
        target: &ObjectRef,
        condition: &ReadyCondition,
        timeout: Duration,
    ) -> ClusterResult<()> {
        let blocked = {
            let mut state = self.state.lock().unwrap();
            state.operations.push(format!("wait {target} {condition}"));
            state.never_ready.contains(&target.name) || !state.applied.contains_key(target)
        };
        if blocked {
            tokio::time::sleep(timeout).await;
            return Err(ClusterError::Timeout {
                what: format!("{target} to reach {condition}"),
                seconds: timeout.as_secs(),
            });
        }
        Ok(())
    }
}
