//! `kube`-backed implementation of [`ClusterClient`].

use std::fmt::Debug;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Node, Pod, Service};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::client_traits::{
    ClusterClient, NodeInfo, PodInfo, ReadyCondition, ServiceInfo, ServicePortInfo,
};
use crate::error::ClusterError;
use crate::manifest::{Manifest, ManifestKind, ObjectRef};
use crate::ClusterResult;

const FIELD_MANAGER: &str = "zerotesting";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Cluster client talking to a real API server.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
    poll_interval: Duration,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Build a client from a kubeconfig file, optionally pinning a context.
    pub async fn from_kubeconfig(path: &Path, context: Option<&str>) -> ClusterResult<Self> {
        let kubeconfig =
            Kubeconfig::read_from(path).map_err(|e| ClusterError::Config(e.to_string()))?;
        let options = KubeConfigOptions {
            context: context.map(str::to_string),
            ..Default::default()
        };
        let config = Config::from_custom_kubeconfig(kubeconfig, &options)
            .await
            .map_err(|e| ClusterError::Config(e.to_string()))?;
        let client = Client::try_from(config)?;
        info!(kubeconfig = %path.display(), "connected to cluster");
        Ok(Self::new(client))
    }

    /// Interval between status polls while waiting on a rollout.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    async fn delete_in<K>(&self, target: &ObjectRef) -> ClusterResult<()>
    where
        K: kube::Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), &target.namespace);
        match api.delete(&target.name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_opt<K>(&self, target: &ObjectRef) -> ClusterResult<Option<K>>
    where
        K: kube::Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), &target.namespace);
        Ok(api.get_opt(&target.name).await?)
    }

    async fn condition_holds(
        &self,
        target: &ObjectRef,
        condition: &ReadyCondition,
    ) -> ClusterResult<bool> {
        Ok(match target.kind {
            ManifestKind::StatefulSet => self
                .get_opt::<StatefulSet>(target)
                .await?
                .is_some_and(|sts| stateful_set_satisfies(&sts, condition)),
            ManifestKind::Pod => self
                .get_opt::<Pod>(target)
                .await?
                .is_some_and(|pod| pod_satisfies(&pod, condition)),
            ManifestKind::Service => self.get_opt::<Service>(target).await?.is_some(),
        })
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn apply(&self, manifest: &Manifest, namespace: &str) -> ClusterResult<()> {
        let params = PatchParams::apply(FIELD_MANAGER).force();
        let name = manifest.name();
        if name.is_empty() {
            return Err(ClusterError::InvalidManifest {
                kind: manifest.kind(),
                reason: "missing metadata.name".to_string(),
            });
        }
        match manifest {
            Manifest::StatefulSet(obj) => {
                let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
                api.patch(name, &params, &Patch::Apply(obj)).await?;
            }
            Manifest::Pod(obj) => {
                let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
                api.patch(name, &params, &Patch::Apply(obj)).await?;
            }
            Manifest::Service(obj) => {
                let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
                api.patch(name, &params, &Patch::Apply(obj)).await?;
            }
        }
        debug!(kind = %manifest.kind(), name = %name, namespace = %namespace, "applied");
        Ok(())
    }

    async fn delete(&self, target: &ObjectRef) -> ClusterResult<()> {
        match target.kind {
            ManifestKind::StatefulSet => self.delete_in::<StatefulSet>(target).await,
            ManifestKind::Pod => self.delete_in::<Pod>(target).await,
            ManifestKind::Service => self.delete_in::<Service>(target).await,
        }
    }

    async fn list_pods(&self, namespace: &str) -> ClusterResult<Vec<PodInfo>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api.list(&ListParams::default()).await?;
        Ok(pods.items.iter().map(pod_info).collect())
    }

    async fn read_node(&self, name: &str) -> ClusterResult<NodeInfo> {
        let api: Api<Node> = Api::all(self.client.clone());
        let node = api.get_opt(name).await?.ok_or_else(|| ClusterError::NotFound {
            kind: "Node".to_string(),
            namespace: String::new(),
            name: name.to_string(),
        })?;
        let addresses = node
            .status
            .and_then(|s| s.addresses)
            .unwrap_or_default()
            .into_iter()
            .map(|a| (a.type_, a.address))
            .collect();
        Ok(NodeInfo {
            name: name.to_string(),
            addresses,
        })
    }

    async fn read_service(&self, namespace: &str, name: &str) -> ClusterResult<ServiceInfo> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let service = api.get_opt(name).await?.ok_or_else(|| ClusterError::NotFound {
            kind: "Service".to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        })?;
        let spec = service.spec.unwrap_or_default();
        Ok(ServiceInfo {
            name: name.to_string(),
            cluster_ip: spec.cluster_ip,
            selector: spec.selector.unwrap_or_default(),
            ports: spec
                .ports
                .unwrap_or_default()
                .into_iter()
                .map(|p| ServicePortInfo {
                    name: p.name,
                    port: p.port,
                    node_port: p.node_port,
                })
                .collect(),
        })
    }

    async fn wait_for_condition(
        &self,
        target: &ObjectRef,
        condition: &ReadyCondition,
        timeout: Duration,
    ) -> ClusterResult<()> {
        let poll = async {
            loop {
                if self.condition_holds(target, condition).await? {
                    return Ok(());
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        };
        match tokio::time::timeout(timeout, poll).await {
            Ok(result) => result,
            Err(_) => Err(ClusterError::Timeout {
                what: format!("{target} to reach {condition}"),
                seconds: timeout.as_secs(),
            }),
        }
    }
}

fn pod_info(pod: &Pod) -> PodInfo {
    let status = pod.status.as_ref();
    PodInfo {
        name: pod.metadata.name.clone().unwrap_or_default(),
        node_name: pod.spec.as_ref().and_then(|s| s.node_name.clone()),
        pod_ip: status.and_then(|s| s.pod_ip.clone()),
        phase: status.and_then(|s| s.phase.clone()),
        labels: pod.metadata.labels.clone().unwrap_or_default(),
        ready: pod_has_condition(pod, &ReadyCondition::default()),
    }
}

/// Evaluate a rollout condition against a stateful set.
///
/// StatefulSets carry no `Ready` condition of their own; `Ready=True` means
/// every desired replica reports ready at the current generation.
pub fn stateful_set_satisfies(sts: &StatefulSet, condition: &ReadyCondition) -> bool {
    let status = match sts.status.as_ref() {
        Some(status) => status,
        None => return false,
    };
    if condition.type_ == "Ready" {
        let desired = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        let ready = status.ready_replicas.unwrap_or(0);
        let observed = match (status.observed_generation, sts.metadata.generation) {
            (Some(observed), Some(generation)) => observed >= generation,
            _ => true,
        };
        let holds = observed && ready >= desired;
        return holds == (condition.status == "True");
    }
    status
        .conditions
        .iter()
        .flatten()
        .any(|c| c.type_ == condition.type_ && c.status == condition.status)
}

/// Evaluate a rollout condition against a pod.
///
/// A pod that already ran to completion reports `Ready=False (PodCompleted)`,
/// so phase `Succeeded` also satisfies `Ready=True`.
pub fn pod_satisfies(pod: &Pod, condition: &ReadyCondition) -> bool {
    let completed = pod_phase(pod) == Some("Succeeded");
    if completed && condition.type_ == "Ready" && condition.status == "True" {
        return true;
    }
    pod_has_condition(pod, condition)
}

fn pod_phase(pod: &Pod) -> Option<&str> {
    pod.status.as_ref().and_then(|s| s.phase.as_deref())
}

fn pod_has_condition(pod: &Pod, condition: &ReadyCondition) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == condition.type_ && c.status == condition.status)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::{StatefulSetSpec, StatefulSetStatus};
    use k8s_openapi::api::core::v1::{PodCondition, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn sts(replicas: i32, ready: i32) -> StatefulSet {
        StatefulSet {
            metadata: ObjectMeta {
                generation: Some(2),
                ..Default::default()
            },
            spec: Some(StatefulSetSpec {
                replicas: Some(replicas),
                ..Default::default()
            }),
            status: Some(StatefulSetStatus {
                replicas,
                ready_replicas: Some(ready),
                observed_generation: Some(2),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_stateful_set_ready_when_all_replicas_ready() {
        let cond = ReadyCondition::default();
        assert!(stateful_set_satisfies(&sts(3, 3), &cond));
        assert!(!stateful_set_satisfies(&sts(3, 2), &cond));
        assert!(stateful_set_satisfies(&sts(3, 2), &ReadyCondition::new("Ready", "False")));
    }

    #[test]
    fn test_stateful_set_stale_generation_not_ready() {
        let mut set = sts(1, 1);
        set.status.as_mut().unwrap().observed_generation = Some(1);
        assert!(!stateful_set_satisfies(&set, &ReadyCondition::default()));
    }

    #[test]
    fn test_pod_condition_match() {
        let pod = Pod {
            status: Some(PodStatus {
                conditions: Some(vec![PodCondition {
                    type_: "Ready".to_string(),
                    status: "True".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(pod_satisfies(&pod, &ReadyCondition::default()));
        assert!(!pod_satisfies(&pod, &ReadyCondition::new("Initialized", "True")));
        assert!(!pod_satisfies(&Pod::default(), &ReadyCondition::default()));
    }

    #[test]
    fn test_completed_pod_counts_as_ready() {
        let pod = Pod {
            status: Some(PodStatus {
                phase: Some("Succeeded".to_string()),
                conditions: Some(vec![PodCondition {
                    type_: "Ready".to_string(),
                    status: "False".to_string(),
                    reason: Some("PodCompleted".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(pod_satisfies(&pod, &ReadyCondition::default()));
        assert!(!pod_satisfies(&pod, &ReadyCondition::new("PodScheduled", "True")));
        assert!(!pod_info(&pod).ready);

        let mut failed = pod.clone();
        failed.status.as_mut().unwrap().phase = Some("Failed".to_string());
        assert!(!pod_satisfies(&failed, &ReadyCondition::default()));
    }
}
