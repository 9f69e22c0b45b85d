//! Per-run state handed to an experiment body.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::time::Instant;
use tracing::{info, warn};
use zerotesting_cluster::{to_multi_document_yaml, ClusterClient, ClusterError, Manifest};

use crate::error::HarnessError;
use crate::experiment::cleanup::CleanupStack;
use crate::experiment::events::{Event, EventLog, EventRecord};
use crate::harness::HarnessConfig;
use crate::obs;

pub const MERGED_MANIFEST_FILE: &str = "out_deployment.yaml";

pub struct RunContext {
    client: Arc<dyn ClusterClient>,
    harness: HarnessConfig,
    workdir: PathBuf,
    events: EventLog,
    stack: CleanupStack,
    deployed: Vec<Manifest>,
}

impl RunContext {
    pub fn new(
        client: Arc<dyn ClusterClient>,
        harness: HarnessConfig,
        workdir: &Path,
        events: EventLog,
    ) -> Self {
        Self {
            client,
            harness,
            workdir: workdir.to_path_buf(),
            events,
            stack: CleanupStack::new(),
            deployed: Vec::new(),
        }
    }

    pub fn client(&self) -> &Arc<dyn ClusterClient> {
        &self.client
    }

    pub fn harness(&self) -> &HarnessConfig {
        &self.harness
    }

    pub fn namespace(&self) -> &str {
        &self.harness.namespace
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn events_path(&self) -> &Path {
        self.events.path()
    }

    pub fn deployed(&self) -> &[Manifest] {
        &self.deployed
    }

    pub fn stack_mut(&mut self) -> &mut CleanupStack {
        &mut self.stack
    }

    pub fn log_event(&mut self, event: impl Into<Event>) -> Result<EventRecord, HarnessError> {
        self.events.log(event)
    }

    /// Persist, apply and track `manifest`; optionally wait for its rollout.
    ///
    /// The object is deleted when the run unwinds, whether or not the wait
    /// succeeds.
    pub async fn deploy(&mut self, manifest: Manifest, wait_for_ready: bool) -> Result<(), HarnessError> {
        let name = manifest.name().to_string();
        let dir = self.workdir.join(&name);
        std::fs::create_dir_all(&dir).map_err(|e| HarnessError::io(&dir, e))?;
        let file = dir.join(format!("{name}.yaml"));
        std::fs::write(&file, manifest.to_yaml()?).map_err(|e| HarnessError::io(&file, e))?;

        let namespace = manifest.namespace().unwrap_or(&self.harness.namespace).to_string();
        self.client.apply(&manifest, &namespace).await?;
        obs::emit_deployment_applied(&name, &manifest.kind().to_string(), &manifest.digest()?);

        let target = manifest.object_ref(&namespace);
        let client = Arc::clone(&self.client);
        let delete_target = target.clone();
        self.stack.push(format!("delete {target}"), move || async move {
            client.delete(&delete_target).await?;
            Ok(())
        });

        self.deployed.push(manifest);
        let merged = self.workdir.join(MERGED_MANIFEST_FILE);
        std::fs::write(&merged, to_multi_document_yaml(&self.deployed)?)
            .map_err(|e| HarnessError::io(&merged, e))?;

        self.log_event(
            Event::new("deployment")
                .with("name", name.as_str())
                .with("kind", target.kind.to_string()),
        )?;

        if wait_for_ready {
            let started = Instant::now();
            self.client
                .wait_for_condition(
                    &target,
                    &self.harness.ready_condition,
                    self.harness.rollout_timeout,
                )
                .await?;
            obs::emit_rollout_ready(&name, started.elapsed().as_millis() as u64);
        }
        Ok(())
    }

    /// Wait for the namespace to hold no pods.
    ///
    /// With `skip_check` the namespace is polled once and leftovers only
    /// produce a warning.
    pub async fn wait_for_clear(&self, skip_check: bool) -> Result<(), HarnessError> {
        let namespace = self.namespace();
        let started = Instant::now();
        loop {
            let pods = self.client.list_pods(namespace).await?;
            if pods.is_empty() {
                info!(namespace = %namespace, waited_ms = started.elapsed().as_millis() as u64, "namespace is clear");
                return Ok(());
            }
            if skip_check {
                warn!(namespace = %namespace, remaining = pods.len(), "namespace not clear, continuing");
                return Ok(());
            }
            if started.elapsed() >= self.harness.rollout_timeout {
                return Err(ClusterError::Timeout {
                    what: format!("namespace {namespace} to clear ({} pods left)", pods.len()),
                    seconds: self.harness.rollout_timeout.as_secs(),
                }
                .into());
            }
            tracing::debug!(namespace = %namespace, remaining = pods.len(), "waiting for namespace to clear");
            tokio::time::sleep(self.harness.poll_interval).await;
        }
    }

    /// Run every registered cleanup. Returns how many failed.
    pub async fn unwind(&mut self) -> usize {
        self.stack.unwind().await
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("namespace", &self.harness.namespace)
            .field("workdir", &self.workdir)
            .field("deployed", &self.deployed.len())
            .field("stack", &self.stack)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::PodBuilder;
    use crate::policy::Overwrite;
    use crate::workload::{ContainerConfig, Image};
    use std::time::Duration;
    use zerotesting_cluster::fakes::MemoryClusterClient;
    use zerotesting_cluster::PodInfo;

    fn pod(name: &str) -> Manifest {
        let mut c = ContainerConfig::new("main");
        c.with_image(Image::new("busybox", "1.36"), Overwrite::Error)
            .unwrap();
        let mut b = PodBuilder::new(name, "zerotesting").unwrap();
        b.with_app_label(name, Overwrite::Error)
            .unwrap()
            .with_container(c, Overwrite::Error)
            .unwrap();
        b.build().unwrap()
    }

    fn context(client: Arc<MemoryClusterClient>, dir: &Path) -> RunContext {
        let harness = HarnessConfig::default()
            .with_namespace("zerotesting")
            .with_rollout_timeout(Duration::from_secs(30))
            .with_poll_interval(Duration::from_secs(1));
        let events = EventLog::create(&dir.join("events.log")).unwrap();
        RunContext::new(client, harness, dir, events)
    }

    #[tokio::test]
    async fn test_deploy_writes_applies_and_registers_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(MemoryClusterClient::new());
        let mut ctx = context(Arc::clone(&client), dir.path());

        ctx.deploy(pod("a"), true).await.unwrap();
        ctx.deploy(pod("b"), false).await.unwrap();

        assert!(dir.path().join("a").join("a.yaml").exists());
        let merged = std::fs::read_to_string(dir.path().join(MERGED_MANIFEST_FILE)).unwrap();
        assert!(merged.contains("name: a") && merged.contains("name: b"));
        assert_eq!(client.applied().len(), 2);

        assert_eq!(ctx.unwind().await, 0);
        assert!(client.applied().is_empty());
        let ops = client.operations();
        let deletes: Vec<_> = ops.iter().filter(|op| op.starts_with("delete")).collect();
        assert_eq!(deletes, vec!["delete Pod zerotesting/b", "delete Pod zerotesting/a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rollout_timeout_still_registers_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(MemoryClusterClient::new());
        client.never_ready("slow");
        let mut ctx = context(Arc::clone(&client), dir.path());

        let err = ctx.deploy(pod("slow"), true).await.unwrap_err();
        assert!(matches!(err, HarnessError::Cluster(ClusterError::Timeout { .. })));
        ctx.unwind().await;
        assert!(client.applied().is_empty());
    }

    fn running(name: &str) -> PodInfo {
        PodInfo {
            name: name.to_string(),
            node_name: None,
            pod_ip: None,
            phase: Some("Running".to_string()),
            labels: Default::default(),
            ready: true,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_clear_polls_until_empty() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(MemoryClusterClient::new());
        client.set_pods("zerotesting", vec![running("leftover-0")]);
        client.drain_pods_after(3);
        let ctx = context(Arc::clone(&client), dir.path());
        ctx.wait_for_clear(false).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_clear_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(MemoryClusterClient::new());
        client.set_pods("zerotesting", vec![running("stuck-0")]);
        let ctx = context(Arc::clone(&client), dir.path());
        let err = ctx.wait_for_clear(false).await.unwrap_err();
        assert!(matches!(err, HarnessError::Cluster(ClusterError::Timeout { seconds: 30, .. })));
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_skip_check_warns_once() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(MemoryClusterClient::new());
        client.set_pods("zerotesting", vec![running("stuck-0")]);
        let ctx = context(Arc::clone(&client), dir.path());
        ctx.wait_for_clear(true).await.unwrap();
        assert!(logs_contain("namespace not clear"));
    }
}
