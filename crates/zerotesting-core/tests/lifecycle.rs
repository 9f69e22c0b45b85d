//! Full experiment runs against the in-memory cluster.

use std::sync::Arc;
use std::time::Duration;

use tracing_test::traced_test;
use zerotesting_cluster::fakes::MemoryClusterClient;
use zerotesting_cluster::{ClusterClient, PodInfo};
use zerotesting_core::experiment::{EventRecord, EVENTS_FILE, MERGED_MANIFEST_FILE, METADATA_FILE};
use zerotesting_core::experiments::regression::RegressionArgs;
use zerotesting_core::experiments::store_regression::StoreRegression;
use zerotesting_core::experiments::waku_regression::WakuRegression;
use zerotesting_core::{run_async, run_until, CommonArgs, HarnessConfig, Values};

const NS: &str = "zt";

fn harness() -> HarnessConfig {
    HarnessConfig::default()
        .with_namespace(NS)
        .with_rollout_timeout(Duration::from_secs(30))
        .with_poll_interval(Duration::from_secs(1))
}

fn small_args() -> RegressionArgs {
    RegressionArgs {
        nodes: 2,
        bootstrap_nodes: 1,
        num_enrs: 1,
        messages: 3,
        delay_seconds: 1.0,
        settle: Duration::from_secs(5),
        ..Default::default()
    }
}

fn leftover_pod() -> PodInfo {
    PodInfo {
        name: "nodes-0".to_string(),
        node_name: None,
        pod_ip: None,
        phase: Some("Terminating".to_string()),
        labels: Default::default(),
        ready: false,
    }
}

fn event_names(path: &std::path::Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| EventRecord::parse_line(line).unwrap())
        .map(|record| record.name().unwrap_or_default().to_string())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_regression_run_records_events_and_cleans_up() {
    let tmp = tempfile::tempdir().unwrap();
    let client = Arc::new(MemoryClusterClient::new());
    client.set_pods(NS, vec![leftover_pod()]);
    client.drain_pods_after(2);

    let common = CommonArgs {
        workdir: tmp.path().join("work"),
        skip_check: false,
    };
    let experiment = WakuRegression { args: small_args() };
    let report = run_async(
        &experiment,
        Arc::clone(&client) as Arc<dyn ClusterClient>,
        &common,
        &Values::new(),
        harness(),
    )
    .await
    .unwrap();

    assert_eq!(report.cleanup_failures, 0);
    assert_eq!(report.events, common.workdir.join(EVENTS_FILE));
    assert_eq!(
        event_names(&report.events),
        vec![
            "run_start",
            "wait_for_clear_finished",
            "deployment",
            "deployment",
            "deployment",
            "deployment",
            "publisher_deploy_start",
            "deployment",
            "publisher_messages_finished",
            "publisher_wait_finished",
            "internal_run_finished",
        ]
    );

    // Everything deployed is gone, publisher first.
    assert!(client.applied().is_empty());
    let ops = client.operations();
    let first_delete = ops.iter().position(|op| op.starts_with("delete")).unwrap();
    assert_eq!(ops[first_delete], "delete Pod zt/publisher");
    assert_eq!(ops.last().unwrap(), "delete Service zt/zerotesting-bootstrap");

    assert!(common.workdir.join(MERGED_MANIFEST_FILE).is_file());
    assert!(common.workdir.join("publisher/publisher.yaml").is_file());

    let metadata = report.metadata.unwrap();
    assert!(metadata["complete"]["start"].is_string());
    assert!(metadata["complete"]["end"].is_string());
    assert!(metadata.get("stable").is_none());
    let on_disk: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(common.workdir.join(METADATA_FILE)).unwrap(),
    )
    .unwrap();
    assert_eq!(on_disk, metadata);
}

#[tokio::test(start_paused = true)]
async fn test_workdir_is_wiped_on_start() {
    let tmp = tempfile::tempdir().unwrap();
    let workdir = tmp.path().join("work");
    std::fs::create_dir_all(workdir.join("stale")).unwrap();
    std::fs::write(workdir.join("stale/old.yaml"), "kind: Pod\n").unwrap();

    let common = CommonArgs {
        workdir: workdir.clone(),
        skip_check: false,
    };
    let experiment = WakuRegression { args: small_args() };
    run_async(
        &experiment,
        Arc::new(MemoryClusterClient::new()),
        &common,
        &Values::new(),
        harness(),
    )
    .await
    .unwrap();
    assert!(!workdir.join("stale").exists());
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_failed_rollout_still_cleans_up() {
    let tmp = tempfile::tempdir().unwrap();
    let client = Arc::new(MemoryClusterClient::new());
    client.never_ready("nodes");
    client.fail_delete("zerotesting-service");

    let common = CommonArgs {
        workdir: tmp.path().join("work"),
        skip_check: false,
    };
    let experiment = StoreRegression { args: small_args() };
    let err = run_async(
        &experiment,
        Arc::clone(&client) as Arc<dyn ClusterClient>,
        &common,
        &Values::new(),
        harness(),
    )
    .await
    .unwrap_err();

    let chain = format!("{err:#}");
    assert!(chain.contains("experiment store-regression failed"), "{chain}");
    assert!(chain.contains("peer nodes did not become ready"), "{chain}");

    // The failing delete is reported and the rest still goes.
    let remaining = client.applied();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].name, "zerotesting-service");
    assert!(logs_contain("cleanup.failed"));

    assert!(!common.workdir.join(METADATA_FILE).exists());
    let names = event_names(&common.workdir.join(EVENTS_FILE));
    assert!(!names.contains(&"publisher_deploy_start".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_interrupted_run_tears_down_deployments() {
    let tmp = tempfile::tempdir().unwrap();
    let client = Arc::new(MemoryClusterClient::new());
    let common = CommonArgs {
        workdir: tmp.path().join("work"),
        skip_check: true,
    };
    // Interrupt lands in the settle wait, with every group and the publisher up.
    let experiment = WakuRegression {
        args: RegressionArgs {
            settle: Duration::from_secs(600),
            ..small_args()
        },
    };
    let err = run_until(
        &experiment,
        Arc::clone(&client) as Arc<dyn ClusterClient>,
        &common,
        &Values::new(),
        harness(),
        tokio::time::sleep(Duration::from_secs(120)),
    )
    .await
    .unwrap_err();

    assert!(err.to_string().contains("interrupted"), "{err:#}");
    assert!(client.applied().is_empty());
    assert!(client
        .operations()
        .contains(&"delete Pod zt/publisher".to_string()));

    let names = event_names(&common.workdir.join(EVENTS_FILE));
    assert_eq!(names.last().map(String::as_str), Some("run_interrupted"));
    assert!(names.contains(&"publisher_messages_finished".to_string()));
    assert!(!names.contains(&"publisher_wait_finished".to_string()));
    assert!(!common.workdir.join(METADATA_FILE).exists());
}

#[tokio::test(start_paused = true)]
async fn test_values_override_replicas() {
    let tmp = tempfile::tempdir().unwrap();
    let client = Arc::new(MemoryClusterClient::new());
    let values = Values::from_yaml("nodes:\n  replicas: 7\n").unwrap();
    let common = CommonArgs {
        workdir: tmp.path().join("work"),
        skip_check: true,
    };
    let experiment = WakuRegression { args: small_args() };
    run_async(
        &experiment,
        Arc::clone(&client) as Arc<dyn ClusterClient>,
        &common,
        &values,
        harness(),
    )
    .await
    .unwrap();

    let manifest = std::fs::read_to_string(common.workdir.join("nodes/nodes.yaml")).unwrap();
    assert!(manifest.contains("replicas: 7"), "{manifest}");
}
