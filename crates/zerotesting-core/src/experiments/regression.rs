//! Shared regression flow: bootstrap group, peer group, publisher, wait.

use std::time::Duration;

use anyhow::Context;
use tracing::info;

use crate::builders::{PodBuilder, StatefulGroupBuilder};
use crate::experiment::{Event, RunContext};
use crate::policy::Overwrite;
use crate::presets::{
    bandwidth_annotations, bootstrap_node, default_publisher_for, discovery_sidecar,
    netem_init_container, publisher_pod, regression_node, store_node, BandwidthConfig,
    DiscoveryMode, NetemConfig, NodeOptions, PublisherConfig, StoreOptions, BOOTSTRAP_SERVICE,
    NODES_SERVICE, REST_PORT,
};
use crate::values::Values;
use crate::workload::Image;

pub const BOOTSTRAP_GROUP: &str = "bootstrap";
pub const NODES_GROUP: &str = "nodes";
pub const PUBLISHER_POD: &str = "publisher";

/// Options shared by the regression experiments.
#[derive(Debug, Clone, PartialEq, clap::Args)]
pub struct RegressionArgs {
    /// Peer replicas (`nodes.replicas` in values wins).
    #[arg(long, default_value_t = 10)]
    pub nodes: u32,

    /// Bootstrap replicas (`bootstrap.replicas` in values wins).
    #[arg(long, default_value_t = 3)]
    pub bootstrap_nodes: u32,

    /// ENRs each peer fetches from the bootstrap service.
    #[arg(long, default_value_t = 3)]
    pub num_enrs: u32,

    /// Peer image, e.g. `wakuorg/nwaku:v0.35.1`.
    #[arg(long)]
    pub node_image: Option<String>,

    #[arg(long, default_value = "zerotesting/publisher:0.4.0")]
    pub publisher_image: String,

    #[arg(long, default_value_t = 600)]
    pub messages: u64,

    #[arg(long, default_value_t = 1.0)]
    pub delay_seconds: f64,

    #[arg(long, default_value_t = 1)]
    pub msg_size_kbytes: u64,

    /// Extra wait after the message loop before tearing down.
    #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
    pub settle: Duration,

    /// Per-pod egress delay installed with `tc netem`.
    #[arg(long)]
    pub netem_delay_ms: Option<u32>,

    #[arg(long, default_value_t = 0)]
    pub netem_jitter_ms: u32,

    /// Ingress rate limit in Mbit/s.
    #[arg(long)]
    pub ingress_rate: Option<u32>,

    /// Egress rate limit in Mbit/s.
    #[arg(long)]
    pub egress_rate: Option<u32>,
}

impl Default for RegressionArgs {
    fn default() -> Self {
        Self {
            nodes: 10,
            bootstrap_nodes: 3,
            num_enrs: 3,
            node_image: None,
            publisher_image: "zerotesting/publisher:0.4.0".to_string(),
            messages: 600,
            delay_seconds: 1.0,
            msg_size_kbytes: 1,
            settle: Duration::from_secs(30),
            netem_delay_ms: None,
            netem_jitter_ms: 0,
            ingress_rate: None,
            egress_rate: None,
        }
    }
}

impl RegressionArgs {
    pub fn node_replicas(&self, values: &Values) -> anyhow::Result<u32> {
        Ok(values.get_as("nodes.replicas")?.unwrap_or(self.nodes))
    }

    pub fn bootstrap_replicas(&self, values: &Values) -> anyhow::Result<u32> {
        Ok(values.get_as("bootstrap.replicas")?.unwrap_or(self.bootstrap_nodes))
    }

    fn node_options(&self, mut opts: NodeOptions, values: &Values) -> anyhow::Result<NodeOptions> {
        let image = values
            .get_as::<String>("nodes.image")?
            .or_else(|| self.node_image.clone());
        if let Some(image) = image {
            opts.image = Image::parse(&image);
        }
        Ok(opts)
    }

    /// Publisher options: `publisher` in values, then these flags.
    pub fn publisher_config(&self, namespace: &str, values: &Values) -> anyhow::Result<PublisherConfig> {
        let network_size = u64::from(self.node_replicas(values)?);
        let mut config = values
            .get_as::<PublisherConfig>("publisher")?
            .unwrap_or_else(|| default_publisher_for(network_size));
        config.network_size.get_or_insert(network_size);
        config.messages.get_or_insert(self.messages);
        config.delay_seconds.get_or_insert(self.delay_seconds);
        if config.msg_size_bytes.is_none() {
            config.msg_size_kbytes.get_or_insert(self.msg_size_kbytes);
        }
        config.namespace.get_or_insert_with(|| namespace.to_string());
        config.service.get_or_insert_with(|| NODES_SERVICE.to_string());
        config.port.get_or_insert(REST_PORT as u16);
        Ok(config)
    }

    fn netem(&self) -> Option<NetemConfig> {
        self.netem_delay_ms.map(|delay_ms| NetemConfig {
            delay_ms,
            jitter_ms: self.netem_jitter_ms,
            ..Default::default()
        })
    }

    fn bandwidth(&self) -> Option<BandwidthConfig> {
        (self.ingress_rate.is_some() || self.egress_rate.is_some()).then(|| BandwidthConfig {
            ingress_rate: self.ingress_rate,
            egress_rate: self.egress_rate,
            logical_switch: None,
        })
    }
}

/// Deploy the bootstrap service and group and wait for them.
pub async fn deploy_bootstrap(ctx: &mut RunContext, args: &RegressionArgs, values: &Values) -> anyhow::Result<()> {
    let namespace = ctx.namespace().to_string();
    let opts = args.node_options(NodeOptions::bootstrap(&namespace), values)?;
    let mut group = StatefulGroupBuilder::new(BOOTSTRAP_GROUP, &namespace)?;
    group
        .with_replicas(args.bootstrap_replicas(values)?)
        .apply(|c| bootstrap_node(c, &opts))?;

    ctx.deploy(group.headless_service()?, false).await?;
    ctx.deploy(group.build()?, true)
        .await
        .context("bootstrap nodes did not become ready")?;
    Ok(())
}

/// Deploy the peer service and group, optionally store-enabled.
pub async fn deploy_nodes(
    ctx: &mut RunContext,
    args: &RegressionArgs,
    values: &Values,
    store: bool,
) -> anyhow::Result<()> {
    let namespace = ctx.namespace().to_string();
    let opts = args.node_options(NodeOptions::regression(&namespace), values)?;
    let bootstrap = format!("{BOOTSTRAP_SERVICE}.{namespace}");
    let netem = args.netem();
    let bandwidth = args.bandwidth();

    let mut group = StatefulGroupBuilder::new(NODES_GROUP, &namespace)?;
    group
        .with_replicas(args.node_replicas(values)?)
        .apply(|c| regression_node(c, &opts))?
        .apply(|c| discovery_sidecar(c, DiscoveryMode::Enr, args.num_enrs, &[bootstrap.as_str()]))?;
    if store {
        group.apply(|c| store_node(c, &StoreOptions::new(&namespace)))?;
    }
    if let Some(netem) = &netem {
        group.apply(|c| netem_init_container(c, netem))?;
    }
    if let Some(bandwidth) = &bandwidth {
        group.apply(|c| bandwidth_annotations(c, bandwidth, Overwrite::Error))?;
    }

    ctx.deploy(group.headless_service()?, false).await?;
    ctx.deploy(group.build()?, true)
        .await
        .context("peer nodes did not become ready")?;
    Ok(())
}

/// Deploy the publisher and wait out its message loop.
pub async fn run_publisher(ctx: &mut RunContext, args: &RegressionArgs, values: &Values) -> anyhow::Result<()> {
    let namespace = ctx.namespace().to_string();
    let config = args.publisher_config(&namespace, values)?;
    let image = Image::parse(&args.publisher_image);
    let mut pod = PodBuilder::new(PUBLISHER_POD, &namespace)?;
    pod.apply(|t| publisher_pod(t, &config, &image))?;

    ctx.log_event("publisher_deploy_start")?;
    ctx.deploy(pod.build()?, true)
        .await
        .context("publisher did not start")?;

    let loop_duration = config.loop_duration();
    info!(messages = ?config.messages, loop_secs = loop_duration.as_secs_f64(), "waiting for the message loop");
    tokio::time::sleep(loop_duration).await;
    ctx.log_event(Event::new("publisher_messages_finished").with("messages", config.messages))?;

    tokio::time::sleep(args.settle).await;
    ctx.log_event("publisher_wait_finished")?;
    Ok(())
}

/// The full regression flow.
pub async fn run_regression(
    ctx: &mut RunContext,
    args: &RegressionArgs,
    values: &Values,
    store: bool,
) -> anyhow::Result<()> {
    deploy_bootstrap(ctx, args, values).await?;
    deploy_nodes(ctx, args, values, store).await?;
    run_publisher(ctx, args, values).await?;
    ctx.log_event("internal_run_finished")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_override_flags() {
        let values = Values::from_yaml(
            "nodes:\n  replicas: 4\npublisher:\n  messages: 5\n  delay_seconds: 2.0\n",
        )
        .unwrap();
        let args = RegressionArgs::default();
        assert_eq!(args.node_replicas(&values).unwrap(), 4);
        assert_eq!(args.bootstrap_replicas(&values).unwrap(), 3);

        let config = args.publisher_config("zerotesting", &values).unwrap();
        assert_eq!(config.messages, Some(5));
        assert_eq!(config.delay_seconds, Some(2.0));
        assert_eq!(config.network_size, Some(4));
        assert_eq!(config.namespace.as_deref(), Some("zerotesting"));
        assert_eq!(config.port, Some(8645));
    }

    #[test]
    fn test_flags_fill_publisher_defaults() {
        let args = RegressionArgs {
            messages: 20,
            ..Default::default()
        };
        let config = args.publisher_config("zt", &Values::new()).unwrap();
        assert_eq!(config.messages, Some(20));
        assert_eq!(config.msg_size_kbytes, Some(1));
        assert_eq!(config.port, Some(8645));
        assert_eq!(config.network_size, Some(10));
    }

    #[test]
    fn test_optional_add_ons() {
        let args = RegressionArgs::default();
        assert!(args.netem().is_none());
        assert!(args.bandwidth().is_none());
        let args = RegressionArgs {
            netem_delay_ms: Some(40),
            egress_rate: Some(100),
            ..Default::default()
        };
        assert_eq!(args.netem().unwrap().delay_ms, 40);
        assert_eq!(args.bandwidth().unwrap().egress_rate, Some(100));
    }
}
