//! `local-inject`: peers in the cluster, traffic sent from this process
//! through a NodePort service.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use clap::{ArgMatches, Args, FromArgMatches};
use tracing::info;
use zerotesting_cluster::resolve_node_port;
use zerotesting_publisher::{
    DnsResolver, HttpSender, InjectionPlan, MessageSpec, PeerSelection, Protocol, Target,
    TrafficInjector, DEFAULT_CONTENT_TOPIC, DEFAULT_PUBSUB_TOPIC,
};

use crate::builders::ServiceBuilder;
use crate::experiment::{Event, Experiment, RunContext};
use crate::experiments::regression::{deploy_bootstrap, deploy_nodes, RegressionArgs};
use crate::postprocess::{regression_event_mappings, EventMapping};
use crate::presets::{NODES_APP, REST_PORT};
use crate::registry::{ExperimentEntry, ExperimentModule};
use crate::values::Values;
use crate::workload::APP_LABEL;

pub const NAME: &str = "local-inject";

/// NodePort service exposing the peers' REST port.
pub const NODEPORT_SERVICE: &str = "zerotesting-nodeport";

pub const MODULE: ExperimentModule = ExperimentModule {
    path: module_path!(),
    experiments: &[ExperimentEntry {
        name: NAME,
        about: "Deploy peers and inject messages from this host through a NodePort",
        factory: build,
        add_parser,
    }],
};

#[derive(Debug, Clone, PartialEq, clap::Args)]
pub struct LocalInjectArgs {
    #[arg(long, default_value_t = 3)]
    pub nodes: u32,

    #[arg(long, default_value_t = 1)]
    pub bootstrap_nodes: u32,

    #[arg(long, default_value_t = 1)]
    pub num_enrs: u32,

    #[arg(long)]
    pub node_image: Option<String>,

    #[arg(long, default_value_t = 10)]
    pub messages: u64,

    #[arg(long, default_value_t = 0.1)]
    pub delay_seconds: f64,

    #[arg(long, default_value_t = 1024)]
    pub msg_size_bytes: usize,

    #[arg(long, value_enum, default_value_t = Protocol::Relay)]
    pub protocol: Protocol,

    #[arg(long, default_value_t = 16)]
    pub max_in_flight: usize,

    /// Fail the run when fewer messages than this fraction are delivered.
    #[arg(long, default_value_t = 0.0)]
    pub min_success_rate: f64,
}

impl Default for LocalInjectArgs {
    fn default() -> Self {
        Self {
            nodes: 3,
            bootstrap_nodes: 1,
            num_enrs: 1,
            node_image: None,
            messages: 10,
            delay_seconds: 0.1,
            msg_size_bytes: 1024,
            protocol: Protocol::Relay,
            max_in_flight: 16,
            min_success_rate: 0.0,
        }
    }
}

impl LocalInjectArgs {
    fn regression_args(&self) -> RegressionArgs {
        RegressionArgs {
            nodes: self.nodes,
            bootstrap_nodes: self.bootstrap_nodes,
            num_enrs: self.num_enrs,
            node_image: self.node_image.clone(),
            ..Default::default()
        }
    }

    fn plan(&self) -> anyhow::Result<InjectionPlan> {
        let delay = Duration::try_from_secs_f64(self.delay_seconds)
            .with_context(|| format!("invalid delay {}", self.delay_seconds))?;
        Ok(InjectionPlan {
            count: self.messages,
            delay,
            message: MessageSpec {
                pubsub_topic: DEFAULT_PUBSUB_TOPIC.to_string(),
                content_topic: DEFAULT_CONTENT_TOPIC.to_string(),
                size_bytes: self.msg_size_bytes,
            },
            selection: PeerSelection::Service,
            network_size: 1,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct LocalInject {
    pub args: LocalInjectArgs,
}

fn build(matches: &ArgMatches) -> anyhow::Result<Box<dyn Experiment>> {
    Ok(Box::new(LocalInject {
        args: LocalInjectArgs::from_arg_matches(matches)?,
    }))
}

fn add_parser(cmd: clap::Command) -> clap::Command {
    LocalInjectArgs::augment_args(cmd)
}

/// Split `host:port` as returned by node-port resolution.
fn split_address(address: &str) -> anyhow::Result<(String, u16)> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("address {address} has no port"))?;
    let port = port
        .parse()
        .with_context(|| format!("address {address} has an invalid port"))?;
    Ok((host.to_string(), port))
}

#[async_trait]
impl Experiment for LocalInject {
    fn name(&self) -> &str {
        NAME
    }

    async fn run(&self, ctx: &mut RunContext, values: &Values) -> anyhow::Result<()> {
        let regression = self.args.regression_args();
        deploy_bootstrap(ctx, &regression, values).await?;
        deploy_nodes(ctx, &regression, values, false).await?;

        let namespace = ctx.namespace().to_string();
        let mut service = ServiceBuilder::new(NODEPORT_SERVICE, &namespace);
        service
            .with_selector(APP_LABEL, NODES_APP)
            .with_port(Some("rest"), REST_PORT, Some("TCP"))
            .node_port();
        ctx.deploy(service.build()?, false).await?;

        let address = resolve_node_port(ctx.client().as_ref(), &namespace, NODEPORT_SERVICE).await?;
        let (host, port) = split_address(&address)?;
        let target = Target {
            name: NODEPORT_SERVICE.to_string(),
            service: Some(host),
            name_template: None,
            stateful_group: None,
            port,
        };
        let plan = self.args.plan()?;
        let injector = TrafficInjector::new(Arc::new(DnsResolver), Arc::new(HttpSender::new()?))
            .with_max_in_flight(self.args.max_in_flight);

        ctx.log_event(Event::new("publisher_deploy_start").with("address", address.as_str()))?;
        let counters = injector
            .inject(&namespace, &self.args.protocol.endpoint(), &target, &plan)
            .await;
        ctx.log_event(
            Event::new("publisher_messages_finished")
                .with("success", counters.success)
                .with("failure", counters.failure)
                .with("total", counters.total),
        )?;
        info!(
            address = %address,
            success = counters.success,
            failure = counters.failure,
            rate = %counters.success_rate_display(),
            "injection finished"
        );
        // Every request has completed, so there is nothing left to wait for.
        ctx.log_event("publisher_wait_finished")?;
        ctx.log_event("internal_run_finished")?;

        if counters.success_rate() < self.args.min_success_rate {
            bail!(
                "success rate {} below the required {:.2}%",
                counters.success_rate_display(),
                self.args.min_success_rate * 100.0
            );
        }
        Ok(())
    }

    fn event_mappings(&self) -> Vec<EventMapping> {
        regression_event_mappings()
    }
}
