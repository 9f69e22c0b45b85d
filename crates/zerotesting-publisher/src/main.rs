//! Publisher driver
//!
//! Runs inside the publisher pod and pushes synthetic messages to peer nodes
//! over their REST API.
//!
//! Exit code 0 once the message loop completes; non-zero only when the first
//! target cannot be resolved before any message is sent.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use zerotesting_publisher::{
    probe_first_target, DnsResolver, HttpSender, InjectionPlan, MessageSpec, PeerSelection,
    Protocol, Target, TrafficInjector, DEFAULT_CONTENT_TOPIC, DEFAULT_PUBSUB_TOPIC,
    DEFAULT_REST_PORT,
};

const STARTUP_ATTEMPTS: u32 = 5;

#[derive(Parser, Debug)]
#[command(name = "publisher")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Inject synthetic messages into a peer network", long_about = None)]
struct Args {
    /// Pubsub topic messages are published on
    #[arg(long, default_value = DEFAULT_PUBSUB_TOPIC)]
    pubsub_topic: String,

    /// Content topic of every message
    #[arg(long, default_value = DEFAULT_CONTENT_TOPIC)]
    content_topic: String,

    /// Message payload size in KiB
    #[arg(long, default_value_t = 10)]
    msg_size_kbytes: usize,

    /// Message payload size in bytes (overrides --msg-size-kbytes)
    #[arg(long)]
    msg_size_bytes: Option<usize>,

    /// Delay between message dispatches, in seconds
    #[arg(long, default_value_t = 1.0)]
    delay_seconds: f64,

    /// Number of messages to send
    #[arg(long, default_value_t = 10)]
    messages: u64,

    /// How a peer is chosen for each message
    #[arg(long, value_enum, default_value_t = PeerSelection::Id)]
    peer_selection: PeerSelection,

    /// REST port of the peers
    #[arg(long, default_value_t = DEFAULT_REST_PORT)]
    port: u16,

    /// Number of peers addressable by index
    #[arg(long, default_value_t = 100)]
    network_size: u64,

    /// Protocols to publish with, rotated per message
    #[arg(long, value_enum, value_delimiter = ',', default_value = "relay")]
    protocols: Vec<Protocol>,

    /// Service name used by --peer-selection=service
    #[arg(long, default_value = "zerotesting-service")]
    service: String,

    /// Pod name template used by --peer-selection=id
    #[arg(long, default_value = "nodes-{index}.zerotesting-service")]
    name_template: String,

    /// Namespace substituted for `{namespace}` in service and template
    #[arg(long, default_value = "zerotesting")]
    namespace: String,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

impl Args {
    fn message_size(&self) -> usize {
        self.msg_size_bytes
            .unwrap_or(self.msg_size_kbytes * 1024)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.debug { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let target = Target {
        name: "peers".to_string(),
        service: Some(args.service.clone()),
        name_template: Some(args.name_template.clone()),
        stateful_group: None,
        port: args.port,
    };
    let plan = InjectionPlan {
        count: args.messages,
        delay: Duration::try_from_secs_f64(args.delay_seconds)
            .context("--delay-seconds must be a non-negative number")?,
        message: MessageSpec {
            pubsub_topic: args.pubsub_topic.clone(),
            content_topic: args.content_topic.clone(),
            size_bytes: args.message_size(),
        },
        selection: args.peer_selection,
        network_size: args.network_size,
    };

    let resolver = Arc::new(DnsResolver);
    let first = probe_first_target(
        resolver.as_ref(),
        &target,
        plan.selection,
        plan.network_size,
        &args.namespace,
        STARTUP_ATTEMPTS,
        Duration::from_secs(1),
    )
    .await
    .context("peer network is not resolvable")?;
    info!(first_target = %first, protocols = ?args.protocols, "starting message loop");

    let sender = Arc::new(HttpSender::new()?);
    let injector = TrafficInjector::new(resolver, sender);
    let endpoints: Vec<_> = args.protocols.iter().map(|p| p.endpoint()).collect();
    let counters = injector
        .inject_rotating(&args.namespace, &endpoints, &target, &plan)
        .await;

    info!(
        success = counters.success,
        failure = counters.failure,
        total = counters.total,
        rate = %counters.success_rate_display(),
        "publisher finished"
    );
    Ok(())
}
