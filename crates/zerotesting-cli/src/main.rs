//! Zerotesting - experiment dispatcher
//!
//! The `zerotesting` command deploys a bundled experiment into a cluster,
//! drives it, tears it down and writes the run's event log and metadata.
//!
//! ```text
//! zerotesting --config ~/.kube/config [-v..] [-l run.log] [--values v.yaml] \
//!     <experiment> [--workdir DIR] [--skip-check] [experiment flags]
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgMatches, Args, CommandFactory, FromArgMatches, Parser};
use tracing::{debug, info};

use zerotesting_cluster::KubeClusterClient;
use zerotesting_core::experiment::METADATA_FILE;
use zerotesting_core::experiments::MODULES;
use zerotesting_core::telemetry::{init_tracing, level_for_verbosity};
use zerotesting_core::{run_async, CommonArgs, HarnessConfig, Registry, ScanMode, Values};

#[derive(Parser, Debug)]
#[command(name = "zerotesting")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run p2p messaging experiments on Kubernetes", long_about = None)]
struct Cli {
    /// Kubeconfig used to reach the cluster
    #[arg(long)]
    config: PathBuf,

    /// Kubeconfig context (default: current context)
    #[arg(long)]
    context: Option<String>,

    /// Values documents merged in order; later files win
    #[arg(long)]
    values: Vec<PathBuf>,

    /// Namespace experiments deploy into (default: $ZEROTESTING_NAMESPACE or zerotesting)
    #[arg(long)]
    namespace: Option<String>,

    /// Rollout timeout, e.g. `10m`
    #[arg(long, value_parser = humantime::parse_duration)]
    rollout_timeout: Option<Duration>,

    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Mirror log output to this file
    #[arg(short = 'l', long = "log-file")]
    log_file: Option<PathBuf>,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json_logs: bool,

    /// What to do when two experiment modules export the same name
    #[arg(long, value_enum, default_value_t = ScanMode::Raise)]
    on_duplicate: ScanMode,
}

/// Top-level command with one sub-command per registered experiment.
fn build_command(registry: &Registry) -> clap::Command {
    registry.items().fold(
        Cli::command().subcommand_required(true).arg_required_else_help(true),
        |cmd, info| cmd.subcommand(CommonArgs::augment_args(info.command())),
    )
}

fn load_values(paths: &[PathBuf]) -> Result<Values> {
    let mut values = Values::new();
    for path in paths {
        let layer = Values::from_file(path)
            .with_context(|| format!("Failed to load values from {}", path.display()))?;
        values.merge(layer);
    }
    Ok(values)
}

fn harness_config(cli: &Cli) -> HarnessConfig {
    let mut harness = HarnessConfig::default();
    if let Some(namespace) = &cli.namespace {
        harness = harness.with_namespace(namespace);
    }
    if let Some(timeout) = cli.rollout_timeout {
        harness = harness.with_rollout_timeout(timeout);
    }
    harness
}

/// Registry with the bundled experiments.
///
/// Sub-commands depend on the registry, so `--on-duplicate` is read from the
/// raw arguments before the full parse.
fn registry_for(args: &[String]) -> Result<Registry> {
    let raw = args.iter().enumerate().find_map(|(i, arg)| {
        if arg == "--on-duplicate" {
            args.get(i + 1).map(String::as_str)
        } else {
            arg.strip_prefix("--on-duplicate=")
        }
    });
    let mode = raw
        .and_then(|raw| <ScanMode as clap::ValueEnum>::from_str(raw, true).ok())
        .unwrap_or_default();
    Registry::from_modules(MODULES, mode).context("Failed to register experiments")
}

async fn dispatch(cli: Cli, registry: &Registry, matches: &ArgMatches) -> Result<()> {
    let (name, sub) = matches.subcommand().context("No experiment selected")?;
    let experiment = registry.lookup(name)?.instantiate(sub)?;
    let common = CommonArgs::from_arg_matches(sub)?;
    let values = load_values(&cli.values)?;
    let harness = harness_config(&cli);

    let client = KubeClusterClient::from_kubeconfig(&cli.config, cli.context.as_deref())
        .await
        .with_context(|| format!("Failed to connect with {}", cli.config.display()))?
        .with_poll_interval(harness.poll_interval);

    info!(experiment = %name, namespace = %harness.namespace, workdir = %common.workdir.display(), "starting");
    let report = run_async(experiment.as_ref(), Arc::new(client), &common, &values, harness).await?;

    println!("Run {} finished", report.run_id);
    println!("  events:   {}", report.events.display());
    if report.metadata.is_some() {
        println!("  metadata: {}", report.workdir.join(METADATA_FILE).display());
    }
    if report.cleanup_failures > 0 {
        println!("  warning:  {} cleanup(s) failed, check the namespace", report.cleanup_failures);
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let registry = registry_for(&args)?;
    let matches = build_command(&registry).get_matches_from(&args);
    let cli = Cli::from_arg_matches(&matches)?;

    init_tracing(cli.json_logs, level_for_verbosity(cli.verbose), cli.log_file.as_deref())
        .context("Failed to open the log file")?;
    debug!(on_duplicate = ?cli.on_duplicate, experiments = ?registry.names(), "registry ready");

    dispatch(cli, &registry, &matches).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry {
        Registry::from_modules(MODULES, ScanMode::Raise).unwrap()
    }

    #[test]
    fn test_command_is_well_formed() {
        build_command(&registry()).debug_assert();
    }

    #[test]
    fn test_experiment_subcommand_parses_common_and_own_flags() {
        let registry = registry();
        let matches = build_command(&registry)
            .try_get_matches_from([
                "zerotesting",
                "--config",
                "kubeconfig",
                "-vv",
                "waku-regression",
                "--workdir",
                "/tmp/run",
                "--skip-check",
                "--nodes",
                "4",
            ])
            .unwrap();
        let cli = Cli::from_arg_matches(&matches).unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config, PathBuf::from("kubeconfig"));

        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "waku-regression");
        let common = CommonArgs::from_arg_matches(sub).unwrap();
        assert_eq!(common.workdir, PathBuf::from("/tmp/run"));
        assert!(common.skip_check);
        assert_eq!(sub.get_one::<u32>("nodes"), Some(&4));

        let experiment = registry.lookup(name).unwrap().instantiate(sub).unwrap();
        assert_eq!(experiment.name(), "waku-regression");
    }

    #[test]
    fn test_config_and_experiment_are_required() {
        let registry = registry();
        assert!(build_command(&registry)
            .try_get_matches_from(["zerotesting", "waku-regression"])
            .is_err());
        assert!(build_command(&registry)
            .try_get_matches_from(["zerotesting", "--config", "k"])
            .is_err());
        assert!(build_command(&registry)
            .try_get_matches_from(["zerotesting", "--config", "k", "no-such-experiment"])
            .is_err());
    }

    #[test]
    fn test_values_files_merge_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("base.yaml");
        let over = dir.path().join("over.yaml");
        std::fs::write(&base, "nodes:\n  replicas: 3\n  image: a\n").unwrap();
        std::fs::write(&over, "nodes:\n  replicas: 9\n").unwrap();

        let values = load_values(&[base, over]).unwrap();
        assert_eq!(values.get_as::<u32>("nodes.replicas").unwrap(), Some(9));
        assert_eq!(values.get_as::<String>("nodes.image").unwrap().as_deref(), Some("a"));

        assert!(load_values(&[dir.path().join("missing.yaml")]).is_err());
    }

    #[test]
    fn test_cli_overrides_harness_config() {
        let cli = Cli::try_parse_from([
            "zerotesting",
            "--config",
            "k",
            "--namespace",
            "perf",
            "--rollout-timeout",
            "90s",
        ])
        .unwrap();
        let harness = harness_config(&cli);
        assert_eq!(harness.namespace, "perf");
        assert_eq!(harness.rollout_timeout, Duration::from_secs(90));
    }

    #[test]
    fn test_duplicate_mode_is_read_before_parsing() {
        for raw in [
            &["zerotesting", "--on-duplicate", "replace", "--config", "k"][..],
            &["zerotesting", "--on-duplicate=skip", "--config", "k"][..],
            &["zerotesting", "--config", "k"][..],
        ] {
            let args: Vec<String> = raw.iter().map(|s| s.to_string()).collect();
            assert_eq!(registry_for(&args).unwrap().len(), MODULES.len());
        }
    }
}
