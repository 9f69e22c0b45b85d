//! Experiment driver: workdir, namespace check, body, cleanup, metadata.
//!
//! Cleanups run however the body ends: success, error, panic or Ctrl-C.

use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use futures::FutureExt;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{info, warn, Instrument};
use zerotesting_cluster::ClusterClient;

use crate::error::HarnessError;
use crate::experiment::context::RunContext;
use crate::experiment::events::{EventLog, EVENTS_FILE};
use crate::experiment::{CommonArgs, Experiment};
use crate::harness::HarnessConfig;
use crate::obs::{self, RunSpan};
use crate::postprocess::{write_metadata, PostProcessor};
use crate::values::Values;

pub const METADATA_FILE: &str = "metadata.json";

/// What a finished run left behind.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub run_id: String,
    pub workdir: PathBuf,
    pub events: PathBuf,
    /// `None` when the experiment defines no event mappings.
    pub metadata: Option<Value>,
    pub cleanup_failures: usize,
}

/// Delete-then-recreate; a missing directory is fine.
fn reset_workdir(workdir: &Path) -> Result<(), HarnessError> {
    match std::fs::remove_dir_all(workdir) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(HarnessError::io(workdir, e)),
    }
    std::fs::create_dir_all(workdir).map_err(|e| HarnessError::io(workdir, e))
}

/// Run `experiment` on a fresh single-threaded runtime.
///
/// Must not be called from inside a tokio runtime; use [`run_async`] there.
pub fn run(
    experiment: &dyn Experiment,
    client: Arc<dyn ClusterClient>,
    common: &CommonArgs,
    values: &Values,
    harness: HarnessConfig,
) -> anyhow::Result<RunReport> {
    let run_id = uuid::Uuid::new_v4().to_string();
    let _span = RunSpan::enter(experiment.name(), &run_id);
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build the experiment runtime")?;
    runtime.block_on(execute(
        experiment,
        client,
        common,
        values,
        harness,
        run_id,
        interrupted(),
    ))
}

/// Async form of [`run`]. Ctrl-C cancels the body and tears the run down.
pub async fn run_async(
    experiment: &dyn Experiment,
    client: Arc<dyn ClusterClient>,
    common: &CommonArgs,
    values: &Values,
    harness: HarnessConfig,
) -> anyhow::Result<RunReport> {
    run_until(experiment, client, common, values, harness, interrupted()).await
}

/// Like [`run_async`], cancelling the body once `shutdown` resolves.
///
/// A cancelled run still unwinds its cleanups, then fails with an
/// "interrupted" error and writes no metadata.
pub async fn run_until<S>(
    experiment: &dyn Experiment,
    client: Arc<dyn ClusterClient>,
    common: &CommonArgs,
    values: &Values,
    harness: HarnessConfig,
    shutdown: S,
) -> anyhow::Result<RunReport>
where
    S: Future<Output = ()>,
{
    let run_id = uuid::Uuid::new_v4().to_string();
    let span = tracing::info_span!("zerotesting.run", experiment = %experiment.name(), run_id = %run_id);
    execute(experiment, client, common, values, harness, run_id, shutdown)
        .instrument(span)
        .await
}

/// Resolves on Ctrl-C. Pends forever when no handler can be installed.
async fn interrupted() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => warn!("interrupt received, tearing the run down"),
        Err(e) => {
            warn!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await
        }
    }
}

async fn execute<S>(
    experiment: &dyn Experiment,
    client: Arc<dyn ClusterClient>,
    common: &CommonArgs,
    values: &Values,
    harness: HarnessConfig,
    run_id: String,
    shutdown: S,
) -> anyhow::Result<RunReport>
where
    S: Future<Output = ()>,
{
    let started = Instant::now();
    let workdir = common.workdir.clone();
    reset_workdir(&workdir)?;
    obs::emit_run_started(experiment.name(), &workdir);

    let events_path = workdir.join(EVENTS_FILE);
    let events = EventLog::create(&events_path)?;
    let mut ctx = RunContext::new(client, harness, &workdir, events);
    ctx.log_event("run_start")?;

    let body = async {
        ctx.wait_for_clear(common.skip_check)
            .await
            .context("namespace did not clear")?;
        ctx.log_event("wait_for_clear_finished")?;
        experiment.run(&mut ctx, values).await
    };
    let outcome = tokio::select! {
        outcome = AssertUnwindSafe(body).catch_unwind() => Some(outcome),
        () = shutdown => None,
    };
    if outcome.is_none() {
        if let Err(e) = ctx.log_event("run_interrupted") {
            warn!(error = %e, "cannot record the interrupt");
        }
    }

    let cleanup_failures = ctx.unwind().await;
    if cleanup_failures > 0 {
        warn!(failures = cleanup_failures, "some cleanups failed; the namespace may need manual attention");
    }

    let result = match outcome {
        None => {
            obs::emit_run_finished(experiment.name(), started.elapsed().as_millis() as u64, false);
            bail!("experiment {} interrupted", experiment.name());
        }
        Some(Ok(result)) => result,
        Some(Err(panic)) => {
            obs::emit_run_finished(experiment.name(), started.elapsed().as_millis() as u64, false);
            std::panic::resume_unwind(panic);
        }
    };
    obs::emit_run_finished(
        experiment.name(),
        started.elapsed().as_millis() as u64,
        result.is_ok(),
    );
    result.with_context(|| format!("experiment {} failed", experiment.name()))?;

    let mappings = experiment.event_mappings();
    let metadata = if mappings.is_empty() {
        None
    } else {
        let links = values
            .get_as::<BTreeMap<String, String>>("links")
            .context("values.links must map names to URL templates")?
            .unwrap_or_default();
        let metadata = PostProcessor::new(mappings)
            .with_links(links)
            .process_file(&events_path)?;
        write_metadata(&workdir.join(METADATA_FILE), &metadata)?;
        info!(path = %workdir.join(METADATA_FILE).display(), "metadata written");
        Some(metadata)
    };

    Ok(RunReport {
        run_id,
        workdir,
        events: events_path,
        metadata,
        cleanup_failures,
    })
}
