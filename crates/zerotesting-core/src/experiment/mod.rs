//! Experiment lifecycle.
//!
//! An [`Experiment`] body receives a [`RunContext`] through which it deploys
//! manifests, logs events and registers cleanups. [`run`] / [`run_async`]
//! wrap the body: fresh working directory, namespace check, body, LIFO
//! cleanup, then event post-processing into `metadata.json`.

mod cleanup;
mod context;
mod events;
mod runner;

use std::path::PathBuf;

use async_trait::async_trait;

pub use cleanup::CleanupStack;
pub use context::{RunContext, MERGED_MANIFEST_FILE};
pub use events::{format_event_ts, Event, EventLog, EventRecord, EVENTS_FILE};
pub use runner::{run, run_async, run_until, RunReport, METADATA_FILE};

use crate::postprocess::EventMapping;
use crate::values::Values;

/// Options every experiment sub-command accepts.
#[derive(Debug, Clone, PartialEq, Eq, clap::Args)]
pub struct CommonArgs {
    /// Working directory for manifests and the event log. Wiped on start.
    #[arg(long, default_value = "workdir")]
    pub workdir: PathBuf,

    /// Check the namespace once and continue even if pods remain.
    #[arg(long)]
    pub skip_check: bool,
}

impl Default for CommonArgs {
    fn default() -> Self {
        Self {
            workdir: PathBuf::from("workdir"),
            skip_check: false,
        }
    }
}

/// A runnable experiment.
#[async_trait]
pub trait Experiment: Send + Sync {
    fn name(&self) -> &str;

    /// Deploy, drive and observe. Everything deployed through `ctx` is
    /// removed after this returns, whatever the outcome.
    async fn run(&self, ctx: &mut RunContext, values: &Values) -> anyhow::Result<()>;

    /// Mappings used to derive `metadata.json` from the event log.
    fn event_mappings(&self) -> Vec<EventMapping> {
        Vec::new()
    }
}
