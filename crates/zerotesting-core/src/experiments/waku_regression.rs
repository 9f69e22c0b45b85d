//! `waku-regression`: relay peers fed by a publisher pod.

use async_trait::async_trait;
use clap::{ArgMatches, Args, FromArgMatches};

use crate::experiment::{Experiment, RunContext};
use crate::experiments::regression::{run_regression, RegressionArgs};
use crate::postprocess::{regression_event_mappings, EventMapping};
use crate::registry::{ExperimentEntry, ExperimentModule};
use crate::values::Values;

pub const NAME: &str = "waku-regression";

pub const MODULE: ExperimentModule = ExperimentModule {
    path: module_path!(),
    experiments: &[ExperimentEntry {
        name: NAME,
        about: "Bootstrap and relay peers, one publisher, fixed message count",
        factory: build,
        add_parser,
    }],
};

#[derive(Debug, Clone, Default)]
pub struct WakuRegression {
    pub args: RegressionArgs,
}

fn build(matches: &ArgMatches) -> anyhow::Result<Box<dyn Experiment>> {
    let args = RegressionArgs::from_arg_matches(matches)?;
    Ok(Box::new(WakuRegression { args }))
}

fn add_parser(cmd: clap::Command) -> clap::Command {
    RegressionArgs::augment_args(cmd)
}

#[async_trait]
impl Experiment for WakuRegression {
    fn name(&self) -> &str {
        NAME
    }

    async fn run(&self, ctx: &mut RunContext, values: &Values) -> anyhow::Result<()> {
        run_regression(ctx, &self.args, values, false).await
    }

    fn event_mappings(&self) -> Vec<EventMapping> {
        regression_event_mappings()
    }
}
