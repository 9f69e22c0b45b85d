//! `store-regression`: the relay regression with store-enabled peers.

use async_trait::async_trait;
use clap::{ArgMatches, Args, FromArgMatches};

use crate::experiment::{Experiment, RunContext};
use crate::experiments::regression::{run_regression, RegressionArgs};
use crate::postprocess::{regression_event_mappings, EventMapping};
use crate::registry::{ExperimentEntry, ExperimentModule};
use crate::values::Values;

pub const NAME: &str = "store-regression";

pub const MODULE: ExperimentModule = ExperimentModule {
    path: module_path!(),
    experiments: &[ExperimentEntry {
        name: NAME,
        about: "Regression run with a postgres-backed store on every peer",
        factory: build,
        add_parser,
    }],
};

#[derive(Debug, Clone, Default)]
pub struct StoreRegression {
    pub args: RegressionArgs,
}

fn build(matches: &ArgMatches) -> anyhow::Result<Box<dyn Experiment>> {
    Ok(Box::new(StoreRegression {
        args: RegressionArgs::from_arg_matches(matches)?,
    }))
}

fn add_parser(cmd: clap::Command) -> clap::Command {
    RegressionArgs::augment_args(cmd)
}

#[async_trait]
impl Experiment for StoreRegression {
    fn name(&self) -> &str {
        NAME
    }

    async fn run(&self, ctx: &mut RunContext, values: &Values) -> anyhow::Result<()> {
        run_regression(ctx, &self.args, values, true).await
    }

    fn event_mappings(&self) -> Vec<EventMapping> {
        regression_event_mappings()
    }
}
