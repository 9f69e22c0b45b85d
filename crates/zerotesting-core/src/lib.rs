//! Zerotesting Core Library
//!
//! Workload builders, domain presets, the experiment lifecycle and event
//! post-processing for the zerotesting harness. The control plane is reached
//! only through [`zerotesting_cluster::ClusterClient`].

pub mod builders;
pub mod command;
pub mod error;
pub mod experiment;
pub mod experiments;
pub mod harness;
pub mod obs;
pub mod policy;
pub mod postprocess;
pub mod presets;
pub mod registry;
pub mod telemetry;
pub mod values;
pub mod workload;

pub use builders::{PodBuilder, ServiceBuilder, StatefulGroupBuilder};
pub use command::{Arg, Command, CommandConfig, RenderedCommand};
pub use error::{ConfigError, HarnessError, RegistryError, Result};
pub use policy::{OnDuplicate, Overwrite};

pub use experiment::{
    run, run_async, run_until, CommonArgs, Event, EventLog, EventRecord, Experiment, RunContext,
    RunReport,
};
pub use harness::HarnessConfig;
pub use postprocess::{regression_event_mappings, EventMapping, PostProcessor};
pub use registry::{ExperimentEntry, ExperimentInfo, ExperimentModule, Registry, ScanMode};
pub use values::Values;

pub use workload::{
    ConfigPath, ContainerConfig, Image, PodSpecConfig, PodTemplateSpecConfig, StatefulGroupConfig,
    StatefulGroupSpecConfig,
};
