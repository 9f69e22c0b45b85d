//! Experiment registry.
//!
//! Experiments are contributed through explicit module tables: each module
//! exports an [`ExperimentModule`] listing `{name, factory, add_parser}`
//! entries, and the dispatcher registers the tables it links against.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use clap::ArgMatches;
use tracing::{debug, warn};

use crate::error::RegistryError;
use crate::experiment::Experiment;

/// Metadata key holding the source module of an experiment.
pub const MODULE_PATH_KEY: &str = "module_path";

/// Builds the experiment from its parsed sub-command.
pub type ExperimentFactory = fn(&ArgMatches) -> anyhow::Result<Box<dyn Experiment>>;

/// Installs the experiment's own options on its sub-command.
pub type ParserHook = fn(clap::Command) -> clap::Command;

#[derive(Clone, Copy)]
pub struct ExperimentEntry {
    pub name: &'static str,
    pub about: &'static str,
    pub factory: ExperimentFactory,
    pub add_parser: ParserHook,
}

/// Experiments exported by one source module.
#[derive(Clone, Copy)]
pub struct ExperimentModule {
    pub path: &'static str,
    pub experiments: &'static [ExperimentEntry],
}

/// What to do when a name is registered twice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ScanMode {
    /// Fail the registration.
    #[default]
    Raise,
    /// Keep the entry registered first.
    Skip,
    /// Keep the newcomer.
    Replace,
}

#[derive(Clone)]
pub struct ExperimentInfo {
    pub name: String,
    pub about: String,
    pub factory: ExperimentFactory,
    pub add_parser: ParserHook,
    pub metadata: BTreeMap<String, String>,
}

impl ExperimentInfo {
    pub fn module_path(&self) -> Option<&str> {
        self.metadata.get(MODULE_PATH_KEY).map(String::as_str)
    }

    /// Sub-command for this experiment, with its own options installed.
    pub fn command(&self) -> clap::Command {
        (self.add_parser)(clap::Command::new(self.name.clone()).about(self.about.clone()))
    }

    pub fn instantiate(&self, matches: &ArgMatches) -> anyhow::Result<Box<dyn Experiment>> {
        (self.factory)(matches)
    }
}

impl fmt::Debug for ExperimentInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExperimentInfo")
            .field("name", &self.name)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Ordered set of experiments, unique by name.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    infos: Vec<ExperimentInfo>,
    loaded_modules: BTreeSet<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every module of `modules`.
    pub fn from_modules(modules: &[ExperimentModule], mode: ScanMode) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for module in modules {
            registry.register_module(module, mode)?;
        }
        Ok(registry)
    }

    /// Register one experiment; a taken name is an error.
    pub fn add(
        &mut self,
        entry: &ExperimentEntry,
        metadata: BTreeMap<String, String>,
    ) -> Result<(), RegistryError> {
        self.insert(info_from(entry, metadata), ScanMode::Raise).map(|_| ())
    }

    /// Register `info` under `mode`. Returns whether it was kept.
    pub fn insert(&mut self, info: ExperimentInfo, mode: ScanMode) -> Result<bool, RegistryError> {
        let Some(index) = self.infos.iter().position(|i| i.name == info.name) else {
            debug!(experiment = %info.name, module = ?info.module_path(), "experiment registered");
            self.infos.push(info);
            return Ok(true);
        };
        let existing_module = self.infos[index].module_path().unwrap_or("<unknown>").to_string();
        let new_module = info.module_path().unwrap_or("<unknown>").to_string();
        match mode {
            ScanMode::Raise => Err(RegistryError::Duplicate {
                name: info.name,
                existing_module,
                new_module,
            }),
            ScanMode::Skip => {
                debug!(experiment = %info.name, kept = %existing_module, skipped = %new_module, "duplicate experiment skipped");
                Ok(false)
            }
            ScanMode::Replace => {
                if existing_module != new_module {
                    warn!(
                        experiment = %info.name,
                        replaced = %existing_module,
                        replacement = %new_module,
                        "experiment {} from {} replaced by {}",
                        info.name,
                        existing_module,
                        new_module
                    );
                }
                self.infos.remove(index);
                self.infos.push(info);
                Ok(true)
            }
        }
    }

    /// Register the experiments of `module`.
    ///
    /// Modules whose last path segment starts with `_` are private and
    /// ignored, as is a module already registered. Returns the number of
    /// experiments kept.
    pub fn register_module(&mut self, module: &ExperimentModule, mode: ScanMode) -> Result<usize, RegistryError> {
        let leaf = module.path.rsplit("::").next().unwrap_or(module.path);
        if leaf.starts_with('_') {
            debug!(module = %module.path, "private module ignored");
            return Ok(0);
        }
        if !self.loaded_modules.insert(module.path.to_string()) {
            debug!(module = %module.path, "module already registered");
            return Ok(0);
        }
        let mut kept = 0;
        for entry in module.experiments {
            let metadata = BTreeMap::from([(MODULE_PATH_KEY.to_string(), module.path.to_string())]);
            if self.insert(info_from(entry, metadata), mode)? {
                kept += 1;
            }
        }
        Ok(kept)
    }

    pub fn get(&self, name: &str) -> Option<&ExperimentInfo> {
        self.infos.iter().find(|i| i.name == name)
    }

    /// Like [`get`](Self::get), failing with the name that was searched for.
    pub fn lookup(&self, name: &str) -> Result<&ExperimentInfo, RegistryError> {
        self.get(name).ok_or_else(|| RegistryError::NotFound {
            name: name.to_string(),
        })
    }

    pub fn items(&self) -> impl Iterator<Item = &ExperimentInfo> {
        self.infos.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.infos.iter().map(|i| i.name.as_str()).collect()
    }

    /// Experiments whose metadata contains every `(key, value)` filter.
    pub fn get_by_metadata(&self, filters: &[(&str, &str)]) -> Vec<&ExperimentInfo> {
        self.infos
            .iter()
            .filter(|info| {
                filters
                    .iter()
                    .all(|(k, v)| info.metadata.get(*k).map(String::as_str) == Some(*v))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }
}

fn info_from(entry: &ExperimentEntry, metadata: BTreeMap<String, String>) -> ExperimentInfo {
    ExperimentInfo {
        name: entry.name.to_string(),
        about: entry.about.to_string(),
        factory: entry.factory,
        add_parser: entry.add_parser,
        metadata,
    }
}
