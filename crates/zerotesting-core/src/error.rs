//! Error taxonomy for zerotesting-core.

use zerotesting_cluster::ClusterError;

/// Errors raised while composing workload configs.
///
/// Collisions carry the value already in place, rendered as YAML, so the
/// message shows the offending snippet.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} is already set; pass an explicit overwrite policy to change it:\n{existing}")]
    Conflict { field: String, existing: String },

    #[error("container {container} already defines environment variable {name}")]
    DuplicateEnv { container: String, name: String },

    #[error("command {program} already has flag {flag}")]
    DuplicateFlag { program: String, flag: String },

    #[error("container not found: {name}")]
    ContainerNotFound { name: String },

    #[error("command not found: {program}")]
    CommandNotFound { program: String },

    #[error("missing required field: {field}")]
    MissingField { field: String },

    #[error("single native command requested but {count} commands are registered")]
    MultipleCommands { count: usize },

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterError),
}

impl ConfigError {
    /// Build a [`ConfigError::Conflict`] showing `existing` as YAML.
    pub fn conflict<T: serde::Serialize>(field: impl Into<String>, existing: &T) -> Self {
        let existing = serde_yaml::to_string(existing)
            .unwrap_or_else(|e| format!("<unrenderable: {e}>"));
        ConfigError::Conflict {
            field: field.into(),
            existing,
        }
    }
}

/// Errors raised by the experiment registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("experiment {name} registered twice ({existing_module} and {new_module})")]
    Duplicate {
        name: String,
        existing_module: String,
        new_module: String,
    },

    #[error("unknown experiment: {name}")]
    NotFound { name: String },
}

/// Errors raised while running an experiment step.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl HarnessError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        HarnessError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Result type for config composition.
pub type Result<T> = std::result::Result<T, ConfigError>;
