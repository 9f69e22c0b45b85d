//! The `--values` document: YAML overrides read by experiments.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};

use crate::error::{ConfigError, HarnessError};

/// Free-form mapping with dotted-path lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Values {
    root: Mapping,
}

impl Values {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        if raw.trim().is_empty() {
            return Ok(Self::new());
        }
        match serde_yaml::from_str::<Value>(raw).map_err(|e| ConfigError::Serialization(e.to_string()))? {
            Value::Mapping(root) => Ok(Self { root }),
            Value::Null => Ok(Self::new()),
            other => Err(ConfigError::Invalid {
                field: "values".to_string(),
                reason: format!("expected a mapping at the top level, got {other:?}"),
            }),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, HarnessError> {
        let raw = std::fs::read_to_string(path).map_err(|e| HarnessError::io(path, e))?;
        Ok(Self::from_yaml(&raw)?)
    }

    /// Value at `a.b.c`; `None` when any segment is missing.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.root.get(first)?;
        for segment in segments {
            current = current.as_mapping()?.get(segment)?;
        }
        Some(current)
    }

    /// Deserialize the value at `path`. Missing paths are `Ok(None)`.
    pub fn get_as<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, ConfigError> {
        self.get(path)
            .map(|v| {
                serde_yaml::from_value(v.clone()).map_err(|e| ConfigError::Invalid {
                    field: path.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    /// Overlay `other` onto `self`. Mappings merge key by key; anything else
    /// is replaced.
    pub fn merge(&mut self, other: Values) {
        merge_mapping(&mut self.root, other.root);
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }
}

fn merge_mapping(base: &mut Mapping, overlay: Mapping) {
    for (key, value) in overlay {
        let value = match (base.get_mut(&key), value) {
            (Some(Value::Mapping(existing)), Value::Mapping(incoming)) => {
                merge_mapping(existing, incoming);
                continue;
            }
            (_, value) => value,
        };
        base.insert(key, value);
    }
}
