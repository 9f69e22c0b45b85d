//! Collision policies for config mutators.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{ConfigError, Result};

/// What a setter does when the slot already holds a different value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Overwrite {
    #[default]
    Error,
    Replace,
    Ignore,
}

/// What a list mutator does when an entry with the same key exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OnDuplicate {
    #[default]
    Error,
    /// Keep the existing entry.
    Ignore,
    /// Substitute the new value; later copies of the key are removed.
    Replace,
    /// Keep both. Used for repeatable flags.
    Append,
}

/// Store `value` into `slot` under `policy`.
///
/// Setting a value equal to the current one always succeeds.
pub(crate) fn set_once<T>(slot: &mut Option<T>, value: T, policy: Overwrite, field: &str) -> Result<()>
where
    T: PartialEq + Serialize,
{
    match slot {
        Some(existing) if *existing != value => match policy {
            Overwrite::Error => Err(ConfigError::conflict(field, existing)),
            Overwrite::Replace => {
                *slot = Some(value);
                Ok(())
            }
            Overwrite::Ignore => Ok(()),
        },
        _ => {
            *slot = Some(value);
            Ok(())
        }
    }
}

/// Insert `item` into a list keyed by `key`, honouring `policy`.
///
/// An entry equal to the existing one is accepted under every policy.
/// Returns `Ok(false)` when the existing entry was kept.
pub(crate) fn upsert_by<T, K, F>(
    items: &mut Vec<T>,
    item: T,
    policy: Overwrite,
    field: &str,
    key: F,
) -> Result<bool>
where
    T: PartialEq + Serialize,
    K: PartialEq,
    F: Fn(&T) -> K,
{
    let wanted = key(&item);
    match items.iter().position(|existing| key(existing) == wanted) {
        None => {
            items.push(item);
            Ok(true)
        }
        Some(index) if items[index] == item => Ok(true),
        Some(index) => match policy {
            Overwrite::Error => Err(ConfigError::conflict(field, &items[index])),
            Overwrite::Replace => {
                items[index] = item;
                Ok(true)
            }
            Overwrite::Ignore => Ok(false),
        },
    }
}

/// Insert `key = value` into a label or annotation map under `policy`.
pub(crate) fn set_entry(
    map: &mut BTreeMap<String, String>,
    key: &str,
    value: &str,
    policy: Overwrite,
    field: &str,
) -> Result<()> {
    let mut slot = map.get(key).cloned();
    set_once(&mut slot, value.to_string(), policy, &format!("{field} {key}"))?;
    if let Some(value) = slot {
        map.insert(key.to_string(), value);
    }
    Ok(())
}
