//! Bandwidth and subnet annotations understood by the OVN CNI.

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::policy::Overwrite;
use crate::workload::{get_config_mut, ConfigPath, PodSpecConfig};

pub const BANDWIDTH_ANNOTATION_PREFIX: &str = "ovn.kubernetes.io/";

/// Rates are in Mbit/s.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandwidthConfig {
    pub ingress_rate: Option<u32>,
    pub egress_rate: Option<u32>,
    pub logical_switch: Option<String>,
}

impl BandwidthConfig {
    pub fn annotations(&self) -> Vec<(String, String)> {
        let key = |name: &str| format!("{BANDWIDTH_ANNOTATION_PREFIX}{name}");
        let mut out = Vec::new();
        if let Some(rate) = self.ingress_rate {
            out.push((key("ingress_rate"), rate.to_string()));
        }
        if let Some(rate) = self.egress_rate {
            out.push((key("egress_rate"), rate.to_string()));
        }
        if let Some(switch) = &self.logical_switch {
            out.push((key("logical_switch"), switch.clone()));
        }
        out
    }
}

/// Annotate the pods. The annotations surface on the enclosing pod template.
pub fn bandwidth_annotations<C>(config: &mut C, bandwidth: &BandwidthConfig, overwrite: Overwrite) -> Result<()>
where
    C: ConfigPath<PodSpecConfig>,
{
    let annotations = bandwidth.annotations();
    if annotations.is_empty() {
        return Err(ConfigError::Precondition(
            "bandwidth preset needs at least one of ingress_rate, egress_rate, logical_switch"
                .to_string(),
        ));
    }
    let spec = get_config_mut::<PodSpecConfig, C>(config);
    for (key, value) in &annotations {
        spec.with_annotation(key, value, overwrite)?;
    }
    Ok(())
}
