//! Network-delay init container.

use k8s_openapi::api::core::v1::{Capabilities, SecurityContext};
use serde::{Deserialize, Serialize};

use crate::command::{Arg, CommandConfig};
use crate::error::{ConfigError, Result};
use crate::policy::Overwrite;
use crate::workload::{get_config_mut, ConfigPath, ContainerConfig, Image, PodSpecConfig};

const NETEM_CONTAINER: &str = "netem";

/// `tc netem` delay parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetemConfig {
    pub delay_ms: u32,
    pub jitter_ms: u32,
    pub distribution: String,
    pub interface: String,
    pub image: String,
}

impl Default for NetemConfig {
    fn default() -> Self {
        Self {
            delay_ms: 100,
            jitter_ms: 30,
            distribution: "normal".to_string(),
            interface: "eth0".to_string(),
            image: "nicolaka/netshoot:v0.13".to_string(),
        }
    }
}

impl NetemConfig {
    fn tc_args(&self) -> Vec<Arg> {
        let mut args: Vec<Arg> = ["qdisc", "add", "dev"].into_iter().map(Arg::token).collect();
        args.push(Arg::token(self.interface.as_str()));
        args.extend(["root", "netem", "delay"].into_iter().map(Arg::token));
        args.push(Arg::token(format!("{}ms", self.delay_ms)));
        if self.jitter_ms > 0 {
            args.push(Arg::token(format!("{}ms", self.jitter_ms)));
            args.push(Arg::token("distribution"));
            args.push(Arg::token(self.distribution.as_str()));
        }
        args
    }
}

/// Add an init container that installs the delay qdisc on the pod's primary
/// interface. The pod network namespace is shared, so the qdisc outlives it.
pub fn netem_init_container<C>(config: &mut C, netem: &NetemConfig) -> Result<()>
where
    C: ConfigPath<PodSpecConfig>,
{
    if netem.interface.is_empty() {
        return Err(ConfigError::Invalid {
            field: "netem interface".to_string(),
            reason: "must not be empty".to_string(),
        });
    }
    let mut init = ContainerConfig::new(NETEM_CONTAINER);
    init.with_image(Image::parse(&netem.image), Overwrite::Error)?
        .with_security_context(
            SecurityContext {
                capabilities: Some(Capabilities {
                    add: Some(vec!["NET_ADMIN".to_string()]),
                    drop: None,
                }),
                ..Default::default()
            },
            Overwrite::Error,
        )?
        .with_command(CommandConfig::native("tc", netem.tc_args())?, Overwrite::Error)?;

    get_config_mut::<PodSpecConfig, C>(config).add_init_container(init, Overwrite::Error)?;
    Ok(())
}
