//! Publisher pod: runs the `publisher` driver against the peer service.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use zerotesting_publisher::{PeerSelection, Protocol};

use crate::command::{Arg, CommandConfig};
use crate::error::{ConfigError, Result};
use crate::policy::Overwrite;
use crate::presets::{NODES_SERVICE, REST_PORT};
use crate::workload::{
    get_config_mut, resources, ConfigPath, ContainerConfig, Image, PodSpecConfig,
    PodTemplateSpecConfig, PullPolicy,
};

/// Driver binary inside the publisher image.
pub const PUBLISHER_PROGRAM: &str = "publisher";

pub const PUBLISHER_APP: &str = "zerotesting-publisher";

const PUBLISHER_CONTAINER: &str = "publisher";

/// Driver options. Only fields that are set become flags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    pub pubsub_topic: Option<String>,
    pub content_topic: Option<String>,
    pub msg_size_kbytes: Option<u64>,
    pub msg_size_bytes: Option<u64>,
    pub delay_seconds: Option<f64>,
    pub messages: Option<u64>,
    pub peer_selection: Option<PeerSelection>,
    pub port: Option<u16>,
    pub network_size: Option<u64>,
    pub protocols: Vec<Protocol>,
    pub service: Option<String>,
    pub name_template: Option<String>,
    pub namespace: Option<String>,
    pub debug: bool,
}

impl PublisherConfig {
    pub fn to_args(&self) -> Vec<Arg> {
        let mut args = Vec::new();
        let mut push = |name: &str, value: Option<String>| {
            if let Some(value) = value {
                args.push(Arg::flag(name, value));
            }
        };
        push("--pubsub-topic", self.pubsub_topic.clone());
        push("--content-topic", self.content_topic.clone());
        push("--msg-size-kbytes", self.msg_size_kbytes.map(|v| v.to_string()));
        push("--msg-size-bytes", self.msg_size_bytes.map(|v| v.to_string()));
        push("--delay-seconds", self.delay_seconds.map(|v| v.to_string()));
        push("--messages", self.messages.map(|v| v.to_string()));
        push("--peer-selection", self.peer_selection.map(|v| v.to_string()));
        push("--port", self.port.map(|v| v.to_string()));
        push("--network-size", self.network_size.map(|v| v.to_string()));
        push(
            "--protocols",
            (!self.protocols.is_empty()).then(|| {
                self.protocols
                    .iter()
                    .map(|p| p.as_str())
                    .collect::<Vec<_>>()
                    .join(",")
            }),
        );
        push("--service", self.service.clone());
        push("--name-template", self.name_template.clone());
        push("--namespace", self.namespace.clone());
        if self.debug {
            args.push(Arg::switch("--debug"));
        }
        args
    }

    /// Nominal length of the message loop, using driver defaults for unset
    /// fields.
    pub fn loop_duration(&self) -> Duration {
        let messages = self.messages.unwrap_or(10);
        let delay = self.delay_seconds.unwrap_or(1.0).max(0.0);
        Duration::from_secs_f64(delay * messages as f64)
    }
}

/// Shape a pod template into the publisher pod.
///
/// The template must already be named; the preset owns the `publisher`
/// container, the `app` label and the restart policy.
pub fn publisher_pod<C>(config: &mut C, publisher: &PublisherConfig, image: &Image) -> Result<()>
where
    C: ConfigPath<PodTemplateSpecConfig>,
{
    let template = get_config_mut::<PodTemplateSpecConfig, C>(config);
    if template.name().is_none() {
        return Err(ConfigError::Precondition(
            "publisher preset needs a named pod template".to_string(),
        ));
    }
    template.with_app_label(PUBLISHER_APP, Overwrite::Error)?;

    let mut container = ContainerConfig::new(PUBLISHER_CONTAINER);
    container
        .with_image(image.clone(), Overwrite::Error)?
        .with_pull_policy(PullPolicy::IfNotPresent, Overwrite::Error)?
        .with_resources(
            resources(
                &[("memory", "64Mi"), ("cpu", "150m")],
                &[("memory", "256Mi"), ("cpu", "500m")],
            ),
            Overwrite::Error,
        )?
        .with_command(
            CommandConfig::native(PUBLISHER_PROGRAM, publisher.to_args())?,
            Overwrite::Error,
        )?;

    let namespace = template.namespace().map(str::to_string);
    let spec = get_config_mut::<PodSpecConfig, _>(template);
    spec.add_container(container, Overwrite::Error)?
        .with_restart_policy("Never", Overwrite::Error)?;
    let service = publisher.service.as_deref().unwrap_or(NODES_SERVICE);
    match namespace {
        Some(ns) => spec.with_dns_service(&format!("{service}.{ns}")),
        None => spec.with_dns_service(service),
    };
    Ok(())
}

/// Publisher options pointing at the regression peer group.
pub fn default_publisher_for(network_size: u64) -> PublisherConfig {
    PublisherConfig {
        port: Some(REST_PORT as u16),
        network_size: Some(network_size),
        ..Default::default()
    }
}
