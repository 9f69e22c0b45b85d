//! Container layer.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, ObjectFieldSelector, Probe,
    ResourceRequirements, SecurityContext, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde::Serialize;

use crate::command::CommandConfig;
use crate::error::{ConfigError, Result};
use crate::policy::{set_once, upsert_by, OnDuplicate, Overwrite};

/// Container image reference `repo:tag`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Image {
    pub repo: String,
    pub tag: String,
}

impl Image {
    pub fn new(repo: &str, tag: &str) -> Self {
        Self {
            repo: repo.to_string(),
            tag: tag.to_string(),
        }
    }

    /// Split `repo:tag`; a colon inside a registry host is not a tag.
    pub fn parse(raw: &str) -> Self {
        match raw.rsplit_once(':') {
            Some((repo, tag)) if !tag.contains('/') => Self::new(repo, tag),
            _ => Self::new(raw, "latest"),
        }
    }
}

impl std::fmt::Display for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.repo, self.tag)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PullPolicy {
    IfNotPresent,
    Always,
    Never,
}

impl PullPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            PullPolicy::IfNotPresent => "IfNotPresent",
            PullPolicy::Always => "Always",
            PullPolicy::Never => "Never",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "IfNotPresent" => Some(PullPolicy::IfNotPresent),
            "Always" => Some(PullPolicy::Always),
            "Never" => Some(PullPolicy::Never),
            _ => None,
        }
    }
}

/// `ResourceRequirements` from `(resource, quantity)` pairs.
pub fn resources(requests: &[(&str, &str)], limits: &[(&str, &str)]) -> ResourceRequirements {
    let to_map = |pairs: &[(&str, &str)]| -> Option<BTreeMap<String, Quantity>> {
        if pairs.is_empty() {
            return None;
        }
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), Quantity(v.to_string())))
                .collect(),
        )
    };
    ResourceRequirements {
        requests: to_map(requests),
        limits: to_map(limits),
        ..Default::default()
    }
}

/// Env var with a literal value.
pub fn env_value(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        value_from: None,
    }
}

/// Env var from a pod field, e.g. `status.podIP`.
pub fn env_field(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: None,
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: field_path.to_string(),
                api_version: None,
            }),
            ..Default::default()
        }),
    }
}

/// Mutable description of one container.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContainerConfig {
    name: String,
    image: Option<Image>,
    image_pull_policy: Option<PullPolicy>,
    ports: Vec<ContainerPort>,
    env: Vec<EnvVar>,
    volume_mounts: Vec<VolumeMount>,
    resources: Option<ResourceRequirements>,
    readiness_probe: Option<Probe>,
    security_context: Option<SecurityContext>,
    command: CommandConfig,
}

impl ContainerConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            image: None,
            image_pull_policy: None,
            ports: Vec::new(),
            env: Vec::new(),
            volume_mounts: Vec::new(),
            resources: None,
            readiness_probe: None,
            security_context: None,
            command: CommandConfig::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image(&self) -> Option<&Image> {
        self.image.as_ref()
    }

    pub fn ports(&self) -> &[ContainerPort] {
        &self.ports
    }

    pub fn env(&self) -> &[EnvVar] {
        &self.env
    }

    pub fn env_var(&self, name: &str) -> Option<&EnvVar> {
        self.env.iter().find(|e| e.name == name)
    }

    pub fn volume_mounts(&self) -> &[VolumeMount] {
        &self.volume_mounts
    }

    pub fn resources(&self) -> Option<&ResourceRequirements> {
        self.resources.as_ref()
    }

    pub fn readiness_probe(&self) -> Option<&Probe> {
        self.readiness_probe.as_ref()
    }

    pub fn security_context(&self) -> Option<&SecurityContext> {
        self.security_context.as_ref()
    }

    pub fn command(&self) -> &CommandConfig {
        &self.command
    }

    pub fn command_mut(&mut self) -> &mut CommandConfig {
        &mut self.command
    }

    pub fn with_image(&mut self, image: Image, overwrite: Overwrite) -> Result<&mut Self> {
        let field = self.field("image");
        set_once(&mut self.image, image, overwrite, &field)?;
        Ok(self)
    }

    pub fn with_pull_policy(&mut self, policy: PullPolicy, overwrite: Overwrite) -> Result<&mut Self> {
        let field = self.field("imagePullPolicy");
        set_once(&mut self.image_pull_policy, policy, overwrite, &field)?;
        Ok(self)
    }

    /// Expose `port`. Ports are keyed by number and protocol.
    pub fn with_port(
        &mut self,
        port: i32,
        name: Option<&str>,
        protocol: Option<&str>,
        overwrite: Overwrite,
    ) -> Result<&mut Self> {
        let field = self.field("port");
        let entry = ContainerPort {
            container_port: port,
            name: name.map(str::to_string),
            protocol: protocol.map(str::to_string),
            ..Default::default()
        };
        upsert_by(&mut self.ports, entry, overwrite, &field, |p| {
            (p.container_port, p.protocol.clone())
        })?;
        Ok(self)
    }

    /// Add an environment variable; names are unique unless `Append`.
    pub fn with_env(&mut self, var: EnvVar, on_duplicate: OnDuplicate) -> Result<&mut Self> {
        match self.env.iter().position(|e| e.name == var.name) {
            None => self.env.push(var),
            Some(index) => match on_duplicate {
                OnDuplicate::Error => {
                    return Err(ConfigError::DuplicateEnv {
                        container: self.name.clone(),
                        name: var.name,
                    })
                }
                OnDuplicate::Ignore => {}
                OnDuplicate::Replace => self.env[index] = var,
                OnDuplicate::Append => self.env.push(var),
            },
        }
        Ok(self)
    }

    /// Mount volume `name` at `mount_path`. Mounts are keyed by path.
    pub fn with_volume_mount(
        &mut self,
        name: &str,
        mount_path: &str,
        overwrite: Overwrite,
    ) -> Result<&mut Self> {
        let field = self.field("volumeMount");
        let mount = VolumeMount {
            name: name.to_string(),
            mount_path: mount_path.to_string(),
            ..Default::default()
        };
        upsert_by(&mut self.volume_mounts, mount, overwrite, &field, |m| {
            m.mount_path.clone()
        })?;
        Ok(self)
    }

    pub fn with_resources(
        &mut self,
        resources: ResourceRequirements,
        overwrite: Overwrite,
    ) -> Result<&mut Self> {
        let field = self.field("resources");
        set_once(&mut self.resources, resources, overwrite, &field)?;
        Ok(self)
    }

    pub fn with_readiness_probe(&mut self, probe: Probe, overwrite: Overwrite) -> Result<&mut Self> {
        let field = self.field("readinessProbe");
        set_once(&mut self.readiness_probe, probe, overwrite, &field)?;
        Ok(self)
    }

    pub fn with_security_context(
        &mut self,
        context: SecurityContext,
        overwrite: Overwrite,
    ) -> Result<&mut Self> {
        let field = self.field("securityContext");
        set_once(&mut self.security_context, context, overwrite, &field)?;
        Ok(self)
    }

    pub fn with_command(&mut self, command: CommandConfig, overwrite: Overwrite) -> Result<&mut Self> {
        if self.command.is_empty() || self.command == command {
            self.command = command;
            return Ok(self);
        }
        match overwrite {
            Overwrite::Error => Err(ConfigError::conflict(self.field("command"), &self.command)),
            Overwrite::Replace => {
                self.command = command;
                Ok(self)
            }
            Overwrite::Ignore => Ok(self),
        }
    }

    fn field(&self, name: &str) -> String {
        format!("container {} {name}", self.name)
    }

    /// Emit the container object.
    pub fn build(&self) -> Result<Container> {
        let image = self.image.as_ref().ok_or_else(|| ConfigError::MissingField {
            field: self.field("image"),
        })?;
        let (command, args) = match self.command.render() {
            Some(rendered) => {
                let (command, args) = rendered.into_container_fields();
                (Some(command), args)
            }
            None => (None, None),
        };
        Ok(Container {
            name: self.name.clone(),
            image: Some(image.to_string()),
            image_pull_policy: self.image_pull_policy.map(|p| p.as_str().to_string()),
            ports: non_empty(&self.ports),
            env: non_empty(&self.env),
            volume_mounts: non_empty(&self.volume_mounts),
            resources: self.resources.clone(),
            readiness_probe: self.readiness_probe.clone(),
            security_context: self.security_context.clone(),
            command,
            args,
            ..Default::default()
        })
    }

    /// Rebuild from an existing container object.
    ///
    /// Fields this layer does not model are dropped.
    pub fn from_container(container: &Container) -> Self {
        Self {
            name: container.name.clone(),
            image: container.image.as_deref().map(Image::parse),
            image_pull_policy: container
                .image_pull_policy
                .as_deref()
                .and_then(PullPolicy::parse),
            ports: container.ports.clone().unwrap_or_default(),
            env: container.env.clone().unwrap_or_default(),
            volume_mounts: container.volume_mounts.clone().unwrap_or_default(),
            resources: container.resources.clone(),
            readiness_probe: container.readiness_probe.clone(),
            security_context: container.security_context.clone(),
            command: CommandConfig::from_parts(
                container.command.as_deref(),
                container.args.as_deref(),
            ),
        }
    }
}

fn non_empty<T: Clone>(items: &[T]) -> Option<Vec<T>> {
    if items.is_empty() {
        None
    } else {
        Some(items.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Arg;

    fn waku() -> ContainerConfig {
        let mut c = ContainerConfig::new("waku");
        c.with_image(Image::new("wakuorg/nwaku", "v0.35.1"), Overwrite::Error)
            .unwrap()
            .with_port(8645, Some("rest"), None, Overwrite::Error)
            .unwrap()
            .with_env(env_field("IP", "status.podIP"), OnDuplicate::Error)
            .unwrap();
        c.command_mut()
            .insert_command("/usr/bin/wakunode", ["--rest=true"], true, None)
            .unwrap();
        c
    }

    #[test]
    fn test_image_parse() {
        assert_eq!(Image::parse("postgres:15.4"), Image::new("postgres", "15.4"));
        assert_eq!(
            Image::parse("registry:5000/tools/tc"),
            Image::new("registry:5000/tools/tc", "latest")
        );
    }

    #[test]
    fn test_env_names_unique() {
        let mut c = waku();
        let err = c
            .with_env(env_value("IP", "1.2.3.4"), OnDuplicate::Error)
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateEnv { ref name, .. } if name == "IP"));

        c.with_env(env_value("IP", "1.2.3.4"), OnDuplicate::Replace)
            .unwrap();
        assert_eq!(c.env().len(), 1);
        assert_eq!(c.env_var("IP").unwrap().value.as_deref(), Some("1.2.3.4"));

        c.with_env(env_value("IP", "5.6.7.8"), OnDuplicate::Append)
            .unwrap();
        assert_eq!(c.env().len(), 2);
    }

    #[test]
    fn test_resources_and_probe_refuse_silent_overwrite() {
        let mut c = waku();
        c.with_resources(resources(&[("memory", "64Mi")], &[]), Overwrite::Error)
            .unwrap();
        let err = c
            .with_resources(resources(&[("memory", "128Mi")], &[]), Overwrite::Error)
            .unwrap_err();
        assert!(err.to_string().contains("64Mi"));

        c.with_readiness_probe(Probe::default(), Overwrite::Error)
            .unwrap();
        let other = Probe {
            period_seconds: Some(3),
            ..Default::default()
        };
        assert!(c.with_readiness_probe(other.clone(), Overwrite::Error).is_err());
        c.with_readiness_probe(other, Overwrite::Replace).unwrap();
        assert_eq!(c.readiness_probe().unwrap().period_seconds, Some(3));
    }

    #[test]
    fn test_build_requires_image() {
        let err = ContainerConfig::new("bare").build().unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { .. }));
    }

    #[test]
    fn test_build_script_mode() {
        let container = waku().build().unwrap();
        assert_eq!(container.image.as_deref(), Some("wakuorg/nwaku:v0.35.1"));
        let command = container.command.unwrap();
        assert_eq!(command[0], "sh");
        assert!(command[2].ends_with('\n'));
        assert!(container.args.is_none());
    }

    #[test]
    fn test_round_trip_from_container() {
        let mut native = ContainerConfig::new("publisher");
        native
            .with_image(Image::new("zerotesting/publisher", "0.4.0"), Overwrite::Error)
            .unwrap()
            .with_pull_policy(PullPolicy::IfNotPresent, Overwrite::Error)
            .unwrap()
            .with_volume_mount("data", "/data", Overwrite::Error)
            .unwrap()
            .with_command(
                CommandConfig::native("publisher", [Arg::flag("--messages", "5")]).unwrap(),
                Overwrite::Error,
            )
            .unwrap();

        for config in [waku(), native] {
            let built = config.build().unwrap();
            let rebuilt = ContainerConfig::from_container(&built).build().unwrap();
            assert_eq!(rebuilt, built);
        }
    }
}
