//! Pod-spec layer: containers, init containers, volumes, DNS search list.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{EmptyDirVolumeSource, PodDNSConfig, PodSpec, Volume};
use serde::Serialize;

use crate::command::Arg;
use crate::error::{ConfigError, Result};
use crate::policy::{set_entry, set_once, upsert_by, OnDuplicate, Overwrite};
use crate::workload::container::ContainerConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PodSpecConfig {
    containers: Vec<ContainerConfig>,
    init_containers: Vec<ContainerConfig>,
    volumes: Vec<Volume>,
    dns_searches: Vec<String>,
    /// Copied onto the enclosing pod template's metadata at build time.
    annotations: BTreeMap<String, String>,
    restart_policy: Option<String>,
}

impl PodSpecConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn containers(&self) -> &[ContainerConfig] {
        &self.containers
    }

    pub fn init_containers(&self) -> &[ContainerConfig] {
        &self.init_containers
    }

    pub fn volumes(&self) -> &[Volume] {
        &self.volumes
    }

    pub fn dns_searches(&self) -> &[String] {
        &self.dns_searches
    }

    pub fn annotations(&self) -> &BTreeMap<String, String> {
        &self.annotations
    }

    pub fn has_container(&self, name: &str) -> bool {
        self.containers.iter().any(|c| c.name() == name)
    }

    /// Append a container. Names are unique within the pod.
    pub fn add_container(&mut self, container: ContainerConfig, overwrite: Overwrite) -> Result<&mut Self> {
        let field = format!("container {}", container.name());
        upsert_by(&mut self.containers, container, overwrite, &field, |c| {
            c.name().to_string()
        })?;
        Ok(self)
    }

    /// Insert a container at `index`; an existing name is handled in place.
    pub fn insert_container(
        &mut self,
        index: usize,
        container: ContainerConfig,
        overwrite: Overwrite,
    ) -> Result<&mut Self> {
        if self.has_container(container.name()) {
            return self.add_container(container, overwrite);
        }
        let index = index.min(self.containers.len());
        self.containers.insert(index, container);
        Ok(self)
    }

    pub fn add_init_container(
        &mut self,
        container: ContainerConfig,
        overwrite: Overwrite,
    ) -> Result<&mut Self> {
        let field = format!("initContainer {}", container.name());
        upsert_by(&mut self.init_containers, container, overwrite, &field, |c| {
            c.name().to_string()
        })?;
        Ok(self)
    }

    pub fn add_volume(&mut self, volume: Volume, overwrite: Overwrite) -> Result<&mut Self> {
        let field = format!("volume {}", volume.name);
        upsert_by(&mut self.volumes, volume, overwrite, &field, |v| v.name.clone())?;
        Ok(self)
    }

    pub fn with_empty_dir_volume(&mut self, name: &str, overwrite: Overwrite) -> Result<&mut Self> {
        self.add_volume(
            Volume {
                name: name.to_string(),
                empty_dir: Some(EmptyDirVolumeSource::default()),
                ..Default::default()
            },
            overwrite,
        )
    }

    /// Add `service` to the DNS search list unless already present.
    pub fn with_dns_service(&mut self, service: &str) -> &mut Self {
        if !self.dns_searches.iter().any(|s| s == service) {
            self.dns_searches.push(service.to_string());
        }
        self
    }

    pub fn with_annotation(&mut self, key: &str, value: &str, overwrite: Overwrite) -> Result<&mut Self> {
        set_entry(&mut self.annotations, key, value, overwrite, "annotation")?;
        Ok(self)
    }

    pub fn with_restart_policy(&mut self, policy: &str, overwrite: Overwrite) -> Result<&mut Self> {
        set_once(
            &mut self.restart_policy,
            policy.to_string(),
            overwrite,
            "restartPolicy",
        )?;
        Ok(self)
    }

    /// First container named `name`.
    pub fn find_container(&self, name: &str) -> Result<&ContainerConfig> {
        self.containers
            .iter()
            .find(|c| c.name() == name)
            .ok_or_else(|| ConfigError::ContainerNotFound {
                name: name.to_string(),
            })
    }

    pub fn find_container_mut(&mut self, name: &str) -> Result<&mut ContainerConfig> {
        self.containers
            .iter_mut()
            .find(|c| c.name() == name)
            .ok_or_else(|| ConfigError::ContainerNotFound {
                name: name.to_string(),
            })
    }

    pub fn find_init_container(&self, name: &str) -> Result<&ContainerConfig> {
        self.init_containers
            .iter()
            .find(|c| c.name() == name)
            .ok_or_else(|| ConfigError::ContainerNotFound {
                name: name.to_string(),
            })
    }

    /// Merge flags into `program` of container `container`.
    pub fn with_container_command_args<I, A>(
        &mut self,
        container: &str,
        program: &str,
        args: I,
        on_duplicate: OnDuplicate,
    ) -> Result<&mut Self>
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        self.find_container_mut(container)?
            .command_mut()
            .add_args(program, args, on_duplicate)?;
        Ok(self)
    }

    pub fn build(&self) -> Result<PodSpec> {
        if self.containers.is_empty() {
            return Err(ConfigError::MissingField {
                field: "pod spec containers".to_string(),
            });
        }
        let containers = self
            .containers
            .iter()
            .map(ContainerConfig::build)
            .collect::<Result<Vec<_>>>()?;
        let init_containers = self
            .init_containers
            .iter()
            .map(ContainerConfig::build)
            .collect::<Result<Vec<_>>>()?;
        Ok(PodSpec {
            containers,
            init_containers: (!init_containers.is_empty()).then_some(init_containers),
            volumes: (!self.volumes.is_empty()).then(|| self.volumes.clone()),
            dns_config: (!self.dns_searches.is_empty()).then(|| PodDNSConfig {
                searches: Some(self.dns_searches.clone()),
                ..Default::default()
            }),
            restart_policy: self.restart_policy.clone(),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::container::Image;

    fn container(name: &str) -> ContainerConfig {
        let mut c = ContainerConfig::new(name);
        c.with_image(Image::new("busybox", "1.36"), Overwrite::Error)
            .unwrap();
        c
    }

    #[test]
    fn test_container_names_unique() {
        let mut spec = PodSpecConfig::new();
        spec.add_container(container("waku"), Overwrite::Error).unwrap();
        spec.add_container(container("waku"), Overwrite::Error).unwrap();
        let mut other = container("waku");
        other
            .with_image(Image::new("busybox", "1.37"), Overwrite::Replace)
            .unwrap();
        let err = spec
            .add_container(other.clone(), Overwrite::Error)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Conflict { .. }));
        spec.add_container(other, Overwrite::Ignore).unwrap();
        assert_eq!(spec.containers().len(), 1);
    }

    #[test]
    fn test_insert_container_prepends() {
        let mut spec = PodSpecConfig::new();
        spec.add_container(container("waku"), Overwrite::Error).unwrap();
        spec.insert_container(0, container("postgres"), Overwrite::Error)
            .unwrap();
        let names: Vec<_> = spec.containers().iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["postgres", "waku"]);
    }

    #[test]
    fn test_dns_service_membership_on_searches() {
        let mut spec = PodSpecConfig::new();
        spec.with_dns_service("zerotesting-bootstrap.zerotesting")
            .with_dns_service("zerotesting-bootstrap.zerotesting")
            .with_dns_service("zerotesting-service.zerotesting");
        assert_eq!(spec.dns_searches().len(), 2);
    }

    #[test]
    fn test_find_container_not_found() {
        let spec = PodSpecConfig::new();
        let err = spec.find_container("waku").unwrap_err();
        assert!(matches!(err, ConfigError::ContainerNotFound { name } if name == "waku"));
    }

    #[test]
    fn test_with_container_command_args() {
        let mut spec = PodSpecConfig::new();
        let mut waku = container("waku");
        waku.command_mut()
            .insert_command("/usr/bin/wakunode", ["--relay=true"], false, None)
            .unwrap();
        spec.add_container(waku, Overwrite::Error).unwrap();

        spec.with_container_command_args(
            "waku",
            "/usr/bin/wakunode",
            ["--relay=false", "--rest=true"],
            OnDuplicate::Replace,
        )
        .unwrap();
        let cmd = spec
            .find_container("waku")
            .unwrap()
            .command()
            .find_command("/usr/bin/wakunode")
            .unwrap();
        assert_eq!(cmd.flag_values("--relay"), vec![Some("false")]);
        assert_eq!(cmd.flag_values("--rest"), vec![Some("true")]);

        let err = spec
            .with_container_command_args("nope", "x", ["--a"], OnDuplicate::Error)
            .unwrap_err();
        assert!(matches!(err, ConfigError::ContainerNotFound { .. }));
    }

    #[test]
    fn test_build_requires_container() {
        assert!(PodSpecConfig::new().build().is_err());
    }

    #[test]
    fn test_build_emits_dns_and_volumes() {
        let mut spec = PodSpecConfig::new();
        spec.add_container(container("waku"), Overwrite::Error)
            .unwrap()
            .with_empty_dir_volume("enr-data", Overwrite::Error)
            .unwrap()
            .with_dns_service("zerotesting-bootstrap.zerotesting");
        let built = spec.build().unwrap();
        assert_eq!(built.volumes.unwrap()[0].name, "enr-data");
        assert_eq!(
            built.dns_config.unwrap().searches.unwrap(),
            vec!["zerotesting-bootstrap.zerotesting".to_string()]
        );
        assert!(built.init_containers.is_none());
    }
}
