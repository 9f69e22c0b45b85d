//! Fluent composers over the workload configs.
//!
//! Each builder owns its config, exposes the config-layer mutators in chained
//! form and freezes the result into a [`Manifest`] with `build()`.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Pod, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use zerotesting_cluster::Manifest;

use crate::error::{ConfigError, Result};
use crate::policy::Overwrite;
use crate::workload::{
    ContainerConfig, PodManagementPolicy, PodSpecConfig, PodTemplateSpecConfig,
    StatefulGroupConfig,
};

/// Builds a `StatefulSet` manifest.
#[derive(Debug, Clone)]
pub struct StatefulGroupBuilder {
    config: StatefulGroupConfig,
}

impl StatefulGroupBuilder {
    pub fn new(name: &str, namespace: &str) -> Result<Self> {
        let mut config = StatefulGroupConfig::new(name);
        config.with_namespace(namespace, Overwrite::Error)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &StatefulGroupConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut StatefulGroupConfig {
        &mut self.config
    }

    pub fn with_replicas(&mut self, replicas: u32) -> &mut Self {
        self.config.spec_mut().with_replicas(replicas);
        self
    }

    pub fn with_service_name(&mut self, name: &str, overwrite: Overwrite) -> Result<&mut Self> {
        self.config.spec_mut().with_service_name(name, overwrite)?;
        Ok(self)
    }

    pub fn with_app_label(&mut self, app: &str, overwrite: Overwrite) -> Result<&mut Self> {
        self.config
            .spec_mut()
            .pod_template_mut()
            .with_app_label(app, overwrite)?;
        Ok(self)
    }

    pub fn with_pod_management_policy(&mut self, policy: PodManagementPolicy) -> &mut Self {
        self.config.with_pod_management_policy(policy);
        self
    }

    pub fn with_container(&mut self, container: ContainerConfig, overwrite: Overwrite) -> Result<&mut Self> {
        self.pod_spec_mut().add_container(container, overwrite)?;
        Ok(self)
    }

    pub fn pod_spec_mut(&mut self) -> &mut PodSpecConfig {
        self.config.spec_mut().pod_template_mut().pod_spec_mut()
    }

    /// Run a preset against the config.
    pub fn apply<F>(&mut self, preset: F) -> Result<&mut Self>
    where
        F: FnOnce(&mut StatefulGroupConfig) -> Result<()>,
    {
        preset(&mut self.config)?;
        Ok(self)
    }

    pub fn build(&self) -> Result<Manifest> {
        Ok(Manifest::StatefulSet(self.config.build()?))
    }

    /// Headless service giving each replica a stable DNS name.
    pub fn headless_service(&self) -> Result<Manifest> {
        ServiceBuilder::for_stateful_group(&self.config)?.build()
    }
}

/// Builds a bare `Pod` manifest from a pod template.
#[derive(Debug, Clone)]
pub struct PodBuilder {
    config: PodTemplateSpecConfig,
}

impl PodBuilder {
    pub fn new(name: &str, namespace: &str) -> Result<Self> {
        let mut config = PodTemplateSpecConfig::new();
        config
            .with_name(name, Overwrite::Error)?
            .with_namespace(namespace, Overwrite::Error)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PodTemplateSpecConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut PodTemplateSpecConfig {
        &mut self.config
    }

    pub fn with_app_label(&mut self, app: &str, overwrite: Overwrite) -> Result<&mut Self> {
        self.config.with_app_label(app, overwrite)?;
        Ok(self)
    }

    pub fn with_container(&mut self, container: ContainerConfig, overwrite: Overwrite) -> Result<&mut Self> {
        self.config.pod_spec_mut().add_container(container, overwrite)?;
        Ok(self)
    }

    pub fn apply<F>(&mut self, preset: F) -> Result<&mut Self>
    where
        F: FnOnce(&mut PodTemplateSpecConfig) -> Result<()>,
    {
        preset(&mut self.config)?;
        Ok(self)
    }

    pub fn build(&self) -> Result<Manifest> {
        let template = self.config.build()?;
        let metadata = template.metadata.unwrap_or_default();
        if metadata.name.is_none() {
            return Err(ConfigError::MissingField {
                field: "pod name".to_string(),
            });
        }
        Ok(Manifest::Pod(Pod {
            metadata,
            spec: template.spec,
            status: None,
        }))
    }
}

/// Builds a `Service` manifest.
#[derive(Debug, Clone, Default)]
pub struct ServiceBuilder {
    name: String,
    namespace: Option<String>,
    selector: BTreeMap<String, String>,
    ports: Vec<ServicePort>,
    headless: bool,
    node_port: bool,
}

impl ServiceBuilder {
    pub fn new(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }
    }

    /// Headless service named after the group's `serviceName`, selecting its
    /// pods and exposing every container port.
    pub fn for_stateful_group(group: &StatefulGroupConfig) -> Result<Self> {
        let spec = group.spec();
        let name = spec.service_name().ok_or_else(|| ConfigError::MissingField {
            field: "serviceName".to_string(),
        })?;
        let mut builder = Self {
            name: name.to_string(),
            namespace: group.namespace().map(str::to_string),
            selector: spec.selector()?,
            headless: true,
            ..Default::default()
        };
        for container in spec.pod_template().pod_spec().containers() {
            for port in container.ports() {
                builder.with_port(port.name.as_deref(), port.container_port, port.protocol.as_deref());
            }
        }
        Ok(builder)
    }

    pub fn with_selector(&mut self, key: &str, value: &str) -> &mut Self {
        self.selector.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_port(&mut self, name: Option<&str>, port: i32, protocol: Option<&str>) -> &mut Self {
        if !self
            .ports
            .iter()
            .any(|p| p.port == port && p.protocol.as_deref() == protocol)
        {
            self.ports.push(ServicePort {
                name: name.map(str::to_string),
                port,
                target_port: Some(IntOrString::Int(port)),
                protocol: protocol.map(str::to_string),
                ..Default::default()
            });
        }
        self
    }

    pub fn headless(&mut self) -> &mut Self {
        self.headless = true;
        self.node_port = false;
        self
    }

    /// Expose the ports on every node.
    pub fn node_port(&mut self) -> &mut Self {
        self.node_port = true;
        self.headless = false;
        self
    }

    pub fn build(&self) -> Result<Manifest> {
        if self.ports.is_empty() {
            return Err(ConfigError::MissingField {
                field: format!("service {} ports", self.name),
            });
        }
        if self.selector.is_empty() {
            return Err(ConfigError::MissingField {
                field: format!("service {} selector", self.name),
            });
        }
        Ok(Manifest::Service(Service {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: self.namespace.clone(),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                cluster_ip: self.headless.then(|| "None".to_string()),
                type_: self.node_port.then(|| "NodePort".to_string()),
                selector: Some(self.selector.clone()),
                ports: Some(self.ports.clone()),
                ..Default::default()
            }),
            status: None,
        }))
    }
}
