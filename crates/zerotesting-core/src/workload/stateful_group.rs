//! Stateful-group layers: the group spec and the top-level object.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use serde::Serialize;

use crate::error::{ConfigError, Result};
use crate::policy::{set_entry, set_once, upsert_by, Overwrite};
use crate::workload::pod_template::{PodTemplateSpecConfig, APP_LABEL};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum PodManagementPolicy {
    #[default]
    Parallel,
    OrderedReady,
}

impl PodManagementPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            PodManagementPolicy::Parallel => "Parallel",
            PodManagementPolicy::OrderedReady => "OrderedReady",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatefulGroupSpecConfig {
    replicas: u32,
    selector_labels: BTreeMap<String, String>,
    service_name: Option<String>,
    pod_template: PodTemplateSpecConfig,
    volume_claim_templates: Vec<PersistentVolumeClaim>,
}

impl StatefulGroupSpecConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replicas(&self) -> u32 {
        self.replicas
    }

    pub fn service_name(&self) -> Option<&str> {
        self.service_name.as_deref()
    }

    pub fn pod_template(&self) -> &PodTemplateSpecConfig {
        &self.pod_template
    }

    pub fn pod_template_mut(&mut self) -> &mut PodTemplateSpecConfig {
        &mut self.pod_template
    }

    pub fn with_replicas(&mut self, replicas: u32) -> &mut Self {
        self.replicas = replicas;
        self
    }

    pub fn with_service_name(&mut self, name: &str, overwrite: Overwrite) -> Result<&mut Self> {
        set_once(&mut self.service_name, name.to_string(), overwrite, "serviceName")?;
        Ok(self)
    }

    pub fn with_selector_label(&mut self, key: &str, value: &str, overwrite: Overwrite) -> Result<&mut Self> {
        set_entry(&mut self.selector_labels, key, value, overwrite, "selector label")?;
        Ok(self)
    }

    pub fn add_volume_claim_template(
        &mut self,
        claim: PersistentVolumeClaim,
        overwrite: Overwrite,
    ) -> Result<&mut Self> {
        upsert_by(
            &mut self.volume_claim_templates,
            claim,
            overwrite,
            "volumeClaimTemplate",
            |c| c.metadata.name.clone(),
        )?;
        Ok(self)
    }

    /// Selector labels including the template's `app` label.
    pub fn selector(&self) -> Result<BTreeMap<String, String>> {
        let app = self
            .pod_template
            .app_label()
            .ok_or_else(|| ConfigError::MissingField {
                field: format!("pod template label {APP_LABEL}"),
            })?;
        let mut selector = self.selector_labels.clone();
        set_entry(&mut selector, APP_LABEL, app, Overwrite::Error, "selector label")?;
        Ok(selector)
    }

    pub fn build(&self) -> Result<StatefulSetSpec> {
        let selector = self.selector()?;
        let service_name = self
            .service_name
            .clone()
            .ok_or_else(|| ConfigError::MissingField {
                field: "serviceName".to_string(),
            })?;

        // Every selector label must also be on the pods it selects.
        let mut template = self.pod_template.clone();
        for (key, value) in &selector {
            template.with_label(key, value, Overwrite::Error)?;
        }

        let replicas = i32::try_from(self.replicas).map_err(|_| ConfigError::Invalid {
            field: "replicas".to_string(),
            reason: format!("{} exceeds i32", self.replicas),
        })?;
        Ok(StatefulSetSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(selector),
                ..Default::default()
            },
            service_name,
            template: template.build()?,
            volume_claim_templates: (!self.volume_claim_templates.is_empty())
                .then(|| self.volume_claim_templates.clone()),
            ..Default::default()
        })
    }
}

/// Top-level stateful group.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatefulGroupConfig {
    name: String,
    namespace: Option<String>,
    labels: BTreeMap<String, String>,
    pod_management_policy: PodManagementPolicy,
    spec: StatefulGroupSpecConfig,
}

impl StatefulGroupConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn pod_management_policy(&self) -> PodManagementPolicy {
        self.pod_management_policy
    }

    pub fn spec(&self) -> &StatefulGroupSpecConfig {
        &self.spec
    }

    pub fn spec_mut(&mut self) -> &mut StatefulGroupSpecConfig {
        &mut self.spec
    }

    pub fn with_namespace(&mut self, namespace: &str, overwrite: Overwrite) -> Result<&mut Self> {
        set_once(&mut self.namespace, namespace.to_string(), overwrite, "namespace")?;
        Ok(self)
    }

    pub fn with_label(&mut self, key: &str, value: &str, overwrite: Overwrite) -> Result<&mut Self> {
        set_entry(&mut self.labels, key, value, overwrite, "label")?;
        Ok(self)
    }

    pub fn with_pod_management_policy(&mut self, policy: PodManagementPolicy) -> &mut Self {
        self.pod_management_policy = policy;
        self
    }

    /// Emit the `StatefulSet`. The result shares nothing with `self`.
    pub fn build(&self) -> Result<StatefulSet> {
        if self.name.is_empty() {
            return Err(ConfigError::MissingField {
                field: "stateful group name".to_string(),
            });
        }
        let mut spec = self.spec.build()?;
        spec.pod_management_policy = Some(self.pod_management_policy.as_str().to_string());
        Ok(StatefulSet {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: self.namespace.clone(),
                labels: (!self.labels.is_empty()).then(|| self.labels.clone()),
                ..Default::default()
            },
            spec: Some(spec),
            status: None,
        })
    }
}
