//! Pod-template layer: metadata around a pod spec.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{ConfigError, Result};
use crate::policy::{set_entry, set_once, Overwrite};
use crate::workload::pod_spec::PodSpecConfig;

/// Label that selects the pods of a stateful group.
pub const APP_LABEL: &str = "app";

/// Annotation carrying a digest of the rendered template.
pub const TEMPLATE_HASH_ANNOTATION: &str = "zerotesting/template-hash";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PodTemplateSpecConfig {
    name: Option<String>,
    namespace: Option<String>,
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
    pod_spec: PodSpecConfig,
}

impl PodTemplateSpecConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    pub fn annotations(&self) -> &BTreeMap<String, String> {
        &self.annotations
    }

    pub fn app_label(&self) -> Option<&str> {
        self.labels.get(APP_LABEL).map(String::as_str)
    }

    pub fn pod_spec(&self) -> &PodSpecConfig {
        &self.pod_spec
    }

    pub fn pod_spec_mut(&mut self) -> &mut PodSpecConfig {
        &mut self.pod_spec
    }

    pub fn with_name(&mut self, name: &str, overwrite: Overwrite) -> Result<&mut Self> {
        set_once(&mut self.name, name.to_string(), overwrite, "pod name")?;
        Ok(self)
    }

    pub fn with_namespace(&mut self, namespace: &str, overwrite: Overwrite) -> Result<&mut Self> {
        set_once(
            &mut self.namespace,
            namespace.to_string(),
            overwrite,
            "pod namespace",
        )?;
        Ok(self)
    }

    pub fn with_label(&mut self, key: &str, value: &str, overwrite: Overwrite) -> Result<&mut Self> {
        set_entry(&mut self.labels, key, value, overwrite, "label")?;
        Ok(self)
    }

    /// Set the `app` label. Changing it requires an explicit overwrite.
    pub fn with_app_label(&mut self, app: &str, overwrite: Overwrite) -> Result<&mut Self> {
        self.with_label(APP_LABEL, app, overwrite)
    }

    pub fn with_annotation(&mut self, key: &str, value: &str, overwrite: Overwrite) -> Result<&mut Self> {
        set_entry(&mut self.annotations, key, value, overwrite, "annotation")?;
        Ok(self)
    }

    /// Annotations of this layer merged with the pod spec's.
    fn merged_annotations(&self) -> Result<BTreeMap<String, String>> {
        let mut merged = self.annotations.clone();
        for (key, value) in self.pod_spec.annotations() {
            set_entry(&mut merged, key, value, Overwrite::Error, "annotation")?;
        }
        Ok(merged)
    }

    pub fn build(&self) -> Result<PodTemplateSpec> {
        let spec = self.pod_spec.build()?;
        let mut annotations = self.merged_annotations()?;

        let hash_input = serde_json::to_vec(&(&self.labels, &annotations, &spec))
            .map_err(|e| ConfigError::Serialization(e.to_string()))?;
        let digest = hex::encode(Sha256::digest(&hash_input));
        annotations.insert(TEMPLATE_HASH_ANNOTATION.to_string(), digest[..16].to_string());

        Ok(PodTemplateSpec {
            metadata: Some(ObjectMeta {
                name: self.name.clone(),
                namespace: self.namespace.clone(),
                labels: (!self.labels.is_empty()).then(|| self.labels.clone()),
                annotations: Some(annotations),
                ..Default::default()
            }),
            spec: Some(spec),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::container::{ContainerConfig, Image};

    fn template() -> PodTemplateSpecConfig {
        let mut container = ContainerConfig::new("waku");
        container
            .with_image(Image::new("wakuorg/nwaku", "v0.35.1"), Overwrite::Error)
            .unwrap();
        let mut t = PodTemplateSpecConfig::new();
        t.with_app_label("zerotesting-nodes", Overwrite::Error)
            .unwrap()
            .pod_spec_mut()
            .add_container(container, Overwrite::Error)
            .unwrap();
        t
    }

    #[test]
    fn test_app_label_requires_overwrite_to_change() {
        let mut t = template();
        t.with_app_label("zerotesting-nodes", Overwrite::Error)
            .unwrap();
        assert!(t.with_app_label("other", Overwrite::Error).is_err());
        t.with_app_label("other", Overwrite::Replace).unwrap();
        assert_eq!(t.app_label(), Some("other"));
    }

    #[test]
    fn test_build_merges_pod_spec_annotations_and_hash() {
        let mut t = template();
        t.pod_spec_mut()
            .with_annotation("ovn.kubernetes.io/ingress_rate", "100", Overwrite::Error)
            .unwrap();
        let built = t.build().unwrap();
        let annotations = built.metadata.unwrap().annotations.unwrap();
        assert_eq!(annotations["ovn.kubernetes.io/ingress_rate"], "100");
        assert_eq!(annotations[TEMPLATE_HASH_ANNOTATION].len(), 16);
    }

    #[test]
    fn test_hash_tracks_content() {
        let a = template().build().unwrap();
        let b = template().build().unwrap();
        assert_eq!(a, b);

        let mut changed = template();
        changed
            .with_label("shard", "1", Overwrite::Error)
            .unwrap();
        let c = changed.build().unwrap();
        let hash = |t: &PodTemplateSpec| {
            t.metadata.as_ref().unwrap().annotations.as_ref().unwrap()[TEMPLATE_HASH_ANNOTATION]
                .clone()
        };
        assert_ne!(hash(&a), hash(&c));
    }
}
