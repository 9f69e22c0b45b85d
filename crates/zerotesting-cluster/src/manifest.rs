//! Deployable objects.
//!
//! A [`Manifest`] is the frozen, serializable form emitted by the builders in
//! `zerotesting-core`. It owns its whole object tree, so mutating the config it
//! was built from never reaches an already-built manifest.

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Pod, Service};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::ClusterError;
use crate::ClusterResult;

/// Kind of a deployable object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ManifestKind {
    StatefulSet,
    Pod,
    Service,
}

impl std::fmt::Display for ManifestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ManifestKind::StatefulSet => "StatefulSet",
            ManifestKind::Pod => "Pod",
            ManifestKind::Service => "Service",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ManifestKind {
    type Err = ClusterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "StatefulSet" => Ok(ManifestKind::StatefulSet),
            "Pod" => Ok(ManifestKind::Pod),
            "Service" => Ok(ManifestKind::Service),
            other => Err(ClusterError::Serialization(format!(
                "unsupported manifest kind: {other}"
            ))),
        }
    }
}

/// Address of an object in the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    pub kind: ManifestKind,
    pub namespace: String,
    pub name: String,
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// A deployable Kubernetes object.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Manifest {
    StatefulSet(StatefulSet),
    Pod(Pod),
    Service(Service),
}

impl Manifest {
    pub fn kind(&self) -> ManifestKind {
        match self {
            Manifest::StatefulSet(_) => ManifestKind::StatefulSet,
            Manifest::Pod(_) => ManifestKind::Pod,
            Manifest::Service(_) => ManifestKind::Service,
        }
    }

    fn metadata(&self) -> &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
        match self {
            Manifest::StatefulSet(o) => &o.metadata,
            Manifest::Pod(o) => &o.metadata,
            Manifest::Service(o) => &o.metadata,
        }
    }

    /// Object name. Builders refuse to emit unnamed manifests.
    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.metadata().namespace.as_deref()
    }

    /// Reference used for deletion and rollout waits.
    ///
    /// Falls back to `default_namespace` when the manifest carries none.
    pub fn object_ref(&self, default_namespace: &str) -> ObjectRef {
        ObjectRef {
            kind: self.kind(),
            namespace: self
                .namespace()
                .unwrap_or(default_namespace)
                .to_string(),
            name: self.name().to_string(),
        }
    }

    /// Serialize to a single YAML document.
    pub fn to_yaml(&self) -> ClusterResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Parse a single YAML document, dispatching on its `kind`.
    pub fn from_yaml(raw: &str) -> ClusterResult<Self> {
        let value: serde_yaml::Value = serde_yaml::from_str(raw)?;
        let kind = value
            .get("kind")
            .and_then(|k| k.as_str())
            .ok_or_else(|| ClusterError::Serialization("manifest has no kind".to_string()))?
            .parse::<ManifestKind>()?;
        Ok(match kind {
            ManifestKind::StatefulSet => Manifest::StatefulSet(serde_yaml::from_value(value)?),
            ManifestKind::Pod => Manifest::Pod(serde_yaml::from_value(value)?),
            ManifestKind::Service => Manifest::Service(serde_yaml::from_value(value)?),
        })
    }

    /// SHA-256 hex digest of the YAML form.
    pub fn digest(&self) -> ClusterResult<String> {
        let mut hasher = Sha256::new();
        hasher.update(self.to_yaml()?.as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }
}

/// Render several manifests as one multi-document YAML stream.
pub fn to_multi_document_yaml(manifests: &[Manifest]) -> ClusterResult<String> {
    let mut out = String::new();
    for manifest in manifests {
        out.push_str("---\n");
        out.push_str(&manifest.to_yaml()?);
    }
    Ok(out)
}
