//! Serializable shapes of the documents written to the migration file.

use std::collections::BTreeMap;

use appmig_core::{ConfigKind, Labels, RawObject};
use appmig_kubehub::APP_API_VERSION;
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Metadata {
    pub name: String,
    pub namespace: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: Labels,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: Labels,
}

/// Migrated ConfigMap or Secret.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigObjectManifest {
    pub api_version: &'static str,
    pub kind: &'static str,
    pub metadata: Metadata,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub binary_data: BTreeMap<String, String>,
}

impl ConfigObjectManifest {
    /// Copy payload, labels and annotations of `raw` under a new identity.
    pub fn from_raw(kind: ConfigKind, name: String, namespace: String, raw: RawObject) -> Self {
        Self {
            api_version: "v1",
            kind: kind.object_kind(),
            metadata: Metadata { name, namespace, labels: raw.labels, annotations: raw.annotations },
            type_: raw.secret_type,
            data: raw.data,
            binary_data: raw.binary_data,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NamedRef {
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_map: Option<NamedRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<NamedRef>,
}

impl ConfigSection {
    fn is_empty(&self) -> bool { self.config_map.is_none() && self.secret.is_none() }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ContextRef {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KubeConfigSection {
    pub in_cluster: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<NamedRef>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ExtraConfigEntry {
    pub kind: &'static str,
    pub name: String,
    pub namespace: String,
    pub priority: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TimeoutSection {
    pub timeout: String,
}

impl TimeoutSection {
    pub fn from_opt(t: &Option<String>) -> Option<Self> {
        t.as_ref().map(|timeout| Self { timeout: timeout.clone() })
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct NamespaceConfigSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<Labels>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Labels>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppSpec {
    pub catalog: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_namespace: Option<String>,
    #[serde(skip_serializing_if = "ConfigSection::is_empty")]
    pub config: ConfigSection,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra_configs: Vec<ExtraConfigEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install: Option<TimeoutSection>,
    pub kube_config: KubeConfigSection,
    pub name: String,
    pub namespace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace_config: Option<NamespaceConfigSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback: Option<TimeoutSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uninstall: Option<TimeoutSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upgrade: Option<TimeoutSection>,
    #[serde(skip_serializing_if = "ConfigSection::is_empty")]
    pub user_config: ConfigSection,
    pub version: String,
}

/// Migrated App custom resource.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppManifest {
    pub api_version: &'static str,
    pub kind: &'static str,
    pub metadata: Metadata,
    pub spec: AppSpec,
    /// The App consumes the destination's `<wc>-cluster-values`; rendered as `spec.config`.
    #[serde(skip)]
    pub uses_cluster_values_config: bool,
}

impl AppManifest {
    pub fn new(metadata: Metadata, spec: AppSpec, uses_cluster_values_config: bool) -> Self {
        Self { api_version: APP_API_VERSION, kind: "App", metadata, spec, uses_cluster_values_config }
    }
}
