//! App migration core types: descriptors, references, outputs and the naming rule.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

mod error;

pub use error::{MigrationError, StoreError};

pub type Labels = BTreeMap<String, String>;

/// Namespaces treated as shared/system; references living there are never relocated.
pub const SHARED_NAMESPACES: [&str; 2] = ["default", "giantswarm"];

/// Kind of an auxiliary configuration object an App may point at.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConfigKind {
    ConfigMap,
    Secret,
}

impl ConfigKind {
    /// Spelling used inside `spec.extraConfigs[].kind` of an App.
    pub fn ref_kind(&self) -> &'static str {
        match self {
            ConfigKind::ConfigMap => "configMap",
            ConfigKind::Secret => "secret",
        }
    }

    /// Kubernetes object kind.
    pub fn object_kind(&self) -> &'static str {
        match self {
            ConfigKind::ConfigMap => "ConfigMap",
            ConfigKind::Secret => "Secret",
        }
    }
}

impl FromStr for ConfigKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "configmap" => Ok(ConfigKind::ConfigMap),
            "secret" => Ok(ConfigKind::Secret),
            _ => Err(StoreError::UnsupportedKind(s.to_string())),
        }
    }
}

impl fmt::Display for ConfigKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.object_kind())
    }
}

/// Name/namespace pointer to a ConfigMap or Secret.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObjectRef {
    pub name: String,
    pub namespace: String,
}

impl ObjectRef {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self { name: name.into(), namespace: namespace.into() }
    }
}

/// Entry of `spec.extraConfigs`. `kind` stays raw so unsupported kinds surface at transform time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtraConfigRef {
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub priority: i64,
}

/// One App as read from the source management cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApplicationDescriptor {
    /// `metadata.name`
    pub name: String,
    /// `metadata.namespace` in the source cluster
    pub namespace: String,
    /// `spec.name`, the chart/app name in the catalog
    pub display_name: String,
    pub catalog_name: String,
    pub catalog_namespace: Option<String>,
    pub version: String,
    pub target_namespace: String,
    pub in_cluster: bool,
    pub config_map_ref: Option<ObjectRef>,
    pub config_secret_ref: Option<ObjectRef>,
    /// Order is significant and preserved in the output.
    pub extra_config_refs: Vec<ExtraConfigRef>,
    pub user_config_map_ref: Option<ObjectRef>,
    pub user_secret_ref: Option<ObjectRef>,
    pub install_timeout: Option<String>,
    pub rollback_timeout: Option<String>,
    pub uninstall_timeout: Option<String>,
    pub upgrade_timeout: Option<String>,
    pub namespace_config_labels: Option<Labels>,
    pub namespace_config_annotations: Option<Labels>,
    pub labels: Labels,
    pub annotations: Labels,
}

/// ConfigMap or Secret as fetched from a store. Secret values stay base64 encoded.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawObject {
    pub name: String,
    pub namespace: String,
    pub labels: Labels,
    pub annotations: Labels,
    pub data: BTreeMap<String, String>,
    /// ConfigMap `binaryData`; always empty for secrets.
    pub binary_data: BTreeMap<String, String>,
    /// Secret `type`; `None` for config maps.
    pub secret_type: Option<String>,
}

/// Kind of a document produced by the transformer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OutputKind {
    ConfigMap,
    Secret,
    App,
}

impl From<ConfigKind> for OutputKind {
    fn from(k: ConfigKind) -> Self {
        match k {
            ConfigKind::ConfigMap => OutputKind::ConfigMap,
            ConfigKind::Secret => OutputKind::Secret,
        }
    }
}

/// One serialized output document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformedObject {
    pub kind: OutputKind,
    pub name: String,
    pub namespace: String,
    pub payload: Vec<u8>,
}

/// Prefix `name` with `<workload_cluster>-`, dropping an existing cluster prefix first.
///
/// Idempotent: applying it to its own output returns the same name.
pub fn prefixed_name(workload_cluster: &str, name: &str) -> String {
    let rest = name.strip_prefix(workload_cluster).unwrap_or(name);
    let rest = rest.strip_prefix('-').unwrap_or(rest);
    format!("{}-{}", workload_cluster, rest)
}

/// `org-acme` -> `acme`
pub fn organization_from_namespace(namespace: &str) -> &str {
    namespace.strip_prefix("org-").unwrap_or(namespace)
}

/// Name of the destination-generated values objects (ConfigMap and Secret).
pub fn cluster_values_name(workload_cluster: &str) -> String {
    format!("{}-cluster-values", workload_cluster)
}

/// Name of the workload cluster kubeconfig secret on the destination.
pub fn kubeconfig_secret_name(workload_cluster: &str) -> String {
    format!("{}-kubeconfig", workload_cluster)
}

pub fn is_shared_namespace(namespace: &str) -> bool {
    SHARED_NAMESPACES.contains(&namespace)
}

/// Accepts `org-<organization>` with a non-empty organization.
pub fn validate_organization_namespace(namespace: &str) -> Result<(), MigrationError> {
    match namespace.strip_prefix("org-") {
        Some(org) if !org.is_empty() => Ok(()),
        _ => Err(MigrationError::Validation(format!(
            "organization namespace {:?} must look like org-<organization>",
            namespace
        ))),
    }
}

/// Concatenate documents in order, each followed by a `---` line.
pub fn render_stream(objects: &[TransformedObject]) -> Vec<u8> {
    let mut out = Vec::with_capacity(objects.iter().map(|o| o.payload.len() + 5).sum());
    for o in objects {
        out.extend_from_slice(&o.payload);
        if !o.payload.ends_with(b"\n") {
            out.push(b'\n');
        }
        out.extend_from_slice(b"---\n");
    }
    out
}

/// True when the payload holds nothing but whitespace, comments and document separators.
pub fn is_empty_payload(payload: &[u8]) -> bool {
    String::from_utf8_lossy(payload).lines().all(|l| {
        let t = l.trim();
        t.is_empty() || t == "---" || t.starts_with('#')
    })
}

pub mod prelude {
    pub use super::{
        ApplicationDescriptor, ConfigKind, ExtraConfigRef, MigrationError, ObjectRef, OutputKind, RawObject,
        StoreError, TransformedObject,
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn prefixes_plain_names() {
        assert_eq!(prefixed_name("atlastest", "loki"), "atlastest-loki");
    }

    #[test]
    fn keeps_already_prefixed_names() {
        assert_eq!(prefixed_name("cabbage01", "cabbage01-service-mesh-bundle"), "cabbage01-service-mesh-bundle");
    }

    #[test]
    fn glued_prefix_gets_separator() {
        assert_eq!(prefixed_name("wc1", "wc1foo"), "wc1-foo");
    }

    #[test]
    fn config_kind_parses_case_insensitively() {
        assert_eq!("ConfigMap".parse::<ConfigKind>().unwrap(), ConfigKind::ConfigMap);
        assert_eq!("SECRET".parse::<ConfigKind>().unwrap(), ConfigKind::Secret);
        let err = "Deployment".parse::<ConfigKind>().unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedKind(ref k) if k == "Deployment"));
    }

    #[test]
    fn organization_strips_only_leading_prefix() {
        assert_eq!(organization_from_namespace("org-capa-migration-testing"), "capa-migration-testing");
        assert_eq!(organization_from_namespace("acme"), "acme");
        assert_eq!(organization_from_namespace("my-org-x"), "my-org-x");
    }

    #[test]
    fn organization_namespace_needs_org_prefix() {
        assert!(validate_organization_namespace("org-acme").is_ok());
        for bad in ["acme", "org-", "", "Org-acme"] {
            assert!(matches!(validate_organization_namespace(bad), Err(MigrationError::Validation(_))), "bad={:?}", bad);
        }
    }

    #[test]
    fn stream_separates_documents_in_order() {
        let objs = vec![
            TransformedObject { kind: OutputKind::ConfigMap, name: "a".into(), namespace: "n".into(), payload: b"kind: ConfigMap\n".to_vec() },
            TransformedObject { kind: OutputKind::App, name: "b".into(), namespace: "n".into(), payload: b"kind: App".to_vec() },
        ];
        let out = String::from_utf8(render_stream(&objs)).unwrap();
        assert_eq!(out, "kind: ConfigMap\n---\nkind: App\n---\n");
        assert!(!is_empty_payload(out.as_bytes()));
    }

    #[test]
    fn separators_only_payload_is_empty() {
        assert!(is_empty_payload(b""));
        assert!(is_empty_payload(b"\n  \n---\n---\n"));
        assert!(is_empty_payload(&render_stream(&[])));
        assert!(!is_empty_payload(b"---\na: 1\n"));
        assert!(is_empty_payload(b"# generated for wc1\n---\n  # nothing eligible\n"));
        assert!(!is_empty_payload(b"# header\nkind: App\n---\n"));
    }

    proptest! {
        #[test]
        fn prefixing_is_idempotent(wc in "[a-z][a-z0-9]{0,8}", name in "[a-z0-9-]{0,24}") {
            let once = prefixed_name(&wc, &name);
            let twice = prefixed_name(&wc, &once);
            prop_assert_eq!(&once, &twice);
            let expected_prefix = format!("{}-", wc);
            prop_assert!(once.starts_with(&expected_prefix));
        }
    }
}
