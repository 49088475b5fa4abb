//! Decoding of `application.giantswarm.io/v1alpha1` App objects.

use std::collections::BTreeMap;

use appmig_core::{ApplicationDescriptor, ExtraConfigRef, Labels, ObjectRef, StoreError};
use serde::Deserialize;
use serde_json::Value as Json;

pub const APP_GROUP: &str = "application.giantswarm.io";
pub const APP_VERSION: &str = "v1alpha1";
pub const APP_API_VERSION: &str = "application.giantswarm.io/v1alpha1";
pub const APP_KIND: &str = "App";
pub const APP_PLURAL: &str = "apps";

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct AppCr {
    metadata: Meta,
    spec: Spec,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Meta {
    name: String,
    namespace: String,
    labels: Option<Labels>,
    annotations: Option<Labels>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Spec {
    name: String,
    catalog: String,
    catalog_namespace: String,
    version: String,
    namespace: String,
    kube_config: KubeConfig,
    config: ConfigPair,
    extra_configs: Option<Vec<ExtraConfig>>,
    user_config: ConfigPair,
    install: Timeout,
    rollback: Timeout,
    uninstall: Timeout,
    upgrade: Timeout,
    namespace_config: NamespaceConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct KubeConfig {
    in_cluster: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ConfigPair {
    config_map: NamedRef,
    secret: NamedRef,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NamedRef {
    name: String,
    namespace: String,
}

impl NamedRef {
    fn into_ref(self) -> Option<ObjectRef> {
        if self.name.is_empty() { None } else { Some(ObjectRef { name: self.name, namespace: self.namespace }) }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ExtraConfig {
    kind: String,
    name: String,
    namespace: String,
    priority: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Timeout {
    timeout: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NamespaceConfig {
    labels: Option<BTreeMap<String, String>>,
    annotations: Option<BTreeMap<String, String>>,
}

/// Decode a raw App object. `metadata.name` and `spec.name` must be present.
pub fn descriptor_from_app(raw: &Json) -> Result<ApplicationDescriptor, StoreError> {
    let cr: AppCr = serde_json::from_value(raw.clone())
        .map_err(|e| StoreError::Decode { what: "App".into(), reason: e.to_string() })?;
    if cr.metadata.name.is_empty() {
        return Err(StoreError::Decode { what: "App".into(), reason: "missing metadata.name".into() });
    }
    if cr.spec.name.is_empty() {
        return Err(StoreError::Decode {
            what: format!("App {}/{}", cr.metadata.namespace, cr.metadata.name),
            reason: "missing spec.name".into(),
        });
    }
    let Spec {
        name: display_name,
        catalog,
        catalog_namespace,
        version,
        namespace: target_namespace,
        kube_config,
        config,
        extra_configs,
        user_config,
        install,
        rollback,
        uninstall,
        upgrade,
        namespace_config,
    } = cr.spec;
    let extra_config_refs = extra_configs
        .unwrap_or_default()
        .into_iter()
        .map(|e| ExtraConfigRef { kind: e.kind, name: e.name, namespace: e.namespace, priority: e.priority })
        .collect();
    Ok(ApplicationDescriptor {
        name: cr.metadata.name,
        namespace: cr.metadata.namespace,
        display_name,
        catalog_name: catalog,
        catalog_namespace: if catalog_namespace.is_empty() { None } else { Some(catalog_namespace) },
        version,
        target_namespace,
        in_cluster: kube_config.in_cluster,
        config_map_ref: config.config_map.into_ref(),
        config_secret_ref: config.secret.into_ref(),
        extra_config_refs,
        user_config_map_ref: user_config.config_map.into_ref(),
        user_secret_ref: user_config.secret.into_ref(),
        install_timeout: install.timeout,
        rollback_timeout: rollback.timeout,
        uninstall_timeout: uninstall.timeout,
        upgrade_timeout: upgrade.timeout,
        namespace_config_labels: namespace_config.labels,
        namespace_config_annotations: namespace_config.annotations,
        labels: cr.metadata.labels.unwrap_or_default(),
        annotations: cr.metadata.annotations.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_full_app() {
        let raw = serde_json::json!({
            "apiVersion": APP_API_VERSION,
            "kind": "App",
            "metadata": {
                "name": "wc1-loki",
                "namespace": "wc1",
                "labels": { "app.kubernetes.io/name": "loki" },
                "annotations": { "note": "x" },
                "uid": "ignored"
            },
            "spec": {
                "name": "loki",
                "catalog": "giantswarm",
                "catalogNamespace": "giantswarm",
                "version": "0.1.0",
                "namespace": "loki",
                "kubeConfig": { "inCluster": false, "context": { "name": "wc1-kubeconfig" } },
                "config": { "configMap": { "name": "wc1-cluster-values", "namespace": "wc1" } },
                "extraConfigs": [
                    { "kind": "secret", "name": "b", "namespace": "wc1", "priority": 64 },
                    { "kind": "configMap", "name": "a", "namespace": "wc1", "priority": 25 }
                ],
                "userConfig": { "secret": { "name": "loki-user", "namespace": "wc1" } },
                "install": { "timeout": "10m0s" },
                "upgrade": {},
                "namespaceConfig": { "labels": { "team": "atlas" } }
            },
            "status": { "release": { "status": "deployed" } }
        });
        let d = descriptor_from_app(&raw).unwrap();
        assert_eq!(d.name, "wc1-loki");
        assert_eq!(d.display_name, "loki");
        assert_eq!(d.catalog_namespace.as_deref(), Some("giantswarm"));
        assert!(!d.in_cluster);
        assert_eq!(d.config_map_ref, Some(ObjectRef::new("wc1-cluster-values", "wc1")));
        assert_eq!(d.config_secret_ref, None);
        assert_eq!(d.extra_config_refs.len(), 2);
        assert_eq!(d.extra_config_refs[0].name, "b");
        assert_eq!(d.extra_config_refs[0].priority, 64);
        assert_eq!(d.extra_config_refs[1].kind, "configMap");
        assert_eq!(d.user_config_map_ref, None);
        assert_eq!(d.user_secret_ref, Some(ObjectRef::new("loki-user", "wc1")));
        assert_eq!(d.install_timeout.as_deref(), Some("10m0s"));
        assert_eq!(d.upgrade_timeout, None);
        assert_eq!(d.namespace_config_labels.as_ref().and_then(|l| l.get("team")).map(String::as_str), Some("atlas"));
        assert_eq!(d.namespace_config_annotations, None);
        assert_eq!(d.labels.get("app.kubernetes.io/name").map(String::as_str), Some("loki"));
    }

    #[test]
    fn missing_names_are_decode_errors() {
        let no_meta = serde_json::json!({ "spec": { "name": "loki" } });
        let e1 = descriptor_from_app(&no_meta).unwrap_err().to_string();
        assert!(e1.contains("missing metadata.name"), "e1={}", e1);

        let no_spec_name = serde_json::json!({ "metadata": { "name": "x", "namespace": "wc1" }, "spec": {} });
        let e2 = descriptor_from_app(&no_spec_name).unwrap_err().to_string();
        assert!(e2.contains("missing spec.name"), "e2={}", e2);
        assert!(e2.contains("wc1/x"), "e2={}", e2);
    }
}
