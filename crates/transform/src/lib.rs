//! App migration transformer: renames and relocates Apps and the config objects they reference.
//!
//! Per App, referenced objects come first (extra configs in their listed order, then the
//! user ConfigMap, then the user Secret) and the App itself last. Groups follow App order.

#![forbid(unsafe_code)]

use appmig_core::{
    cluster_values_name, is_shared_namespace, kubeconfig_secret_name, organization_from_namespace, prefixed_name,
    validate_organization_namespace, ApplicationDescriptor, ConfigKind, MigrationError, ObjectRef, OutputKind, TransformedObject,
};
use appmig_kubehub::{resolve, ObjectStore};
use metrics::counter;
use serde::Serialize;
use tracing::{debug, info, warn};

pub mod manifest;

use manifest::{
    AppManifest, AppSpec, ConfigObjectManifest, ConfigSection, ContextRef, ExtraConfigEntry, KubeConfigSection,
    Metadata, NamedRef, NamespaceConfigSection, TimeoutSection,
};

const CLUSTER_LABEL: &str = "giantswarm.io/cluster";
const APP_OPERATOR_VERSION_LABEL: &str = "app-operator.giantswarm.io/version";

/// Immutable inputs of one transformation run.
pub struct MigrationContext<'a> {
    workload_cluster: String,
    organization_namespace: String,
    source: &'a dyn ObjectStore,
}

impl<'a> MigrationContext<'a> {
    pub fn new(
        workload_cluster: impl Into<String>,
        organization_namespace: impl Into<String>,
        source: &'a dyn ObjectStore,
    ) -> Result<Self, MigrationError> {
        let workload_cluster = workload_cluster.into();
        let organization_namespace = organization_namespace.into();
        if workload_cluster.is_empty() {
            return Err(MigrationError::Validation("workload cluster name must not be empty".into()));
        }
        validate_organization_namespace(&organization_namespace)?;
        Ok(Self { workload_cluster, organization_namespace, source })
    }

    pub fn workload_cluster(&self) -> &str { &self.workload_cluster }

    pub fn organization_namespace(&self) -> &str { &self.organization_namespace }

    pub fn organization(&self) -> &str { organization_from_namespace(&self.organization_namespace) }

    fn rename(&self, name: &str) -> String { prefixed_name(&self.workload_cluster, name) }

    fn relocate(&self, source_namespace: &str) -> String {
        if is_shared_namespace(source_namespace) {
            source_namespace.to_string()
        } else {
            self.organization_namespace.clone()
        }
    }

    fn is_cluster_values(&self, name: &str) -> bool { name == cluster_values_name(&self.workload_cluster) }
}

/// Transform every App. Any failure discards the whole output.
pub async fn transform(
    ctx: &MigrationContext<'_>,
    apps: &[ApplicationDescriptor],
) -> Result<Vec<TransformedObject>, MigrationError> {
    let mut out = Vec::new();
    for app in apps {
        out.extend(migrate_app(ctx, app).await?);
    }
    counter!("transform_objects", out.len() as u64);
    info!(apps = apps.len(), objects = out.len(), wc = %ctx.workload_cluster, "transformed apps");
    Ok(out)
}

/// Referenced objects of one App followed by the App itself.
pub async fn migrate_app(
    ctx: &MigrationContext<'_>,
    app: &ApplicationDescriptor,
) -> Result<Vec<TransformedObject>, MigrationError> {
    let mut objects = Vec::new();
    let mut uses_cluster_values = false;

    for primary in [&app.config_map_ref, &app.config_secret_ref].into_iter().flatten() {
        if ctx.is_cluster_values(&primary.name) {
            uses_cluster_values = true;
        } else {
            warn!(app = %app.name, config = %primary.name, "primary config is not migrated");
        }
    }

    let mut extra_configs = Vec::with_capacity(app.extra_config_refs.len());
    for extra in &app.extra_config_refs {
        let kind: ConfigKind = extra.kind.parse().map_err(|e| MigrationError::transform(&app.name, e))?;
        if ctx.is_cluster_values(&extra.name) {
            debug!(app = %app.name, %kind, "skipping cluster values extra config");
            uses_cluster_values = true;
            continue;
        }
        let obj = migrate_object(ctx, app, &extra.kind, &extra.name, &extra.namespace).await?;
        extra_configs.push(ExtraConfigEntry {
            kind: kind.ref_kind(),
            name: obj.name.clone(),
            namespace: obj.namespace.clone(),
            priority: extra.priority,
        });
        objects.push(obj);
    }

    let mut user_config = ConfigSection::default();
    if let Some(r) = &app.user_config_map_ref {
        if let Some(obj) = migrate_user_config(ctx, app, ConfigKind::ConfigMap, r, &mut uses_cluster_values).await? {
            user_config.config_map = Some(NamedRef { name: obj.name.clone(), namespace: obj.namespace.clone() });
            objects.push(obj);
        }
    }
    if let Some(r) = &app.user_secret_ref {
        if let Some(obj) = migrate_user_config(ctx, app, ConfigKind::Secret, r, &mut uses_cluster_values).await? {
            user_config.secret = Some(NamedRef { name: obj.name.clone(), namespace: obj.namespace.clone() });
            objects.push(obj);
        }
    }

    let manifest = app_manifest(ctx, app, extra_configs, user_config, uses_cluster_values);
    let payload = to_yaml(&app.name, &manifest)?;
    objects.push(TransformedObject {
        kind: OutputKind::App,
        name: manifest.metadata.name.clone(),
        namespace: manifest.metadata.namespace.clone(),
        payload,
    });
    debug!(app = %app.name, new_name = %manifest.metadata.name, objects = objects.len(), "migrated app");
    Ok(objects)
}

async fn migrate_user_config(
    ctx: &MigrationContext<'_>,
    app: &ApplicationDescriptor,
    kind: ConfigKind,
    r: &ObjectRef,
    uses_cluster_values: &mut bool,
) -> Result<Option<TransformedObject>, MigrationError> {
    if ctx.is_cluster_values(&r.name) {
        debug!(app = %app.name, %kind, "skipping cluster values user config");
        *uses_cluster_values = true;
        return Ok(None);
    }
    migrate_object(ctx, app, kind.ref_kind(), &r.name, &r.namespace).await.map(Some)
}

async fn migrate_object(
    ctx: &MigrationContext<'_>,
    app: &ApplicationDescriptor,
    kind: &str,
    name: &str,
    namespace: &str,
) -> Result<TransformedObject, MigrationError> {
    let source_ns = if namespace.is_empty() { app.namespace.as_str() } else { namespace };
    let config_kind: ConfigKind = kind.parse().map_err(|e| MigrationError::transform(&app.name, e))?;
    let raw = resolve(ctx.source, kind, name, source_ns)
        .await
        .map_err(|e| MigrationError::transform(&app.name, e))?;
    let new_name = ctx.rename(name);
    let new_ns = ctx.relocate(source_ns);
    debug!(app = %app.name, kind = %config_kind, from = %format!("{}/{}", source_ns, name), to = %format!("{}/{}", new_ns, new_name), "migrating config object");
    let manifest = ConfigObjectManifest::from_raw(config_kind, new_name.clone(), new_ns.clone(), raw);
    Ok(TransformedObject { kind: config_kind.into(), name: new_name, namespace: new_ns, payload: to_yaml(&app.name, &manifest)? })
}

fn app_manifest(
    ctx: &MigrationContext<'_>,
    app: &ApplicationDescriptor,
    extra_configs: Vec<ExtraConfigEntry>,
    user_config: ConfigSection,
    uses_cluster_values: bool,
) -> AppManifest {
    let org_ns = ctx.organization_namespace.clone();
    let wc = ctx.workload_cluster.as_str();

    let mut labels = app.labels.clone();
    labels.entry(CLUSTER_LABEL.to_string()).or_insert_with(|| wc.to_string());
    if app.in_cluster {
        labels.entry(APP_OPERATOR_VERSION_LABEL.to_string()).or_insert_with(|| "0.0.0".to_string());
    }

    let kube_config = if app.in_cluster {
        KubeConfigSection { in_cluster: true, context: None, secret: None }
    } else {
        let secret = kubeconfig_secret_name(wc);
        KubeConfigSection {
            in_cluster: false,
            context: Some(ContextRef { name: secret.clone() }),
            secret: Some(NamedRef { name: secret, namespace: org_ns.clone() }),
        }
    };

    let config = if uses_cluster_values {
        ConfigSection {
            config_map: Some(NamedRef { name: cluster_values_name(wc), namespace: org_ns.clone() }),
            secret: None,
        }
    } else {
        ConfigSection::default()
    };

    let namespace_config = match (&app.namespace_config_labels, &app.namespace_config_annotations) {
        (None, None) => None,
        (labels, annotations) => Some(NamespaceConfigSection { labels: labels.clone(), annotations: annotations.clone() }),
    };

    let spec = AppSpec {
        catalog: app.catalog_name.clone(),
        catalog_namespace: app.catalog_namespace.clone(),
        config,
        extra_configs,
        install: TimeoutSection::from_opt(&app.install_timeout),
        kube_config,
        name: app.display_name.clone(),
        namespace: if app.in_cluster { org_ns.clone() } else { app.target_namespace.clone() },
        namespace_config,
        rollback: TimeoutSection::from_opt(&app.rollback_timeout),
        uninstall: TimeoutSection::from_opt(&app.uninstall_timeout),
        upgrade: TimeoutSection::from_opt(&app.upgrade_timeout),
        user_config,
        version: app.version.clone(),
    };
    let metadata = Metadata { name: ctx.rename(&app.name), namespace: org_ns, labels, annotations: app.annotations.clone() };
    AppManifest::new(metadata, spec, uses_cluster_values)
}

fn to_yaml<T: Serialize>(app: &str, value: &T) -> Result<Vec<u8>, MigrationError> {
    serde_yaml::to_string(value).map(String::into_bytes).map_err(|e| MigrationError::transform(app, e))
}
