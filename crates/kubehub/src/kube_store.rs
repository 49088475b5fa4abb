use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use appmig_core::{ApplicationDescriptor, ConfigKind, RawObject, StoreError};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::ByteString;
use kube::{
    api::{Api, ListParams},
    config::KubeConfigOptions,
    core::{ApiResource, DynamicObject, GroupVersionKind},
    discovery::{Discovery, Scope},
    Client, Config,
};
use tracing::{debug, info};

use crate::app::{descriptor_from_app, APP_GROUP, APP_KIND, APP_PLURAL, APP_VERSION};
use crate::ObjectStore;

/// Object store backed by a live cluster reached through a kubeconfig context.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    context: String,
}

impl KubeStore {
    /// Build a client for `context` from the local kubeconfig and verify the API server answers.
    pub async fn connect(context: &str) -> Result<Self> {
        let opts = KubeConfigOptions { context: Some(context.to_string()), ..Default::default() };
        let config = Config::from_kubeconfig(&opts)
            .await
            .with_context(|| format!("loading kubeconfig context {}", context))?;
        let client = Client::try_from(config).with_context(|| format!("building client for {}", context))?;
        let version = client
            .apiserver_version()
            .await
            .with_context(|| format!("reaching API server of {}", context))?;
        info!(context = %context, version = %version.git_version, "connected");
        Ok(Self { client, context: context.to_string() })
    }

    pub fn from_client(client: Client, context: impl Into<String>) -> Self {
        Self { client, context: context.into() }
    }

    pub fn client(&self) -> Client { self.client.clone() }

    pub fn context(&self) -> &str { &self.context }
}

fn map_get_err(kind: ConfigKind, namespace: &str, name: &str, e: kube::Error) -> StoreError {
    match e {
        kube::Error::Api(ae) if ae.code == 404 => StoreError::not_found(kind.object_kind(), namespace, name),
        other => StoreError::Access(anyhow::Error::new(other).context(format!("get {} {}/{}", kind, namespace, name))),
    }
}

/// Secret and binary values keep their base64 wire form.
fn encode_bytes(map: Option<BTreeMap<String, ByteString>>) -> Result<BTreeMap<String, String>, StoreError> {
    let Some(map) = map else { return Ok(BTreeMap::new()) };
    serde_json::to_value(map)
        .and_then(serde_json::from_value)
        .map_err(|e| StoreError::Decode { what: "binary data".into(), reason: e.to_string() })
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn list_apps(&self, namespace: &str) -> Result<Vec<ApplicationDescriptor>, StoreError> {
        let gvk = GroupVersionKind::gvk(APP_GROUP, APP_VERSION, APP_KIND);
        let ar = ApiResource::from_gvk_with_plural(&gvk, APP_PLURAL);
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, &ar);
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| StoreError::Access(anyhow::Error::new(e).context(format!("listing apps in {}", namespace))))?;
        debug!(context = %self.context, ns = %namespace, count = list.items.len(), "listed apps");
        list.items
            .iter()
            .map(|obj| {
                let raw = serde_json::to_value(obj)
                    .map_err(|e| StoreError::Decode { what: "App".into(), reason: e.to_string() })?;
                descriptor_from_app(&raw)
            })
            .collect()
    }

    async fn get_object(&self, kind: ConfigKind, namespace: &str, name: &str) -> Result<RawObject, StoreError> {
        match kind {
            ConfigKind::ConfigMap => {
                let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
                let cm = api.get(name).await.map_err(|e| map_get_err(kind, namespace, name, e))?;
                Ok(RawObject {
                    name: name.to_string(),
                    namespace: namespace.to_string(),
                    labels: cm.metadata.labels.unwrap_or_default(),
                    annotations: cm.metadata.annotations.unwrap_or_default(),
                    data: cm.data.unwrap_or_default(),
                    binary_data: encode_bytes(cm.binary_data)?,
                    secret_type: None,
                })
            }
            ConfigKind::Secret => {
                let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
                let secret = api.get(name).await.map_err(|e| map_get_err(kind, namespace, name, e))?;
                Ok(RawObject {
                    name: name.to_string(),
                    namespace: namespace.to_string(),
                    labels: secret.metadata.labels.unwrap_or_default(),
                    annotations: secret.metadata.annotations.unwrap_or_default(),
                    data: encode_bytes(secret.data)?,
                    binary_data: BTreeMap::new(),
                    secret_type: secret.type_,
                })
            }
        }
    }
}

/// `apps/v1` -> (`apps`, `v1`); `v1` -> (``, `v1`)
pub fn parse_api_version(api_version: &str) -> (&str, &str) {
    api_version.split_once('/').unwrap_or(("", api_version))
}

/// Resolve the served API resource for a GVK via discovery.
pub async fn find_api_resource(client: Client, gvk: &GroupVersionKind) -> Result<(ApiResource, bool)> {
    let discovery = Discovery::new(client).run().await?;
    for group in discovery.groups() {
        for (ar, caps) in group.recommended_resources() {
            if ar.group == gvk.group && ar.version == gvk.version && ar.kind == gvk.kind {
                let namespaced = matches!(caps.scope, Scope::Namespaced);
                return Ok((ar, namespaced));
            }
        }
    }
    Err(anyhow!("GVK not found: {}/{}/{}", gvk.group, gvk.version, gvk.kind))
}
