//! Server-side apply backend: one forced SSA patch per document.

use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use appmig_kubehub::{find_api_resource, parse_api_version};
use async_trait::async_trait;
use kube::{
    api::{Api, Patch, PatchParams},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    Client,
};
use serde::Deserialize;
use serde_json::Value as Json;
use tracing::debug;

use crate::ManifestApplier;

pub const FIELD_MANAGER: &str = "app-migration";

fn max_yaml_bytes() -> usize {
    std::env::var("APPMIG_MAX_YAML_BYTES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(4_000_000)
}

/// Documents of a `---` separated stream; empty documents are dropped.
pub fn split_documents(payload: &[u8]) -> Result<Vec<Json>> {
    if payload.len() > max_yaml_bytes() {
        return Err(anyhow!("migration payload too large (>{} bytes)", max_yaml_bytes()));
    }
    let mut docs = Vec::new();
    for (i, de) in serde_yaml::Deserializer::from_slice(payload).enumerate() {
        let val = serde_yaml::Value::deserialize(de).with_context(|| format!("parsing document {}", i + 1))?;
        if val.is_null() {
            continue;
        }
        docs.push(serde_json::to_value(val).with_context(|| format!("converting document {} to JSON", i + 1))?);
    }
    Ok(docs)
}

struct Target {
    gvk: GroupVersionKind,
    name: String,
    namespace: Option<String>,
}

fn target_of(json: &Json) -> Result<Target> {
    let api_version = json.get("apiVersion").and_then(|v| v.as_str()).ok_or_else(|| anyhow!("document missing apiVersion"))?;
    let kind = json.get("kind").and_then(|v| v.as_str()).ok_or_else(|| anyhow!("document missing kind"))?;
    let meta = json.get("metadata");
    let name = meta
        .and_then(|m| m.get("name"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("document missing metadata.name"))?
        .to_string();
    let namespace = meta.and_then(|m| m.get("namespace")).and_then(|v| v.as_str()).map(|s| s.to_string());
    let (group, version) = parse_api_version(api_version);
    Ok(Target { gvk: GroupVersionKind::gvk(group, version, kind), name, namespace })
}

/// Applies through the API server directly instead of shelling out.
#[derive(Clone)]
pub struct ServerSideApplier {
    client: Client,
}

impl ServerSideApplier {
    pub fn new(client: Client) -> Self { Self { client } }
}

#[async_trait]
impl ManifestApplier for ServerSideApplier {
    async fn apply(&self, payload: &[u8]) -> Result<()> {
        let docs = split_documents(payload)?;
        let targets = docs.iter().map(target_of).collect::<Result<Vec<_>>>()?;
        let mut resources: BTreeMap<(String, String, String), (ApiResource, bool)> = BTreeMap::new();
        let pp = PatchParams::apply(FIELD_MANAGER).force();
        for (doc, t) in docs.iter().zip(&targets) {
            let key = (t.gvk.group.clone(), t.gvk.version.clone(), t.gvk.kind.clone());
            if !resources.contains_key(&key) {
                let found = find_api_resource(self.client.clone(), &t.gvk).await?;
                resources.insert(key.clone(), found);
            }
            let (ar, namespaced) = resources.get(&key).ok_or_else(|| anyhow!("API resource cache miss"))?;
            let api: Api<DynamicObject> = if *namespaced {
                match t.namespace.as_deref() {
                    Some(ns) => Api::namespaced_with(self.client.clone(), ns, ar),
                    None => return Err(anyhow!("{} {} needs a namespace", t.gvk.kind, t.name)),
                }
            } else {
                Api::all_with(self.client.clone(), ar)
            };
            api.patch(&t.name, &pp, &Patch::Apply(doc))
                .await
                .with_context(|| format!("server-side apply of {} {}", t.gvk.kind, t.name))?;
            debug!(kind = %t.gvk.kind, name = %t.name, ns = ?t.namespace, "applied");
        }
        Ok(())
    }
}
