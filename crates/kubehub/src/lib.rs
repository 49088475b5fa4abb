//! App migration kubehub: object store seam, kube client wiring and App CR decoding.

#![forbid(unsafe_code)]

use appmig_core::{ApplicationDescriptor, ConfigKind, RawObject, StoreError};
use async_trait::async_trait;
use tracing::debug;

mod app;
mod kube_store;
mod memory;

pub use app::{descriptor_from_app, APP_API_VERSION, APP_GROUP, APP_KIND, APP_PLURAL, APP_VERSION};
pub use kube_store::{find_api_resource, parse_api_version, KubeStore};
pub use memory::MemoryStore;

/// Read access to one management cluster.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List App CRs in `namespace`, in the order the store returns them.
    async fn list_apps(&self, namespace: &str) -> Result<Vec<ApplicationDescriptor>, StoreError>;

    /// Fetch a ConfigMap or Secret.
    async fn get_object(&self, kind: ConfigKind, namespace: &str, name: &str) -> Result<RawObject, StoreError>;

    /// `NotFound` becomes `false`; every other failure propagates.
    async fn exists(&self, kind: ConfigKind, namespace: &str, name: &str) -> Result<bool, StoreError> {
        match self.get_object(kind, namespace, name).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Fetch an auxiliary config object by raw kind string (`configmap`/`secret`, any case).
pub async fn resolve<S>(store: &S, kind: &str, name: &str, namespace: &str) -> Result<RawObject, StoreError>
where
    S: ObjectStore + ?Sized,
{
    let kind: ConfigKind = kind.parse()?;
    debug!(%kind, ns = %namespace, name = %name, "resolving reference");
    store.get_object(kind, namespace, name).await
}
