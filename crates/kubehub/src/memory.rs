use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use anyhow::anyhow;
use appmig_core::{ApplicationDescriptor, ConfigKind, RawObject, StoreError};
use async_trait::async_trait;

use crate::ObjectStore;

type Key = (ConfigKind, String, String);

#[derive(Default)]
struct Inner {
    apps: Vec<ApplicationDescriptor>,
    objects: BTreeMap<Key, RawObject>,
    denied: BTreeSet<Key>,
}

/// In-memory store. Thread-safe so tests can mutate it while a poll loop reads it.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub fn with_apps(apps: Vec<ApplicationDescriptor>) -> Self {
        let s = Self::new();
        s.lock().apps = apps;
        s
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert_app(&self, app: ApplicationDescriptor) {
        self.lock().apps.push(app);
    }

    pub fn insert_object(&self, kind: ConfigKind, obj: RawObject) {
        let key = (kind, obj.namespace.clone(), obj.name.clone());
        let mut inner = self.lock();
        inner.denied.remove(&key);
        inner.objects.insert(key, obj);
    }

    /// Every read of this object fails with an access error until the object is inserted again.
    pub fn deny(&self, kind: ConfigKind, namespace: &str, name: &str) {
        self.lock().denied.insert((kind, namespace.to_string(), name.to_string()));
    }

    pub fn object_count(&self) -> usize { self.lock().objects.len() }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_apps(&self, namespace: &str) -> Result<Vec<ApplicationDescriptor>, StoreError> {
        Ok(self.lock().apps.iter().filter(|a| a.namespace == namespace).cloned().collect())
    }

    async fn get_object(&self, kind: ConfigKind, namespace: &str, name: &str) -> Result<RawObject, StoreError> {
        let key = (kind, namespace.to_string(), name.to_string());
        let inner = self.lock();
        if inner.denied.contains(&key) {
            return Err(StoreError::Access(anyhow!("forbidden: {} {}/{}", kind, namespace, name)));
        }
        inner
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(kind.object_kind(), namespace, name))
    }
}
