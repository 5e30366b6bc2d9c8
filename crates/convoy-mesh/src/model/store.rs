//! Resource store abstraction
//!
//! `ResourceStore` is the untyped persistence seam; `ResourceManager` adds
//! typed access and wraps failures with the kind and scope of the request.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use convoy_common::{ConvoyError, Result};

use super::resources::{CoreResource, ResourceKey, ResourceKind, StoredResource};

/// Resource persistence operations
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// List resources of a kind, optionally restricted to a mesh
    async fn list(
        &self,
        kind: ResourceKind,
        mesh: Option<&str>,
    ) -> anyhow::Result<Vec<StoredResource>>;

    /// Get a resource by key
    async fn get(
        &self,
        kind: ResourceKind,
        key: &ResourceKey,
    ) -> anyhow::Result<Option<StoredResource>>;

    /// Update an existing resource; fails if the stored version moved on
    async fn update(&self, resource: StoredResource) -> anyhow::Result<()>;

    /// Whether the store knows about a resource kind
    fn is_registered(&self, _kind: ResourceKind) -> bool {
        true
    }
}

/// Typed access to a `ResourceStore`
#[derive(Clone)]
pub struct ResourceManager {
    store: Arc<dyn ResourceStore>,
}

fn mesh_scope(mesh: Option<&str>) -> String {
    mesh.map(|m| format!(" in mesh {:?}", m)).unwrap_or_default()
}

impl ResourceManager {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    /// List every resource of a kind across meshes
    pub async fn list<T: CoreResource>(&self) -> Result<Vec<T>> {
        self.list_scoped(None).await
    }

    /// List resources of a kind inside one mesh
    pub async fn list_in_mesh<T: CoreResource>(&self, mesh: &str) -> Result<Vec<T>> {
        self.list_scoped(Some(mesh)).await
    }

    async fn list_scoped<T: CoreResource>(&self, mesh: Option<&str>) -> Result<Vec<T>> {
        let stored = self
            .store
            .list(T::KIND, mesh)
            .await
            .map_err(|source| ConvoyError::Store {
                op: "list",
                kind: T::KIND.to_string(),
                scope: mesh_scope(mesh),
                source,
            })?;
        Ok(stored.into_iter().filter_map(T::from_stored).collect())
    }

    /// Get a resource, failing with `NotFound` when it does not exist
    pub async fn get<T: CoreResource>(&self, key: &ResourceKey) -> Result<T> {
        let stored = self
            .store
            .get(T::KIND, key)
            .await
            .map_err(|source| ConvoyError::Store {
                op: "get",
                kind: T::KIND.to_string(),
                scope: format!(" {}", key),
                source,
            })?;
        stored
            .and_then(T::from_stored)
            .ok_or_else(|| ConvoyError::NotFound {
                kind: T::KIND.to_string(),
                key: key.to_string(),
            })
    }

    pub async fn update<T: CoreResource>(&self, resource: T) -> Result<()> {
        let key = resource.meta().key();
        self.store
            .update(resource.into_stored())
            .await
            .map_err(|source| ConvoyError::Store {
                op: "update",
                kind: T::KIND.to_string(),
                scope: format!(" {}", key),
                source,
            })
    }

    pub fn is_registered(&self, kind: ResourceKind) -> bool {
        self.store.is_registered(kind)
    }
}

/// In-memory store, seeded from a YAML document of resources
#[derive(Default)]
pub struct InMemoryStore {
    resources: RwLock<BTreeMap<(ResourceKind, ResourceKey), StoredResource>>,
    unregistered: HashSet<ResourceKind>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a YAML list of resources
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let store = Self::new();
        store.replace_all(serde_yaml::from_str(yaml)?);
        Ok(store)
    }

    /// Treat a kind as unknown to this store
    pub fn without_kind(mut self, kind: ResourceKind) -> Self {
        self.unregistered.insert(kind);
        self
    }

    /// Insert or overwrite a resource
    pub fn insert(&self, mut resource: StoredResource) {
        let meta = resource.meta_mut();
        if meta.version.is_empty() {
            meta.version = "1".to_string();
        }
        let key = (resource.kind(), resource.meta().key());
        self.resources.write().insert(key, resource);
    }

    /// Replace the whole content of the store
    pub fn replace_all(&self, resources: Vec<StoredResource>) {
        self.resources.write().clear();
        for resource in resources {
            self.insert(resource);
        }
    }

    pub fn len(&self) -> usize {
        self.resources.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.read().is_empty()
    }
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn list(
        &self,
        kind: ResourceKind,
        mesh: Option<&str>,
    ) -> anyhow::Result<Vec<StoredResource>> {
        if !self.is_registered(kind) {
            anyhow::bail!("resource kind {} is not registered", kind);
        }
        Ok(self
            .resources
            .read()
            .iter()
            .filter(|((k, key), _)| *k == kind && mesh.is_none_or(|m| key.mesh == m))
            .map(|(_, resource)| resource.clone())
            .collect())
    }

    async fn get(
        &self,
        kind: ResourceKind,
        key: &ResourceKey,
    ) -> anyhow::Result<Option<StoredResource>> {
        if !self.is_registered(kind) {
            anyhow::bail!("resource kind {} is not registered", kind);
        }
        Ok(self.resources.read().get(&(kind, key.clone())).cloned())
    }

    async fn update(&self, mut resource: StoredResource) -> anyhow::Result<()> {
        let id = (resource.kind(), resource.meta().key());
        let mut resources = self.resources.write();
        let current = resources
            .get(&id)
            .ok_or_else(|| anyhow::anyhow!("{} {} does not exist", id.0, id.1))?;

        let current_version = current.meta().version.clone();
        if resource.meta().version != current_version {
            anyhow::bail!(
                "version conflict on {} {}: have {}, got {}",
                id.0,
                id.1,
                current_version,
                resource.meta().version
            );
        }
        let next = current_version.parse::<u64>().unwrap_or(0) + 1;
        resource.meta_mut().version = next.to_string();

        debug!(kind = %id.0, key = %id.1, version = next, "Updated resource");
        resources.insert(id, resource);
        Ok(())
    }

    fn is_registered(&self, kind: ResourceKind) -> bool {
        !self.unregistered.contains(&kind)
    }
}
