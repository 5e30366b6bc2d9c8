//! Resource snapshot management
//!
//! A `ResourceSnapshot` indexes one proxy's generated resources by type and
//! name. Its version is a digest of the contents, so rebuilding a proxy from
//! unchanged inputs yields the same version and the cache can skip the
//! publication.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use convoy_common::{ConvoyError, Result};

use crate::xds::types::{Cluster, ClusterLoadAssignment, Listener, RouteConfiguration};
use crate::xds::{ResourcePayload, ResourceSet, ResourceType, ensure_valid};

/// A snapshot of discovery resources at a point in time
#[derive(Debug, Clone, Default)]
pub struct ResourceSnapshot {
    /// Digest of all resources
    pub version: String,
    /// Digest of the resources of each type
    pub type_versions: BTreeMap<ResourceType, String>,
    /// Clusters by name
    pub clusters: BTreeMap<String, Cluster>,
    /// Load assignments by cluster name
    pub endpoints: BTreeMap<String, ClusterLoadAssignment>,
    /// Listeners by name
    pub listeners: BTreeMap<String, Listener>,
    /// Route resources (RDS)
    pub routes: BTreeMap<String, RouteConfiguration>,
    /// Versions pinned on individual resources, keyed by type and name
    pub resource_versions: BTreeMap<(ResourceType, String), String>,
    /// Creation timestamp, not part of the version
    pub created_at: i64,
}

/// Digest of one type's resources: name, serialised payload and pinned
/// version of each entry in name order
fn digest_entries<T: Serialize>(
    resource_type: ResourceType,
    entries: &BTreeMap<String, T>,
    pinned: &BTreeMap<(ResourceType, String), String>,
) -> Result<String> {
    let mut hasher = Sha256::new();
    for (name, payload) in entries {
        let bytes = serde_json::to_vec(payload).map_err(|e| {
            ConvoyError::Validation(format!("{} {:?} cannot be serialised: {}", resource_type, name, e))
        })?;
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(bytes);
        if let Some(version) = pinned.get(&(resource_type, name.clone())) {
            hasher.update(version.as_bytes());
        }
        hasher.update([0u8]);
    }
    Ok(const_hex::encode(hasher.finalize()))
}

impl ResourceSnapshot {
    /// Index a generated resource set.
    ///
    /// Every payload is validated on the way in. Later resources with an
    /// already indexed type and name replace earlier ones.
    pub fn from_resource_set(resources: &ResourceSet) -> Result<Self> {
        let mut snapshot = Self {
            created_at: chrono::Utc::now().timestamp_millis(),
            ..Default::default()
        };

        for resource in resources.iter() {
            ensure_valid(&resource.payload)?;
            if let Some(version) = &resource.version {
                snapshot
                    .resource_versions
                    .insert((resource.resource_type(), resource.name.clone()), version.clone());
            }
            snapshot.add(resource.name.clone(), resource.payload.clone());
        }

        snapshot.compute_versions()?;
        Ok(snapshot)
    }

    fn add(&mut self, name: String, payload: ResourcePayload) {
        match payload {
            ResourcePayload::Cluster(cluster) => {
                self.clusters.insert(name, cluster);
            }
            ResourcePayload::Endpoint(cla) => {
                self.endpoints.insert(name, cla);
            }
            ResourcePayload::Listener(listener) => {
                self.listeners.insert(name, listener);
            }
            ResourcePayload::Route(route) => {
                self.routes.insert(name, route);
            }
        }
    }

    fn compute_versions(&mut self) -> Result<()> {
        let pinned = &self.resource_versions;
        let mut type_versions = BTreeMap::new();
        for resource_type in ResourceType::ALL {
            let digest = match resource_type {
                ResourceType::Cluster => digest_entries(resource_type, &self.clusters, pinned)?,
                ResourceType::Endpoint => digest_entries(resource_type, &self.endpoints, pinned)?,
                ResourceType::Listener => digest_entries(resource_type, &self.listeners, pinned)?,
                ResourceType::Route => digest_entries(resource_type, &self.routes, pinned)?,
            };
            type_versions.insert(resource_type, digest);
        }

        let mut overall = Sha256::new();
        for (resource_type, digest) in &type_versions {
            overall.update(resource_type.type_url().as_bytes());
            overall.update(digest.as_bytes());
        }
        self.type_versions = type_versions;
        self.version = const_hex::encode(overall.finalize());
        Ok(())
    }

    /// Version of the resources of one type
    pub fn version_for(&self, resource_type: ResourceType) -> &str {
        self.type_versions
            .get(&resource_type)
            .map(String::as_str)
            .unwrap_or(&self.version)
    }

    /// Version pinned on a single resource
    pub fn resource_version(&self, resource_type: ResourceType, name: &str) -> Option<&str> {
        self.resource_versions
            .get(&(resource_type, name.to_string()))
            .map(String::as_str)
    }

    pub fn get_cluster(&self, name: &str) -> Option<&Cluster> {
        self.clusters.get(name)
    }

    pub fn get_endpoints(&self, cluster_name: &str) -> Option<&ClusterLoadAssignment> {
        self.endpoints.get(cluster_name)
    }

    pub fn get_listener(&self, name: &str) -> Option<&Listener> {
        self.listeners.get(name)
    }

    pub fn get_route(&self, name: &str) -> Option<&RouteConfiguration> {
        self.routes.get(name)
    }

    /// Names of all resources of a type, sorted
    pub fn names(&self, resource_type: ResourceType) -> Vec<&str> {
        match resource_type {
            ResourceType::Cluster => self.clusters.keys().map(String::as_str).collect(),
            ResourceType::Endpoint => self.endpoints.keys().map(String::as_str).collect(),
            ResourceType::Listener => self.listeners.keys().map(String::as_str).collect(),
            ResourceType::Route => self.routes.keys().map(String::as_str).collect(),
        }
    }

    pub fn contains(&self, resource_type: ResourceType, name: &str) -> bool {
        match resource_type {
            ResourceType::Cluster => self.clusters.contains_key(name),
            ResourceType::Endpoint => self.endpoints.contains_key(name),
            ResourceType::Listener => self.listeners.contains_key(name),
            ResourceType::Route => self.routes.contains_key(name),
        }
    }

    pub fn resource_count(&self, resource_type: ResourceType) -> usize {
        match resource_type {
            ResourceType::Cluster => self.clusters.len(),
            ResourceType::Endpoint => self.endpoints.len(),
            ResourceType::Listener => self.listeners.len(),
            ResourceType::Route => self.routes.len(),
        }
    }
}

/// Snapshot cache for discovery resources
///
/// Maintains snapshots per node and supports efficient lookups.
pub struct SnapshotCache {
    snapshots: DashMap<String, Arc<ResourceSnapshot>>,
    /// Served to nodes that have no snapshot of their own
    default_snapshot: parking_lot::RwLock<Option<Arc<ResourceSnapshot>>>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self {
            snapshots: DashMap::new(),
            default_snapshot: parking_lot::RwLock::new(None),
        }
    }

    pub fn set_default_snapshot(&self, snapshot: ResourceSnapshot) {
        let mut default = self.default_snapshot.write();
        info!(
            version = %snapshot.version,
            clusters = snapshot.clusters.len(),
            endpoints = snapshot.endpoints.len(),
            "Setting default snapshot"
        );
        *default = Some(Arc::new(snapshot));
    }

    /// Set a snapshot for a node, returns false when the node already has
    /// a snapshot with the same version
    pub fn set_snapshot(&self, node_id: &str, snapshot: ResourceSnapshot) -> bool {
        if self
            .snapshots
            .get(node_id)
            .is_some_and(|current| current.version == snapshot.version)
        {
            debug!(node_id = %node_id, version = %snapshot.version, "Snapshot unchanged");
            return false;
        }

        debug!(
            node_id = %node_id,
            version = %snapshot.version,
            listeners = snapshot.listeners.len(),
            clusters = snapshot.clusters.len(),
            "Setting snapshot for node"
        );
        self.snapshots.insert(node_id.to_string(), Arc::new(snapshot));
        true
    }

    /// The node's own snapshot, else the default one
    pub fn get_snapshot(&self, node_id: &str) -> Option<Arc<ResourceSnapshot>> {
        if let Some(snapshot) = self.snapshots.get(node_id) {
            return Some(snapshot.clone());
        }
        self.default_snapshot.read().clone()
    }

    pub fn remove_snapshot(&self, node_id: &str) {
        self.snapshots.remove(node_id);
    }

    /// Drop snapshots of nodes that are gone
    pub fn retain_nodes(&self, live: &HashSet<String>) -> usize {
        let before = self.snapshots.len();
        self.snapshots.retain(|node_id, _| live.contains(node_id));
        before - self.snapshots.len()
    }

    pub fn clear(&self) {
        self.snapshots.clear();
        *self.default_snapshot.write() = None;
    }

    /// All node IDs with snapshots, sorted
    pub fn node_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.snapshots.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn has_snapshot(&self, node_id: &str) -> bool {
        self.snapshots.contains_key(node_id)
    }

    pub fn stats(&self) -> CacheStats {
        let default = self.default_snapshot.read();
        CacheStats {
            node_count: self.snapshots.len(),
            has_default: default.is_some(),
            default_version: default.as_ref().map(|s| s.version.clone()),
        }
    }
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Cache statistics
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub node_count: usize,
    pub has_default: bool,
    pub default_version: Option<String>,
}
