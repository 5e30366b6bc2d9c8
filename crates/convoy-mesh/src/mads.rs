//! Monitoring assignment discovery
//!
//! The MADS snapshot is not per proxy: it flattens every dataplane of every
//! metrics-enabled mesh into one set of monitoring assignments that a
//! metrics scraper discovers.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use convoy_common::{ConvoyError, Result};

use crate::model::{Dataplane, Mesh, ResourceManager};

/// Where and how to scrape one dataplane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoringTarget {
    pub scheme: String,
    /// `ip:port`
    pub address: String,
    pub metrics_path: String,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoringAssignment {
    /// `/meshes/<mesh>/dataplanes/<name>`
    pub name: String,
    pub mesh: String,
    pub service: String,
    pub targets: Vec<MonitoringTarget>,
    pub labels: BTreeMap<String, String>,
}

/// Input of a MADS generation: the metrics-enabled meshes and their dataplanes
#[derive(Debug, Clone, Default)]
pub struct MadsArgs {
    pub meshes: Vec<Mesh>,
    pub dataplanes: Vec<Dataplane>,
}

pub trait MadsResourceGenerator: Send + Sync {
    fn generate(&self, args: &MadsArgs) -> Result<Vec<MonitoringAssignment>>;
}

/// One assignment per dataplane, scraped on the dataplane's own metrics
/// settings or the mesh defaults
#[derive(Debug, Clone, Copy, Default)]
pub struct MonitoringAssignmentGenerator;

pub fn assignment_name(mesh: &str, dataplane: &str) -> String {
    format!("/meshes/{}/dataplanes/{}", mesh, dataplane)
}

impl MadsResourceGenerator for MonitoringAssignmentGenerator {
    fn generate(&self, args: &MadsArgs) -> Result<Vec<MonitoringAssignment>> {
        let meshes: BTreeMap<&str, &Mesh> = args.meshes.iter().map(|m| (m.name(), m)).collect();

        let mut assignments = Vec::new();
        for dataplane in &args.dataplanes {
            let Some(mesh) = meshes.get(dataplane.meta.mesh.as_str()) else {
                continue;
            };
            let Some(metrics) = dataplane.metrics.as_ref().or(mesh.metrics.as_ref()) else {
                continue;
            };

            let service = dataplane.identifying_service().to_string();
            let mut target_labels = BTreeMap::new();
            target_labels.insert("job".to_string(), service.clone());
            target_labels.insert("instance".to_string(), dataplane.name().to_string());
            for inbound in &dataplane.networking.inbound {
                for (key, value) in inbound.tags.iter() {
                    target_labels
                        .entry(label_name(key))
                        .or_insert_with(|| value.to_string());
                }
            }

            let mut labels = BTreeMap::new();
            labels.insert("mesh".to_string(), mesh.name().to_string());
            labels.insert("service".to_string(), service.clone());

            assignments.push(MonitoringAssignment {
                name: assignment_name(mesh.name(), dataplane.name()),
                mesh: mesh.name().to_string(),
                service,
                targets: vec![MonitoringTarget {
                    scheme: "http".to_string(),
                    address: format!("{}:{}", dataplane.networking.address, metrics.port),
                    metrics_path: metrics.path.clone(),
                    labels: target_labels,
                }],
                labels,
            });
        }
        Ok(assignments)
    }
}

/// Tag keys turned into label names (`kuma.io/service` -> `kuma_io_service`)
fn label_name(tag: &str) -> String {
    tag.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Monitoring assignments indexed by name
#[derive(Debug, Clone, Default)]
pub struct MadsSnapshot {
    pub version: String,
    pub assignments: BTreeMap<String, MonitoringAssignment>,
    pub created_at: i64,
}

impl MadsSnapshot {
    pub fn from_assignments(assignments: Vec<MonitoringAssignment>) -> Result<Self> {
        let mut indexed = BTreeMap::new();
        for assignment in assignments {
            if indexed.contains_key(&assignment.name) {
                return Err(ConvoyError::Validation(format!(
                    "duplicate monitoring assignment {:?}",
                    assignment.name
                )));
            }
            indexed.insert(assignment.name.clone(), assignment);
        }

        let bytes = serde_json::to_vec(&indexed).map_err(|e| {
            ConvoyError::Validation(format!("monitoring assignments cannot be serialised: {}", e))
        })?;
        Ok(Self {
            version: const_hex::encode(Sha256::digest(bytes)),
            assignments: indexed,
            created_at: chrono::Utc::now().timestamp_millis(),
        })
    }

    pub fn get(&self, name: &str) -> Option<&MonitoringAssignment> {
        self.assignments.get(name)
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }
}

/// Builds the cross-mesh MADS snapshot
pub struct Snapshotter {
    manager: ResourceManager,
    generator: Arc<dyn MadsResourceGenerator>,
}

impl Snapshotter {
    pub fn new(manager: ResourceManager, generator: Arc<dyn MadsResourceGenerator>) -> Self {
        Self { manager, generator }
    }

    /// Any failing list or generation aborts the whole snapshot
    pub async fn snapshot(&self) -> Result<MadsSnapshot> {
        let meshes: Vec<Mesh> = self
            .manager
            .list::<Mesh>()
            .await?
            .into_iter()
            .filter(Mesh::has_prometheus_metrics_enabled)
            .collect();

        let mut dataplanes = Vec::new();
        for mesh in &meshes {
            dataplanes.extend(self.manager.list_in_mesh::<Dataplane>(mesh.name()).await?);
        }

        let args = MadsArgs { meshes, dataplanes };
        let snapshot = MadsSnapshot::from_assignments(self.generator.generate(&args)?)?;
        debug!(
            version = %snapshot.version,
            meshes = args.meshes.len(),
            assignments = snapshot.len(),
            "Built monitoring assignment snapshot"
        );
        Ok(snapshot)
    }
}
