use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::try_join_all;
use tracing::debug;

use convoy_common::{LookupIp, Result};

use crate::model::{
    ExternalService, Mesh, ResourceKey, ResourceManager, TrafficRoute, ZoneEgress, ZoneIngress,
};
use crate::proxy::{MeshResources, Proxy, ProxyOwner, Routing, ZoneEgressPolicies};
use crate::topology::build_egress_endpoint_map;

use super::{BuilderConfig, resolve_zone_ingresses, sort_external_services};

/// Builds the proxy of a zone egress, covering every mTLS-enabled mesh
pub struct EgressProxyBuilder {
    manager: ResourceManager,
    lookup: Arc<dyn LookupIp>,
    config: BuilderConfig,
}

impl EgressProxyBuilder {
    pub fn new(manager: ResourceManager, lookup: Arc<dyn LookupIp>, config: BuilderConfig) -> Self {
        Self {
            manager,
            lookup,
            config,
        }
    }

    async fn mesh_resources(
        &self,
        mesh: Mesh,
        local_zone: &str,
        zone_ingresses: &[ZoneIngress],
    ) -> Result<MeshResources> {
        let traffic_routes = self.manager.list_in_mesh::<TrafficRoute>(mesh.name()).await?;
        let mut external_services = self.manager.list_in_mesh::<ExternalService>(mesh.name()).await?;
        sort_external_services(&mut external_services);

        let endpoint_map =
            build_egress_endpoint_map(mesh.name(), local_zone, zone_ingresses, &external_services)?;
        Ok(MeshResources {
            mesh,
            traffic_routes,
            external_services,
            endpoint_map,
        })
    }

    pub async fn build(&self, key: &ResourceKey) -> Result<Proxy> {
        let zone_egress: ZoneEgress = self.manager.get(key).await?;
        let local_zone = if zone_egress.zone.is_empty() {
            self.config.zone.clone()
        } else {
            zone_egress.zone.clone()
        };

        let zone_ingresses =
            resolve_zone_ingresses(self.lookup.as_ref(), self.manager.list::<ZoneIngress>().await?).await?;

        let mut meshes: Vec<Mesh> = self
            .manager
            .list::<Mesh>()
            .await?
            .into_iter()
            .filter(|mesh| mesh.mtls_enabled)
            .collect();
        meshes.sort_by(|a, b| a.name().cmp(b.name()));

        let mesh_resources = try_join_all(
            meshes
                .into_iter()
                .map(|mesh| self.mesh_resources(mesh, &local_zone, &zone_ingresses)),
        )
        .await?;

        debug!(
            proxy = %key,
            zone = %local_zone,
            meshes = mesh_resources.len(),
            "Built zone egress proxy"
        );

        Ok(Proxy {
            id: key.clone(),
            api_version: self.config.api_version,
            version: zone_egress.meta.version.clone(),
            metadata: BTreeMap::new(),
            routing: Routing::default(),
            owner: ProxyOwner::ZoneEgress {
                zone_egress,
                policies: ZoneEgressPolicies {
                    zone_ingresses,
                    mesh_resources,
                },
            },
        })
    }
}
