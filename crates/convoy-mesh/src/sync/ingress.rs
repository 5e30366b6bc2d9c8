use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use convoy_common::{LookupIp, Result};

use crate::model::{
    Dataplane, ExternalService, GatewayRoute, Mesh, ResourceKey, ResourceKind, ResourceManager,
    TrafficRoute, ZoneEgress, ZoneIngress,
};
use crate::proxy::{Proxy, ProxyOwner, Routing, ZoneIngressPolicies};
use crate::topology::{available_services, build_destination_map, build_endpoint_map};

use super::{
    BuilderConfig, local_zone_egress, resolve_dataplanes, resolve_zone_ingress,
    sort_external_services,
};

/// Builds the proxy of a zone ingress.
///
/// The ingress' advertised services are read as stored; refreshing them is
/// the job of [`IngressAvailabilityRefresher`] and runs before the build.
pub struct IngressProxyBuilder {
    manager: ResourceManager,
    lookup: Arc<dyn LookupIp>,
    config: BuilderConfig,
}

impl IngressProxyBuilder {
    pub fn new(manager: ResourceManager, lookup: Arc<dyn LookupIp>, config: BuilderConfig) -> Self {
        Self {
            manager,
            lookup,
            config,
        }
    }

    pub async fn build(&self, key: &ResourceKey) -> Result<Proxy> {
        let lookup = self.lookup.as_ref();

        let zone_ingress = resolve_zone_ingress(lookup, self.manager.get::<ZoneIngress>(key).await?).await?;
        let zone_egress =
            local_zone_egress(lookup, self.manager.list::<ZoneEgress>().await?, &self.config.zone).await?;
        let dataplanes = resolve_dataplanes(lookup, self.manager.list::<Dataplane>().await?).await?;

        let mut external_services = self.manager.list::<ExternalService>().await?;
        sort_external_services(&mut external_services);

        let traffic_routes = self.manager.list::<TrafficRoute>().await?;
        let gateway_routes = if self.manager.is_registered(ResourceKind::GatewayRoute) {
            self.manager.list::<GatewayRoute>().await?
        } else {
            warn!("GatewayRoute is not registered, skipping gateway routes");
            Vec::new()
        };
        let meshes: BTreeMap<String, Mesh> = self
            .manager
            .list::<Mesh>()
            .await?
            .into_iter()
            .map(|mesh| (mesh.name().to_string(), mesh))
            .collect();

        let destinations = build_destination_map(&zone_ingress, &traffic_routes);
        let outbound_targets =
            build_endpoint_map(&destinations, zone_egress.as_ref(), &dataplanes, &external_services)
                .unwrap_or_default();

        debug!(
            proxy = %key,
            services = outbound_targets.len(),
            advertised = zone_ingress.available_services.len(),
            "Built zone ingress proxy"
        );

        Ok(Proxy {
            id: key.clone(),
            api_version: self.config.api_version,
            version: zone_ingress.meta.version.clone(),
            metadata: BTreeMap::new(),
            routing: Routing {
                outbound_targets,
                traffic_routes: BTreeMap::new(),
            },
            owner: ProxyOwner::ZoneIngress {
                zone_ingress,
                policies: ZoneIngressPolicies {
                    traffic_routes,
                    gateway_routes,
                    meshes,
                },
            },
        })
    }
}

/// Recomputes the services a zone ingress advertises and writes them back.
///
/// Refreshes of the same ingress are serialised so that two concurrent
/// read-modify-write cycles cannot lose an update.
pub struct IngressAvailabilityRefresher {
    manager: ResourceManager,
    config: BuilderConfig,
    locks: DashMap<ResourceKey, Arc<tokio::sync::Mutex<()>>>,
}

impl IngressAvailabilityRefresher {
    pub fn new(manager: ResourceManager, config: BuilderConfig) -> Self {
        Self {
            manager,
            config,
            locks: DashMap::new(),
        }
    }

    /// Returns whether the stored advertisement changed
    pub async fn refresh(&self, key: &ResourceKey) -> Result<bool> {
        let lock = self.locks.entry(key.clone()).or_default().clone();
        let _guard = lock.lock().await;

        let mut zone_ingress = self.manager.get::<ZoneIngress>(key).await?;
        let zone = if zone_ingress.zone.is_empty() {
            self.config.zone.clone()
        } else {
            zone_ingress.zone.clone()
        };

        let dataplanes = self.manager.list::<Dataplane>().await?;
        let external_services = self.manager.list::<ExternalService>().await?;
        let services = available_services(&zone, &dataplanes, &external_services);
        if services == zone_ingress.available_services {
            debug!(ingress = %key, "Available services unchanged");
            return Ok(false);
        }

        let count = services.len();
        zone_ingress.available_services = services;
        self.manager.update(zone_ingress).await?;
        info!(ingress = %key, services = count, "Updated available services");
        Ok(true)
    }

    /// Drops the refresh locks of ingresses not in `live`; returns how many
    pub fn retain(&self, live: &HashSet<ResourceKey>) -> usize {
        let before = self.locks.len();
        self.locks.retain(|key, _| live.contains(key));
        before - self.locks.len()
    }
}
