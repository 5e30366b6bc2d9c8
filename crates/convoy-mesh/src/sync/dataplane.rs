use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use convoy_common::{LookupIp, Result};

use crate::model::{
    Dataplane, ExternalService, Mesh, ProxyTemplate, ResourceKey, ResourceManager,
    TrafficPermission, TrafficRoute, ZoneEgress, ZoneIngress,
};
use crate::proxy::{DataplanePolicies, MeshContext, Proxy, ProxyOwner, Routing};
use crate::topology::{
    build_dataplane_endpoint_map, dataplane_destinations, select_proxy_template,
    select_traffic_permissions, select_traffic_routes,
};

use super::{
    BuilderConfig, local_zone_egress, resolve_dataplane, resolve_dataplanes,
    resolve_zone_ingresses, sort_external_services,
};

/// Builds the proxy of a regular dataplane
pub struct DataplaneProxyBuilder {
    manager: ResourceManager,
    lookup: Arc<dyn LookupIp>,
    config: BuilderConfig,
}

impl DataplaneProxyBuilder {
    pub fn new(manager: ResourceManager, lookup: Arc<dyn LookupIp>, config: BuilderConfig) -> Self {
        Self {
            manager,
            lookup,
            config,
        }
    }

    pub async fn build(&self, key: &ResourceKey) -> Result<Proxy> {
        let lookup = self.lookup.as_ref();
        let zone = self.config.zone.as_str();

        let mesh: Mesh = self.manager.get(&ResourceKey::global(key.mesh.as_str())).await?;
        let dataplane = resolve_dataplane(lookup, self.manager.get::<Dataplane>(key).await?).await?;

        let dataplanes =
            resolve_dataplanes(lookup, self.manager.list_in_mesh::<Dataplane>(&key.mesh).await?).await?;
        let zone_ingresses =
            resolve_zone_ingresses(lookup, self.manager.list::<ZoneIngress>().await?).await?;
        let zone_egress = local_zone_egress(lookup, self.manager.list::<ZoneEgress>().await?, zone).await?;

        let mut external_services = self.manager.list_in_mesh::<ExternalService>(&key.mesh).await?;
        sort_external_services(&mut external_services);

        let routes = self.manager.list_in_mesh::<TrafficRoute>(&key.mesh).await?;
        let permissions = self.manager.list_in_mesh::<TrafficPermission>(&key.mesh).await?;
        let templates = self.manager.list_in_mesh::<ProxyTemplate>(&key.mesh).await?;

        let outbound_targets = build_dataplane_endpoint_map(
            &mesh,
            zone,
            &dataplanes,
            &zone_ingresses,
            zone_egress.as_ref(),
            &external_services,
        )?;
        let traffic_routes = select_traffic_routes(&dataplane, &routes);
        let destinations = dataplane_destinations(&traffic_routes);
        let policies = DataplanePolicies {
            traffic_permissions: select_traffic_permissions(&dataplane, &permissions),
            proxy_template: select_proxy_template(&dataplane, &templates),
        };

        debug!(
            proxy = %key,
            services = outbound_targets.len(),
            routes = traffic_routes.len(),
            "Built dataplane proxy"
        );

        Ok(Proxy {
            id: key.clone(),
            api_version: self.config.api_version,
            version: dataplane.meta.version.clone(),
            metadata: BTreeMap::new(),
            routing: Routing {
                outbound_targets,
                traffic_routes,
            },
            owner: ProxyOwner::Dataplane {
                dataplane,
                mesh: MeshContext { mesh, destinations },
                policies,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::InMemoryStore;
    use crate::sync::testing::StaticLookup;
    use convoy_common::ConvoyError;

    const RESOURCES: &str = r#"
- type: Mesh
  name: m1
- type: Dataplane
  name: web-1
  mesh: m1
  networking:
    address: web.local
    inbound:
      - port: 10001
        service_port: 8080
        tags:
          kuma.io/service: web
    outbound:
      - port: 20001
        service: backend
- type: Dataplane
  name: backend-1
  mesh: m1
  networking:
    address: 10.0.0.5
    inbound:
      - port: 8080
        tags:
          kuma.io/service: backend
          version: v1
- type: TrafficRoute
  name: route-all
  mesh: m1
  sources:
    - kuma.io/service: "*"
  destinations:
    - kuma.io/service: "*"
  conf:
    - weight: 1
      destination:
        kuma.io/service: "*"
"#;

    fn builder(lookup: StaticLookup) -> DataplaneProxyBuilder {
        let store = InMemoryStore::from_yaml(RESOURCES).unwrap();
        DataplaneProxyBuilder::new(
            ResourceManager::new(Arc::new(store)),
            Arc::new(lookup),
            BuilderConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_build_resolves_routes_and_endpoints() {
        let builder = builder(StaticLookup::default().with_host("web.local", "10.0.0.1"));

        let proxy = builder.build(&ResourceKey::new("m1", "web-1")).await.unwrap();
        assert_eq!(proxy.node_id(), "m1.web-1");
        assert_eq!(proxy.version, "1");

        let (dataplane, mesh, _) = proxy.dataplane().unwrap();
        assert_eq!(dataplane.networking.address, "10.0.0.1");
        assert!(mesh.destinations.contains_key("backend"));

        assert_eq!(proxy.routing.traffic_routes["backend"].meta.name, "route-all");
        let backend = &proxy.routing.outbound_targets["backend"];
        assert_eq!(backend.len(), 1);
        assert_eq!(backend[0].target, "10.0.0.5");
        assert_eq!(backend[0].port, 8080);
    }

    #[tokio::test]
    async fn test_unresolvable_address_aborts_build() {
        let builder = builder(StaticLookup::default());

        let err = builder.build(&ResourceKey::new("m1", "web-1")).await.unwrap_err();
        assert!(matches!(err, ConvoyError::Lookup { ref host, .. } if host == "web.local"));
    }

    #[tokio::test]
    async fn test_missing_dataplane() {
        let builder = builder(StaticLookup::default());

        let err = builder.build(&ResourceKey::new("m1", "nope")).await.unwrap_err();
        assert!(matches!(err, ConvoyError::NotFound { .. }));
    }
}
