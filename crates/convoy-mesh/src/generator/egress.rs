//! Zone egress generation
//!
//! A zone egress exposes one SNI-routed listener. For every mTLS mesh it
//! serves, `ExternalServicesGenerator` adds the external services reachable
//! from this zone and `ZoneExternalServicesGenerator` the ones that live in
//! other zones and are reached through those zones' ingresses. Both add
//! their filter chains through the same `EgressListenerBuilder`, so an SNI is
//! never matched twice.

use std::collections::HashSet;

use tracing::debug;

use convoy_common::{MESH_TAG, Result, SERVICE_TAG};

use crate::model::tags::{lb_subset_keys, mesh_cluster_name, sni_from_tags};
use crate::model::{Tags, ZoneEgress, ZoneIngress};
use crate::proxy::{Endpoint, MeshResources, Proxy, ProxyOwner};
use crate::topology::{RouteDestinations, destinations_from_routes, service_destinations};
use crate::xds::envoy::{
    create_cluster_load_assignment, create_eds_cluster, create_sni_filter_chain, create_sni_listener,
};
use crate::xds::types::{Listener, UpstreamTlsContext};
use crate::xds::{NameRegistry, Origin, Resource, ResourcePayload, ResourceSet, ResourceType};

use super::inbound::inbound_listener_name;
use super::{ResourceGenerator, unsupported};

/// Egress listener under construction
pub struct EgressListenerBuilder {
    listener: Listener,
    sni_used: HashSet<String>,
}

impl EgressListenerBuilder {
    pub fn new(name: &str, address: &str, port: u32) -> Self {
        Self {
            listener: create_sni_listener(name, address, port),
            sni_used: HashSet::new(),
        }
    }

    /// Add a filter chain for `destination`, unless its SNI is already routed
    pub fn add_destination(&mut self, cluster: &str, destination: &Tags) -> bool {
        let sni = sni_from_tags(destination);
        if !self.sni_used.insert(sni.clone()) {
            return false;
        }
        self.listener
            .filter_chains
            .push(create_sni_filter_chain(&sni, cluster, destination));
        true
    }

    pub fn name(&self) -> &str {
        &self.listener.name
    }

    pub fn build(self) -> Listener {
        self.listener
    }
}

/// Fully qualified destinations of a service inside a mesh
fn mesh_destinations(routes: &RouteDestinations, mesh: &str, service: &str) -> Vec<Tags> {
    service_destinations(routes, service)
        .into_iter()
        .map(|d| d.with_tag(SERVICE_TAG, service).with_tag(MESH_TAG, mesh))
        .collect()
}

/// Cluster and load assignment for one external service
fn add_cluster(
    resources: &mut ResourceSet,
    names: &mut NameRegistry,
    cluster_name: &str,
    destinations: &[Tags],
    endpoints: &[Endpoint],
    tls_context: Option<UpstreamTlsContext>,
) {
    if names.claim(ResourceType::Cluster, cluster_name) {
        let cluster = create_eds_cluster(cluster_name, lb_subset_keys(destinations), tls_context);
        resources.add(Resource::new(Origin::Egress, ResourcePayload::Cluster(cluster)));
    }
    if names.claim(ResourceType::Endpoint, cluster_name) {
        let cla = create_cluster_load_assignment(cluster_name, endpoints, false);
        resources.add(Resource::new(Origin::Egress, ResourcePayload::Endpoint(cla)));
    }
}

/// Upstream TLS the egress originates towards an external service
fn origination_tls(endpoint: &Endpoint) -> Option<UpstreamTlsContext> {
    let marker = endpoint.external_service.as_ref()?;
    marker.tls_enabled.then(|| UpstreamTlsContext {
        sni: Some(marker.server_name.clone().unwrap_or_else(|| endpoint.target.clone())),
        alpn_protocols: Vec::new(),
        validate_server: true,
    })
}

fn first_external(endpoints: &[Endpoint]) -> Option<&Endpoint> {
    endpoints.first().filter(|e| e.is_external_service())
}

/// External services this zone reaches directly
#[derive(Debug, Default)]
pub struct ExternalServicesGenerator;

impl ExternalServicesGenerator {
    pub fn generate_mesh(
        &self,
        zone_egress: &ZoneEgress,
        mesh_resources: &MeshResources,
        listener: &mut EgressListenerBuilder,
        names: &mut NameRegistry,
    ) -> ResourceSet {
        let mesh = mesh_resources.mesh.name();
        let routes = destinations_from_routes(&mesh_resources.traffic_routes);
        let mut resources = ResourceSet::new();

        for (service, endpoints) in &mesh_resources.endpoint_map {
            let Some(first) = first_external(endpoints) else {
                continue;
            };
            if first.zone().is_some_and(|zone| zone != zone_egress.zone) {
                continue;
            }

            let cluster_name = mesh_cluster_name(mesh, service);
            let destinations = mesh_destinations(&routes, mesh, service);
            for destination in &destinations {
                listener.add_destination(&cluster_name, destination);
            }
            add_cluster(
                &mut resources,
                names,
                &cluster_name,
                &destinations,
                endpoints,
                origination_tls(first),
            );
        }
        resources
    }
}

/// External services of other zones, reached through their zone ingress
#[derive(Debug, Default)]
pub struct ZoneExternalServicesGenerator;

impl ZoneExternalServicesGenerator {
    pub fn generate_mesh(
        &self,
        zone_egress: &ZoneEgress,
        zone_ingresses: &[ZoneIngress],
        mesh_resources: &MeshResources,
        listener: &mut EgressListenerBuilder,
        names: &mut NameRegistry,
    ) -> ResourceSet {
        let mesh = mesh_resources.mesh.name();
        let routes = destinations_from_routes(&mesh_resources.traffic_routes);
        let mut resources = ResourceSet::new();

        for (service, endpoints) in &mesh_resources.endpoint_map {
            let Some(first) = first_external(endpoints) else {
                continue;
            };
            if first.zone().is_some_and(|zone| zone == zone_egress.zone) {
                continue;
            }
            let cluster_name = mesh_cluster_name(mesh, service);
            let destinations = mesh_destinations(&routes, mesh, service);
            add_cluster(&mut resources, names, &cluster_name, &destinations, endpoints, None);
        }

        for ingress in zone_ingresses {
            for available in ingress
                .available_services
                .iter()
                .filter(|s| s.mesh == mesh && s.external_service)
            {
                let Some(service) = available.tags.service() else {
                    continue;
                };
                let pinned_here = mesh_resources
                    .endpoint_map
                    .get(service)
                    .and_then(|endpoints| first_external(endpoints))
                    .is_some_and(|first| first.zone() == Some(ingress.zone.as_str()));
                if !pinned_here {
                    continue;
                }

                let cluster_name = mesh_cluster_name(mesh, service);
                for destination in mesh_destinations(&routes, mesh, service) {
                    listener.add_destination(&cluster_name, &destination);
                }
            }
        }
        resources
    }
}

/// Listener, clusters and load assignments of a zone egress
#[derive(Debug, Default)]
pub struct EgressGenerator {
    external_services: ExternalServicesGenerator,
    zone_external_services: ZoneExternalServicesGenerator,
}

impl ResourceGenerator for EgressGenerator {
    fn name(&self) -> &'static str {
        "egress"
    }

    fn generate(&self, proxy: &Proxy, names: &mut NameRegistry) -> Result<ResourceSet> {
        let ProxyOwner::ZoneEgress {
            zone_egress,
            policies,
        } = &proxy.owner
        else {
            return Err(unsupported(self.name(), proxy));
        };

        let address = &zone_egress.networking.address;
        let port = zone_egress.networking.port;
        let mut listener =
            EgressListenerBuilder::new(&inbound_listener_name(address, port), address, port);

        let mut resources = ResourceSet::new();
        for mesh_resources in &policies.mesh_resources {
            resources.extend(self.external_services.generate_mesh(
                zone_egress,
                mesh_resources,
                &mut listener,
                names,
            ));
            resources.extend(self.zone_external_services.generate_mesh(
                zone_egress,
                &policies.zone_ingresses,
                mesh_resources,
                &mut listener,
                names,
            ));
        }

        if names.claim(ResourceType::Listener, listener.name()) {
            let listener = listener.build();
            debug!(
                proxy = %proxy.node_id(),
                filter_chains = listener.filter_chains.len(),
                "Built zone egress listener"
            );
            resources.add(Resource::new(Origin::Egress, ResourcePayload::Listener(listener)));
        }
        Ok(resources)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::generator::testing::*;
    use crate::model::resources::{AvailableService, ResourceMeta, ZoneEgressNetworking};
    use crate::proxy::{
        ApiVersion, EndpointMap, ExternalServiceEndpoint, Locality, Routing, ZoneEgressPolicies,
    };
    use convoy_common::ZONE_TAG;

    fn external(target: &str, port: u32, mesh: &str, service: &str, zone: Option<&str>) -> Endpoint {
        let mut endpoint_tags = tags(&[(SERVICE_TAG, service), (MESH_TAG, mesh)]);
        if let Some(zone) = zone {
            endpoint_tags.insert(ZONE_TAG, zone);
        }
        Endpoint {
            target: target.to_string(),
            port,
            tags: endpoint_tags,
            weight: 1,
            locality: zone.map(|z| {
                if z == "zone-1" {
                    Locality::local(z)
                } else {
                    Locality::remote(z)
                }
            }),
            external_service: Some(ExternalServiceEndpoint::default()),
        }
    }

    fn mesh_resources(name: &str, endpoint_map: EndpointMap) -> MeshResources {
        let mut wildcard = route("*", vec![(100, tags(&[(SERVICE_TAG, "*")]))]);
        wildcard.meta.mesh = name.to_string();
        let mut mtls = mesh(name);
        mtls.mtls_enabled = true;
        MeshResources {
            mesh: mtls,
            traffic_routes: vec![wildcard],
            external_services: Vec::new(),
            endpoint_map,
        }
    }

    fn egress_proxy(zone_ingresses: Vec<ZoneIngress>, mesh_resources: Vec<MeshResources>) -> Proxy {
        let zone_egress = ZoneEgress {
            meta: ResourceMeta::new("", "egress-1"),
            zone: "zone-1".to_string(),
            networking: ZoneEgressNetworking {
                address: "10.0.2.1".to_string(),
                port: 10002,
            },
        };
        Proxy {
            id: zone_egress.meta.key(),
            api_version: ApiVersion::V3,
            version: "1".to_string(),
            metadata: BTreeMap::new(),
            routing: Routing::default(),
            owner: ProxyOwner::ZoneEgress {
                zone_egress,
                policies: ZoneEgressPolicies {
                    zone_ingresses,
                    mesh_resources,
                },
            },
        }
    }

    fn listener(resources: &ResourceSet) -> Listener {
        match &resources.get(ResourceType::Listener, "inbound:10.0.2.1:10002").unwrap().payload {
            ResourcePayload::Listener(listener) => listener.clone(),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_cross_mesh_cluster_names_differ() {
        let mut m1 = EndpointMap::new();
        m1.insert("backend".to_string(), vec![external("backend.m1.com", 443, "m1", "backend", None)]);
        let mut m2 = EndpointMap::new();
        m2.insert("backend".to_string(), vec![external("backend.m2.com", 443, "m2", "backend", None)]);

        let proxy = egress_proxy(vec![], vec![mesh_resources("m1", m1), mesh_resources("m2", m2)]);
        let resources = EgressGenerator::default()
            .generate(&proxy, &mut NameRegistry::new())
            .unwrap();

        assert_eq!(
            resources.names(ResourceType::Cluster),
            vec!["m1:backend", "m2:backend"]
        );
        let chains: Vec<String> = listener(&resources)
            .filter_chains
            .iter()
            .map(|c| c.name.clone())
            .collect();
        assert_eq!(chains, vec!["backend{mesh=m1}", "backend{mesh=m2}"]);
    }

    #[test]
    fn test_remote_external_service_chains_are_deduplicated() {
        let mut map = EndpointMap::new();
        map.insert(
            "payments".to_string(),
            vec![external("10.9.0.1", 10001, "m1", "payments", Some("zone-2"))],
        );
        let advertisement = |region: &str| AvailableService {
            mesh: "m1".to_string(),
            tags: tags(&[(SERVICE_TAG, "payments"), (ZONE_TAG, "zone-2"), ("region", region)]),
            instances: 1,
            external_service: true,
        };
        let ingresses = vec![
            ZoneIngress {
                meta: ResourceMeta::new("", "ingress-2a"),
                zone: "zone-2".to_string(),
                available_services: vec![advertisement("eu"), advertisement("us")],
                ..Default::default()
            },
            ZoneIngress {
                meta: ResourceMeta::new("", "ingress-2b"),
                zone: "zone-2".to_string(),
                available_services: vec![advertisement("eu")],
                ..Default::default()
            },
        ];

        let proxy = egress_proxy(ingresses, vec![mesh_resources("m1", map)]);
        let resources = EgressGenerator::default()
            .generate(&proxy, &mut NameRegistry::new())
            .unwrap();

        assert_eq!(resources.names(ResourceType::Cluster), vec!["m1:payments"]);
        let listener = listener(&resources);
        assert_eq!(listener.filter_chains.len(), 1);
        assert_eq!(listener.filter_chains[0].name, "payments{mesh=m1}");
    }

    #[test]
    fn test_local_external_service_with_tls_origination() {
        let mut endpoint = external("api.example.com", 443, "m1", "api", Some("zone-1"));
        endpoint.external_service = Some(ExternalServiceEndpoint {
            tls_enabled: true,
            ..Default::default()
        });
        let mut map = EndpointMap::new();
        map.insert("api".to_string(), vec![endpoint]);

        let proxy = egress_proxy(vec![], vec![mesh_resources("m1", map)]);
        let resources = EgressGenerator::default()
            .generate(&proxy, &mut NameRegistry::new())
            .unwrap();

        match &resources.get(ResourceType::Cluster, "m1:api").unwrap().payload {
            ResourcePayload::Cluster(cluster) => {
                let tls = cluster.tls_context.as_ref().unwrap();
                assert_eq!(tls.sni.as_deref(), Some("api.example.com"));
                assert_eq!(cluster.lb_subset_keys, vec![vec!["mesh".to_string()]]);
            }
            other => panic!("unexpected payload {:?}", other),
        }
        assert_eq!(listener(&resources).filter_chains.len(), 1);
    }
}
