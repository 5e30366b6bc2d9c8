use std::collections::{BTreeMap, BTreeSet};

use convoy_common::{ConvoyError, MESH_TAG, Result};

use crate::model::tags::{Tags, destination_cluster_name, sni_from_tags};
use crate::model::{Dataplane, TrafficRoute};
use crate::proxy::{Proxy, filter_endpoints};
use crate::topology::concrete_destination;
use crate::xds::envoy::{
    ClusterInfo, create_cluster_load_assignment, create_eds_cluster, create_outbound_listener,
};
use crate::xds::types::{Metadata, UpstreamTlsContext};
use crate::xds::{NameRegistry, Origin, Resource, ResourcePayload, ResourceSet, ResourceType};

use super::{ResourceGenerator, unsupported};

/// Outbound listener name for an interface
pub fn outbound_listener_name(ip: &str, port: u32) -> String {
    format!("outbound:{}:{}", ip, port)
}

/// Listener per outbound interface plus a cluster and load assignment per
/// routed destination
pub struct OutboundProxyGenerator;

/// Clusters a route splits an outbound service's traffic across. A cluster is
/// named after its destination service alone unless the route sends to more
/// than one tag subset of that service. Splits rendering to the same cluster
/// name are merged.
fn route_clusters(index: usize, service: &str, route: &TrafficRoute) -> Result<Vec<ClusterInfo>> {
    let destinations: Vec<(u32, Tags)> = route
        .conf
        .iter()
        .filter(|split| split.weight > 0)
        .map(|split| (split.weight, concrete_destination(&split.destination, service)))
        .collect();

    let mut subsets: BTreeMap<&str, BTreeSet<&Tags>> = BTreeMap::new();
    for (_, destination) in &destinations {
        subsets
            .entry(destination.service().unwrap_or(service))
            .or_default()
            .insert(destination);
    }

    let mut clusters: Vec<ClusterInfo> = Vec::new();
    for (weight, destination) in &destinations {
        let destination_service = destination.service().unwrap_or(service);
        let name = if subsets.get(destination_service).is_some_and(|s| s.len() > 1) {
            destination_cluster_name(destination_service, destination)
        } else {
            destination_service.to_string()
        };
        match clusters.iter_mut().find(|c| c.name == name) {
            Some(existing) => existing.weight += weight,
            None => clusters.push(ClusterInfo {
                name,
                weight: *weight,
                tags: destination.clone(),
            }),
        }
    }
    if clusters.is_empty() {
        return Err(ConvoyError::Validation(format!(
            "outbound interface [{}]{{service={:?}}}: TrafficRoute {:?} has no destination with a positive weight",
            index, service, route.meta.name
        )));
    }
    Ok(clusters)
}

/// A bare service name already bound to another tag subset by an earlier
/// outbound interface falls back to the tag-suffixed name.
fn disambiguate(clusters: &mut [ClusterInfo], bound: &mut BTreeMap<String, Tags>, service: &str) {
    for cluster in clusters.iter_mut() {
        if bound.get(&cluster.name).is_some_and(|tags| *tags != cluster.tags) {
            let destination_service = cluster.tags.service().unwrap_or(service);
            cluster.name = destination_cluster_name(destination_service, &cluster.tags);
        }
        bound.entry(cluster.name.clone()).or_insert_with(|| cluster.tags.clone());
    }
}

fn listener_metadata(proxy: &Proxy, dataplane: &Dataplane, service: &str) -> Metadata {
    let mut metadata = proxy.metadata.clone();
    metadata.insert("source_service".to_string(), dataplane.identifying_service().to_string());
    metadata.insert("destination_service".to_string(), service.to_string());
    metadata
}

impl ResourceGenerator for OutboundProxyGenerator {
    fn name(&self) -> &'static str {
        "outbound"
    }

    fn generate(&self, proxy: &Proxy, names: &mut NameRegistry) -> Result<ResourceSet> {
        let (dataplane, mesh, _) = proxy.dataplane().ok_or_else(|| unsupported(self.name(), proxy))?;
        let mesh = &mesh.mesh;

        let mut resources = ResourceSet::new();
        let virtual_listener = dataplane.redirect_port().is_some();
        let mut bound: BTreeMap<String, Tags> = BTreeMap::new();
        for (index, outbound) in dataplane.networking.outbound.iter().enumerate() {
            let iface = dataplane.outbound_interface(index)?;
            let service = outbound.service.as_str();
            let route = proxy.routing.traffic_routes.get(service).ok_or_else(|| {
                ConvoyError::MissingTrafficRoute {
                    index,
                    service: service.to_string(),
                }
            })?;
            let mut clusters = route_clusters(index, service, route)?;
            disambiguate(&mut clusters, &mut bound, service);

            let listener_name = outbound_listener_name(&iface.data_plane_ip, iface.data_plane_port);
            if names.claim(ResourceType::Listener, &listener_name) {
                let listener = create_outbound_listener(
                    &listener_name,
                    &iface.data_plane_ip,
                    iface.data_plane_port,
                    service,
                    &clusters,
                    virtual_listener,
                    &listener_metadata(proxy, dataplane, service),
                );
                resources.add(Resource::new(Origin::Outbound, ResourcePayload::Listener(listener)));
            }

            for cluster in &clusters {
                let destination_service = cluster.tags.service().unwrap_or(service);
                if names.claim(ResourceType::Cluster, &cluster.name) {
                    let tls = mesh.mtls_enabled.then(|| UpstreamTlsContext {
                        sni: Some(sni_from_tags(
                            &cluster.tags.clone().with_tag(MESH_TAG, mesh.name()),
                        )),
                        alpn_protocols: Vec::new(),
                        validate_server: true,
                    });
                    let eds = create_eds_cluster(&cluster.name, Vec::new(), tls);
                    resources.add(Resource::new(Origin::Outbound, ResourcePayload::Cluster(eds)));
                }
                if names.claim(ResourceType::Endpoint, &cluster.name) {
                    let known = proxy
                        .routing
                        .outbound_targets
                        .get(destination_service)
                        .map(Vec::as_slice)
                        .unwrap_or_default();
                    let endpoints = filter_endpoints(known, &cluster.tags);
                    let cla = create_cluster_load_assignment(
                        &cluster.name,
                        &endpoints,
                        mesh.locality_aware_load_balancing,
                    );
                    resources.add(Resource::new(Origin::Outbound, ResourcePayload::Endpoint(cla)));
                }
            }
        }
        Ok(resources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::testing::*;
    use crate::xds::types::{NetworkFilterType, TcpProxyTarget};
    use convoy_common::SERVICE_TAG;

    fn backend_endpoints() -> BTreeMap<String, Vec<crate::proxy::Endpoint>> {
        let mut targets = BTreeMap::new();
        targets.insert(
            "backend".to_string(),
            vec![
                endpoint("10.0.0.5", 8080, tags(&[(SERVICE_TAG, "backend"), ("version", "v1")])),
                endpoint("10.0.0.6", 8080, tags(&[(SERVICE_TAG, "backend"), ("version", "v2")])),
            ],
        );
        targets
    }

    fn routes(route: TrafficRoute) -> BTreeMap<String, TrafficRoute> {
        let mut routes = BTreeMap::new();
        routes.insert("backend".to_string(), route);
        routes
    }

    #[test]
    fn test_missing_route_is_fatal() {
        let proxy = dataplane_proxy(dataplane(), mesh("m1"), BTreeMap::new(), BTreeMap::new());
        let err = OutboundProxyGenerator
            .generate(&proxy, &mut NameRegistry::new())
            .unwrap_err();
        assert!(matches!(
            err,
            ConvoyError::MissingTrafficRoute { index: 0, ref service } if service == "backend"
        ));
    }

    #[test]
    fn test_split_by_tags() {
        let route = route(
            "backend",
            vec![
                (90, tags(&[(SERVICE_TAG, "backend"), ("version", "v1")])),
                (10, tags(&[(SERVICE_TAG, "backend"), ("version", "v2")])),
                (0, tags(&[(SERVICE_TAG, "backend"), ("version", "v3")])),
            ],
        );
        let proxy = dataplane_proxy(dataplane(), mesh("m1"), routes(route), backend_endpoints());

        let resources = OutboundProxyGenerator
            .generate(&proxy, &mut NameRegistry::new())
            .unwrap();
        assert_eq!(
            resources.names(ResourceType::Cluster),
            vec!["backend{version=v1}", "backend{version=v2}"]
        );

        match &resources.get(ResourceType::Endpoint, "backend{version=v1}").unwrap().payload {
            ResourcePayload::Endpoint(cla) => {
                assert_eq!(cla.total_count(), 1);
                assert_eq!(cla.all_endpoints().next().unwrap().address, "10.0.0.5");
            }
            other => panic!("unexpected payload {:?}", other),
        }

        match &resources.get(ResourceType::Listener, "outbound:127.0.0.1:20001").unwrap().payload {
            ResourcePayload::Listener(listener) => {
                assert_eq!(listener.metadata["source_service"], "web");
                assert_eq!(listener.metadata["destination_service"], "backend");
                match &listener.filter_chains[0].filters[0].filter_type {
                    NetworkFilterType::TcpProxy {
                        target: TcpProxyTarget::WeightedClusters(weighted),
                        ..
                    } => {
                        assert_eq!(weighted.len(), 2);
                        assert_eq!(weighted[0].weight, 90);
                    }
                    other => panic!("unexpected filter {:?}", other),
                }
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_single_tagged_destination_uses_bare_service_name() {
        let route = route("backend", vec![(100, tags(&[(SERVICE_TAG, "backend"), ("version", "v1")]))]);
        let proxy = dataplane_proxy(dataplane(), mesh("m1"), routes(route), backend_endpoints());

        let resources = OutboundProxyGenerator
            .generate(&proxy, &mut NameRegistry::new())
            .unwrap();
        assert_eq!(resources.names(ResourceType::Cluster), vec!["backend"]);
        assert_eq!(resources.names(ResourceType::Endpoint), vec!["backend"]);
        match &resources.get(ResourceType::Endpoint, "backend").unwrap().payload {
            ResourcePayload::Endpoint(cla) => {
                assert_eq!(cla.total_count(), 1);
                assert_eq!(cla.all_endpoints().next().unwrap().address, "10.0.0.5");
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_bare_name_bound_by_earlier_interface_falls_back_to_tagged_name() {
        let mut web = dataplane();
        web.networking.outbound.push(crate::model::resources::Outbound {
            address: None,
            port: 20002,
            service: "backend-canary".to_string(),
        });
        let mut route_map = routes(route(
            "backend",
            vec![(100, tags(&[(SERVICE_TAG, "backend"), ("version", "v1")]))],
        ));
        route_map.insert(
            "backend-canary".to_string(),
            route(
                "backend-canary",
                vec![(100, tags(&[(SERVICE_TAG, "backend"), ("version", "v2")]))],
            ),
        );
        let proxy = dataplane_proxy(web, mesh("m1"), route_map, backend_endpoints());

        let resources = OutboundProxyGenerator
            .generate(&proxy, &mut NameRegistry::new())
            .unwrap();
        assert_eq!(
            resources.names(ResourceType::Cluster),
            vec!["backend", "backend{version=v2}"]
        );
        match &resources.get(ResourceType::Endpoint, "backend{version=v2}").unwrap().payload {
            ResourcePayload::Endpoint(cla) => {
                assert_eq!(cla.total_count(), 1);
                assert_eq!(cla.all_endpoints().next().unwrap().address, "10.0.0.6");
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_only_zero_weights_is_rejected() {
        let route = route("backend", vec![(0, tags(&[(SERVICE_TAG, "backend")]))]);
        let proxy = dataplane_proxy(dataplane(), mesh("m1"), routes(route), backend_endpoints());

        let err = OutboundProxyGenerator
            .generate(&proxy, &mut NameRegistry::new())
            .unwrap_err();
        assert!(err.to_string().contains("outbound interface [0]"));
    }

    #[test]
    fn test_wildcard_destination_routes_to_outbound_service() {
        let route = route("backend", vec![(100, tags(&[(SERVICE_TAG, "*")]))]);
        let proxy = dataplane_proxy(dataplane(), mesh("m1"), routes(route), backend_endpoints());

        let resources = OutboundProxyGenerator
            .generate(&proxy, &mut NameRegistry::new())
            .unwrap();
        assert_eq!(resources.names(ResourceType::Cluster), vec!["backend"]);
        match &resources.get(ResourceType::Endpoint, "backend").unwrap().payload {
            ResourcePayload::Endpoint(cla) => assert_eq!(cla.total_count(), 2),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_mtls_clusters_carry_sni() {
        let mut mtls_mesh = mesh("m1");
        mtls_mesh.mtls_enabled = true;
        let route = route("backend", vec![(100, tags(&[(SERVICE_TAG, "backend")]))]);
        let proxy = dataplane_proxy(dataplane(), mtls_mesh, routes(route), backend_endpoints());

        let resources = OutboundProxyGenerator
            .generate(&proxy, &mut NameRegistry::new())
            .unwrap();
        match &resources.get(ResourceType::Cluster, "backend").unwrap().payload {
            ResourcePayload::Cluster(cluster) => assert_eq!(
                cluster.tls_context.as_ref().unwrap().sni.as_deref(),
                Some("backend{mesh=m1}")
            ),
            other => panic!("unexpected payload {:?}", other),
        }
    }
}
