//! Endpoint maps: which network endpoints back each service

use std::collections::BTreeMap;

use tracing::debug;

use convoy_common::{MESH_TAG, Result};

use crate::model::{AvailableService, Dataplane, ExternalService, Mesh, Tags, ZoneEgress, ZoneIngress};
use crate::proxy::{DestinationMap, Endpoint, EndpointMap, ExternalServiceEndpoint, Locality};

/// Locality of an endpoint carrying `tags`, seen from `local_zone`.
///
/// Without a zone tag there is no locality at all; standalone deployments
/// never tag zones and locality-aware balancing does not apply to them.
pub fn locality_from_tags(local_zone: &str, tags: &Tags) -> Option<Locality> {
    let zone = tags.zone()?;
    if zone == local_zone {
        Some(Locality::local(zone))
    } else {
        Some(Locality::remote(zone))
    }
}

fn external_service_marker(external_service: &ExternalService) -> ExternalServiceEndpoint {
    ExternalServiceEndpoint {
        mesh: external_service.meta.mesh.clone(),
        tls_enabled: external_service.tls_enabled(),
        server_name: external_service
            .networking
            .tls
            .as_ref()
            .and_then(|tls| tls.server_name.clone()),
    }
}

fn external_endpoint(
    external_service: &ExternalService,
    target: &str,
    port: u32,
    local_zone: &str,
) -> Endpoint {
    let tags = external_service
        .tags
        .clone()
        .with_tag(MESH_TAG, external_service.meta.mesh.as_str());
    external_endpoint_with_tags(external_service, tags, target, port, local_zone)
}

fn external_endpoint_with_tags(
    external_service: &ExternalService,
    tags: Tags,
    target: &str,
    port: u32,
    local_zone: &str,
) -> Endpoint {
    Endpoint {
        target: target.to_string(),
        port,
        locality: locality_from_tags(local_zone, &tags),
        tags,
        weight: 1,
        external_service: Some(external_service_marker(external_service)),
    }
}

fn dataplane_endpoints<'a>(
    dataplane: &'a Dataplane,
    zone: &'a str,
) -> impl Iterator<Item = (String, Endpoint)> + 'a {
    dataplane.healthy_inbounds().filter_map(move |inbound| {
        let service = inbound.tags.service()?;
        let iface = dataplane.inbound_interface(inbound);
        let endpoint = Endpoint {
            target: iface.data_plane_ip,
            port: iface.data_plane_port,
            tags: inbound
                .tags
                .clone()
                .with_tag(MESH_TAG, dataplane.meta.mesh.as_str()),
            weight: 1,
            locality: Some(Locality::local(inbound.tags.zone().unwrap_or(zone))),
            external_service: None,
        };
        Some((service.to_string(), endpoint))
    })
}

/// Endpoints a zone ingress forwards to.
///
/// Dataplane endpoints are kept only when their service is present in
/// `destinations` and their tags (plus the mesh tag) satisfy one of the
/// service's selectors. Every external service gets one endpoint at the
/// local zone egress, tagged with its own tags; with no local egress they
/// are left out. Returns `None` when there is nothing to route.
pub fn build_endpoint_map(
    destinations: &DestinationMap,
    zone_egress: Option<&ZoneEgress>,
    dataplanes: &[Dataplane],
    external_services: &[ExternalService],
) -> Option<EndpointMap> {
    if destinations.is_empty() {
        return None;
    }

    let local_zone = zone_egress.map(|egress| egress.zone.as_str()).unwrap_or_default();
    let mut outbound = EndpointMap::new();
    for dataplane in dataplanes {
        for (service, endpoint) in dataplane_endpoints(dataplane, local_zone) {
            let Some(selectors) = destinations.get(&service) else {
                continue;
            };
            if selectors.matches(&endpoint.tags) {
                outbound.entry(service).or_default().push(endpoint);
            }
        }
    }

    if let Some(egress) = zone_egress {
        for external_service in external_services {
            let Some(service) = external_service.tags.service() else {
                continue;
            };
            let endpoint = external_endpoint_with_tags(
                external_service,
                external_service.tags.clone(),
                &egress.networking.address,
                egress.networking.port,
                &egress.zone,
            );
            outbound.entry(service.to_string()).or_default().push(endpoint);
        }
    }

    Some(outbound)
}

/// Endpoints visible to the dataplanes of one mesh.
///
/// Local dataplanes are reached directly, other zones through their ingress
/// (or through the local egress when the mesh routes via egress), and
/// external services directly or through the local egress.
pub fn build_dataplane_endpoint_map(
    mesh: &Mesh,
    local_zone: &str,
    dataplanes: &[Dataplane],
    zone_ingresses: &[ZoneIngress],
    zone_egress: Option<&ZoneEgress>,
    external_services: &[ExternalService],
) -> Result<EndpointMap> {
    let via_egress = if mesh.zone_egress_enabled { zone_egress } else { None };
    let mut outbound = EndpointMap::new();

    for dataplane in dataplanes.iter().filter(|dp| dp.meta.mesh == mesh.name()) {
        if dataplane.zone().is_some_and(|zone| zone != local_zone) {
            continue;
        }
        for (service, endpoint) in dataplane_endpoints(dataplane, local_zone) {
            outbound.entry(service).or_default().push(endpoint);
        }
    }

    for ingress in zone_ingresses {
        if ingress.zone.is_empty() || ingress.zone == local_zone {
            continue;
        }
        let (target, port) = match via_egress {
            Some(egress) => (egress.networking.address.as_str(), egress.networking.port),
            None => (ingress.public_address(), ingress.public_port()),
        };
        for available in ingress
            .available_services
            .iter()
            .filter(|s| s.mesh == mesh.name() && !s.external_service)
        {
            let Some(service) = available.tags.service() else {
                continue;
            };
            outbound.entry(service.to_string()).or_default().push(Endpoint {
                target: target.to_string(),
                port,
                tags: available.tags.clone().with_tag(MESH_TAG, mesh.name()),
                weight: available.instances.max(1),
                locality: Some(Locality::remote(ingress.zone.as_str())),
                external_service: None,
            });
        }
    }

    for external_service in external_services.iter().filter(|es| es.meta.mesh == mesh.name()) {
        let Some(service) = external_service.tags.service() else {
            continue;
        };
        let endpoint = match (mesh.zone_egress_enabled, zone_egress) {
            (true, Some(egress)) => external_endpoint(
                external_service,
                &egress.networking.address,
                egress.networking.port,
                local_zone,
            ),
            (true, None) => {
                debug!(
                    mesh = %mesh.name(),
                    service = %service,
                    "No local zone egress, skipping external service"
                );
                continue;
            }
            (false, _) => {
                let (host, port) = external_service.host_port()?;
                external_endpoint(external_service, &host, port, local_zone)
            }
        };
        outbound.entry(service.to_string()).or_default().push(endpoint);
    }

    Ok(outbound)
}

/// Endpoints a zone egress forwards external-service traffic of one mesh to.
///
/// External services without a zone tag or pinned to the local zone are
/// reached on their own address; those pinned to another zone go through
/// that zone's ingresses.
pub fn build_egress_endpoint_map(
    mesh: &str,
    local_zone: &str,
    zone_ingresses: &[ZoneIngress],
    external_services: &[ExternalService],
) -> Result<EndpointMap> {
    let mut outbound = EndpointMap::new();
    for external_service in external_services.iter().filter(|es| es.meta.mesh == mesh) {
        let Some(service) = external_service.tags.service() else {
            continue;
        };
        match external_service.tags.zone() {
            Some(zone) if zone != local_zone => {
                for ingress in zone_ingresses.iter().filter(|i| i.zone == zone) {
                    outbound.entry(service.to_string()).or_default().push(external_endpoint(
                        external_service,
                        ingress.public_address(),
                        ingress.public_port(),
                        local_zone,
                    ));
                }
            }
            _ => {
                let (host, port) = external_service.host_port()?;
                outbound
                    .entry(service.to_string())
                    .or_default()
                    .push(external_endpoint(external_service, &host, port, local_zone));
            }
        }
    }
    Ok(outbound)
}

/// Services a zone ingress makes available: healthy inbounds of this zone's
/// dataplanes grouped by mesh and tags, plus external services pinned to
/// this zone.
pub fn available_services(
    zone: &str,
    dataplanes: &[Dataplane],
    external_services: &[ExternalService],
) -> Vec<AvailableService> {
    let mut grouped: BTreeMap<(String, Tags), (u32, bool)> = BTreeMap::new();

    for dataplane in dataplanes {
        if dataplane.zone().is_some_and(|z| z != zone) {
            continue;
        }
        for inbound in dataplane.healthy_inbounds() {
            if inbound.tags.service().is_none() {
                continue;
            }
            let entry = grouped
                .entry((dataplane.meta.mesh.clone(), inbound.tags.clone()))
                .or_insert((0, false));
            entry.0 += 1;
        }
    }

    for external_service in external_services {
        if external_service.tags.zone() != Some(zone) {
            continue;
        }
        let entry = grouped
            .entry((external_service.meta.mesh.clone(), external_service.tags.clone()))
            .or_insert((0, true));
        entry.0 += 1;
        entry.1 = true;
    }

    grouped
        .into_iter()
        .map(|((mesh, tags), (instances, external_service))| AvailableService {
            mesh,
            tags,
            instances,
            external_service,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use convoy_common::{SERVICE_TAG, ZONE_TAG};

    use crate::model::resources::{
        DataplaneNetworking, ExternalServiceNetworking, Health, Inbound, ResourceMeta,
        ZoneEgressNetworking, ZoneIngressNetworking,
    };
    use crate::proxy::{PRIORITY_LOCAL, PRIORITY_REMOTE};

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs.iter().copied().collect()
    }

    fn dataplane(mesh: &str, name: &str, ip: &str, inbound_tags: Tags, ready: bool) -> Dataplane {
        Dataplane {
            meta: ResourceMeta::new(mesh, name),
            networking: DataplaneNetworking {
                address: ip.to_string(),
                inbound: vec![Inbound {
                    port: 8080,
                    tags: inbound_tags,
                    health: Some(Health { ready }),
                    ..Default::default()
                }],
                ..Default::default()
            },
            metrics: None,
        }
    }

    fn external_service(mesh: &str, name: &str, es_tags: Tags) -> ExternalService {
        ExternalService {
            meta: ResourceMeta::new(mesh, name),
            tags: es_tags,
            networking: ExternalServiceNetworking {
                address: format!("{}.example.com:443", name),
                tls: None,
            },
        }
    }

    fn egress(zone: &str) -> ZoneEgress {
        ZoneEgress {
            meta: ResourceMeta::new("", "egress"),
            zone: zone.to_string(),
            networking: ZoneEgressNetworking {
                address: "10.0.9.9".to_string(),
                port: 10002,
            },
        }
    }

    fn destinations(pairs: &[(&str, Tags)]) -> DestinationMap {
        let mut map = DestinationMap::new();
        for (service, selector) in pairs {
            map.entry(service.to_string()).or_default().add(selector.clone());
        }
        map
    }

    #[test]
    fn test_locality_from_tags() {
        assert_eq!(locality_from_tags("zone-1", &tags(&[(SERVICE_TAG, "a")])), None);
        assert_eq!(
            locality_from_tags("zone-1", &tags(&[(ZONE_TAG, "zone-1")])).unwrap().priority,
            PRIORITY_LOCAL
        );
        assert_eq!(
            locality_from_tags("zone-1", &tags(&[(ZONE_TAG, "zone-2")])).unwrap().priority,
            PRIORITY_REMOTE
        );
    }

    #[test]
    fn test_empty_destinations_route_nothing() {
        let dps = vec![dataplane("m1", "dp", "10.0.0.1", tags(&[(SERVICE_TAG, "backend")]), true)];
        assert!(build_endpoint_map(&DestinationMap::new(), None, &dps, &[]).is_none());
    }

    #[test]
    fn test_endpoint_map_matches_selectors_with_mesh_tag() {
        let dps = vec![
            dataplane("m1", "dp-1", "10.0.0.1", tags(&[(SERVICE_TAG, "backend")]), true),
            dataplane("m2", "dp-2", "10.0.0.2", tags(&[(SERVICE_TAG, "backend")]), true),
            dataplane("m1", "dp-3", "10.0.0.3", tags(&[(SERVICE_TAG, "backend")]), false),
            dataplane("m1", "dp-4", "10.0.0.4", tags(&[(SERVICE_TAG, "web")]), true),
        ];
        let destinations = destinations(&[("backend", tags(&[(SERVICE_TAG, "backend"), (MESH_TAG, "m1")]))]);

        let map = build_endpoint_map(&destinations, None, &dps, &[]).unwrap();
        assert_eq!(map.len(), 1);
        let backend = &map["backend"];
        assert_eq!(backend.len(), 1);
        assert_eq!(backend[0].target, "10.0.0.1");
        assert_eq!(backend[0].weight, 1);
        assert_eq!(backend[0].locality.as_ref().unwrap().priority, PRIORITY_LOCAL);
    }

    #[test]
    fn test_external_services_go_through_local_egress() {
        let destinations = destinations(&[("httpbin", tags(&[(SERVICE_TAG, "httpbin"), (MESH_TAG, "m1")]))]);
        let services = vec![external_service("m1", "httpbin", tags(&[(SERVICE_TAG, "httpbin")]))];

        let without_egress = build_endpoint_map(&destinations, None, &[], &services).unwrap();
        assert!(without_egress.is_empty());

        let egress = egress("zone-1");
        let map = build_endpoint_map(&destinations, Some(&egress), &[], &services).unwrap();
        let endpoint = &map["httpbin"][0];
        assert_eq!(endpoint.target, "10.0.9.9");
        assert_eq!(endpoint.port, 10002);
        assert!(endpoint.is_external_service());
        assert_eq!(endpoint.locality, None);
    }

    #[test]
    fn test_external_services_are_not_filtered_by_destinations() {
        let destinations = destinations(&[("backend", tags(&[(SERVICE_TAG, "backend"), (MESH_TAG, "m1")]))]);
        let services = vec![external_service(
            "m1",
            "httpbin",
            tags(&[(SERVICE_TAG, "httpbin"), ("protocol", "http")]),
        )];

        let map = build_endpoint_map(&destinations, Some(&egress("zone-1")), &[], &services).unwrap();
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["httpbin"]);
        let endpoint = &map["httpbin"][0];
        assert_eq!(endpoint.tags, tags(&[(SERVICE_TAG, "httpbin"), ("protocol", "http")]));
        assert_eq!(endpoint.weight, 1);
        assert!(endpoint.is_external_service());
        assert_eq!(endpoint.mesh(), Some("m1"));
    }

    #[test]
    fn test_dataplane_endpoint_map_reaches_other_zones_through_ingress() {
        let mesh = Mesh {
            meta: ResourceMeta::new("", "m1"),
            ..Default::default()
        };
        let ingress = ZoneIngress {
            meta: ResourceMeta::new("", "ingress-2"),
            zone: "zone-2".to_string(),
            networking: ZoneIngressNetworking {
                address: "10.1.0.1".to_string(),
                port: 10001,
                advertised_address: Some("192.168.0.1".to_string()),
                advertised_port: None,
            },
            available_services: vec![AvailableService {
                mesh: "m1".to_string(),
                tags: tags(&[(SERVICE_TAG, "backend"), (ZONE_TAG, "zone-2")]),
                instances: 3,
                external_service: false,
            }],
        };
        let dps = vec![dataplane(
            "m1",
            "dp-1",
            "10.0.0.1",
            tags(&[(SERVICE_TAG, "backend"), (ZONE_TAG, "zone-1")]),
            true,
        )];

        let map = build_dataplane_endpoint_map(&mesh, "zone-1", &dps, &[ingress], None, &[]).unwrap();
        let backend = &map["backend"];
        assert_eq!(backend.len(), 2);
        assert_eq!(backend[1].target, "192.168.0.1");
        assert_eq!(backend[1].weight, 3);
        assert_eq!(backend[1].locality.as_ref().unwrap().priority, PRIORITY_REMOTE);
    }

    #[test]
    fn test_egress_endpoint_map_names_differ_by_zone() {
        let services = vec![
            external_service("m1", "local", tags(&[(SERVICE_TAG, "local")])),
            external_service("m1", "remote", tags(&[(SERVICE_TAG, "remote"), (ZONE_TAG, "zone-2")])),
        ];
        let ingress = ZoneIngress {
            meta: ResourceMeta::new("", "ingress-2"),
            zone: "zone-2".to_string(),
            networking: ZoneIngressNetworking {
                address: "10.1.0.1".to_string(),
                port: 10001,
                ..Default::default()
            },
            ..Default::default()
        };

        let map = build_egress_endpoint_map("m1", "zone-1", &[ingress], &services).unwrap();
        assert_eq!(map["local"][0].target, "local.example.com");
        assert_eq!(map["local"][0].port, 443);
        assert_eq!(map["remote"][0].target, "10.1.0.1");
        assert_eq!(map["remote"][0].zone(), Some("zone-2"));
    }

    #[test]
    fn test_available_services_counts_instances() {
        let dps = vec![
            dataplane("m1", "dp-1", "10.0.0.1", tags(&[(SERVICE_TAG, "backend")]), true),
            dataplane("m1", "dp-2", "10.0.0.2", tags(&[(SERVICE_TAG, "backend")]), true),
            dataplane("m1", "dp-3", "10.0.0.3", tags(&[(SERVICE_TAG, "backend")]), false),
            dataplane(
                "m1",
                "dp-4",
                "10.0.0.4",
                tags(&[(SERVICE_TAG, "web"), (ZONE_TAG, "zone-2")]),
                true,
            ),
        ];
        let services = vec![
            external_service("m1", "pinned", tags(&[(SERVICE_TAG, "pinned"), (ZONE_TAG, "zone-1")])),
            external_service("m1", "global", tags(&[(SERVICE_TAG, "global")])),
        ];

        let available = available_services("zone-1", &dps, &services);
        assert_eq!(available.len(), 2);
        assert_eq!(available[0].tags.service(), Some("backend"));
        assert_eq!(available[0].instances, 2);
        assert!(!available[0].external_service);
        assert_eq!(available[1].tags.service(), Some("pinned"));
        assert!(available[1].external_service);
    }
}
