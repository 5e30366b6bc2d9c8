//! Destination resolution from traffic routes

use std::collections::BTreeMap;

use convoy_common::{MATCH_ALL, MESH_TAG, SERVICE_TAG};

use crate::model::{Tags, TrafficRoute, ZoneIngress};
use crate::proxy::DestinationMap;

/// Route destinations of one mesh keyed by service, `*` holding the wildcard ones
pub type RouteDestinations = BTreeMap<String, Vec<Tags>>;

/// Collect the weighted destinations of a set of routes by service.
///
/// Zero-weight destinations never become targets and are left out.
pub fn destinations_from_routes<'a>(
    routes: impl IntoIterator<Item = &'a TrafficRoute>,
) -> RouteDestinations {
    let mut destinations = RouteDestinations::new();
    for route in routes {
        for split in route.conf.iter().filter(|split| split.weight > 0) {
            let Some(service) = split.destination.service() else {
                continue;
            };
            let selectors = destinations.entry(service.to_string()).or_default();
            if !selectors.contains(&split.destination) {
                selectors.push(split.destination.clone());
            }
        }
    }
    destinations
}

/// Route destinations grouped per mesh
pub fn destinations_by_mesh(routes: &[TrafficRoute]) -> BTreeMap<String, RouteDestinations> {
    let mut by_mesh: BTreeMap<String, Vec<&TrafficRoute>> = BTreeMap::new();
    for route in routes {
        by_mesh.entry(route.meta.mesh.clone()).or_default().push(route);
    }
    by_mesh
        .into_iter()
        .map(|(mesh, routes)| (mesh, destinations_from_routes(routes)))
        .collect()
}

/// Selectors a service must be matched against: the ones naming the service,
/// then the wildcard ones.
pub fn service_destinations(destinations: &RouteDestinations, service: &str) -> Vec<Tags> {
    let mut selectors: Vec<Tags> = destinations.get(service).cloned().unwrap_or_default();
    if service != MATCH_ALL {
        for wildcard in destinations.get(MATCH_ALL).into_iter().flatten() {
            if !selectors.contains(wildcard) {
                selectors.push(wildcard.clone());
            }
        }
    }
    selectors
}

/// Destinations map of a zone ingress: for every advertised service, the
/// selectors of its mesh's routes, each restricted to that mesh.
pub fn build_destination_map(zone_ingress: &ZoneIngress, routes: &[TrafficRoute]) -> DestinationMap {
    let by_mesh = destinations_by_mesh(routes);
    let mut destinations = DestinationMap::new();
    for available in &zone_ingress.available_services {
        let Some(service) = available.tags.service() else {
            continue;
        };
        let Some(mesh_destinations) = by_mesh.get(&available.mesh) else {
            continue;
        };
        for selector in service_destinations(mesh_destinations, service) {
            destinations
                .entry(service.to_string())
                .or_default()
                .add(selector.with_tag(MESH_TAG, available.mesh.as_str()));
        }
    }
    destinations
}

/// Destinations a dataplane routes to, one entry per outbound service
pub fn dataplane_destinations(traffic_routes: &BTreeMap<String, TrafficRoute>) -> DestinationMap {
    let mut destinations = DestinationMap::new();
    for (service, route) in traffic_routes {
        for split in route.conf.iter().filter(|split| split.weight > 0) {
            let selector = concrete_destination(&split.destination, service);
            destinations.entry(service.clone()).or_default().add(selector);
        }
    }
    destinations
}

/// Replace a wildcard service in a route destination with the service the
/// route was selected for
pub fn concrete_destination(destination: &Tags, service: &str) -> Tags {
    match destination.service() {
        Some(MATCH_ALL) | None => destination.clone().with_tag(SERVICE_TAG, service),
        Some(_) => destination.clone(),
    }
}
