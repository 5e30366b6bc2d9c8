//! Selection of the policies that apply to a dataplane

use std::collections::BTreeMap;

use convoy_common::{MESH_TAG, SERVICE_TAG};

use crate::model::{Dataplane, ProxyTemplate, Tags, TrafficPermission, TrafficRoute};

/// Tag sets a dataplane presents as a traffic source
fn source_tags(dataplane: &Dataplane) -> Vec<Tags> {
    let mut sources: Vec<Tags> = dataplane
        .networking
        .inbound
        .iter()
        .map(|inbound| {
            inbound
                .tags
                .clone()
                .with_tag(MESH_TAG, dataplane.meta.mesh.as_str())
        })
        .collect();
    if sources.is_empty() {
        sources.push(Tags::new().with_tag(MESH_TAG, dataplane.meta.mesh.as_str()));
    }
    sources
}

/// Specificity of the most specific selector matching any of `tags`
fn best_match(selectors: &[Tags], tags: &[Tags]) -> Option<usize> {
    selectors
        .iter()
        .filter(|selector| tags.iter().any(|t| selector.matches(t)))
        .map(Tags::specificity)
        .max()
}

/// Best traffic route for each outbound service of a dataplane.
///
/// A route applies when one of its sources matches the dataplane and one of
/// its destinations matches the service. The most specific source match
/// wins, then the most specific destination match, then the first route in
/// name order.
pub fn select_traffic_routes(
    dataplane: &Dataplane,
    routes: &[TrafficRoute],
) -> BTreeMap<String, TrafficRoute> {
    let sources = source_tags(dataplane);
    let mut sorted: Vec<&TrafficRoute> = routes.iter().collect();
    sorted.sort_by(|a, b| a.meta.name.cmp(&b.meta.name));

    let mut selected = BTreeMap::new();
    for outbound in &dataplane.networking.outbound {
        if selected.contains_key(&outbound.service) {
            continue;
        }
        let destination = [Tags::new().with_tag(SERVICE_TAG, outbound.service.as_str())];

        let mut best: Option<((usize, usize), &TrafficRoute)> = None;
        for route in &sorted {
            let Some(source_score) = best_match(&route.sources, &sources) else {
                continue;
            };
            let Some(destination_score) = best_match(&route.destinations, &destination) else {
                continue;
            };
            let score = (source_score, destination_score);
            if best.is_none_or(|(current, _)| score > current) {
                best = Some((score, route));
            }
        }
        if let Some((_, route)) = best {
            selected.insert(outbound.service.clone(), route.clone());
        }
    }
    selected
}

/// Traffic permissions per inbound interface, keyed by the interface's
/// `ip:port:workload_port` rendering
pub fn select_traffic_permissions(
    dataplane: &Dataplane,
    permissions: &[TrafficPermission],
) -> BTreeMap<String, Vec<TrafficPermission>> {
    let mut selected = BTreeMap::new();
    for inbound in &dataplane.networking.inbound {
        let tags = [inbound
            .tags
            .clone()
            .with_tag(MESH_TAG, dataplane.meta.mesh.as_str())];
        let matching: Vec<TrafficPermission> = permissions
            .iter()
            .filter(|permission| best_match(&permission.destinations, &tags).is_some())
            .cloned()
            .collect();
        selected.insert(dataplane.inbound_interface(inbound).to_string(), matching);
    }
    selected
}

/// Most specific proxy template whose selectors match the dataplane
pub fn select_proxy_template(
    dataplane: &Dataplane,
    templates: &[ProxyTemplate],
) -> Option<ProxyTemplate> {
    let sources = source_tags(dataplane);
    let mut best: Option<(usize, &ProxyTemplate)> = None;
    for template in templates {
        let Some(score) = best_match(&template.selectors, &sources) else {
            continue;
        };
        let better = match best {
            None => true,
            Some((current, chosen)) => {
                score > current || (score == current && template.meta.name < chosen.meta.name)
            }
        };
        if better {
            best = Some((score, template));
        }
    }
    best.map(|(_, template)| template.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::resources::{
        DataplaneNetworking, Inbound, Outbound, ResourceMeta, WeightedDestination,
    };

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs.iter().copied().collect()
    }

    fn dataplane() -> Dataplane {
        Dataplane {
            meta: ResourceMeta::new("default", "web-1"),
            networking: DataplaneNetworking {
                address: "10.0.0.1".to_string(),
                inbound: vec![Inbound {
                    port: 8080,
                    tags: tags(&[(SERVICE_TAG, "web"), ("version", "v1")]),
                    ..Default::default()
                }],
                outbound: vec![
                    Outbound {
                        address: None,
                        port: 10001,
                        service: "backend".to_string(),
                    },
                    Outbound {
                        address: None,
                        port: 10002,
                        service: "db".to_string(),
                    },
                ],
                transparent_proxying: None,
            },
            metrics: None,
        }
    }

    fn route(name: &str, source: Tags, destination: Tags) -> TrafficRoute {
        TrafficRoute {
            meta: ResourceMeta::new("default", name),
            sources: vec![source],
            destinations: vec![destination.clone()],
            conf: vec![WeightedDestination {
                weight: 100,
                destination,
            }],
        }
    }

    #[test]
    fn test_most_specific_route_wins() {
        let routes = vec![
            route("route-all", tags(&[(SERVICE_TAG, "*")]), tags(&[(SERVICE_TAG, "*")])),
            route(
                "web-to-backend",
                tags(&[(SERVICE_TAG, "web")]),
                tags(&[(SERVICE_TAG, "backend")]),
            ),
            route(
                "other-to-backend",
                tags(&[(SERVICE_TAG, "other")]),
                tags(&[(SERVICE_TAG, "backend")]),
            ),
        ];

        let selected = select_traffic_routes(&dataplane(), &routes);
        assert_eq!(selected["backend"].meta.name, "web-to-backend");
        assert_eq!(selected["db"].meta.name, "route-all");
    }

    #[test]
    fn test_unrouted_service_is_absent() {
        let routes = vec![route(
            "web-to-backend",
            tags(&[(SERVICE_TAG, "web")]),
            tags(&[(SERVICE_TAG, "backend")]),
        )];
        let selected = select_traffic_routes(&dataplane(), &routes);
        assert!(selected.contains_key("backend"));
        assert!(!selected.contains_key("db"));
    }

    #[test]
    fn test_permissions_keyed_by_inbound_interface() {
        let permissions = vec![
            TrafficPermission {
                meta: ResourceMeta::new("default", "allow-all"),
                sources: vec![tags(&[(SERVICE_TAG, "*")])],
                destinations: vec![tags(&[(SERVICE_TAG, "*")])],
            },
            TrafficPermission {
                meta: ResourceMeta::new("default", "only-db"),
                sources: vec![tags(&[(SERVICE_TAG, "*")])],
                destinations: vec![tags(&[(SERVICE_TAG, "db")])],
            },
        ];
        let selected = select_traffic_permissions(&dataplane(), &permissions);
        let applied = &selected["10.0.0.1:8080:8080"];
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].meta.name, "allow-all");
    }

    #[test]
    fn test_proxy_template_selection() {
        let templates = vec![
            ProxyTemplate {
                meta: ResourceMeta::new("default", "b-generic"),
                selectors: vec![tags(&[(SERVICE_TAG, "*")])],
                ..Default::default()
            },
            ProxyTemplate {
                meta: ResourceMeta::new("default", "a-web-v1"),
                selectors: vec![tags(&[(SERVICE_TAG, "web"), ("version", "v1")])],
                ..Default::default()
            },
        ];
        let selected = select_proxy_template(&dataplane(), &templates).unwrap();
        assert_eq!(selected.meta.name, "a-web-v1");
        assert!(select_proxy_template(&dataplane(), &[]).is_none());
    }
}
