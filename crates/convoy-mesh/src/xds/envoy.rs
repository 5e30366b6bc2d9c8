//! Builders for the listeners, clusters and load assignments the generators emit

use std::collections::BTreeMap;

use convoy_common::SERVICE_TAG;

use crate::model::{Tags, TrafficPermission};
use crate::proxy::Endpoint;

use super::types::{
    Cluster, ClusterLoadAssignment, DownstreamTlsContext, FilterChain, FilterChainMatch,
    LbEndpoint, Listener, ListenerAddress, Locality, Metadata, NetworkFilter, RbacPolicy,
    TLS_INSPECTOR, TrafficDirection, UpstreamTlsContext, WeightedCluster,
};

/// Cluster an outbound listener splits traffic to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterInfo {
    pub name: String,
    pub weight: u32,
    pub tags: Tags,
}

/// Static cluster with a single endpoint
pub fn create_local_cluster(name: &str, address: &str, port: u32) -> Cluster {
    let mut cla = ClusterLoadAssignment::new(name);
    cla.add_locality(None, 0, vec![LbEndpoint::new(address, port)]);
    Cluster::new_static(name, cla)
}

/// Cluster forwarding to the original destination of a redirected connection
pub fn create_pass_through_cluster(name: &str) -> Cluster {
    Cluster::new_original_dst(name)
}

/// EDS cluster, optionally with subset keys and upstream TLS
pub fn create_eds_cluster(
    name: &str,
    lb_subset_keys: Vec<Vec<String>>,
    tls_context: Option<UpstreamTlsContext>,
) -> Cluster {
    Cluster {
        lb_subset_keys,
        tls_context,
        ..Cluster::new_eds(name)
    }
}

/// Group endpoints into per-locality, per-priority buckets.
///
/// Endpoints without a locality land in a bucket without one. When
/// locality-aware load balancing is off every bucket gets priority 0.
pub fn create_cluster_load_assignment(
    cluster_name: &str,
    endpoints: &[Endpoint],
    locality_aware: bool,
) -> ClusterLoadAssignment {
    let mut buckets: BTreeMap<(u32, Option<String>), Vec<LbEndpoint>> = BTreeMap::new();
    for endpoint in endpoints {
        let (priority, zone) = match &endpoint.locality {
            Some(locality) if locality_aware => (locality.priority, Some(locality.zone.clone())),
            Some(locality) => (0, Some(locality.zone.clone())),
            None => (0, None),
        };
        buckets
            .entry((priority, zone))
            .or_default()
            .push(
                LbEndpoint::new(&endpoint.target, endpoint.port)
                    .with_weight(endpoint.weight)
                    .with_metadata(endpoint.tags.to_metadata()),
            );
    }

    let mut cla = ClusterLoadAssignment::new(cluster_name);
    for ((priority, zone), lb_endpoints) in buckets {
        cla.add_locality(zone.map(Locality::zone), priority, lb_endpoints);
    }
    cla
}

/// Principal of a traffic-permission source
fn principal(mesh: &str, source: &Tags) -> String {
    match source.service() {
        Some(service) if service != convoy_common::MATCH_ALL => {
            format!("spiffe://{}/{}", mesh, service)
        }
        _ => "*".to_string(),
    }
}

fn rbac_policies(permissions: &[TrafficPermission]) -> Vec<RbacPolicy> {
    permissions
        .iter()
        .map(|permission| RbacPolicy {
            name: permission.meta.name.clone(),
            principals: permission
                .sources
                .iter()
                .map(|source| principal(&permission.meta.mesh, source))
                .collect(),
        })
        .collect()
}

/// Listener in front of a local workload.
///
/// With mTLS the chain terminates TLS, requires a client certificate and
/// enforces the traffic permissions selecting this inbound.
#[allow(clippy::too_many_arguments)]
pub fn create_inbound_listener(
    name: &str,
    address: &str,
    port: u32,
    cluster: &str,
    virtual_listener: bool,
    mtls: bool,
    permissions: &[TrafficPermission],
    metadata: &Metadata,
) -> Listener {
    let mut chain = FilterChain::new(name);
    if mtls {
        chain = chain
            .with_tls(DownstreamTlsContext {
                require_client_certificate: true,
                ..Default::default()
            })
            .with_filter(NetworkFilter::rbac(cluster, rbac_policies(permissions)));
    }
    chain = chain.with_filter(NetworkFilter::tcp_proxy(cluster, cluster));

    let mut listener = Listener::new(name, ListenerAddress::tcp(address, port))
        .with_direction(TrafficDirection::Inbound)
        .with_filter_chain(chain);
    listener.bind_to_port = !virtual_listener;
    listener.metadata = metadata.clone();
    listener
}

/// Listener for a local outbound interface, splitting traffic across clusters
pub fn create_outbound_listener(
    name: &str,
    address: &str,
    port: u32,
    service: &str,
    clusters: &[ClusterInfo],
    virtual_listener: bool,
    metadata: &Metadata,
) -> Listener {
    let filter = match clusters {
        [single] => NetworkFilter::tcp_proxy(service, &single.name),
        _ => NetworkFilter::weighted_tcp_proxy(
            service,
            clusters
                .iter()
                .map(|c| WeightedCluster::new(&c.name, c.weight))
                .collect(),
        ),
    };

    let mut listener = Listener::new(name, ListenerAddress::tcp(address, port))
        .with_direction(TrafficDirection::Outbound)
        .with_filter_chain(FilterChain::new(service).with_filter(filter));
    listener.bind_to_port = !virtual_listener;
    listener.metadata = metadata.clone();
    listener.metadata.insert(SERVICE_TAG.to_string(), service.to_string());
    listener
}

/// Listener receiving every redirected connection and handing it on to the
/// original destination
pub fn create_catch_all_listener(name: &str, address: &str, port: u32, cluster: &str) -> Listener {
    let mut listener = Listener::new(name, ListenerAddress::tcp(address, port))
        .with_filter_chain(FilterChain::new(cluster).with_filter(NetworkFilter::tcp_proxy(cluster, cluster)));
    listener.use_original_dst = true;
    listener
}

/// Listener that dispatches TLS connections to clusters by SNI
pub fn create_sni_listener(name: &str, address: &str, port: u32) -> Listener {
    let mut listener = Listener::new(name, ListenerAddress::tcp(address, port))
        .with_direction(TrafficDirection::Inbound);
    listener.listener_filters.push(TLS_INSPECTOR.to_string());
    listener
}

/// Filter chain matching one SNI and proxying to a cluster subset
pub fn create_sni_filter_chain(sni: &str, cluster: &str, subset: &Tags) -> FilterChain {
    let metadata_match = subset.clone().without_tag(SERVICE_TAG).to_metadata();
    FilterChain::new(sni)
        .with_match(FilterChainMatch::sni(sni))
        .with_filter(NetworkFilter::tcp_proxy(sni, cluster).with_metadata_match(metadata_match))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::{Locality as EndpointLocality, PRIORITY_REMOTE};
    use crate::xds::types::{DiscoveryType, NetworkFilterType, TcpProxyTarget};

    fn endpoint(target: &str, locality: Option<EndpointLocality>) -> Endpoint {
        Endpoint {
            target: target.to_string(),
            port: 8080,
            tags: [(SERVICE_TAG, "backend")].into_iter().collect(),
            weight: 1,
            locality,
            external_service: None,
        }
    }

    #[test]
    fn test_load_assignment_respects_locality_awareness() {
        let endpoints = vec![
            endpoint("10.0.0.1", Some(EndpointLocality::local("zone-1"))),
            endpoint("10.0.0.2", Some(EndpointLocality::remote("zone-2"))),
        ];

        let aware = create_cluster_load_assignment("backend", &endpoints, true);
        assert_eq!(aware.endpoints.len(), 2);
        assert_eq!(aware.endpoints[1].priority, PRIORITY_REMOTE);
        assert_eq!(aware.endpoints[1].locality, Some(Locality::zone("zone-2")));

        let unaware = create_cluster_load_assignment("backend", &endpoints, false);
        assert!(unaware.endpoints.iter().all(|le| le.priority == 0));
    }

    #[test]
    fn test_load_assignment_without_locality() {
        let cla = create_cluster_load_assignment("backend", &[endpoint("10.0.0.5", None)], true);
        assert_eq!(cla.endpoints.len(), 1);
        assert_eq!(cla.endpoints[0].locality, None);
        assert_eq!(cla.endpoints[0].lb_endpoints[0].address, "10.0.0.5");
    }

    #[test]
    fn test_outbound_listener_splits_traffic() {
        let clusters = vec![
            ClusterInfo {
                name: "backend{version=v1}".to_string(),
                weight: 90,
                tags: Tags::new(),
            },
            ClusterInfo {
                name: "backend{version=v2}".to_string(),
                weight: 10,
                tags: Tags::new(),
            },
        ];
        let listener = create_outbound_listener(
            "outbound:127.0.0.1:10001",
            "127.0.0.1",
            10001,
            "backend",
            &clusters,
            false,
            &Metadata::new(),
        );

        match &listener.filter_chains[0].filters[0].filter_type {
            NetworkFilterType::TcpProxy {
                target: TcpProxyTarget::WeightedClusters(weighted),
                ..
            } => assert_eq!(weighted.len(), 2),
            other => panic!("unexpected filter {:?}", other),
        }
        assert_eq!(listener.traffic_direction, TrafficDirection::Outbound);
    }

    #[test]
    fn test_inbound_listener_with_mtls_enforces_permissions() {
        let permission = TrafficPermission {
            meta: crate::model::ResourceMeta::new("default", "allow-web"),
            sources: vec![[(SERVICE_TAG, "web")].into_iter().collect()],
            destinations: vec![],
        };
        let listener = create_inbound_listener(
            "inbound:10.0.0.1:8080",
            "10.0.0.1",
            8080,
            "localhost:8080",
            true,
            true,
            &[permission],
            &Metadata::new(),
        );

        let chain = &listener.filter_chains[0];
        assert!(chain.tls_context.as_ref().unwrap().require_client_certificate);
        assert!(!listener.bind_to_port);
        match &chain.filters[0].filter_type {
            NetworkFilterType::Rbac { policies, .. } => {
                assert_eq!(policies[0].principals, vec!["spiffe://default/web".to_string()]);
            }
            other => panic!("unexpected filter {:?}", other),
        }
    }

    #[test]
    fn test_local_cluster_is_static() {
        let cluster = create_local_cluster("localhost:8080", "127.0.0.1", 8080);
        assert_eq!(cluster.discovery_type, DiscoveryType::Static);
        assert_eq!(cluster.load_assignment.unwrap().total_count(), 1);
    }
}
