//! Proxy model handed to the generators
//!
//! A `Proxy` bundles everything the builders resolved for one dataplane,
//! zone ingress or zone egress: identity, owner resource, endpoint maps and
//! the policies that apply to it.

use std::collections::BTreeMap;
use std::fmt;

use convoy_common::MESH_TAG;

use crate::model::{
    Dataplane, ExternalService, GatewayRoute, Mesh, ProxyTemplate, ResourceKey, TagSelectorSet,
    Tags, TrafficPermission, TrafficRoute, ZoneEgress, ZoneIngress,
};

/// Priority of endpoints in the local zone
pub const PRIORITY_LOCAL: u32 = 0;

/// Priority of endpoints in other zones
pub const PRIORITY_REMOTE: u32 = 1;

/// Zone and failover priority of an endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Locality {
    pub zone: String,
    pub priority: u32,
}

impl Locality {
    pub fn local(zone: impl Into<String>) -> Self {
        Self {
            zone: zone.into(),
            priority: PRIORITY_LOCAL,
        }
    }

    pub fn remote(zone: impl Into<String>) -> Self {
        Self {
            zone: zone.into(),
            priority: PRIORITY_REMOTE,
        }
    }
}

/// Marks an endpoint that points at an external service
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalServiceEndpoint {
    /// Mesh owning the external service
    pub mesh: String,
    pub tls_enabled: bool,
    pub server_name: Option<String>,
}

/// One reachable instance of a service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub target: String,
    pub port: u32,
    pub tags: Tags,
    pub weight: u32,
    pub locality: Option<Locality>,
    pub external_service: Option<ExternalServiceEndpoint>,
}

impl Endpoint {
    pub fn is_external_service(&self) -> bool {
        self.external_service.is_some()
    }

    pub fn zone(&self) -> Option<&str> {
        self.locality.as_ref().map(|l| l.zone.as_str())
    }

    /// The mesh tag, or the owning mesh of an external service endpoint
    /// whose tags do not carry one
    pub fn mesh(&self) -> Option<&str> {
        self.tags.get(MESH_TAG).or_else(|| {
            self.external_service
                .as_ref()
                .map(|es| es.mesh.as_str())
                .filter(|mesh| !mesh.is_empty())
        })
    }
}

/// Endpoints keyed by service name
pub type EndpointMap = BTreeMap<String, Vec<Endpoint>>;

/// Tag selectors of the destinations routed to, keyed by service name
pub type DestinationMap = BTreeMap<String, TagSelectorSet>;

/// Endpoints whose tags satisfy a selector
pub fn filter_endpoints(endpoints: &[Endpoint], selector: &Tags) -> Vec<Endpoint> {
    endpoints
        .iter()
        .filter(|e| selector.matches(&e.tags))
        .cloned()
        .collect()
}

/// Discovery API version a proxy speaks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ApiVersion {
    #[default]
    V3,
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiVersion::V3 => f.write_str("v3"),
        }
    }
}

/// Outbound targets and the routes that select them
#[derive(Debug, Clone, Default)]
pub struct Routing {
    pub outbound_targets: EndpointMap,
    /// Best traffic route per outbound service
    pub traffic_routes: BTreeMap<String, TrafficRoute>,
}

/// Mesh-wide context of a dataplane proxy
#[derive(Debug, Clone, Default)]
pub struct MeshContext {
    pub mesh: Mesh,
    /// Destinations routed to from this dataplane
    pub destinations: DestinationMap,
}

/// Policies applying to a dataplane
#[derive(Debug, Clone, Default)]
pub struct DataplanePolicies {
    /// Traffic permissions keyed by the inbound interface they protect
    pub traffic_permissions: BTreeMap<String, Vec<TrafficPermission>>,
    pub proxy_template: Option<ProxyTemplate>,
}

/// Policies read by a zone ingress proxy across all meshes
#[derive(Debug, Clone, Default)]
pub struct ZoneIngressPolicies {
    pub traffic_routes: Vec<TrafficRoute>,
    pub gateway_routes: Vec<GatewayRoute>,
    pub meshes: BTreeMap<String, Mesh>,
}

/// Everything a zone egress serves for one mesh
#[derive(Debug, Clone, Default)]
pub struct MeshResources {
    pub mesh: Mesh,
    pub traffic_routes: Vec<TrafficRoute>,
    pub external_services: Vec<ExternalService>,
    pub endpoint_map: EndpointMap,
}

/// Zone egress and the meshes it serves
#[derive(Debug, Clone, Default)]
pub struct ZoneEgressPolicies {
    pub zone_ingresses: Vec<ZoneIngress>,
    pub mesh_resources: Vec<MeshResources>,
}

/// Resource a proxy is built for
#[derive(Debug, Clone)]
pub enum ProxyOwner {
    Dataplane {
        dataplane: Dataplane,
        mesh: MeshContext,
        policies: DataplanePolicies,
    },
    ZoneIngress {
        zone_ingress: ZoneIngress,
        policies: ZoneIngressPolicies,
    },
    ZoneEgress {
        zone_egress: ZoneEgress,
        policies: ZoneEgressPolicies,
    },
}

impl ProxyOwner {
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyOwner::Dataplane { .. } => "dataplane",
            ProxyOwner::ZoneIngress { .. } => "zone ingress",
            ProxyOwner::ZoneEgress { .. } => "zone egress",
        }
    }
}

/// A proxy with everything needed to generate its configuration
#[derive(Debug, Clone)]
pub struct Proxy {
    pub id: ResourceKey,
    pub api_version: ApiVersion,
    /// Version of the owner resource, reused by a few generated resources
    pub version: String,
    pub metadata: BTreeMap<String, String>,
    pub routing: Routing,
    pub owner: ProxyOwner,
}

impl Proxy {
    pub fn node_id(&self) -> String {
        self.id.node_id()
    }

    pub fn dataplane(&self) -> Option<(&Dataplane, &MeshContext, &DataplanePolicies)> {
        match &self.owner {
            ProxyOwner::Dataplane {
                dataplane,
                mesh,
                policies,
            } => Some((dataplane, mesh, policies)),
            _ => None,
        }
    }
}
