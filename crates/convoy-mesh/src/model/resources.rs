//! Declarative mesh resources read from the resource store

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use convoy_common::{ConvoyError, LOCALHOST, Result};

use super::tags::Tags;

/// Kinds of resources kept in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    Mesh,
    Dataplane,
    TrafficRoute,
    TrafficPermission,
    ExternalService,
    ZoneIngress,
    ZoneEgress,
    ProxyTemplate,
    GatewayRoute,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Mesh => "Mesh",
            ResourceKind::Dataplane => "Dataplane",
            ResourceKind::TrafficRoute => "TrafficRoute",
            ResourceKind::TrafficPermission => "TrafficPermission",
            ResourceKind::ExternalService => "ExternalService",
            ResourceKind::ZoneIngress => "ZoneIngress",
            ResourceKind::ZoneEgress => "ZoneEgress",
            ResourceKind::ProxyTemplate => "ProxyTemplate",
            ResourceKind::GatewayRoute => "GatewayRoute",
        }
    }

    /// Global kinds are not scoped to a mesh
    pub fn is_global(&self) -> bool {
        matches!(
            self,
            ResourceKind::Mesh | ResourceKind::ZoneIngress | ResourceKind::ZoneEgress
        )
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a stored resource; `mesh` is empty for global kinds
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub mesh: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(mesh: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            mesh: mesh.into(),
            name: name.into(),
        }
    }

    /// Key of a resource that does not belong to a mesh
    pub fn global(name: impl Into<String>) -> Self {
        Self::new("", name)
    }

    /// Node id the owning proxy announces, `mesh.name` or just `name`
    pub fn node_id(&self) -> String {
        if self.mesh.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.mesh, self.name)
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.mesh.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}/{}", self.mesh, self.name)
        }
    }
}

/// Metadata common to all resources
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMeta {
    pub name: String,
    #[serde(default)]
    pub mesh: String,
    /// Store-assigned version, bumped on every update
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl ResourceMeta {
    pub fn new(mesh: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mesh: mesh.into(),
            ..Default::default()
        }
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.mesh.clone(), self.name.clone())
    }
}

// =============================================================================
// Mesh
// =============================================================================

/// Default port metrics are scraped on
pub const DEFAULT_METRICS_PORT: u32 = 5670;

/// Default metrics path
pub const DEFAULT_METRICS_PATH: &str = "/metrics";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mesh {
    #[serde(flatten)]
    pub meta: ResourceMeta,
    #[serde(default)]
    pub mtls_enabled: bool,
    #[serde(default)]
    pub metrics: Option<MetricsBackend>,
    #[serde(default)]
    pub locality_aware_load_balancing: bool,
    /// Route cross-zone and external traffic through the zone egress
    #[serde(default)]
    pub zone_egress_enabled: bool,
}

impl Mesh {
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn has_prometheus_metrics_enabled(&self) -> bool {
        self.metrics.is_some()
    }
}

/// Prometheus metrics backend of a mesh
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsBackend {
    #[serde(default = "default_metrics_port")]
    pub port: u32,
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for MetricsBackend {
    fn default() -> Self {
        Self {
            port: DEFAULT_METRICS_PORT,
            path: DEFAULT_METRICS_PATH.to_string(),
        }
    }
}

fn default_metrics_port() -> u32 {
    DEFAULT_METRICS_PORT
}

fn default_metrics_path() -> String {
    DEFAULT_METRICS_PATH.to_string()
}

// =============================================================================
// Dataplane
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataplane {
    #[serde(flatten)]
    pub meta: ResourceMeta,
    pub networking: DataplaneNetworking,
    /// Metrics override for this dataplane
    #[serde(default)]
    pub metrics: Option<MetricsBackend>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataplaneNetworking {
    /// IP or hostname of the dataplane
    pub address: String,
    #[serde(default)]
    pub inbound: Vec<Inbound>,
    #[serde(default)]
    pub outbound: Vec<Outbound>,
    #[serde(default)]
    pub transparent_proxying: Option<TransparentProxying>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Inbound {
    pub port: u32,
    /// Workload port, defaults to `port`
    #[serde(default)]
    pub service_port: Option<u32>,
    /// Workload address, defaults to localhost
    #[serde(default)]
    pub service_address: Option<String>,
    /// Overrides the dataplane address for this inbound
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default)]
    pub health: Option<Health>,
}

impl Inbound {
    /// Inbounds without health information are considered ready
    pub fn is_healthy(&self) -> bool {
        self.health.as_ref().is_none_or(|h| h.ready)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    pub ready: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Outbound {
    /// Local address, defaults to localhost
    #[serde(default)]
    pub address: Option<String>,
    pub port: u32,
    pub service: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransparentProxying {
    #[serde(default)]
    pub redirect_port: u32,
}

/// Resolved addressing of one inbound
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InboundInterface {
    pub data_plane_ip: String,
    pub data_plane_port: u32,
    pub workload_ip: String,
    pub workload_port: u32,
}

impl fmt::Display for InboundInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.data_plane_ip, self.data_plane_port, self.workload_port
        )
    }
}

/// Resolved addressing of one outbound
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OutboundInterface {
    pub data_plane_ip: String,
    pub data_plane_port: u32,
}

impl fmt::Display for OutboundInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.data_plane_ip, self.data_plane_port)
    }
}

impl Dataplane {
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn healthy_inbounds(&self) -> impl Iterator<Item = &Inbound> {
        self.networking.inbound.iter().filter(|i| i.is_healthy())
    }

    pub fn inbound_interface(&self, inbound: &Inbound) -> InboundInterface {
        InboundInterface {
            data_plane_ip: inbound
                .address
                .clone()
                .unwrap_or_else(|| self.networking.address.clone()),
            data_plane_port: inbound.port,
            workload_ip: inbound
                .service_address
                .clone()
                .unwrap_or_else(|| LOCALHOST.to_string()),
            workload_port: inbound.service_port.unwrap_or(inbound.port),
        }
    }

    /// Service the dataplane identifies as, taken from its first inbound
    pub fn identifying_service(&self) -> &str {
        self.networking
            .inbound
            .first()
            .and_then(|i| i.tags.service())
            .unwrap_or("unknown")
    }

    /// Zone declared on the dataplane's inbounds
    pub fn zone(&self) -> Option<&str> {
        self.networking.inbound.iter().find_map(|i| i.tags.zone())
    }

    /// Redirect port when transparent proxying is configured
    pub fn redirect_port(&self) -> Option<u32> {
        self.networking
            .transparent_proxying
            .map(|tp| tp.redirect_port)
            .filter(|port| *port != 0)
    }

    /// Resolve the outbound at `index`
    pub fn outbound_interface(&self, index: usize) -> Result<OutboundInterface> {
        let outbound = self.networking.outbound.get(index).ok_or_else(|| {
            ConvoyError::MalformedOutbound {
                index,
                reason: "no such outbound".to_string(),
            }
        })?;
        if outbound.service.is_empty() {
            return Err(ConvoyError::MalformedOutbound {
                index,
                reason: "service is required".to_string(),
            });
        }
        if outbound.port == 0 || outbound.port > u32::from(u16::MAX) {
            return Err(ConvoyError::MalformedOutbound {
                index,
                reason: format!("port {} out of range", outbound.port),
            });
        }
        let address = outbound
            .address
            .clone()
            .unwrap_or_else(|| LOCALHOST.to_string());
        if address.parse::<std::net::IpAddr>().is_err() {
            return Err(ConvoyError::MalformedOutbound {
                index,
                reason: format!("address {:?} is not an IP", address),
            });
        }
        Ok(OutboundInterface {
            data_plane_ip: address,
            data_plane_port: outbound.port,
        })
    }
}

// =============================================================================
// Policies
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrafficRoute {
    #[serde(flatten)]
    pub meta: ResourceMeta,
    #[serde(default)]
    pub sources: Vec<Tags>,
    #[serde(default)]
    pub destinations: Vec<Tags>,
    #[serde(default)]
    pub conf: Vec<WeightedDestination>,
}

/// One weighted split of a traffic route
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightedDestination {
    pub weight: u32,
    pub destination: Tags,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrafficPermission {
    #[serde(flatten)]
    pub meta: ResourceMeta,
    #[serde(default)]
    pub sources: Vec<Tags>,
    #[serde(default)]
    pub destinations: Vec<Tags>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProxyTemplate {
    #[serde(flatten)]
    pub meta: ResourceMeta,
    #[serde(default)]
    pub selectors: Vec<Tags>,
    #[serde(default)]
    pub imports: Vec<String>,
    #[serde(default)]
    pub resources: Vec<RawResource>,
}

/// User-supplied discovery resource, carried as YAML or JSON text
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawResource {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    pub resource: String,
}

/// Opaque gateway route; only its presence matters to the ingress
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayRoute {
    #[serde(flatten)]
    pub meta: ResourceMeta,
    #[serde(default)]
    pub selectors: Vec<Tags>,
}

// =============================================================================
// External services
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExternalService {
    #[serde(flatten)]
    pub meta: ResourceMeta,
    pub tags: Tags,
    pub networking: ExternalServiceNetworking,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExternalServiceNetworking {
    /// `host:port`
    pub address: String,
    #[serde(default)]
    pub tls: Option<ExternalServiceTls>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalServiceTls {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub server_name: Option<String>,
}

impl ExternalService {
    /// Split the configured address into host and port
    pub fn host_port(&self) -> Result<(String, u32)> {
        let address = &self.networking.address;
        let invalid = || {
            ConvoyError::Validation(format!(
                "external service {} has invalid address {:?}",
                self.meta.key(),
                address
            ))
        };
        let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
        let port: u32 = port.parse().map_err(|_| invalid())?;
        if host.is_empty() || port == 0 || port > u32::from(u16::MAX) {
            return Err(invalid());
        }
        Ok((host.trim_matches(['[', ']']).to_string(), port))
    }

    pub fn tls_enabled(&self) -> bool {
        self.networking.tls.as_ref().is_some_and(|tls| tls.enabled)
    }
}

// =============================================================================
// Zone ingress / egress
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZoneIngress {
    #[serde(flatten)]
    pub meta: ResourceMeta,
    #[serde(default)]
    pub zone: String,
    pub networking: ZoneIngressNetworking,
    #[serde(default)]
    pub available_services: Vec<AvailableService>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZoneIngressNetworking {
    pub address: String,
    pub port: u32,
    #[serde(default)]
    pub advertised_address: Option<String>,
    #[serde(default)]
    pub advertised_port: Option<u32>,
}

/// Service an ingress makes reachable, grouped by mesh and tag set
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AvailableService {
    pub mesh: String,
    pub tags: Tags,
    #[serde(default)]
    pub instances: u32,
    #[serde(default)]
    pub external_service: bool,
}

impl ZoneIngress {
    /// Address other zones reach this ingress on
    pub fn public_address(&self) -> &str {
        self.networking
            .advertised_address
            .as_deref()
            .unwrap_or(&self.networking.address)
    }

    pub fn public_port(&self) -> u32 {
        self.networking
            .advertised_port
            .unwrap_or(self.networking.port)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZoneEgress {
    #[serde(flatten)]
    pub meta: ResourceMeta,
    #[serde(default)]
    pub zone: String,
    pub networking: ZoneEgressNetworking,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZoneEgressNetworking {
    pub address: String,
    pub port: u32,
}

// =============================================================================
// Stored resources
// =============================================================================

/// Any resource held by a store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StoredResource {
    Mesh(Mesh),
    Dataplane(Dataplane),
    TrafficRoute(TrafficRoute),
    TrafficPermission(TrafficPermission),
    ExternalService(ExternalService),
    ZoneIngress(ZoneIngress),
    ZoneEgress(ZoneEgress),
    ProxyTemplate(ProxyTemplate),
    GatewayRoute(GatewayRoute),
}

/// Typed access to a stored resource kind
pub trait CoreResource: Clone + Send + Sync + Sized + 'static {
    const KIND: ResourceKind;

    fn meta(&self) -> &ResourceMeta;
    fn meta_mut(&mut self) -> &mut ResourceMeta;
    fn into_stored(self) -> StoredResource;
    fn from_stored(stored: StoredResource) -> Option<Self>;
}

macro_rules! core_resources {
    ($($kind:ident),* $(,)?) => {
        $(
            impl CoreResource for $kind {
                const KIND: ResourceKind = ResourceKind::$kind;

                fn meta(&self) -> &ResourceMeta {
                    &self.meta
                }

                fn meta_mut(&mut self) -> &mut ResourceMeta {
                    &mut self.meta
                }

                fn into_stored(self) -> StoredResource {
                    StoredResource::$kind(self)
                }

                fn from_stored(stored: StoredResource) -> Option<Self> {
                    match stored {
                        StoredResource::$kind(resource) => Some(resource),
                        _ => None,
                    }
                }
            }
        )*

        impl StoredResource {
            pub fn kind(&self) -> ResourceKind {
                match self {
                    $(StoredResource::$kind(_) => ResourceKind::$kind,)*
                }
            }

            pub fn meta(&self) -> &ResourceMeta {
                match self {
                    $(StoredResource::$kind(r) => &r.meta,)*
                }
            }

            pub fn meta_mut(&mut self) -> &mut ResourceMeta {
                match self {
                    $(StoredResource::$kind(r) => &mut r.meta,)*
                }
            }
        }
    };
}

core_resources!(
    Mesh,
    Dataplane,
    TrafficRoute,
    TrafficPermission,
    ExternalService,
    ZoneIngress,
    ZoneEgress,
    ProxyTemplate,
    GatewayRoute,
);
