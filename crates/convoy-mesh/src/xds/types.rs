//! xDS Resource Types
//!
//! Native Rust types for the listener, cluster, endpoint and route resources
//! handed to the discovery-protocol cache. Every map is ordered so that two
//! builds over the same input serialise to identical bytes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Metadata attached to listeners, clusters and endpoints
pub type Metadata = BTreeMap<String, String>;

/// Locality - identifies where a group of endpoints is running
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Locality {
    /// Region (e.g., "us-west-1")
    pub region: String,
    /// Zone within region
    pub zone: String,
    /// Sub-zone (e.g., "rack-1")
    pub sub_zone: String,
}

impl Locality {
    /// Create a locality for a zone
    pub fn zone(zone: impl Into<String>) -> Self {
        Self {
            zone: zone.into(),
            ..Default::default()
        }
    }
}

/// LbEndpoint - a single upstream host of a cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LbEndpoint {
    /// Host address (IP or hostname)
    pub address: String,
    /// Port
    pub port: u32,
    /// Load balancing weight
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// Metadata used for subset load balancing
    #[serde(default)]
    pub metadata: Metadata,
}

fn default_weight() -> u32 {
    1
}

impl LbEndpoint {
    /// Create a new endpoint with weight 1
    pub fn new(address: impl Into<String>, port: u32) -> Self {
        Self {
            address: address.into(),
            port,
            weight: 1,
            metadata: Metadata::new(),
        }
    }

    /// Set the weight
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// Set metadata
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Cluster load assignment - endpoints for a cluster
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterLoadAssignment {
    /// Cluster name
    pub cluster_name: String,
    /// Endpoints grouped by locality and priority
    #[serde(default)]
    pub endpoints: Vec<LocalityLbEndpoints>,
}

impl ClusterLoadAssignment {
    pub fn new(cluster_name: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            endpoints: Vec::new(),
        }
    }

    pub fn add_locality(
        &mut self,
        locality: Option<Locality>,
        priority: u32,
        lb_endpoints: Vec<LbEndpoint>,
    ) {
        let load_balancing_weight = lb_endpoints.iter().map(|e| e.weight).sum::<u32>().max(1);
        self.endpoints.push(LocalityLbEndpoints {
            locality,
            lb_endpoints,
            load_balancing_weight,
            priority,
        });
    }

    pub fn all_endpoints(&self) -> impl Iterator<Item = &LbEndpoint> {
        self.endpoints.iter().flat_map(|le| le.lb_endpoints.iter())
    }

    /// Get total endpoint count
    pub fn total_count(&self) -> usize {
        self.all_endpoints().count()
    }
}

/// Endpoints for a specific locality
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalityLbEndpoints {
    /// Locality for these endpoints, absent on standalone deployments
    #[serde(default)]
    pub locality: Option<Locality>,
    /// Endpoints in this locality
    #[serde(default)]
    pub lb_endpoints: Vec<LbEndpoint>,
    /// Load balancing weight for this locality
    #[serde(default)]
    pub load_balancing_weight: u32,
    /// 0 is the local zone, 1 every remote zone
    #[serde(default)]
    pub priority: u32,
}

/// Cluster configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Cluster {
    /// Cluster name
    pub name: String,
    /// Discovery type
    pub discovery_type: DiscoveryType,
    /// Load balancing policy
    pub lb_policy: LbPolicy,
    /// Connect timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Subset selector keys for subset load balancing
    pub lb_subset_keys: Vec<Vec<String>>,
    /// Upstream TLS configuration
    pub tls_context: Option<UpstreamTlsContext>,
    /// Inline endpoints for static clusters
    pub load_assignment: Option<ClusterLoadAssignment>,
    /// Metadata
    pub metadata: Metadata,
}

/// Default connect timeout applied to generated clusters
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;

impl Default for Cluster {
    fn default() -> Self {
        Self {
            name: String::new(),
            discovery_type: DiscoveryType::Eds,
            lb_policy: LbPolicy::RoundRobin,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            lb_subset_keys: Vec::new(),
            tls_context: None,
            load_assignment: None,
            metadata: Metadata::new(),
        }
    }
}

impl Cluster {
    pub fn new_eds(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            discovery_type: DiscoveryType::Eds,
            ..Default::default()
        }
    }

    /// Create a new cluster with inline endpoints
    pub fn new_static(name: impl Into<String>, load_assignment: ClusterLoadAssignment) -> Self {
        Self {
            name: name.into(),
            discovery_type: DiscoveryType::Static,
            load_assignment: Some(load_assignment),
            ..Default::default()
        }
    }

    /// Create a cluster forwarding to the connection's original destination
    pub fn new_original_dst(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            discovery_type: DiscoveryType::OriginalDst,
            lb_policy: LbPolicy::ClusterProvided,
            ..Default::default()
        }
    }
}

/// Cluster discovery type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DiscoveryType {
    /// Static endpoints
    Static,
    /// Strict DNS resolution
    StrictDns,
    /// EDS (Endpoint Discovery Service)
    #[default]
    Eds,
    /// Original destination
    OriginalDst,
}

/// Load balancing policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LbPolicy {
    /// Round robin
    #[default]
    RoundRobin,
    /// Least connections
    LeastRequest,
    /// Ring hash (consistent hashing)
    RingHash,
    /// Random
    Random,
    /// Maglev consistent hashing
    Maglev,
    /// Decided by the cluster type (original destination)
    ClusterProvided,
}

/// TLS context for upstream connections
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamTlsContext {
    /// SNI for TLS
    pub sni: Option<String>,
    /// ALPN protocols
    pub alpn_protocols: Vec<String>,
    /// Whether to validate server certificate
    pub validate_server: bool,
}

// =============================================================================
// Listener Discovery Service (LDS) Types
// =============================================================================

/// Listener configuration (LDS)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Listener {
    /// Listener name
    pub name: String,
    /// Address to bind to
    pub address: ListenerAddress,
    /// Filter chains
    pub filter_chains: Vec<FilterChain>,
    /// Listener filters (e.g. TLS inspector)
    pub listener_filters: Vec<String>,
    /// Whether to use original destination
    pub use_original_dst: bool,
    /// Whether the listener binds its own socket (false when reached via redirect)
    pub bind_to_port: bool,
    /// Direction of the traffic handled by the listener
    pub traffic_direction: TrafficDirection,
    /// Metadata
    pub metadata: Metadata,
}

impl Default for Listener {
    fn default() -> Self {
        Self {
            name: String::new(),
            address: ListenerAddress::default(),
            filter_chains: Vec::new(),
            listener_filters: Vec::new(),
            use_original_dst: false,
            bind_to_port: true,
            traffic_direction: TrafficDirection::Unspecified,
            metadata: Metadata::new(),
        }
    }
}

/// Listener filter that inspects the TLS ClientHello for SNI
pub const TLS_INSPECTOR: &str = "envoy.filters.listener.tls_inspector";

impl Listener {
    /// Create a new listener
    pub fn new(name: impl Into<String>, address: ListenerAddress) -> Self {
        Self {
            name: name.into(),
            address,
            ..Default::default()
        }
    }

    /// Add a filter chain
    pub fn with_filter_chain(mut self, chain: FilterChain) -> Self {
        self.filter_chains.push(chain);
        self
    }

    /// Set the traffic direction
    pub fn with_direction(mut self, direction: TrafficDirection) -> Self {
        self.traffic_direction = direction;
        self
    }
}

/// Listener address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerAddress {
    /// `0.0.0.0` binds every interface
    pub address: String,
    /// Port
    pub port: u32,
}

impl Default for ListenerAddress {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 0,
        }
    }
}

impl ListenerAddress {
    pub fn tcp(address: impl Into<String>, port: u32) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }
}

/// Traffic direction of a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TrafficDirection {
    #[default]
    Unspecified,
    Inbound,
    Outbound,
}

/// Filters applied to connections selected by `filter_chain_match`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterChain {
    /// Filter chain name
    pub name: String,
    /// Match criteria for this filter chain
    pub filter_chain_match: Option<FilterChainMatch>,
    /// Filters to apply
    pub filters: Vec<NetworkFilter>,
    /// Downstream TLS configuration
    pub tls_context: Option<DownstreamTlsContext>,
}

impl FilterChain {
    /// Create a new filter chain
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Add a filter
    pub fn with_filter(mut self, filter: NetworkFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Set filter chain match
    pub fn with_match(mut self, filter_match: FilterChainMatch) -> Self {
        self.filter_chain_match = Some(filter_match);
        self
    }

    /// Terminate TLS on this chain
    pub fn with_tls(mut self, tls_context: DownstreamTlsContext) -> Self {
        self.tls_context = Some(tls_context);
        self
    }
}

/// Filter chain match criteria
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterChainMatch {
    /// Server names (SNI)
    pub server_names: Vec<String>,
    /// Transport protocol (e.g., "tls", "raw_buffer")
    pub transport_protocol: Option<String>,
}

impl FilterChainMatch {
    /// Match TLS connections carrying the given SNI
    pub fn sni(server_name: impl Into<String>) -> Self {
        Self {
            server_names: vec![server_name.into()],
            transport_protocol: Some("tls".to_string()),
        }
    }
}

/// Network filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkFilter {
    /// Filter name
    pub name: String,
    /// Filter type
    pub filter_type: NetworkFilterType,
}

impl NetworkFilter {
    /// Create a TCP proxy filter to a single cluster
    pub fn tcp_proxy(stat_prefix: impl Into<String>, cluster: impl Into<String>) -> Self {
        Self {
            name: "envoy.filters.network.tcp_proxy".to_string(),
            filter_type: NetworkFilterType::TcpProxy {
                stat_prefix: stat_prefix.into(),
                target: TcpProxyTarget::Cluster(cluster.into()),
                metadata_match: Metadata::new(),
            },
        }
    }

    /// Create a TCP proxy filter splitting traffic across weighted clusters
    pub fn weighted_tcp_proxy(stat_prefix: impl Into<String>, clusters: Vec<WeightedCluster>) -> Self {
        Self {
            name: "envoy.filters.network.tcp_proxy".to_string(),
            filter_type: NetworkFilterType::TcpProxy {
                stat_prefix: stat_prefix.into(),
                target: TcpProxyTarget::WeightedClusters(clusters),
                metadata_match: Metadata::new(),
            },
        }
    }

    /// Create a network RBAC filter
    pub fn rbac(stat_prefix: impl Into<String>, policies: Vec<RbacPolicy>) -> Self {
        Self {
            name: "envoy.filters.network.rbac".to_string(),
            filter_type: NetworkFilterType::Rbac {
                stat_prefix: stat_prefix.into(),
                policies,
            },
        }
    }

    /// Restrict the upstream subset selected by a TCP proxy
    pub fn with_metadata_match(mut self, metadata: Metadata) -> Self {
        if let NetworkFilterType::TcpProxy { metadata_match, .. } = &mut self.filter_type {
            *metadata_match = metadata;
        }
        self
    }
}

/// Network filter types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NetworkFilterType {
    /// TCP proxy
    TcpProxy {
        /// Stat prefix
        stat_prefix: String,
        /// Upstream cluster(s)
        target: TcpProxyTarget,
        /// Subset metadata the upstream endpoints must carry
        #[serde(default)]
        metadata_match: Metadata,
    },
    /// Role based access control
    Rbac {
        /// Stat prefix
        stat_prefix: String,
        /// Allow policies
        policies: Vec<RbacPolicy>,
    },
}

/// Upstream of a TCP proxy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TcpProxyTarget {
    /// Single cluster
    Cluster(String),
    /// Weighted clusters
    WeightedClusters(Vec<WeightedCluster>),
}

/// Weighted cluster for traffic splitting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedCluster {
    /// Cluster name
    pub name: String,
    /// Weight
    pub weight: u32,
    /// Subset metadata the upstream endpoints must carry
    #[serde(default)]
    pub metadata_match: Metadata,
}

impl WeightedCluster {
    pub fn new(name: impl Into<String>, weight: u32) -> Self {
        Self {
            name: name.into(),
            weight,
            metadata_match: Metadata::new(),
        }
    }
}

/// RBAC allow policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RbacPolicy {
    /// Policy name
    pub name: String,
    /// Principals allowed by the policy
    pub principals: Vec<String>,
}

/// Downstream TLS context for listeners
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownstreamTlsContext {
    /// Require client certificate
    pub require_client_certificate: bool,
    /// Common TLS context
    pub common_tls_context: CommonTlsContext,
}

/// Common TLS context (shared between upstream and downstream)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommonTlsContext {
    /// ALPN protocols
    pub alpn_protocols: Vec<String>,
}

// =============================================================================
// Route Discovery Service (RDS) Types
// =============================================================================

/// Route configuration (RDS)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteConfiguration {
    /// Route configuration name
    pub name: String,
    /// Virtual hosts
    pub virtual_hosts: Vec<VirtualHost>,
}

/// Virtual host for routing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualHost {
    /// Virtual host name
    pub name: String,
    /// Domains to match (e.g., ["*.example.com", "example.com"])
    pub domains: Vec<String>,
    /// Routes
    pub routes: Vec<Route>,
}

/// Route definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Route {
    /// Route name
    pub name: String,
    /// Path prefix to match
    pub prefix: String,
    /// Route destination
    pub destination: RouteDestination,
}

/// Route destination
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteDestination {
    /// Single cluster destination
    pub cluster: Option<String>,
    /// Weighted clusters
    pub weighted_clusters: Vec<WeightedCluster>,
    /// Timeout
    pub timeout_ms: Option<u64>,
}
