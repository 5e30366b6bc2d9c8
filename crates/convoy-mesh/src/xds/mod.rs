//! xDS resource model
//!
//! - `types` - native listener/cluster/endpoint/route types
//! - `envoy` - helpers that assemble those types for generators
//! - `resource` - named, origin-tagged resources and the per-pass name registry

pub mod envoy;
pub mod resource;
pub mod types;

use std::fmt;

use serde::{Deserialize, Serialize};

use convoy_common::{ConvoyError, Result};

use types::{Cluster, ClusterLoadAssignment, Listener, RouteConfiguration};

pub use resource::{NameRegistry, Origin, Resource, ResourceSet};

/// Discovery resource types produced by the generators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceType {
    Listener,
    Cluster,
    Endpoint,
    Route,
}

impl ResourceType {
    /// All resource types in the order they are pushed to proxies
    pub const ALL: [ResourceType; 4] = [
        ResourceType::Cluster,
        ResourceType::Endpoint,
        ResourceType::Listener,
        ResourceType::Route,
    ];

    /// Fully-qualified type URL
    pub fn type_url(&self) -> &'static str {
        match self {
            ResourceType::Listener => "type.googleapis.com/envoy.config.listener.v3.Listener",
            ResourceType::Cluster => "type.googleapis.com/envoy.config.cluster.v3.Cluster",
            ResourceType::Endpoint => {
                "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment"
            }
            ResourceType::Route => "type.googleapis.com/envoy.config.route.v3.RouteConfiguration",
        }
    }

    /// Look up a resource type by its type URL
    pub fn from_type_url(type_url: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.type_url() == type_url)
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceType::Listener => "Listener",
            ResourceType::Cluster => "Cluster",
            ResourceType::Endpoint => "ClusterLoadAssignment",
            ResourceType::Route => "RouteConfiguration",
        };
        f.write_str(name)
    }
}

/// Self-check performed on every resource before it enters a snapshot
pub trait Validate {
    fn validate(&self) -> std::result::Result<(), String>;
}

/// A discovery resource of one of the supported types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResourcePayload {
    Listener(Listener),
    Cluster(Cluster),
    Endpoint(ClusterLoadAssignment),
    Route(RouteConfiguration),
}

impl ResourcePayload {
    pub fn resource_type(&self) -> ResourceType {
        match self {
            ResourcePayload::Listener(_) => ResourceType::Listener,
            ResourcePayload::Cluster(_) => ResourceType::Cluster,
            ResourcePayload::Endpoint(_) => ResourceType::Endpoint,
            ResourcePayload::Route(_) => ResourceType::Route,
        }
    }

    /// Name the resource is published under
    pub fn name(&self) -> &str {
        match self {
            ResourcePayload::Listener(l) => &l.name,
            ResourcePayload::Cluster(c) => &c.name,
            ResourcePayload::Endpoint(e) => &e.cluster_name,
            ResourcePayload::Route(r) => &r.name,
        }
    }

    /// Decode a user-supplied YAML/JSON document whose `@type` field names the
    /// resource type, then validate it.
    pub fn decode(raw: &str) -> std::result::Result<Self, String> {
        let value: serde_yaml::Value = serde_yaml::from_str(raw).map_err(|e| e.to_string())?;
        let serde_yaml::Value::Mapping(mut mapping) = value else {
            return Err("resource must be a mapping".to_string());
        };

        let type_url = match mapping.remove("@type") {
            Some(serde_yaml::Value::String(url)) => url,
            Some(_) => return Err("@type must be a string".to_string()),
            None => return Err("missing @type".to_string()),
        };
        let resource_type = ResourceType::from_type_url(&type_url)
            .ok_or_else(|| format!("unsupported resource type {:?}", type_url))?;

        let value = serde_yaml::Value::Mapping(mapping);
        let payload = match resource_type {
            ResourceType::Listener => serde_yaml::from_value(value).map(ResourcePayload::Listener),
            ResourceType::Cluster => serde_yaml::from_value(value).map(ResourcePayload::Cluster),
            ResourceType::Endpoint => serde_yaml::from_value(value).map(ResourcePayload::Endpoint),
            ResourceType::Route => serde_yaml::from_value(value).map(ResourcePayload::Route),
        }
        .map_err(|e| e.to_string())?;

        payload.validate()?;
        Ok(payload)
    }
}

impl Validate for ResourcePayload {
    fn validate(&self) -> std::result::Result<(), String> {
        match self {
            ResourcePayload::Listener(l) => l.validate(),
            ResourcePayload::Cluster(c) => c.validate(),
            ResourcePayload::Endpoint(e) => e.validate(),
            ResourcePayload::Route(r) => r.validate(),
        }
    }
}

fn check_port(port: u32) -> std::result::Result<(), String> {
    if port == 0 || port > u32::from(u16::MAX) {
        return Err(format!("port {} out of range", port));
    }
    Ok(())
}

impl Validate for Listener {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.name.is_empty() {
            return Err("listener name is required".to_string());
        }
        check_port(self.address.port)?;
        if let Some(chain) = self.filter_chains.iter().find(|c| c.filters.is_empty()) {
            return Err(format!("filter chain {:?} has no filters", chain.name));
        }
        Ok(())
    }
}

impl Validate for Cluster {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.name.is_empty() {
            return Err("cluster name is required".to_string());
        }
        if self.connect_timeout_ms == 0 {
            return Err("connect timeout must be positive".to_string());
        }
        match (&self.discovery_type, &self.load_assignment) {
            (types::DiscoveryType::Static, None) => {
                Err("static cluster requires a load assignment".to_string())
            }
            (_, Some(cla)) => cla.validate(),
            _ => Ok(()),
        }
    }
}

impl Validate for ClusterLoadAssignment {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.cluster_name.is_empty() {
            return Err("cluster name is required".to_string());
        }
        for endpoint in self.all_endpoints() {
            check_port(endpoint.port)?;
            if endpoint.weight == 0 {
                return Err(format!("endpoint {}:{} has zero weight", endpoint.address, endpoint.port));
            }
        }
        Ok(())
    }
}

impl Validate for RouteConfiguration {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.name.is_empty() {
            return Err("route configuration name is required".to_string());
        }
        if let Some(vhost) = self.virtual_hosts.iter().find(|v| v.domains.is_empty()) {
            return Err(format!("virtual host {:?} has no domains", vhost.name));
        }
        Ok(())
    }
}

/// Validate a generated resource, turning a failure into a typed error
pub fn ensure_valid(payload: &ResourcePayload) -> Result<()> {
    payload.validate().map_err(|reason| {
        ConvoyError::Validation(format!(
            "{} {:?}: {}",
            payload.resource_type(),
            payload.name(),
            reason
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_url_lookup() {
        for resource_type in ResourceType::ALL {
            assert_eq!(ResourceType::from_type_url(resource_type.type_url()), Some(resource_type));
        }
        assert_eq!(ResourceType::from_type_url("type.googleapis.com/unknown"), None);
    }

    #[test]
    fn test_decode_raw_cluster() {
        let raw = r#"
"@type": type.googleapis.com/envoy.config.cluster.v3.Cluster
name: localhost:8443
discovery_type: Static
connect_timeout_ms: 250
load_assignment:
  cluster_name: localhost:8443
  endpoints:
    - lb_endpoints:
        - address: 127.0.0.1
          port: 8443
"#;
        let payload = ResourcePayload::decode(raw).unwrap();
        assert_eq!(payload.resource_type(), ResourceType::Cluster);
        assert_eq!(payload.name(), "localhost:8443");
    }

    #[test]
    fn test_decode_raw_route_configuration() {
        let raw = r#"
"@type": type.googleapis.com/envoy.config.route.v3.RouteConfiguration
name: backend
virtual_hosts:
  - name: backend
    domains: ["*"]
    routes:
      - prefix: /
        destination:
          weighted_clusters:
            - name: backend
              weight: 100
"#;
        let ResourcePayload::Route(route) = ResourcePayload::decode(raw).unwrap() else {
            panic!("expected a route configuration");
        };
        assert_eq!(route.virtual_hosts[0].routes[0].destination.weighted_clusters.len(), 1);

        let err = ResourcePayload::decode(&raw.replace("domains: [\"*\"]", "domains: []")).unwrap_err();
        assert!(err.contains("has no domains"));
    }

    #[test]
    fn test_decode_rejects_missing_type() {
        let err = ResourcePayload::decode("name: foo").unwrap_err();
        assert_eq!(err, "missing @type");
    }

    #[test]
    fn test_decode_rejects_invalid_listener() {
        let raw = r#"
"@type": type.googleapis.com/envoy.config.listener.v3.Listener
name: broken
address:
  address: 0.0.0.0
  port: 0
"#;
        let err = ResourcePayload::decode(raw).unwrap_err();
        assert!(err.contains("out of range"));
    }

    #[test]
    fn test_ensure_valid_names_resource() {
        let payload = ResourcePayload::Cluster(Cluster {
            name: "static".to_string(),
            discovery_type: types::DiscoveryType::Static,
            ..Default::default()
        });
        let err = ensure_valid(&payload).unwrap_err();
        assert!(err.to_string().contains("Cluster \"static\""));
    }
}
