//! Topology resolution
//!
//! - `destinations` - destination selectors derived from traffic routes
//! - `endpoints` - endpoint maps and locality assignment
//! - `policies` - routes, permissions and templates selected per dataplane

pub mod destinations;
pub mod endpoints;
pub mod policies;

pub use destinations::{
    RouteDestinations, build_destination_map, concrete_destination, dataplane_destinations,
    destinations_by_mesh, destinations_from_routes, service_destinations,
};
pub use endpoints::{
    available_services, build_dataplane_endpoint_map, build_egress_endpoint_map,
    build_endpoint_map, locality_from_tags,
};
pub use policies::{select_proxy_template, select_traffic_permissions, select_traffic_routes};
