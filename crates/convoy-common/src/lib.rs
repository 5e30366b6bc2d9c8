//! Convoy Common - Shared types, traits, and utilities
//!
//! This crate provides the foundational types used across all Convoy components:
//! - Error taxonomy for configuration generation
//! - Well-known tag names
//! - Address lookup abstraction

pub mod error;
pub mod lookup;

// Re-exports for convenience
pub use error::{ConvoyError, Result};
pub use lookup::{LookupIp, SystemLookup};

/// Tag carrying the logical service name of an inbound or external service
pub const SERVICE_TAG: &str = "kuma.io/service";

/// Tag carrying the zone an endpoint or external service belongs to
pub const ZONE_TAG: &str = "kuma.io/zone";

/// Synthetic tag merged into endpoint tags before selector matching
pub const MESH_TAG: &str = "mesh";

/// Selector value (and destination-map key) that matches every service
pub const MATCH_ALL: &str = "*";

/// Name of the predefined profile used when a dataplane has no ProxyTemplate
pub const PROFILE_DEFAULT_PROXY: &str = "default-proxy";

/// Default loopback address for outbound interfaces and local clusters
pub const LOCALHOST: &str = "127.0.0.1";
