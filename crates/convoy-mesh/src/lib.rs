//! Convoy Mesh Configuration Engine
//!
//! This crate turns the declarative state of a service mesh into the
//! listener, cluster and endpoint configuration of each proxy:
//! - Endpoint maps: which network endpoints back each logical service
//! - Destination resolution from traffic routes and tag selectors
//! - Generators for dataplane, zone ingress and zone egress proxies
//! - Proxy builders that gather mesh state from the resource store
//! - Versioned snapshots for discovery caches, plus the MADS snapshot
//!
//! # Architecture
//!
//! The engine is organized as follows:
//! - `model` - stored resources, tags and the resource store abstraction
//! - `topology` - destination maps, endpoint maps and policy selection
//! - `proxy` - the proxy view handed to generators
//! - `xds` - discovery resource types and builders
//! - `generator` - resource generators and the profile registry
//! - `sync` - proxy builders and the ingress availability refresh
//! - `snapshot` - resource snapshots and the per-node snapshot cache
//! - `mads` - monitoring assignment snapshots

pub mod generator;
pub mod mads;
pub mod model;
pub mod proxy;
pub mod snapshot;
pub mod sync;
pub mod topology;
pub mod xds;

// Re-export commonly used types
pub use generator::{ProfileRegistry, ProxyGenerator, ResourceGenerator};
pub use mads::{MadsSnapshot, MonitoringAssignmentGenerator, Snapshotter};
pub use model::{InMemoryStore, ResourceKey, ResourceManager, ResourceStore};
pub use proxy::Proxy;
pub use snapshot::{ResourceSnapshot, SnapshotCache};
pub use sync::{
    BuilderConfig, DataplaneProxyBuilder, EgressProxyBuilder, IngressAvailabilityRefresher,
    IngressProxyBuilder,
};
pub use xds::{ResourceSet, ResourceType};
