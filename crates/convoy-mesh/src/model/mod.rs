//! Declarative mesh model: resources, tags and the store they live in

pub mod resources;
pub mod store;
pub mod tags;

pub use resources::{
    AvailableService, CoreResource, Dataplane, ExternalService, GatewayRoute, Inbound,
    InboundInterface, Mesh, OutboundInterface, ProxyTemplate, ResourceKey, ResourceKind,
    ResourceMeta, StoredResource, TrafficPermission, TrafficRoute, ZoneEgress, ZoneIngress,
};
pub use store::{InMemoryStore, ResourceManager, ResourceStore};
pub use tags::{TagSelectorSet, Tags};
