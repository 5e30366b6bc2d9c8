//! Proxy builders
//!
//! One builder per proxy kind gathers the mesh state a build needs from the
//! resource store, resolves addresses, runs the topology resolution and
//! assembles the `Proxy` handed to the generators.
//!
//! - `dataplane` - regular sidecar proxies
//! - `ingress` - zone ingress proxies and their availability refresh
//! - `egress` - zone egress proxies

pub mod dataplane;
pub mod egress;
pub mod ingress;

use futures::future::try_join_all;
use tracing::warn;

use convoy_common::{LookupIp, Result};

use crate::model::{Dataplane, ExternalService, ZoneEgress, ZoneIngress};
use crate::proxy::ApiVersion;

pub use dataplane::DataplaneProxyBuilder;
pub use egress::EgressProxyBuilder;
pub use ingress::{IngressAvailabilityRefresher, IngressProxyBuilder};

/// Settings shared by all builders
#[derive(Debug, Clone)]
pub struct BuilderConfig {
    /// Zone this control plane runs in
    pub zone: String,
    pub api_version: ApiVersion,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            zone: "default".to_string(),
            api_version: ApiVersion::V3,
        }
    }
}

/// Resolve the addresses a dataplane is reached on
pub(crate) async fn resolve_dataplane(lookup: &dyn LookupIp, mut dataplane: Dataplane) -> Result<Dataplane> {
    dataplane.networking.address = lookup.resolve(&dataplane.networking.address).await?.to_string();
    for inbound in &mut dataplane.networking.inbound {
        if let Some(address) = &inbound.address {
            inbound.address = Some(lookup.resolve(address).await?.to_string());
        }
    }
    Ok(dataplane)
}

pub(crate) async fn resolve_dataplanes(
    lookup: &dyn LookupIp,
    dataplanes: Vec<Dataplane>,
) -> Result<Vec<Dataplane>> {
    try_join_all(dataplanes.into_iter().map(|dp| resolve_dataplane(lookup, dp))).await
}

/// Resolve the public address other zones reach an ingress on
pub(crate) async fn resolve_zone_ingress(lookup: &dyn LookupIp, mut ingress: ZoneIngress) -> Result<ZoneIngress> {
    let networking = &mut ingress.networking;
    match &networking.advertised_address {
        Some(advertised) => {
            networking.advertised_address = Some(lookup.resolve(advertised).await?.to_string());
        }
        None => {
            networking.address = lookup.resolve(&networking.address).await?.to_string();
        }
    }
    Ok(ingress)
}

pub(crate) async fn resolve_zone_ingresses(
    lookup: &dyn LookupIp,
    ingresses: Vec<ZoneIngress>,
) -> Result<Vec<ZoneIngress>> {
    try_join_all(ingresses.into_iter().map(|ingress| resolve_zone_ingress(lookup, ingress))).await
}

/// Pick the zone egress of the local zone and resolve its address
pub(crate) async fn local_zone_egress(
    lookup: &dyn LookupIp,
    egresses: Vec<ZoneEgress>,
    zone: &str,
) -> Result<Option<ZoneEgress>> {
    let Some(mut egress) = egresses.into_iter().find(|egress| egress.zone == zone) else {
        warn!(zone = %zone, "No zone egress in the local zone");
        return Ok(None);
    };
    egress.networking.address = lookup.resolve(&egress.networking.address).await?.to_string();
    Ok(Some(egress))
}

/// External services in name order
pub(crate) fn sort_external_services(external_services: &mut [ExternalService]) {
    external_services.sort_by(|a, b| {
        a.meta
            .name
            .cmp(&b.meta.name)
            .then_with(|| a.meta.mesh.cmp(&b.meta.mesh))
    });
}
