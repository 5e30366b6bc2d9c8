use convoy_common::Result;

use crate::proxy::Proxy;
use crate::xds::envoy::{create_catch_all_listener, create_pass_through_cluster};
use crate::xds::{NameRegistry, Origin, Resource, ResourcePayload, ResourceSet, ResourceType};

use super::{ResourceGenerator, unsupported};

pub const CATCH_ALL_LISTENER: &str = "catch_all";
pub const PASS_THROUGH_CLUSTER: &str = "pass_through";

/// Catch-all listener and pass-through cluster for transparent proxying
pub struct TransparentProxyGenerator;

impl ResourceGenerator for TransparentProxyGenerator {
    fn name(&self) -> &'static str {
        "transparent"
    }

    fn generate(&self, proxy: &Proxy, names: &mut NameRegistry) -> Result<ResourceSet> {
        let (dataplane, _, _) = proxy.dataplane().ok_or_else(|| unsupported(self.name(), proxy))?;

        let mut resources = ResourceSet::new();
        let Some(redirect_port) = dataplane.redirect_port() else {
            return Ok(resources);
        };

        let version = Some(dataplane.meta.version.clone());
        if names.claim(ResourceType::Listener, CATCH_ALL_LISTENER) {
            let listener = create_catch_all_listener(
                CATCH_ALL_LISTENER,
                "0.0.0.0",
                redirect_port,
                PASS_THROUGH_CLUSTER,
            );
            resources.add(
                Resource::new(Origin::Transparent, ResourcePayload::Listener(listener))
                    .with_version(version.clone()),
            );
        }
        if names.claim(ResourceType::Cluster, PASS_THROUGH_CLUSTER) {
            let cluster = create_pass_through_cluster(PASS_THROUGH_CLUSTER);
            resources.add(
                Resource::new(Origin::Transparent, ResourcePayload::Cluster(cluster))
                    .with_version(version),
            );
        }
        Ok(resources)
    }
}
