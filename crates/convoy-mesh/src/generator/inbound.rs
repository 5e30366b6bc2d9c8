use convoy_common::Result;

use crate::proxy::Proxy;
use crate::xds::envoy::{create_inbound_listener, create_local_cluster};
use crate::xds::{NameRegistry, Origin, Resource, ResourcePayload, ResourceSet, ResourceType};

use super::{ResourceGenerator, unsupported};

/// Local cluster name for a workload port
pub fn local_cluster_name(port: u32) -> String {
    format!("localhost:{}", port)
}

/// Inbound listener name for an interface
pub fn inbound_listener_name(ip: &str, port: u32) -> String {
    format!("inbound:{}:{}", ip, port)
}

/// Listener and local cluster for every inbound interface
pub struct InboundProxyGenerator;

impl ResourceGenerator for InboundProxyGenerator {
    fn name(&self) -> &'static str {
        "inbound"
    }

    fn generate(&self, proxy: &Proxy, names: &mut NameRegistry) -> Result<ResourceSet> {
        let (dataplane, mesh, policies) =
            proxy.dataplane().ok_or_else(|| unsupported(self.name(), proxy))?;

        let mut resources = ResourceSet::new();
        let virtual_listener = dataplane.redirect_port().is_some();
        for inbound in &dataplane.networking.inbound {
            let iface = dataplane.inbound_interface(inbound);

            let cluster_name = local_cluster_name(iface.workload_port);
            if names.claim(ResourceType::Cluster, &cluster_name) {
                let cluster = create_local_cluster(&cluster_name, &iface.workload_ip, iface.workload_port);
                resources.add(Resource::new(Origin::Inbound, ResourcePayload::Cluster(cluster)));
            }

            let listener_name = inbound_listener_name(&iface.data_plane_ip, iface.data_plane_port);
            if !names.claim(ResourceType::Listener, &listener_name) {
                continue;
            }
            let permissions = policies
                .traffic_permissions
                .get(&iface.to_string())
                .map(Vec::as_slice)
                .unwrap_or_default();
            let listener = create_inbound_listener(
                &listener_name,
                &iface.data_plane_ip,
                iface.data_plane_port,
                &cluster_name,
                virtual_listener,
                mesh.mesh.mtls_enabled,
                permissions,
                &proxy.metadata,
            );
            resources.add(Resource::new(Origin::Inbound, ResourcePayload::Listener(listener)));
        }
        Ok(resources)
    }
}
