use std::collections::HashSet;

use convoy_common::{MESH_TAG, Result, SERVICE_TAG};

use crate::model::tags::{lb_subset_keys, mesh_cluster_name, sni_from_tags};
use crate::proxy::{Proxy, ProxyOwner};
use crate::topology::{destinations_by_mesh, service_destinations};
use crate::xds::envoy::{
    create_cluster_load_assignment, create_eds_cluster, create_sni_filter_chain, create_sni_listener,
};
use crate::xds::{NameRegistry, Origin, Resource, ResourcePayload, ResourceSet, ResourceType};

use super::inbound::inbound_listener_name;
use super::{ResourceGenerator, unsupported};

/// SNI-routed listener of a zone ingress plus one cluster per advertised
/// service, qualified by mesh
pub struct IngressGenerator;

impl ResourceGenerator for IngressGenerator {
    fn name(&self) -> &'static str {
        "ingress"
    }

    fn generate(&self, proxy: &Proxy, names: &mut NameRegistry) -> Result<ResourceSet> {
        let ProxyOwner::ZoneIngress {
            zone_ingress,
            policies,
        } = &proxy.owner
        else {
            return Err(unsupported(self.name(), proxy));
        };

        let address = &zone_ingress.networking.address;
        let port = zone_ingress.networking.port;
        let listener_name = inbound_listener_name(address, port);
        let mut listener = create_sni_listener(&listener_name, address, port);

        let by_mesh = destinations_by_mesh(&policies.traffic_routes);
        let mut resources = ResourceSet::new();
        let mut sni_used = HashSet::new();
        for available in &zone_ingress.available_services {
            let Some(service) = available.tags.service() else {
                continue;
            };
            let Some(mesh_destinations) = by_mesh.get(&available.mesh) else {
                continue;
            };
            let endpoints: Vec<_> = proxy
                .routing
                .outbound_targets
                .get(service)
                .into_iter()
                .flatten()
                .filter(|e| e.mesh() == Some(available.mesh.as_str()))
                .cloned()
                .collect();
            if endpoints.is_empty() {
                continue;
            }

            let cluster_name = mesh_cluster_name(&available.mesh, service);
            let destinations: Vec<_> = service_destinations(mesh_destinations, service)
                .into_iter()
                .map(|destination| {
                    destination
                        .with_tag(SERVICE_TAG, service)
                        .with_tag(MESH_TAG, available.mesh.as_str())
                })
                .collect();

            for destination in &destinations {
                let sni = sni_from_tags(destination);
                if sni_used.insert(sni.clone()) {
                    listener
                        .filter_chains
                        .push(create_sni_filter_chain(&sni, &cluster_name, destination));
                }
            }

            if names.claim(ResourceType::Cluster, &cluster_name) {
                let cluster = create_eds_cluster(&cluster_name, lb_subset_keys(&destinations), None);
                resources.add(Resource::new(Origin::Ingress, ResourcePayload::Cluster(cluster)));
            }
            if names.claim(ResourceType::Endpoint, &cluster_name) {
                let locality_aware = policies
                    .meshes
                    .get(&available.mesh)
                    .is_some_and(|mesh| mesh.locality_aware_load_balancing);
                let cla = create_cluster_load_assignment(&cluster_name, &endpoints, locality_aware);
                resources.add(Resource::new(Origin::Ingress, ResourcePayload::Endpoint(cla)));
            }
        }

        if names.claim(ResourceType::Listener, &listener_name) {
            resources.add(Resource::new(Origin::Ingress, ResourcePayload::Listener(listener)));
        }
        Ok(resources)
    }
}
