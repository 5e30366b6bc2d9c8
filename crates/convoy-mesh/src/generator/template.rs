use std::sync::Arc;

use tracing::debug;

use convoy_common::{ConvoyError, Result};

use crate::model::ProxyTemplate;
use crate::model::resources::RawResource;
use crate::proxy::Proxy;
use crate::xds::{NameRegistry, Origin, Resource, ResourcePayload, ResourceSet};

use super::{ProfileRegistry, ResourceGenerator};

/// Applies a ProxyTemplate: imported profiles first, then raw resources
pub struct TemplateProxyGenerator {
    template: ProxyTemplate,
    profiles: Arc<ProfileRegistry>,
}

impl TemplateProxyGenerator {
    pub fn new(template: ProxyTemplate, profiles: Arc<ProfileRegistry>) -> Self {
        Self { template, profiles }
    }

    fn generate_imports(&self, proxy: &Proxy, names: &mut NameRegistry) -> Result<ResourceSet> {
        let mut resources = ResourceSet::new();
        for (index, name) in self.template.imports.iter().enumerate() {
            let annotate = |e: ConvoyError| e.annotate(format!("imports[{}]{{name={:?}}}", index, name));
            let generator = self.profiles.get(name).map_err(annotate)?;
            resources.extend(generator.generate(proxy, names).map_err(annotate)?);
        }
        Ok(resources)
    }

    fn generate_raw(&self, names: &mut NameRegistry) -> Result<ResourceSet> {
        let mut resources = ResourceSet::new();
        for (index, raw) in self.template.resources.iter().enumerate() {
            resources.add(decode_raw(index, raw, names)?);
        }
        Ok(resources)
    }
}

fn decode_raw(index: usize, raw: &RawResource, names: &mut NameRegistry) -> Result<Resource> {
    let invalid = |reason: String| ConvoyError::InvalidRawResource {
        index,
        name: raw.name.clone(),
        reason,
    };

    let payload = ResourcePayload::decode(&raw.resource).map_err(invalid)?;
    if !names.claim(payload.resource_type(), payload.name()) {
        return Err(invalid(format!(
            "{} {:?} is already generated",
            payload.resource_type(),
            payload.name()
        )));
    }

    Ok(Resource::new(Origin::Template, payload).with_version(raw.version.clone()))
}

impl ResourceGenerator for TemplateProxyGenerator {
    fn name(&self) -> &'static str {
        "template"
    }

    fn generate(&self, proxy: &Proxy, names: &mut NameRegistry) -> Result<ResourceSet> {
        let mut resources = self.generate_imports(proxy, names)?;
        resources.extend(self.generate_raw(names)?);

        debug!(
            proxy = %proxy.node_id(),
            template = %self.template.meta.name,
            imports = self.template.imports.len(),
            raw = self.template.resources.len(),
            "Applied proxy template"
        );
        Ok(resources)
    }
}
