//! Proxy configuration generators
//!
//! Each generator produces one slice of a proxy's resources. Generators are
//! composed per proxy kind; a composite run shares one `NameRegistry` so no
//! two generators emit a resource of the same type under the same name.

pub mod egress;
pub mod inbound;
pub mod ingress;
pub mod outbound;
pub mod template;
pub mod transparent;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use convoy_common::{ConvoyError, PROFILE_DEFAULT_PROXY, Result};

use crate::model::ProxyTemplate;
use crate::proxy::{Proxy, ProxyOwner};
use crate::xds::{NameRegistry, ResourceSet};

pub use egress::{EgressGenerator, ExternalServicesGenerator, ZoneExternalServicesGenerator};
pub use inbound::InboundProxyGenerator;
pub use ingress::IngressGenerator;
pub use outbound::OutboundProxyGenerator;
pub use template::TemplateProxyGenerator;
pub use transparent::TransparentProxyGenerator;

/// Produces part of a proxy's configuration
pub trait ResourceGenerator: Send + Sync {
    /// Name used when annotating errors
    fn name(&self) -> &'static str;

    fn generate(&self, proxy: &Proxy, names: &mut NameRegistry) -> Result<ResourceSet>;
}

/// Runs generators in order and concatenates their output.
///
/// The first failure aborts the run, annotated with the failing
/// generator's index and name.
#[derive(Clone, Default)]
pub struct CompositeResourceGenerator {
    generators: Vec<Arc<dyn ResourceGenerator>>,
}

impl CompositeResourceGenerator {
    pub fn new(generators: Vec<Arc<dyn ResourceGenerator>>) -> Self {
        Self { generators }
    }
}

impl ResourceGenerator for CompositeResourceGenerator {
    fn name(&self) -> &'static str {
        "composite"
    }

    fn generate(&self, proxy: &Proxy, names: &mut NameRegistry) -> Result<ResourceSet> {
        let mut resources = ResourceSet::new();
        for (index, generator) in self.generators.iter().enumerate() {
            let generated = generator.generate(proxy, names).map_err(|e| {
                e.annotate(format!("generators[{}]{{name={:?}}}", index, generator.name()))
            })?;
            resources.extend(generated);
        }
        Ok(resources)
    }
}

/// Named generator profiles a ProxyTemplate can import
pub struct ProfileRegistry {
    profiles: HashMap<String, Arc<dyn ResourceGenerator>>,
}

impl ProfileRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            profiles: HashMap::new(),
        }
    }

    /// Registry with the predefined profiles
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(PROFILE_DEFAULT_PROXY, Arc::new(default_proxy_profile()));
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, generator: Arc<dyn ResourceGenerator>) {
        self.profiles.insert(name.into(), generator);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ResourceGenerator>> {
        self.profiles
            .get(name)
            .cloned()
            .ok_or_else(|| ConvoyError::UnknownProfile(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Transparent proxying, inbound and outbound plumbing
pub fn default_proxy_profile() -> CompositeResourceGenerator {
    CompositeResourceGenerator::new(vec![
        Arc::new(TransparentProxyGenerator),
        Arc::new(InboundProxyGenerator),
        Arc::new(OutboundProxyGenerator),
    ])
}

/// Template used for dataplanes no ProxyTemplate selects
pub fn default_proxy_template() -> ProxyTemplate {
    ProxyTemplate {
        imports: vec![PROFILE_DEFAULT_PROXY.to_string()],
        ..Default::default()
    }
}

/// Entry point: picks the effective generator for a proxy's kind and runs
/// it with a fresh name registry
#[derive(Clone)]
pub struct ProxyGenerator {
    profiles: Arc<ProfileRegistry>,
}

impl ProxyGenerator {
    pub fn new(profiles: Arc<ProfileRegistry>) -> Self {
        Self { profiles }
    }

    pub fn generate(&self, proxy: &Proxy) -> Result<ResourceSet> {
        let mut names = NameRegistry::new();
        let resources = match &proxy.owner {
            ProxyOwner::Dataplane { policies, .. } => {
                let template = policies
                    .proxy_template
                    .clone()
                    .unwrap_or_else(default_proxy_template);
                TemplateProxyGenerator::new(template, self.profiles.clone())
                    .generate(proxy, &mut names)?
            }
            ProxyOwner::ZoneIngress { .. } => IngressGenerator.generate(proxy, &mut names)?,
            ProxyOwner::ZoneEgress { .. } => EgressGenerator::default().generate(proxy, &mut names)?,
        };

        debug!(
            proxy = %proxy.node_id(),
            kind = proxy.owner.kind(),
            resources = resources.len(),
            "Generated proxy resources"
        );
        Ok(resources)
    }
}

/// Error for a generator invoked on a proxy kind it does not handle
pub(crate) fn unsupported(generator: &'static str, proxy: &Proxy) -> ConvoyError {
    ConvoyError::UnsupportedProxy {
        generator,
        kind: proxy.owner.kind(),
    }
}
