//! Generated resources and the set they are collected into

use std::collections::HashSet;

use super::{ResourcePayload, ResourceType};

/// Which generator produced a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    Transparent,
    Inbound,
    Outbound,
    Template,
    Ingress,
    Egress,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Transparent => "transparent",
            Origin::Inbound => "inbound",
            Origin::Outbound => "outbound",
            Origin::Template => "template",
            Origin::Ingress => "ingress",
            Origin::Egress => "egress",
        }
    }
}

/// A named discovery resource
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub name: String,
    pub origin: Origin,
    /// Version pinned by the resource's author, if any
    pub version: Option<String>,
    pub payload: ResourcePayload,
}

impl Resource {
    /// Create a resource named after its payload
    pub fn new(origin: Origin, payload: ResourcePayload) -> Self {
        Self {
            name: payload.name().to_string(),
            origin,
            version: None,
            payload,
        }
    }

    pub fn with_version(mut self, version: Option<String>) -> Self {
        self.version = version.filter(|v| !v.is_empty());
        self
    }

    pub fn resource_type(&self) -> ResourceType {
        self.payload.resource_type()
    }
}

/// Ordered collection of generated resources
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceSet {
    resources: Vec<Resource>,
}

impl ResourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, resource: Resource) {
        self.resources.push(resource);
    }

    pub fn extend(&mut self, other: ResourceSet) {
        self.resources.extend(other.resources);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.iter()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Find a resource by type and name
    pub fn get(&self, resource_type: ResourceType, name: &str) -> Option<&Resource> {
        self.resources
            .iter()
            .find(|r| r.resource_type() == resource_type && r.name == name)
    }

    /// Names of all resources of a type, in generation order
    pub fn names(&self, resource_type: ResourceType) -> Vec<&str> {
        self.resources
            .iter()
            .filter(|r| r.resource_type() == resource_type)
            .map(|r| r.name.as_str())
            .collect()
    }

    pub fn into_vec(self) -> Vec<Resource> {
        self.resources
    }
}

impl IntoIterator for ResourceSet {
    type Item = Resource;
    type IntoIter = std::vec::IntoIter<Resource>;

    fn into_iter(self) -> Self::IntoIter {
        self.resources.into_iter()
    }
}

/// Names already emitted during one generation pass.
///
/// A resource is only added after its name has been claimed, so later
/// generators never duplicate a listener or cluster an earlier one produced.
#[derive(Debug, Default)]
pub struct NameRegistry {
    seen: HashSet<(ResourceType, String)>,
}

impl NameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a name, returning false when it was already taken
    pub fn claim(&mut self, resource_type: ResourceType, name: &str) -> bool {
        self.seen.insert((resource_type, name.to_string()))
    }

    pub fn is_claimed(&self, resource_type: ResourceType, name: &str) -> bool {
        self.seen.contains(&(resource_type, name.to_string()))
    }
}
