//! Tags, tag selectors and the names derived from them

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use convoy_common::{MATCH_ALL, MESH_TAG, SERVICE_TAG, ZONE_TAG};

/// Ordered string-to-string tag map.
///
/// The same type is used for the tags carried by an inbound or external
/// service and for selectors matched against them. In a selector the value
/// `*` matches any value, including an absent key.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tags(BTreeMap<String, String>);

impl Tags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Value of the service tag
    pub fn service(&self) -> Option<&str> {
        self.get(SERVICE_TAG)
    }

    /// Value of the zone tag
    pub fn zone(&self) -> Option<&str> {
        self.get(ZONE_TAG)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn without_tag(mut self, key: &str) -> Self {
        self.0.remove(key);
        self
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Treating `self` as a selector, check whether `tags` satisfies it
    pub fn matches(&self, tags: &Tags) -> bool {
        self.iter()
            .all(|(key, value)| value == MATCH_ALL || tags.get(key) == Some(value))
    }

    /// Number of selector entries that pin a concrete value
    pub fn specificity(&self) -> usize {
        self.0.values().filter(|v| v.as_str() != MATCH_ALL).count()
    }

    /// Tags as plain metadata
    pub fn to_metadata(&self) -> BTreeMap<String, String> {
        self.0.clone()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Tags {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl fmt::Display for Tags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}={}", key, value)?;
        }
        Ok(())
    }
}

/// Set of selectors; a tag set matches when any selector matches
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSelectorSet(Vec<Tags>);

impl TagSelectorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a selector unless an identical one is already present
    pub fn add(&mut self, selector: Tags) {
        if !self.0.contains(&selector) {
            self.0.push(selector);
        }
    }

    pub fn matches(&self, tags: &Tags) -> bool {
        self.0.iter().any(|selector| selector.matches(tags))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tags> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Tags> for TagSelectorSet {
    fn from_iter<I: IntoIterator<Item = Tags>>(iter: I) -> Self {
        let mut set = TagSelectorSet::new();
        for selector in iter {
            set.add(selector);
        }
        set
    }
}

/// Cluster name for a route destination: the bare service name when the
/// destination pins only the service, `service{k=v,...}` otherwise.
pub fn destination_cluster_name(service: &str, destination: &Tags) -> String {
    let extra = destination.clone().without_tag(SERVICE_TAG);
    if extra.is_empty() {
        service.to_string()
    } else {
        format!("{}{{{}}}", service, extra)
    }
}

/// SNI a dataplane presents when connecting to a destination through an
/// ingress or egress. Zone-ingress and zone-egress filter chains match on it.
pub fn sni_from_tags(destination: &Tags) -> String {
    let service = destination.service().unwrap_or_default();
    destination_cluster_name(service, destination)
}

/// Cluster name of a service inside a mesh, unique across meshes
pub fn mesh_cluster_name(mesh: &str, service: &str) -> String {
    format!("{}:{}", mesh, service)
}

/// Subset keys for a set of destinations: every key besides the service tag,
/// plus the synthetic mesh tag, deduplicated and ordered.
pub fn lb_subset_keys<'a>(destinations: impl IntoIterator<Item = &'a Tags>) -> Vec<Vec<String>> {
    let mut subsets: Vec<Vec<String>> = Vec::new();
    for destination in destinations {
        let mut keys: Vec<String> = destination
            .keys()
            .filter(|k| *k != SERVICE_TAG && *k != MESH_TAG)
            .map(str::to_string)
            .collect();
        keys.push(MESH_TAG.to_string());
        keys.sort();
        if !subsets.contains(&keys) {
            subsets.push(keys);
        }
    }
    subsets
}
