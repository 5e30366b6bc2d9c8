//! Properties of tag matching and tag-derived names

use std::collections::BTreeMap;

use proptest::prelude::*;

use convoy_common::{MATCH_ALL, MESH_TAG, SERVICE_TAG};
use convoy_mesh::model::Tags;
use convoy_mesh::model::tags::{destination_cluster_name, lb_subset_keys, sni_from_tags};

fn tag_pairs() -> impl Strategy<Value = Vec<(String, String)>> {
    prop::collection::btree_map("[a-z]{1,6}", "[a-z0-9]{1,6}", 0..6)
        .prop_map(|pairs| pairs.into_iter().collect())
}

proptest! {
    #[test]
    fn cluster_name_ignores_insertion_order(pairs in tag_pairs(), service in "[a-z]{1,8}") {
        let forward: Tags = pairs.iter().cloned().collect();
        let backward: Tags = pairs.iter().rev().cloned().collect();
        let forward = forward.with_tag(SERVICE_TAG, service.as_str());
        let backward = backward.with_tag(SERVICE_TAG, service.as_str());

        prop_assert_eq!(
            destination_cluster_name(&service, &forward),
            destination_cluster_name(&service, &backward)
        );
    }

    #[test]
    fn sni_lists_keys_in_ascending_order(pairs in tag_pairs(), service in "[a-z]{1,8}") {
        let unique: BTreeMap<String, String> = pairs.into_iter().collect();
        let tags: Tags = unique.clone().into_iter().collect();
        let sni = sni_from_tags(&tags.with_tag(SERVICE_TAG, service.as_str()));

        prop_assert!(sni.starts_with(&service));
        if unique.is_empty() {
            prop_assert_eq!(sni, service);
        } else {
            let rendered: Vec<String> = unique.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            prop_assert_eq!(sni, format!("{}{{{}}}", service, rendered.join(",")));
        }
    }

    #[test]
    fn tags_match_themselves_and_wildcards(pairs in tag_pairs(), other in tag_pairs()) {
        let tags: Tags = pairs.iter().cloned().collect();
        prop_assert!(tags.matches(&tags));

        let wildcard: Tags = other.iter().map(|(k, _)| (k.clone(), MATCH_ALL.to_string())).collect();
        prop_assert!(wildcard.matches(&tags));
    }

    #[test]
    fn subset_keys_are_sorted_and_carry_mesh(destinations in prop::collection::vec(tag_pairs(), 1..4)) {
        let destinations: Vec<Tags> = destinations
            .into_iter()
            .map(|pairs| pairs.into_iter().collect::<Tags>().with_tag(SERVICE_TAG, "backend"))
            .collect();

        let subsets = lb_subset_keys(&destinations);
        prop_assert!(!subsets.is_empty());
        for (i, keys) in subsets.iter().enumerate() {
            prop_assert!(keys.contains(&MESH_TAG.to_string()));
            prop_assert!(!keys.contains(&SERVICE_TAG.to_string()));
            prop_assert!(keys.windows(2).all(|w| w[0] <= w[1]));
            prop_assert!(!subsets[i + 1..].contains(keys));
        }
    }
}
