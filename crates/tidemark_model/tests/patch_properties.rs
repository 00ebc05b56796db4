//! Property tests for the payload diff/apply/merge algebra.

use proptest::collection::{btree_map, vec};
use proptest::option;
use proptest::prelude::*;
use std::collections::BTreeMap;
use tidemark_model::{CurationPayload, EntityPayload, Patch, Payload};

fn tag_maps() -> impl Strategy<Value = BTreeMap<String, String>> {
    btree_map("[a-z]{1,6}", "[a-z]{0,4}", 0..4)
}

fn entities() -> impl Strategy<Value = EntityPayload> {
    (
        "[a-z ]{0,12}",
        vec("[a-z]{1,8}", 0..3),
        "[a-z ]{0,12}",
        tag_maps(),
    )
        .prop_map(|(name, categories, notes, tags)| EntityPayload {
            name,
            categories,
            notes,
            tags,
            // Server-assigned, untouched by the patch algebra; keep it
            // empty so equality checks stay exact.
            slug: None,
        })
}

fn curations() -> impl Strategy<Value = CurationPayload> {
    (
        "[a-z ]{0,12}",
        "[a-z ]{0,20}",
        option::of("[a-z]{1,8}"),
        tag_maps(),
    )
        .prop_map(|(title, body, entity_ref, tags)| CurationPayload {
            title,
            body,
            entity_ref,
            tags,
        })
}

proptest! {
    #[test]
    fn entity_apply_rebuilds_diff(base in entities(), edited in entities()) {
        let patch = edited.diff_from(Some(&base));
        let mut rebuilt = base.clone();
        rebuilt.apply(&patch);
        prop_assert_eq!(rebuilt, edited);
    }

    #[test]
    fn entity_diff_empty_iff_equal(base in entities(), edited in entities()) {
        let patch = edited.diff_from(Some(&base));
        prop_assert_eq!(patch.is_empty(), base == edited);
    }

    #[test]
    fn entity_full_diff_applies_onto_anything(target in entities(), source in entities()) {
        let patch = source.diff_from(None);
        let mut rebuilt = target;
        rebuilt.apply(&patch);
        prop_assert_eq!(rebuilt, source);
    }

    #[test]
    fn entity_merge_prefers_local(local in entities(), remote in entities()) {
        let merged = local.merged_onto(&remote);
        prop_assert_eq!(&merged.name, &local.name);
        prop_assert_eq!(&merged.categories, &local.categories);
        prop_assert_eq!(&merged.notes, &local.notes);
        // Tag union: every local pair survives verbatim, every
        // remote-only key survives with the remote value.
        for (key, value) in &local.tags {
            prop_assert_eq!(merged.tags.get(key), Some(value));
        }
        for (key, value) in &remote.tags {
            if !local.tags.contains_key(key) {
                prop_assert_eq!(merged.tags.get(key), Some(value));
            }
        }
    }

    #[test]
    fn curation_apply_rebuilds_diff(base in curations(), edited in curations()) {
        let patch = edited.diff_from(Some(&base));
        let mut rebuilt = base.clone();
        rebuilt.apply(&patch);
        prop_assert_eq!(rebuilt, edited);
    }

    #[test]
    fn curation_diff_empty_iff_equal(base in curations(), edited in curations()) {
        let patch = edited.diff_from(Some(&base));
        prop_assert_eq!(patch.is_empty(), base == edited);
    }

    #[test]
    fn curation_merge_link_falls_back_to_remote(local in curations(), remote in curations()) {
        let merged = local.merged_onto(&remote);
        match &local.entity_ref {
            Some(id) => prop_assert_eq!(merged.entity_ref.as_ref(), Some(id)),
            None => prop_assert_eq!(&merged.entity_ref, &remote.entity_ref),
        }
    }
}
