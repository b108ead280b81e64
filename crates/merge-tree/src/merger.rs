//! The three-way merger: given a new head, an optional local head, and
//! their lowest common ancestor bodies, produces either a merged item or a
//! conflict set.

use std::collections::BTreeSet;

use perspectivedb_types::{derive_version, Body, Item, Version};
use serde_json::Value;

/// Result of attempting to reconcile a new head against a local head.
#[derive(Debug, Clone)]
pub enum MergeResult {
    /// Nothing to stage: the two heads are already the same version.
    NoOp,
    /// A clean result, either a fast-forward or a synthesized merge item.
    Merged(Item),
    /// Per-attribute conflicts; the caller stages `new_head` with its
    /// conflict bit set.
    Conflict(BTreeSet<String>),
}

/// Runs the three-way merge for one (new head, local head) pair.
///
/// `lca` is the body of the lowest common ancestor, if one could be
/// resolved (an empty body is treated the same as "no ancestor": every key
/// present in either side counts as freshly introduced).
pub fn merge(new_head: &Item, local_head: Option<&Item>, lca: Option<&Item>, version_size: usize) -> MergeResult {
    let Some(local_head) = local_head else {
        return MergeResult::Merged(new_head.clone());
    };

    if new_head.header.v == local_head.header.v {
        return MergeResult::NoOp;
    }

    if local_head
        .header
        .v
        .as_ref()
        .is_some_and(|local_v| new_head.header.pa.contains(local_v))
    {
        return MergeResult::Merged(new_head.clone());
    }

    // Root after tombstone: the local head is already deleted and shares no
    // ancestry with the incoming item (no LCA to diff against), so this
    // isn't a delete-vs-edit conflict — it's a new root continuing the id's
    // history past the tombstone. Chain it as the tombstone's successor
    // instead of running the generic attribute diff.
    if local_head.header.d && lca.is_none() {
        let local_v = local_head
            .header
            .v
            .clone()
            .expect("stored heads always carry a version");
        let mut header = new_head.header.clone();
        header.pa = vec![local_v];
        header.pe = None;
        header.c = false;
        header.i = None;
        return MergeResult::Merged(Item::new(header, new_head.body.clone()));
    }

    let empty_body = Body::new();
    let lca_body = lca.map_or(&empty_body, |item| &item.body);

    let conflicts = diff_attributes(&new_head.body, &local_head.body, lca_body);

    if new_head.header.d != local_head.header.d {
        let mut conflicts = conflicts;
        let _ = conflicts.insert("__tombstone".to_owned());
        return MergeResult::Conflict(conflicts);
    }

    if !conflicts.is_empty() {
        return MergeResult::Conflict(conflicts);
    }

    let merged_body = merge_bodies(&new_head.body, &local_head.body, lca_body);

    let mut parents = vec![new_head.header.v.clone(), local_head.header.v.clone()]
        .into_iter()
        .flatten()
        .collect::<Vec<Version>>();
    parents.sort_by(|a, b| a.to_base64().cmp(&b.to_base64()));

    let canonical = perspectivedb_types::canonical_bytes(&merged_body);
    let version = derive_version(&canonical, &parents, version_size);

    let mut header = new_head.header.clone();
    header.v = Some(version);
    header.pa = parents;
    header.pe = None;
    header.c = false;
    header.d = false;
    header.i = None;

    MergeResult::Merged(Item::new(header, merged_body))
}

/// Determines which top-level body attributes changed on both sides to
/// different values relative to the LCA.
fn diff_attributes(new_body: &Body, local_body: &Body, lca_body: &Body) -> BTreeSet<String> {
    let mut keys: BTreeSet<&String> = BTreeSet::new();
    keys.extend(new_body.keys());
    keys.extend(local_body.keys());
    keys.extend(lca_body.keys());

    let mut conflicts = BTreeSet::new();

    for key in keys {
        let base = lca_body.get(key);
        let new_value = new_body.get(key);
        let local_value = local_body.get(key);

        let new_changed = new_value != base;
        let local_changed = local_value != base;

        if new_changed && local_changed && new_value != local_value {
            let _ = conflicts.insert(key.clone());
        }
    }

    conflicts
}

/// Produces the merged body once no conflicts remain: attributes changed on
/// only one side take that side's value, unchanged attributes keep the
/// LCA's value.
fn merge_bodies(new_body: &Body, local_body: &Body, lca_body: &Body) -> Body {
    let mut keys: BTreeSet<&String> = BTreeSet::new();
    keys.extend(new_body.keys());
    keys.extend(local_body.keys());
    keys.extend(lca_body.keys());

    let mut merged = Body::new();

    for key in keys {
        let base = lca_body.get(key);
        let new_value = new_body.get(key);
        let local_value = local_body.get(key);

        let value: Option<&Value> = if new_value != base {
            new_value
        } else if local_value != base {
            local_value
        } else {
            base
        };

        if let Some(value) = value {
            let _ = merged.insert(key.clone(), value.clone());
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use perspectivedb_types::{Header, Id};
    use serde_json::json;

    use super::*;

    fn item(id: &str, v: [u8; 3], parents: Vec<[u8; 3]>, body: Vec<(&str, Value)>) -> Item {
        let header = Header {
            id: Id::from(id),
            v: Some(Version::from_raw(v)),
            pa: parents.into_iter().map(Version::from_raw).collect(),
            pe: None,
            i: None,
            c: false,
            d: false,
        };
        let mut b = Body::new();
        for (k, val) in body {
            let _ = b.insert(k.to_owned(), val);
        }
        Item::new(header, b)
    }

    #[test]
    fn fast_forward_when_no_local_head() {
        let n = item("X", [1, 0, 0], vec![], vec![]);
        let result = merge(&n, None, None, 3);
        assert!(matches!(result, MergeResult::Merged(_)));
    }

    #[test]
    fn no_op_when_versions_equal() {
        let n = item("X", [1, 0, 0], vec![], vec![]);
        let result = merge(&n, Some(&n), None, 3);
        assert!(matches!(result, MergeResult::NoOp));
    }

    #[test]
    fn fast_forward_when_new_head_descends_from_local() {
        let local = item("X", [1, 0, 0], vec![], vec![]);
        let new = item("X", [2, 0, 0], vec![[1, 0, 0]], vec![]);
        let result = merge(&new, Some(&local), None, 3);
        match result {
            MergeResult::Merged(merged) => assert_eq!(merged.header.v, new.header.v),
            other => panic!("expected fast-forward merge, got {other:?}"),
        }
    }

    #[test]
    fn disjoint_attribute_edits_merge_without_conflict() {
        let lca = item("X", [0, 0, 0], vec![], vec![("u", json!("A")), ("v", json!("A"))]);
        let b = item("X", [2, 0, 0], vec![[0, 0, 0]], vec![("u", json!("Bu")), ("v", json!("A"))]);
        let c = item("X", [3, 0, 0], vec![[0, 0, 0]], vec![("u", json!("A")), ("v", json!("Cv"))]);

        let result = merge(&c, Some(&b), Some(&lca), 3);
        match result {
            MergeResult::Merged(merged) => {
                assert_eq!(merged.body.get("u"), Some(&json!("Bu")));
                assert_eq!(merged.body.get("v"), Some(&json!("Cv")));
                let mut parent_b64: Vec<String> =
                    merged.header.pa.iter().map(Version::to_base64).collect();
                parent_b64.sort();
                let mut expected: Vec<String> =
                    vec![b.header.v.unwrap().to_base64(), c.header.v.unwrap().to_base64()];
                expected.sort();
                assert_eq!(parent_b64, expected);
            }
            other => panic!("expected clean merge, got {other:?}"),
        }
    }

    #[test]
    fn same_attribute_edited_both_sides_conflicts() {
        let lca = item("X", [0, 0, 0], vec![], vec![("more2", json!("orig"))]);
        let local = item("X", [3, 0, 0], vec![[0, 0, 0]], vec![("more2", json!("other"))]);
        let remote = item("X", [2, 0, 0], vec![[0, 0, 0]], vec![("more2", json!("body"))]);

        let result = merge(&remote, Some(&local), Some(&lca), 3);
        match result {
            MergeResult::Conflict(attrs) => assert!(attrs.contains("more2")),
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn new_root_chains_onto_an_unrelated_tombstone_instead_of_conflicting() {
        let mut tombstone = item("X", [2, 0, 0], vec![[1, 0, 0]], vec![]);
        tombstone.header.d = true;
        let new_root = item("X", [9, 0, 0], vec![], vec![("k", json!("v"))]);

        let result = merge(&new_root, Some(&tombstone), None, 3);
        match result {
            MergeResult::Merged(merged) => {
                assert_eq!(merged.header.pa, vec![tombstone.header.v.unwrap()]);
                assert_eq!(merged.header.v, new_root.header.v);
                assert!(!merged.header.d);
                assert_eq!(merged.body.get("k"), Some(&json!("v")));
            }
            other => panic!("expected tombstone chaining, got {other:?}"),
        }
    }

    #[test]
    fn merged_version_is_deterministic_given_same_inputs() {
        let lca = item("X", [0, 0, 0], vec![], vec![("u", json!("A"))]);
        let b = item("X", [2, 0, 0], vec![[0, 0, 0]], vec![("u", json!("Bu"))]);
        let c = item("X", [3, 0, 0], vec![[0, 0, 0]], vec![]);

        let first = merge(&c, Some(&b), Some(&lca), 3);
        let second = merge(&c, Some(&b), Some(&lca), 3);

        match (first, second) {
            (MergeResult::Merged(a), MergeResult::Merged(b)) => assert_eq!(a.header.v, b.header.v),
            _ => panic!("expected both merges to succeed identically"),
        }
    }
}
