//! Stemming
//!
//! Bounds how much history keeps a body. A node keeps its body only while
//! some leaf below it is fewer than `revs_limit` generations away; every
//! other node is marked `missing`. Nodes are never removed: the shape stays
//! so that a peer still holding the old history can merge against it.

use revdb_core::{RevId, RevStatus, RevTree};
use rustc_hash::FxHashSet;
use tracing::trace;

/// Mark nodes beyond `revs_limit` as missing.
///
/// Returns the revisions whose bodies were released by this call, sorted.
/// Nodes already missing are not reported again. A limit of 0 is treated
/// as 1: a leaf always keeps its body.
pub fn stem(tree: &mut RevTree, revs_limit: u64) -> Vec<RevId> {
    let limit = revs_limit.max(1);
    let mut released: FxHashSet<RevId> = FxHashSet::default();

    for path in &tree.roots {
        let flat = path.root.flatten();
        // Generation of each preorder entry, parents always come first.
        let mut generation = vec![path.pos; flat.len()];
        let mut has_children = vec![false; flat.len()];
        for (idx, node) in flat.iter().enumerate().skip(1) {
            if let Some(parent) = node.parent {
                generation[idx] = generation[parent] + 1;
                has_children[parent] = true;
            }
        }

        // Distance from each node to its nearest leaf, folded bottom-up.
        let mut nearest_leaf: Vec<u64> = has_children
            .iter()
            .map(|&inner| if inner { u64::MAX } else { 0 })
            .collect();
        for idx in (1..flat.len()).rev() {
            if let Some(parent) = flat[idx].parent {
                let via_child = nearest_leaf[idx].saturating_add(1);
                if via_child < nearest_leaf[parent] {
                    nearest_leaf[parent] = via_child;
                }
            }
        }

        for (idx, node) in flat.iter().enumerate() {
            if nearest_leaf[idx] >= limit && node.status.has_body() {
                released.insert(RevId::new(generation[idx], node.hash.clone()));
            }
        }
    }

    if released.is_empty() {
        return Vec::new();
    }

    tree.walk_mut(|pos, node| {
        if node.status.has_body() && released.contains(&RevId::new(pos, node.hash.clone())) {
            node.status = RevStatus::Missing;
        }
    });

    let mut out: Vec<RevId> = released.into_iter().collect();
    out.sort();
    trace!(target: "revdb::revtree", stemmed = out.len(), limit, "Stemmed revision bodies");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use revdb_core::{RevNode, RevPath};

    fn chain(pos: u64, ids: &[&str]) -> RevPath {
        let ids: Vec<String> = ids.iter().map(|s| s.to_string()).collect();
        RevPath::chain(pos, &ids, RevStatus::Available, RevStatus::Available).unwrap()
    }

    fn statuses(tree: &RevTree) -> Vec<(String, RevStatus)> {
        let mut out = Vec::new();
        tree.walk(|pos, node| out.push((format!("{}-{}", pos, node.hash), node.status)));
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    #[test]
    fn test_limit_one_keeps_only_leaf_bodies() {
        let mut tree = RevTree::from_path(chain(1, &["a", "b"]));
        let stemmed = stem(&mut tree, 1);
        assert_eq!(stemmed, vec![RevId::new(1, "a")]);
        assert_eq!(
            statuses(&tree),
            vec![
                ("1-a".to_string(), RevStatus::Missing),
                ("2-b".to_string(), RevStatus::Available)
            ]
        );
        // shape retained
        assert_eq!(tree.node_count(), 2);
    }

    #[test]
    fn test_within_limit_is_untouched() {
        let mut tree = RevTree::from_path(chain(1, &["a", "b", "c"]));
        assert!(stem(&mut tree, 3).is_empty());
        assert!(statuses(&tree).iter().all(|(_, s)| *s == RevStatus::Available));
    }

    #[test]
    fn test_already_missing_not_reported_twice() {
        let mut tree = RevTree::from_path(chain(1, &["a", "b", "c"]));
        assert_eq!(stem(&mut tree, 2), vec![RevId::new(1, "a")]);
        assert!(stem(&mut tree, 2).is_empty());
    }

    #[test]
    fn test_short_branch_keeps_shared_ancestor() {
        // a -> b -> c -> d    and    a -> e
        let mut root = RevNode::leaf("a", RevStatus::Available);
        let c = RevNode::with_child("c", RevStatus::Available, RevNode::leaf("d", RevStatus::Available));
        root.insert_child(RevNode::with_child("b", RevStatus::Available, c));
        root.insert_child(RevNode::leaf("e", RevStatus::Available));
        let mut tree = RevTree::from_path(RevPath::new(1, root));

        let stemmed = stem(&mut tree, 2);
        // a is one step from leaf e, so it survives; b is two steps from d
        assert_eq!(stemmed, vec![RevId::new(2, "b")]);
        assert_eq!(tree.find(&RevId::new(1, "a")).unwrap().status, RevStatus::Available);
    }

    #[test]
    fn test_zero_limit_acts_as_one() {
        let mut tree = RevTree::from_path(chain(1, &["a", "b"]));
        assert_eq!(stem(&mut tree, 0), vec![RevId::new(1, "a")]);
        assert_eq!(tree.find(&RevId::new(2, "b")).unwrap().status, RevStatus::Available);
    }

    #[test]
    fn test_deleted_ancestor_is_released() {
        let ids = vec!["a".to_string(), "b".to_string()];
        let mut tree = RevTree::from_path(
            RevPath::chain(1, &ids, RevStatus::Deleted, RevStatus::Available).unwrap(),
        );
        assert_eq!(stem(&mut tree, 1), vec![RevId::new(1, "a")]);
    }
}
