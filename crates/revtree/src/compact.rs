//! Compaction
//!
//! Releases the bodies of every non-leaf revision. Run after each write
//! when a store is configured with auto-compaction.

use revdb_core::{RevId, RevStatus, RevTree};

/// Mark every internal node that still holds a body as missing.
///
/// Returns the released revisions, sorted.
pub fn compact_tree(tree: &mut RevTree) -> Vec<RevId> {
    let mut released = Vec::new();
    tree.walk_mut(|pos, node| {
        if !node.is_leaf() && node.status.has_body() {
            node.status = RevStatus::Missing;
            released.push(RevId::new(pos, node.hash.clone()));
        }
    });
    released.sort();
    released
}

#[cfg(test)]
mod tests {
    use super::*;
    use revdb_core::{RevNode, RevPath};

    #[test]
    fn test_compact_keeps_leaves() {
        let mut root = RevNode::leaf("a", RevStatus::Available);
        root.insert_child(RevNode::with_child(
            "b",
            RevStatus::Deleted,
            RevNode::leaf("c", RevStatus::Available),
        ));
        root.insert_child(RevNode::leaf("x", RevStatus::Deleted));
        let mut tree = RevTree::from_path(RevPath::new(1, root));

        let released = compact_tree(&mut tree);
        assert_eq!(released, vec![RevId::new(1, "a"), RevId::new(2, "b")]);
        assert_eq!(tree.find(&RevId::new(3, "c")).unwrap().status, RevStatus::Available);
        assert_eq!(tree.find(&RevId::new(2, "x")).unwrap().status, RevStatus::Deleted);
        assert!(compact_tree(&mut tree).is_empty());
    }
}
