//! Winning revision selection
//!
//! Every replica must pick the same winner from the same forest without
//! talking to anyone, so the rule is a total order over leaves:
//! non-deleted leaves beat deleted ones, then the higher generation wins,
//! then the lexically greater hash.

use std::cmp::Ordering;

use revdb_core::{LeafInfo, RevId, RevTree};

fn rank(a: &LeafInfo, b: &LeafInfo) -> Ordering {
    // `false` sorts before `true`, so a live leaf ranks higher here
    b.status
        .is_deleted()
        .cmp(&a.status.is_deleted())
        .then_with(|| a.rev.cmp(&b.rev))
}

/// The winning leaf, or `None` for an empty forest
pub fn winning_leaf(tree: &RevTree) -> Option<LeafInfo> {
    tree.leaves().into_iter().max_by(rank)
}

/// Revision id of the winning leaf
pub fn winning_rev(tree: &RevTree) -> Option<RevId> {
    winning_leaf(tree).map(|leaf| leaf.rev)
}

/// True if the document's winner is a deletion.
///
/// An empty forest counts as deleted: there is nothing live to return.
pub fn is_deleted(tree: &RevTree) -> bool {
    winning_leaf(tree).map_or(true, |leaf| leaf.status.is_deleted())
}

/// Non-deleted leaves that lost to the winner, highest ranked first
pub fn conflicting_leaves(tree: &RevTree) -> Vec<RevId> {
    let mut leaves = tree.leaves();
    leaves.sort_by(|a, b| rank(b, a));
    leaves
        .into_iter()
        .skip(1)
        .filter(|leaf| !leaf.status.is_deleted())
        .map(|leaf| leaf.rev)
        .collect()
}
