//! Revision tree merge
//!
//! Merges one incoming branch into an existing forest and reports how the
//! branch attached. The classification drives the new-edits conflict
//! policy, so it has to be exactly reproducible:
//!
//! - `NewLeaf`: the branch grew an existing leaf
//! - `NewBranch`: the branch forked from a node that already had children
//! - `InternalNode`: every incoming node was already known
//! - `NewRoot`: the branch shares no history with the forest and was added
//!   as a separate root (treated as a fork by the conflict policy)
//!
//! Children are inserted in hash order and roots are kept in
//! `(pos, hash)` order, so merging the same set of branches in any order
//! yields the same forest.

use revdb_core::{RevId, RevNode, RevPath, RevTree};

use crate::stem::stem;

/// How an incoming branch attached to the forest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeKind {
    /// Extended an existing leaf
    NewLeaf,
    /// Forked from a node that already had children
    NewBranch,
    /// Added nothing new
    InternalNode,
    /// Shares no history with the forest
    NewRoot,
}

impl MergeKind {
    /// Wire name of the classification
    pub fn as_str(self) -> &'static str {
        match self {
            MergeKind::NewLeaf => "new_leaf",
            MergeKind::NewBranch => "new_branch",
            MergeKind::InternalNode => "internal_node",
            MergeKind::NewRoot => "new_root",
        }
    }

    /// True when the merge introduced a second line of history
    pub fn is_fork(self) -> bool {
        matches!(self, MergeKind::NewBranch | MergeKind::NewRoot)
    }

    // A fork anywhere in the branch outweighs a leaf extension elsewhere.
    fn combine(current: Option<MergeKind>, event: MergeKind) -> Option<MergeKind> {
        match (current, event) {
            (Some(MergeKind::NewBranch), _) => current,
            _ => Some(event),
        }
    }
}

/// Result of [`merge`]
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// Merged and stemmed forest
    pub tree: RevTree,
    /// Revisions whose bodies stemming released, sorted
    pub stemmed_revs: Vec<RevId>,
    /// How the branch attached
    pub kind: MergeKind,
}

/// Merge `path` into `tree`, then stem to `revs_limit`.
pub fn merge(tree: RevTree, path: RevPath, revs_limit: u64) -> MergeOutcome {
    let mut tree = tree;
    let kind = merge_path(&mut tree, path);
    let stemmed_revs = stem(&mut tree, revs_limit);
    MergeOutcome {
        tree,
        stemmed_revs,
        kind,
    }
}

/// Merge without stemming
pub fn merge_path(tree: &mut RevTree, path: RevPath) -> MergeKind {
    if tree.is_empty() {
        tree.roots.push(path);
        return MergeKind::NewLeaf;
    }

    let mut pending = Some(path);
    let mut kind: Option<MergeKind> = None;
    let mut result: Vec<RevPath> = Vec::with_capacity(tree.roots.len() + 1);

    for mut branch in std::mem::take(&mut tree.roots) {
        let Some(incoming) = pending.take() else {
            result.push(branch);
            continue;
        };

        if branch.pos == incoming.pos && branch.root.hash == incoming.root.hash {
            if let Some(event) = merge_nodes(&mut branch.root, incoming.root) {
                kind = MergeKind::combine(kind, event);
            }
            result.push(branch);
        } else if branch.pos < incoming.pos {
            // The incoming branch starts deeper; look for its root inside this one.
            let target = incoming.root_rev();
            match find_mut(&mut branch.root, branch.pos, &target) {
                Some(node) => {
                    if let Some(event) = merge_nodes(node, incoming.root) {
                        kind = MergeKind::combine(kind, event);
                    }
                }
                None => pending = Some(incoming),
            }
            result.push(branch);
        } else if branch.pos > incoming.pos {
            // This root starts deeper; it may be a partial copy of history the
            // incoming branch carries in full. The overlapping part is merged
            // into the existing root so the classification stays relative to
            // what was already known, then the result is hung back under the
            // incoming ancestors.
            let mut incoming = incoming;
            let target = branch.root_rev();
            let grafted = match find_mut(&mut incoming.root, incoming.pos, &target) {
                Some(node) => {
                    let placeholder = RevNode::leaf(String::new(), node.status);
                    let overlap = std::mem::replace(node, placeholder);
                    if let Some(event) = merge_nodes(&mut branch.root, overlap) {
                        kind = MergeKind::combine(kind, event);
                    }
                    *node = take_root(&mut branch);
                    true
                }
                None => false,
            };
            if grafted {
                result.push(incoming);
            } else {
                pending = Some(incoming);
                result.push(branch);
            }
        } else {
            pending = Some(incoming);
            result.push(branch);
        }
    }

    let kind = match pending {
        Some(path) => {
            result.push(path);
            MergeKind::NewRoot
        }
        None => kind.unwrap_or(MergeKind::InternalNode),
    };

    tree.roots = result;
    coalesce(tree);
    kind
}

/// Merge `source` into `target`, which must name the same revision.
///
/// Returns the strongest attachment event seen, or `None` when `source`
/// added nothing.
fn merge_nodes(target: &mut RevNode, source: RevNode) -> Option<MergeKind> {
    let mut kind = None;
    let mut queue: Vec<(&mut RevNode, RevNode)> = vec![(target, source)];

    while let Some((target, mut source)) = queue.pop() {
        if !target.status.has_body() && source.status.has_body() {
            target.status = source.status;
        }

        let mut matched: Vec<RevNode> = Vec::new();
        for child in std::mem::take(&mut source.children) {
            if target.children.iter().any(|c| c.hash == child.hash) {
                matched.push(child);
            } else {
                let event = if target.children.is_empty() {
                    MergeKind::NewLeaf
                } else {
                    MergeKind::NewBranch
                };
                kind = MergeKind::combine(kind, event);
                target.insert_child(child);
            }
        }

        if matched.is_empty() {
            continue;
        }
        for existing in target.children.iter_mut() {
            if let Some(i) = matched.iter().position(|m| m.hash == existing.hash) {
                queue.push((existing, matched.swap_remove(i)));
            }
        }
    }
    kind
}

/// Find the node for `target` under `root`, which sits at generation `pos`.
fn find_mut<'a>(root: &'a mut RevNode, pos: u64, target: &RevId) -> Option<&'a mut RevNode> {
    if target.pos < pos {
        return None;
    }
    let mut stack: Vec<(u64, &'a mut RevNode)> = vec![(pos, root)];
    while let Some((p, node)) = stack.pop() {
        if p == target.pos {
            if node.hash == target.hash {
                return Some(node);
            }
            continue;
        }
        for child in node.children.iter_mut() {
            stack.push((p + 1, child));
        }
    }
    None
}

fn take_root(path: &mut RevPath) -> RevNode {
    let placeholder = RevNode::leaf(String::new(), path.root.status);
    std::mem::replace(&mut path.root, placeholder)
}

/// Fold roots that turned out to be contained in an earlier root.
///
/// Happens when an incoming branch bridges two roots that were previously
/// disjoint.
fn coalesce(tree: &mut RevTree) {
    tree.sort_roots();
    let mut i = 1;
    while i < tree.roots.len() {
        let rev = tree.roots[i].root_rev();
        let host = tree.roots[..i].iter_mut().position(|p| {
            p.pos < rev.pos && find_mut(&mut p.root, p.pos, &rev).is_some()
        });
        match host {
            Some(j) => {
                let mut absorbed = tree.roots.remove(i);
                let host = &mut tree.roots[j];
                if let Some(node) = find_mut(&mut host.root, host.pos, &rev) {
                    merge_nodes(node, take_root(&mut absorbed));
                }
            }
            None => i += 1,
        }
    }
}
