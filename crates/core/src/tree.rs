//! Revision tree data model
//!
//! A document's history is a forest. Each root ([`RevPath`]) starts at some
//! generation `pos` (1 for a full history, higher when the history arrived
//! from a peer that had already stemmed it) and owns a tree of
//! [`RevNode`]s. A child is always exactly one generation deeper than its
//! parent.
//!
//! Shape invariants kept by every constructor and by the merger:
//! - children of a node are sorted by hash
//! - roots are sorted by `(pos, hash)`
//! - no `(generation, hash)` pair appears twice in the forest
//!
//! Sorting is what makes two replicas holding the same set of edits hold
//! structurally equal trees, regardless of the order edits arrived in.
//!
//! # Depth
//!
//! Stemmed ancestors stay in the tree as `missing` nodes, so a long-lived
//! document grows a tree as deep as its edit count. Nothing in this module
//! recurses over the tree: traversal, clone, equality and drop are all
//! iterative, and the serialized form is a flat preorder list with parent
//! indices rather than nested objects.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::rev::RevId;

/// What is known about one revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevStatus {
    /// Body is held locally
    Available,
    /// Shape only; the body was stemmed, compacted or never received
    Missing,
    /// Body is held locally and the revision is a deletion tombstone
    Deleted,
}

impl RevStatus {
    /// Whether a body for this revision is held
    pub fn has_body(self) -> bool {
        !matches!(self, RevStatus::Missing)
    }

    /// Whether this revision is a deletion
    pub fn is_deleted(self) -> bool {
        matches!(self, RevStatus::Deleted)
    }

    /// Status of a freshly written revision
    pub fn for_edit(deleted: bool) -> Self {
        if deleted {
            RevStatus::Deleted
        } else {
            RevStatus::Available
        }
    }
}

/// One revision in a tree
#[derive(Debug)]
pub struct RevNode {
    /// Revision hash (the part after the dash)
    pub hash: String,
    /// Body availability / deletion marker
    pub status: RevStatus,
    /// Child revisions, sorted by hash
    pub children: Vec<RevNode>,
}

/// Flat preorder entry used for serialization, clone and equality
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatNode {
    /// Revision hash
    pub hash: String,
    /// Node status
    pub status: RevStatus,
    /// Index of the parent within the flat list; `None` for the root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<usize>,
}

impl RevNode {
    /// Create a childless node
    pub fn leaf(hash: impl Into<String>, status: RevStatus) -> Self {
        RevNode {
            hash: hash.into(),
            status,
            children: Vec::new(),
        }
    }

    /// Create a node with a single child
    pub fn with_child(hash: impl Into<String>, status: RevStatus, child: RevNode) -> Self {
        RevNode {
            hash: hash.into(),
            status,
            children: vec![child],
        }
    }

    /// True if this node has no children
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Insert a child keeping children sorted by hash
    pub fn insert_child(&mut self, child: RevNode) {
        let idx = self
            .children
            .binary_search_by(|c| c.hash.as_str().cmp(child.hash.as_str()))
            .unwrap_or_else(|i| i);
        self.children.insert(idx, child);
    }

    /// Flatten the subtree rooted here into preorder.
    ///
    /// Children are emitted in their stored (sorted) order, so two equal
    /// subtrees always flatten to equal lists.
    pub fn flatten(&self) -> Vec<FlatNode> {
        let mut out = Vec::new();
        let mut stack: Vec<(&RevNode, Option<usize>)> = vec![(self, None)];
        while let Some((node, parent)) = stack.pop() {
            let idx = out.len();
            out.push(FlatNode {
                hash: node.hash.clone(),
                status: node.status,
                parent,
            });
            for child in node.children.iter().rev() {
                stack.push((child, Some(idx)));
            }
        }
        out
    }

    /// Rebuild a subtree from its flat preorder form.
    ///
    /// Fails if the list is empty, has more than one root, or a parent
    /// index does not point at an earlier entry.
    pub fn unflatten(flat: Vec<FlatNode>) -> Result<RevNode, String> {
        if flat.is_empty() {
            return Err("empty revision path".to_string());
        }
        let parents: Vec<Option<usize>> = flat.iter().map(|n| n.parent).collect();
        let mut built: Vec<Option<RevNode>> = flat
            .into_iter()
            .map(|n| Some(RevNode::leaf(n.hash, n.status)))
            .collect();
        if parents[0].is_some() {
            return Err("first entry must be the root".to_string());
        }
        // Later entries are descendants of earlier ones, so walking backwards
        // moves every child into its parent only after it is complete.
        for idx in (1..built.len()).rev() {
            let parent = parents[idx].ok_or_else(|| format!("entry {} has no parent", idx))?;
            if parent >= idx {
                return Err(format!("entry {} points forward to {}", idx, parent));
            }
            let child = built[idx]
                .take()
                .ok_or_else(|| format!("entry {} consumed twice", idx))?;
            built[parent]
                .as_mut()
                .ok_or_else(|| format!("entry {} consumed before its children", parent))?
                .insert_child(child);
        }
        built[0].take().ok_or_else(|| "root consumed".to_string())
    }
}

impl Drop for RevNode {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(mut node) = pending.pop() {
            pending.append(&mut node.children);
        }
    }
}

impl Clone for RevNode {
    fn clone(&self) -> Self {
        match RevNode::unflatten(self.flatten()) {
            Ok(node) => node,
            // flatten always yields a well-formed list
            Err(_) => RevNode::leaf(self.hash.clone(), self.status),
        }
    }
}

impl PartialEq for RevNode {
    fn eq(&self, other: &Self) -> bool {
        self.flatten() == other.flatten()
    }
}

impl Eq for RevNode {}

impl Serialize for RevNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.flatten().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RevNode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let flat = Vec::<FlatNode>::deserialize(deserializer)?;
        RevNode::unflatten(flat).map_err(serde::de::Error::custom)
    }
}

/// A root of the revision forest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevPath {
    /// Generation of `root`
    pub pos: u64,
    /// Root node
    pub root: RevNode,
}

impl RevPath {
    /// Create a root at generation `pos`
    pub fn new(pos: u64, root: RevNode) -> Self {
        RevPath { pos, root }
    }

    /// Build a single chain from revision hashes ordered oldest first.
    ///
    /// Every node but the last gets `ancestor_status`; the last gets
    /// `leaf_status`. Returns `None` for an empty list.
    pub fn chain(
        pos: u64,
        hashes: &[String],
        ancestor_status: RevStatus,
        leaf_status: RevStatus,
    ) -> Option<Self> {
        let (last, ancestors) = hashes.split_last()?;
        let mut node = RevNode::leaf(last.clone(), leaf_status);
        for hash in ancestors.iter().rev() {
            node = RevNode::with_child(hash.clone(), ancestor_status, node);
        }
        Some(RevPath::new(pos, node))
    }

    /// Revision id of the root node
    pub fn root_rev(&self) -> RevId {
        RevId::new(self.pos, self.root.hash.clone())
    }

    /// True if the root's body is not held.
    ///
    /// For a fresh edit this means the edit names a parent revision.
    pub fn root_is_missing(&self) -> bool {
        self.root.status == RevStatus::Missing
    }
}

/// A leaf of the forest, as seen by the winner selector and by callers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafInfo {
    /// Revision id of the leaf
    pub rev: RevId,
    /// Status of the leaf
    pub status: RevStatus,
}

/// A document's full revision forest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevTree {
    /// Roots sorted by `(pos, hash)`
    pub roots: Vec<RevPath>,
}

impl RevTree {
    /// Create an empty forest
    pub fn new() -> Self {
        RevTree { roots: Vec::new() }
    }

    /// Create a forest holding one root
    pub fn from_path(path: RevPath) -> Self {
        RevTree { roots: vec![path] }
    }

    /// True if the forest has no roots
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Restore root ordering after roots were added or replaced
    pub fn sort_roots(&mut self) {
        self.roots
            .sort_by(|a, b| a.pos.cmp(&b.pos).then_with(|| a.root.hash.cmp(&b.root.hash)));
    }

    /// Visit every node depth-first as `(generation, node)`
    pub fn walk<'a>(&'a self, mut visit: impl FnMut(u64, &'a RevNode)) {
        let mut stack: Vec<(u64, &RevNode)> =
            self.roots.iter().rev().map(|p| (p.pos, &p.root)).collect();
        while let Some((pos, node)) = stack.pop() {
            visit(pos, node);
            for child in node.children.iter().rev() {
                stack.push((pos + 1, child));
            }
        }
    }

    /// Visit every node mutably as `(generation, node)`
    pub fn walk_mut(&mut self, mut visit: impl FnMut(u64, &mut RevNode)) {
        let mut stack: Vec<(u64, &mut RevNode)> = self
            .roots
            .iter_mut()
            .rev()
            .map(|p| (p.pos, &mut p.root))
            .collect();
        while let Some((pos, node)) = stack.pop() {
            visit(pos, node);
            for child in node.children.iter_mut().rev() {
                stack.push((pos + 1, child));
            }
        }
    }

    /// All leaves, in traversal order
    pub fn leaves(&self) -> Vec<LeafInfo> {
        let mut out = Vec::new();
        self.walk(|pos, node| {
            if node.is_leaf() {
                out.push(LeafInfo {
                    rev: RevId::new(pos, node.hash.clone()),
                    status: node.status,
                });
            }
        });
        out
    }

    /// Find the node for a revision
    pub fn find(&self, rev: &RevId) -> Option<&RevNode> {
        let mut found = None;
        self.walk(|pos, node| {
            if found.is_none() && pos == rev.pos && node.hash == rev.hash {
                found = Some(node);
            }
        });
        found
    }

    /// Whether the forest records this revision at all (in any status)
    pub fn contains(&self, rev: &RevId) -> bool {
        self.find(rev).is_some()
    }

    /// Every revision id in the forest
    pub fn rev_ids(&self) -> Vec<RevId> {
        let mut out = Vec::new();
        self.walk(|pos, node| out.push(RevId::new(pos, node.hash.clone())));
        out
    }

    /// Number of nodes in the forest
    pub fn node_count(&self) -> usize {
        let mut n = 0;
        self.walk(|_, _| n += 1);
        n
    }
}
