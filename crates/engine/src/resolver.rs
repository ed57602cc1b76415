//! Document update resolution
//!
//! Decides, for one incoming edit against the document's current record,
//! whether the edit is accepted, silently absorbed, or rejected. Nothing
//! here touches storage or mutates the prior record; an accepted edit
//! carries the merged tree for the coordinator to persist.
//!
//! Conflict policy applies only in new-edits mode. Replication-style
//! writes accept whatever history they bring, which is what lets replicas
//! converge.

use tracing::trace;

use revdb_core::limits::MAX_REV_POS;
use revdb_core::{DocError, DocumentRecord, RevId, RevTree};
use revdb_revtree::{merge, MergeKind};

use crate::parser::{DocParser, ParsedDoc};

/// Inputs that shape resolution
#[derive(Debug, Clone, Copy)]
pub struct ResolveOptions {
    /// Enforce the conflict policy and resurrect deleted documents
    pub new_edits: bool,
    /// History depth kept by stemming
    pub revs_limit: u64,
    /// The caller is removing documents; a deletion of an unknown id fails
    /// with a missing-document error instead of storing a tombstone
    pub was_delete: bool,
}

/// An edit the coordinator should write
#[derive(Debug, Clone)]
pub struct Accepted {
    /// The edit, possibly re-parented onto a deleted winner
    pub doc: ParsedDoc,
    /// Merged and stemmed forest
    pub tree: RevTree,
    /// Revisions whose bodies stemming released
    pub stemmed_revs: Vec<RevId>,
    /// How the edit attached
    pub kind: MergeKind,
}

/// Outcome of resolving one document
#[derive(Debug, Clone)]
pub enum Resolution {
    /// Write the merged record
    Accept(Box<Accepted>),
    /// The revision is already known; report success without writing
    Skip(RevId),
    /// Per-document failure
    Reject(DocError),
}

/// Resolve `doc` against `prior`
pub fn resolve(
    doc: ParsedDoc,
    prior: Option<&DocumentRecord>,
    opts: ResolveOptions,
    parser: &dyn DocParser,
) -> Resolution {
    let Some(prior) = prior else {
        return resolve_new(doc, opts);
    };

    let mut doc = doc;
    // A fresh create on top of a deleted document continues the deleted
    // line instead of starting a disjoint root. Done before the known-rev
    // check: a content-derived rev for the recreate may equal the very first
    // revision of the document.
    if opts.new_edits
        && prior.deleted
        && !doc.deleted
        && doc.rev.pos == 1
        && prior.rev.pos < MAX_REV_POS
    {
        trace!(target: "revdb::bulk", id = %doc.id, parent = %prior.rev, "Resurrecting deleted document");
        doc = parser.reparent(&doc, &prior.rev);
    }

    if prior.rev_tree.contains(&doc.rev) {
        return Resolution::Skip(doc.rev);
    }

    let outcome = merge(prior.rev_tree.clone(), doc.path.clone(), opts.revs_limit);

    if opts.new_edits && rejects(prior.deleted, doc.deleted, outcome.kind) {
        return Resolution::Reject(DocError::Conflict { id: doc.id });
    }

    Resolution::Accept(Box::new(Accepted {
        doc,
        tree: outcome.tree,
        stemmed_revs: outcome.stemmed_revs,
        kind: outcome.kind,
    }))
}

fn resolve_new(doc: ParsedDoc, opts: ResolveOptions) -> Resolution {
    if doc.deleted && opts.was_delete {
        return Resolution::Reject(DocError::MissingDoc { id: doc.id });
    }
    // an edit naming a parent the store never saw
    if opts.new_edits && doc.path.root_is_missing() {
        return Resolution::Reject(DocError::Conflict { id: doc.id });
    }
    let outcome = merge(RevTree::new(), doc.path.clone(), opts.revs_limit);
    Resolution::Accept(Box::new(Accepted {
        doc,
        tree: outcome.tree,
        stemmed_revs: outcome.stemmed_revs,
        kind: outcome.kind,
    }))
}

/// New-edits conflict policy
fn rejects(old_deleted: bool, new_deleted: bool, kind: MergeKind) -> bool {
    (old_deleted && new_deleted)
        || (!old_deleted && kind != MergeKind::NewLeaf)
        || (old_deleted && !new_deleted && kind.is_fork())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::JsonDocParser;
    use revdb_core::{JsonMap, RevStatus};
    use revdb_revtree::winning_rev;
    use serde_json::json;
    use std::collections::BTreeMap;

    const NEW_EDITS: ResolveOptions = ResolveOptions {
        new_edits: true,
        revs_limit: 1000,
        was_delete: false,
    };
    const REPLICATE: ResolveOptions = ResolveOptions {
        new_edits: false,
        revs_limit: 1000,
        was_delete: false,
    };

    fn record_from(accepted: &Accepted) -> DocumentRecord {
        let rev = winning_rev(&accepted.tree).unwrap();
        let deleted = accepted
            .tree
            .find(&rev)
            .map_or(false, |n| n.status == RevStatus::Deleted);
        DocumentRecord {
            id: accepted.doc.id.clone(),
            rev,
            rev_tree: accepted.tree.clone(),
            revs: BTreeMap::new(),
            data: JsonMap::new(),
            deleted,
            seq: 1,
            stemmed_revs: Vec::new(),
        }
    }

    fn accept(res: Resolution) -> Accepted {
        match res {
            Resolution::Accept(a) => *a,
            other => panic!("expected accept, got {:?}", other),
        }
    }

    fn create(parser: &JsonDocParser, raw: serde_json::Value) -> DocumentRecord {
        let doc = parser.parse(&raw, true).unwrap();
        record_from(&accept(resolve(doc, None, NEW_EDITS, parser)))
    }

    #[test]
    fn test_policy_table() {
        assert!(rejects(true, true, MergeKind::NewLeaf));
        assert!(rejects(false, false, MergeKind::NewBranch));
        assert!(rejects(false, true, MergeKind::InternalNode));
        assert!(rejects(false, false, MergeKind::NewRoot));
        assert!(rejects(true, false, MergeKind::NewBranch));
        assert!(rejects(true, false, MergeKind::NewRoot));
        assert!(!rejects(false, false, MergeKind::NewLeaf));
        assert!(!rejects(false, true, MergeKind::NewLeaf));
        assert!(!rejects(true, false, MergeKind::NewLeaf));
    }

    #[test]
    fn test_new_document_accepted() {
        let parser = JsonDocParser::default();
        let doc = parser.parse(&json!({"_id": "a"}), true).unwrap();
        let accepted = accept(resolve(doc, None, NEW_EDITS, &parser));
        assert_eq!(accepted.kind, MergeKind::NewLeaf);
        assert_eq!(accepted.tree.node_count(), 1);
    }

    #[test]
    fn test_removing_unknown_document_is_missing_in_both_modes() {
        let parser = JsonDocParser::default();
        let doc = parser
            .parse(&json!({"_id": "a", "_rev": "1-x", "_deleted": true}), false)
            .unwrap();
        for base in [REPLICATE, NEW_EDITS] {
            let opts = ResolveOptions {
                was_delete: true,
                ..base
            };
            assert!(matches!(
                resolve(doc.clone(), None, opts, &parser),
                Resolution::Reject(DocError::MissingDoc { .. })
            ));
        }
    }

    #[test]
    fn test_replicated_tombstone_for_unknown_document_is_accepted() {
        let parser = JsonDocParser::default();
        let doc = parser
            .parse(
                &json!({"_id": "a", "_deleted": true, "_revisions": {"start": 2, "ids": ["y", "x"]}}),
                false,
            )
            .unwrap();
        let accepted = accept(resolve(doc, None, REPLICATE, &parser));
        assert_eq!(accepted.tree.node_count(), 2);
        let leaves = accepted.tree.leaves();
        assert_eq!(leaves[0].rev, RevId::new(2, "y"));
        assert_eq!(leaves[0].status, RevStatus::Deleted);
    }

    #[test]
    fn test_fresh_tombstone_without_removal_flag_is_stored() {
        let parser = JsonDocParser::default();
        let doc = parser.parse(&json!({"_id": "a", "_deleted": true}), true).unwrap();
        let accepted = accept(resolve(doc, None, NEW_EDITS, &parser));
        assert_eq!(accepted.kind, MergeKind::NewLeaf);
        assert!(revdb_revtree::is_deleted(&accepted.tree));
    }

    #[test]
    fn test_unknown_parent_on_new_document_conflicts() {
        let parser = JsonDocParser::default();
        let doc = parser.parse(&json!({"_id": "a", "_rev": "1-x"}), true).unwrap();
        assert!(matches!(
            resolve(doc, None, NEW_EDITS, &parser),
            Resolution::Reject(DocError::Conflict { .. })
        ));
    }

    #[test]
    fn test_known_revision_is_skipped() {
        let parser = JsonDocParser::default();
        let raw = json!({"_id": "a", "v": 1});
        let record = create(&parser, raw.clone());
        let again = parser.parse(&raw, true).unwrap();
        assert!(matches!(
            resolve(again, Some(&record), NEW_EDITS, &parser),
            Resolution::Skip(rev) if rev == record.rev
        ));
    }

    #[test]
    fn test_stale_edit_conflicts_but_replicates() {
        let parser = JsonDocParser::default();
        let record = create(&parser, json!({"_id": "a"}));
        let base = record.rev.to_string();
        let first = parser
            .parse(&json!({"_id": "a", "_rev": base.as_str(), "v": 1}), true)
            .unwrap();
        let record = record_from(&accept(resolve(first, Some(&record), NEW_EDITS, &parser)));

        // second edit against the same parent forks
        let stale = parser
            .parse(&json!({"_id": "a", "_rev": base.as_str(), "v": 2}), true)
            .unwrap();
        assert!(matches!(
            resolve(stale.clone(), Some(&record), NEW_EDITS, &parser),
            Resolution::Reject(DocError::Conflict { .. })
        ));
        let replicated = accept(resolve(stale, Some(&record), REPLICATE, &parser));
        assert_eq!(replicated.kind, MergeKind::NewBranch);
        assert_eq!(replicated.tree.leaves().len(), 2);
    }

    #[test]
    fn test_recreate_after_delete_reparents() {
        let parser = JsonDocParser::default();
        let raw = json!({"_id": "a", "v": 1});
        let record = create(&parser, raw.clone());
        let del = parser
            .parse(&json!({"_id": "a", "_rev": record.rev.to_string(), "_deleted": true}), true)
            .unwrap();
        let record = record_from(&accept(resolve(del, Some(&record), NEW_EDITS, &parser)));
        assert!(record.deleted);

        // same body as the first revision; must not be absorbed as known
        let recreate = parser.parse(&raw, true).unwrap();
        let accepted = accept(resolve(recreate, Some(&record), NEW_EDITS, &parser));
        assert_eq!(accepted.kind, MergeKind::NewLeaf);
        assert_eq!(accepted.doc.rev.pos, 3);
        assert_eq!(accepted.tree.roots.len(), 1);
        assert_eq!(winning_rev(&accepted.tree), Some(accepted.doc.rev.clone()));
    }

    #[test]
    fn test_deleting_deleted_document_conflicts() {
        let parser = JsonDocParser::default();
        let record = create(&parser, json!({"_id": "a"}));
        let del = parser
            .parse(&json!({"_id": "a", "_rev": record.rev.to_string(), "_deleted": true}), true)
            .unwrap();
        let record = record_from(&accept(resolve(del, Some(&record), NEW_EDITS, &parser)));
        let again = parser
            .parse(&json!({"_id": "a", "_rev": record.rev.to_string(), "_deleted": true}), true)
            .unwrap();
        assert!(matches!(
            resolve(again, Some(&record), NEW_EDITS, &parser),
            Resolution::Reject(DocError::Conflict { .. })
        ));
    }

    #[test]
    fn test_replication_does_not_resurrect() {
        let parser = JsonDocParser::default();
        let record = create(&parser, json!({"_id": "a"}));
        let del = parser
            .parse(&json!({"_id": "a", "_rev": record.rev.to_string(), "_deleted": true}), true)
            .unwrap();
        let record = record_from(&accept(resolve(del, Some(&record), NEW_EDITS, &parser)));

        let unrelated = parser.parse(&json!({"_id": "a", "_rev": "1-zzz"}), false).unwrap();
        let accepted = accept(resolve(unrelated, Some(&record), REPLICATE, &parser));
        assert_eq!(accepted.kind, MergeKind::NewRoot);
        assert_eq!(accepted.doc.rev, RevId::new(1, "zzz"));
        assert_eq!(accepted.tree.roots.len(), 2);
    }
}
