//! Document parsing
//!
//! Turns a raw JSON document into a [`ParsedDoc`]: its id, the revision
//! branch the write introduces, the deletion flag, the user fields and the
//! attachments. The bulk writer only ever sees parsed documents; any
//! parser error fails the whole batch before a transaction opens.
//!
//! In new-edits mode the parser mints the new revision. With
//! `deterministic_revs` the hash is derived from the canonical JSON of the
//! edit (parent revision, deletion flag, fields and attachments), so the
//! same edit submitted twice maps to the same revision and is absorbed as
//! a no-op. Otherwise the hash is a random UUID.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use revdb_core::limits::{MAX_REV_POS, RESERVED_ID_PREFIXES, RESERVED_MEMBERS, REV_HASH_BYTES};
use revdb_core::{
    Attachment, AttachmentData, JsonMap, ParseError, RevId, RevNode, RevPath, RevStatus,
};

use crate::digest::{Digester, Sha256Digester};

/// Content type assumed when an attachment does not name one
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// A document ready for resolution
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDoc {
    /// Document id
    pub id: String,
    /// Revision this write produces (the leaf of `path`)
    pub rev: RevId,
    /// Incoming branch, root first
    pub path: RevPath,
    /// Whether the revision is a deletion
    pub deleted: bool,
    /// User fields
    pub data: JsonMap,
    /// Attachments by name
    pub attachments: BTreeMap<String, Attachment>,
}

/// Turns raw documents into [`ParsedDoc`]s
pub trait DocParser: Send + Sync {
    /// Parse one raw document
    fn parse(&self, raw: &JsonValue, new_edits: bool) -> Result<ParsedDoc, ParseError>;

    /// Rebuild a fresh edit so that it descends from `parent`.
    ///
    /// The edit gets a new revision one generation below `parent`.
    /// `parent.pos` must be below `MAX_REV_POS`.
    fn reparent(&self, doc: &ParsedDoc, parent: &RevId) -> ParsedDoc;
}

/// Default parser for JSON documents
#[derive(Clone)]
pub struct JsonDocParser {
    deterministic_revs: bool,
    digester: Arc<dyn Digester>,
}

impl std::fmt::Debug for JsonDocParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonDocParser")
            .field("deterministic_revs", &self.deterministic_revs)
            .field("algorithm", &self.digester.algorithm())
            .finish()
    }
}

impl Default for JsonDocParser {
    fn default() -> Self {
        Self::new(true)
    }
}

impl JsonDocParser {
    /// Parser minting content-derived (`true`) or random (`false`) revisions
    pub fn new(deterministic_revs: bool) -> Self {
        Self::with_digester(deterministic_revs, Arc::new(Sha256Digester))
    }

    /// Parser hashing revisions with a specific digester
    pub fn with_digester(deterministic_revs: bool, digester: Arc<dyn Digester>) -> Self {
        JsonDocParser {
            deterministic_revs,
            digester,
        }
    }

    fn new_rev_hash(
        &self,
        parent: Option<&RevId>,
        deleted: bool,
        data: &JsonMap,
        attachments: &BTreeMap<String, Attachment>,
    ) -> String {
        if !self.deterministic_revs {
            return Uuid::new_v4().simple().to_string();
        }
        let atts: JsonMap = attachments
            .iter()
            .map(|(name, att)| {
                let content = match (&att.digest, &att.data) {
                    (Some(digest), _) => json!(digest),
                    (None, Some(AttachmentData::Encoded(text))) => json!(text),
                    (None, Some(AttachmentData::Binary(bytes))) => json!(bytes),
                    (None, None) => JsonValue::Null,
                };
                (name.clone(), json!([att.content_type, content]))
            })
            .collect();
        // serde_json maps iterate in key order, so this encoding is canonical
        let canonical = json!({
            "parent": parent.map(|p| p.to_string()),
            "deleted": deleted,
            "data": data,
            "attachments": atts,
        });
        let hash = self.digester.hash(canonical.to_string().as_bytes());
        hash.iter()
            .take(REV_HASH_BYTES)
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}

impl DocParser for JsonDocParser {
    fn parse(&self, raw: &JsonValue, new_edits: bool) -> Result<ParsedDoc, ParseError> {
        let obj = raw.as_object().ok_or(ParseError::NotAnObject)?;

        for key in obj.keys() {
            if key.starts_with('_') && !RESERVED_MEMBERS.contains(&key.as_str()) {
                return Err(ParseError::BadSpecialMember(key.clone()));
            }
        }

        let id = parse_id(obj.get("_id"), new_edits)?;
        let deleted = match obj.get("_deleted") {
            None | Some(JsonValue::Null) => false,
            Some(JsonValue::Bool(b)) => *b,
            Some(_) => return Err(ParseError::BadSpecialMember("_deleted".to_string())),
        };
        let rev = match obj.get("_rev") {
            None => None,
            Some(JsonValue::String(s)) => Some(s.parse::<RevId>()?),
            Some(other) => return Err(ParseError::InvalidRev(other.to_string())),
        };
        let attachments = match obj.get("_attachments") {
            None | Some(JsonValue::Null) => BTreeMap::new(),
            Some(value) => parse_attachments(value)?,
        };
        let data: JsonMap = obj
            .iter()
            .filter(|(k, _)| !k.starts_with('_'))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let status = RevStatus::for_edit(deleted);
        let (leaf, path) = if new_edits {
            let hash = self.new_rev_hash(rev.as_ref(), deleted, &data, &attachments);
            match &rev {
                Some(parent) => (
                    RevId::new(child_pos(parent)?, hash.clone()),
                    RevPath::chain(
                        parent.pos,
                        &[parent.hash.clone(), hash],
                        RevStatus::Missing,
                        status,
                    ),
                ),
                None => (
                    RevId::new(1, hash.clone()),
                    RevPath::chain(1, &[hash], RevStatus::Missing, status),
                ),
            }
        } else {
            match obj.get("_revisions") {
                Some(revisions) => {
                    let (start, ids) = parse_revisions(revisions)?;
                    let leaf = RevId::new(start, ids[0].clone());
                    if let Some(given) = &rev {
                        if *given != leaf {
                            return Err(ParseError::InvalidRevisions(format!(
                                "_rev {} does not match _revisions head {}",
                                given, leaf
                            )));
                        }
                    }
                    let oldest_first: Vec<String> = ids.into_iter().rev().collect();
                    // start >= ids.len() is checked by parse_revisions
                    let pos = start - (oldest_first.len() as u64 - 1);
                    (
                        leaf,
                        RevPath::chain(pos, &oldest_first, RevStatus::Missing, status),
                    )
                }
                None => {
                    let leaf = rev.ok_or(ParseError::MissingRev)?;
                    let path =
                        RevPath::chain(leaf.pos, &[leaf.hash.clone()], RevStatus::Missing, status);
                    (leaf, path)
                }
            }
        };
        let path = path.ok_or(ParseError::MissingRev)?;

        Ok(ParsedDoc {
            id,
            rev: leaf,
            path,
            deleted,
            data,
            attachments,
        })
    }

    fn reparent(&self, doc: &ParsedDoc, parent: &RevId) -> ParsedDoc {
        let hash = self.new_rev_hash(Some(parent), doc.deleted, &doc.data, &doc.attachments);
        let child = RevNode::leaf(hash.clone(), RevStatus::for_edit(doc.deleted));
        let root = RevNode::with_child(parent.hash.clone(), RevStatus::Missing, child);
        ParsedDoc {
            id: doc.id.clone(),
            rev: RevId::new(parent.pos.saturating_add(1), hash),
            path: RevPath::new(parent.pos, root),
            deleted: doc.deleted,
            data: doc.data.clone(),
            attachments: doc.attachments.clone(),
        }
    }
}

/// Generation of a new edit on top of `parent`
fn child_pos(parent: &RevId) -> Result<u64, ParseError> {
    parent
        .pos
        .checked_add(1)
        .filter(|pos| *pos <= MAX_REV_POS)
        .ok_or_else(|| ParseError::InvalidRev(parent.to_string()))
}

fn parse_id(value: Option<&JsonValue>, new_edits: bool) -> Result<String, ParseError> {
    let id = match value {
        None | Some(JsonValue::Null) => None,
        Some(JsonValue::String(s)) if s.is_empty() => None,
        Some(JsonValue::String(s)) => Some(s.clone()),
        Some(_) => return Err(ParseError::InvalidId),
    };
    match id {
        Some(id) => {
            if id.starts_with('_') && !RESERVED_ID_PREFIXES.iter().any(|p| id.starts_with(p)) {
                return Err(ParseError::ReservedId(id));
            }
            Ok(id)
        }
        None if new_edits => Ok(Uuid::new_v4().simple().to_string()),
        None => Err(ParseError::MissingId),
    }
}

/// `{start, ids}` with ids newest first
fn parse_revisions(value: &JsonValue) -> Result<(u64, Vec<String>), ParseError> {
    let start = value
        .get("start")
        .and_then(JsonValue::as_u64)
        .ok_or_else(|| ParseError::InvalidRevisions("start must be a positive integer".into()))?;
    let ids = value
        .get("ids")
        .and_then(JsonValue::as_array)
        .ok_or_else(|| ParseError::InvalidRevisions("ids must be an array".into()))?;
    if ids.is_empty() {
        return Err(ParseError::InvalidRevisions("ids must not be empty".into()));
    }
    if start > MAX_REV_POS {
        return Err(ParseError::InvalidRevisions(format!(
            "start {} exceeds the highest generation {}",
            start, MAX_REV_POS
        )));
    }
    if start < ids.len() as u64 {
        return Err(ParseError::InvalidRevisions(format!(
            "start {} is shorter than {} ids",
            start,
            ids.len()
        )));
    }
    ids.iter()
        .map(|id| match id.as_str() {
            Some(s) if !s.is_empty() => Ok(s.to_string()),
            _ => Err(ParseError::InvalidRevisions(format!("bad id {}", id))),
        })
        .collect::<Result<Vec<_>, _>>()
        .map(|ids| (start, ids))
}

fn parse_attachments(value: &JsonValue) -> Result<BTreeMap<String, Attachment>, ParseError> {
    let entries = value.as_object().ok_or_else(|| ParseError::BadAttachment {
        name: "_attachments".to_string(),
        reason: "must be an object".to_string(),
    })?;

    let mut out = BTreeMap::new();
    for (name, entry) in entries {
        let bad = |reason: &str| ParseError::BadAttachment {
            name: name.clone(),
            reason: reason.to_string(),
        };
        let entry = entry.as_object().ok_or_else(|| bad("must be an object"))?;
        let content_type = match entry.get("content_type") {
            None | Some(JsonValue::Null) => DEFAULT_CONTENT_TYPE.to_string(),
            Some(JsonValue::String(s)) => s.clone(),
            Some(_) => return Err(bad("content_type must be a string")),
        };
        let revpos = entry.get("revpos").and_then(JsonValue::as_u64);
        let stub = entry.get("stub").and_then(JsonValue::as_bool).unwrap_or(false);

        let attachment = if stub {
            let digest = entry
                .get("digest")
                .and_then(JsonValue::as_str)
                .ok_or_else(|| bad("stub must carry a digest"))?;
            let mut att = Attachment::stub(content_type, digest);
            att.revpos = revpos;
            att.length = entry.get("length").and_then(JsonValue::as_u64);
            att
        } else {
            let data = entry
                .get("data")
                .and_then(JsonValue::as_str)
                .ok_or_else(|| bad("data must be a base64 string"))?;
            let mut att = Attachment::inline(content_type, data);
            att.revpos = revpos;
            att
        };
        out.insert(name.clone(), attachment);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> JsonDocParser {
        JsonDocParser::default()
    }

    #[test]
    fn test_new_doc_gets_generation_one() {
        let doc = parser().parse(&json!({"_id": "a", "v": 1}), true).unwrap();
        assert_eq!(doc.id, "a");
        assert_eq!(doc.rev.pos, 1);
        assert_eq!(doc.rev.hash.len(), REV_HASH_BYTES * 2);
        assert_eq!(doc.path.pos, 1);
        assert_eq!(doc.path.root.status, RevStatus::Available);
        assert_eq!(doc.data.get("v"), Some(&json!(1)));
        assert!(!doc.data.contains_key("_id"));
    }

    #[test]
    fn test_deterministic_revs_repeat() {
        let raw = json!({"_id": "a", "v": 1});
        let a = parser().parse(&raw, true).unwrap();
        let b = parser().parse(&raw, true).unwrap();
        assert_eq!(a.rev, b.rev);
        let c = parser().parse(&json!({"_id": "a", "v": 2}), true).unwrap();
        assert_ne!(a.rev, c.rev);
    }

    #[test]
    fn test_random_revs_differ() {
        let raw = json!({"_id": "a"});
        let p = JsonDocParser::new(false);
        assert_ne!(p.parse(&raw, true).unwrap().rev, p.parse(&raw, true).unwrap().rev);
    }

    #[test]
    fn test_edit_with_rev_names_parent() {
        let doc = parser()
            .parse(&json!({"_id": "a", "_rev": "3-abc", "_deleted": true}), true)
            .unwrap();
        assert!(doc.deleted);
        assert_eq!(doc.rev.pos, 4);
        assert_eq!(doc.path.pos, 3);
        assert!(doc.path.root_is_missing());
        assert_eq!(doc.path.root.children[0].status, RevStatus::Deleted);
    }

    #[test]
    fn test_huge_generation_is_rejected_not_wrapped() {
        let raw = json!({"_id": "x", "_rev": format!("{}-abc", u64::MAX)});
        assert!(matches!(parser().parse(&raw, true), Err(ParseError::InvalidRev(_))));
        assert!(matches!(parser().parse(&raw, false), Err(ParseError::InvalidRev(_))));

        // highest accepted parent has no room for a child
        let top = json!({"_id": "x", "_rev": format!("{}-abc", MAX_REV_POS)});
        assert!(matches!(parser().parse(&top, true), Err(ParseError::InvalidRev(_))));
        assert_eq!(parser().parse(&top, false).unwrap().rev.pos, MAX_REV_POS);
    }

    #[test]
    fn test_huge_revisions_start_is_rejected() {
        let raw = json!({"_id": "x", "_revisions": {"start": u64::MAX, "ids": ["a"]}});
        assert!(matches!(
            parser().parse(&raw, false),
            Err(ParseError::InvalidRevisions(_))
        ));
    }

    #[test]
    fn test_revisions_chain_at_generation_limit() {
        let raw = json!({"_id": "x", "_revisions": {"start": MAX_REV_POS, "ids": ["b", "a"]}});
        let doc = parser().parse(&raw, false).unwrap();
        assert_eq!(doc.path.pos, MAX_REV_POS - 1);
        assert_eq!(doc.rev, RevId::new(MAX_REV_POS, "b"));
    }

    #[test]
    fn test_missing_id_generated_only_in_new_edits() {
        let doc = parser().parse(&json!({"v": 1}), true).unwrap();
        assert_eq!(doc.id.len(), 32);
        assert_eq!(
            parser().parse(&json!({"_rev": "1-a"}), false),
            Err(ParseError::MissingId)
        );
    }

    #[test]
    fn test_id_rules() {
        assert_eq!(
            parser().parse(&json!({"_id": 7}), true),
            Err(ParseError::InvalidId)
        );
        assert!(matches!(
            parser().parse(&json!({"_id": "_secret"}), true),
            Err(ParseError::ReservedId(_))
        ));
        assert!(parser().parse(&json!({"_id": "_design/app"}), true).is_ok());
        assert!(parser().parse(&json!({"_id": "_local/cp"}), true).is_ok());
    }

    #[test]
    fn test_bad_special_member() {
        assert_eq!(
            parser().parse(&json!({"_id": "a", "_zzz": 1}), true),
            Err(ParseError::BadSpecialMember("_zzz".to_string()))
        );
        assert!(parser().parse(&json!([1, 2]), true) == Err(ParseError::NotAnObject));
    }

    #[test]
    fn test_invalid_rev_text() {
        assert!(matches!(
            parser().parse(&json!({"_id": "a", "_rev": "nope"}), true),
            Err(ParseError::InvalidRev(_))
        ));
    }

    #[test]
    fn test_replication_revisions_chain() {
        let doc = parser()
            .parse(
                &json!({"_id": "a", "_revisions": {"start": 3, "ids": ["c", "b", "a"]}}),
                false,
            )
            .unwrap();
        assert_eq!(doc.rev, RevId::new(3, "c"));
        assert_eq!(doc.path.pos, 1);
        assert_eq!(doc.path.root.hash, "a");
        assert!(doc.path.root_is_missing());
    }

    #[test]
    fn test_replication_stemmed_revisions_start_deeper() {
        let doc = parser()
            .parse(&json!({"_id": "a", "_revisions": {"start": 9, "ids": ["y", "x"]}}), false)
            .unwrap();
        assert_eq!(doc.path.pos, 8);
        assert_eq!(doc.rev, RevId::new(9, "y"));
    }

    #[test]
    fn test_replication_rev_only_is_single_node() {
        let doc = parser().parse(&json!({"_id": "a", "_rev": "2-q"}), false).unwrap();
        assert_eq!(doc.rev, RevId::new(2, "q"));
        assert_eq!(doc.path.pos, 2);
        assert!(doc.path.root.is_leaf());
        assert_eq!(doc.path.root.status, RevStatus::Available);
    }

    #[test]
    fn test_replication_without_revision_info() {
        assert_eq!(
            parser().parse(&json!({"_id": "a"}), false),
            Err(ParseError::MissingRev)
        );
        assert!(matches!(
            parser().parse(&json!({"_id": "a", "_revisions": {"start": 1, "ids": ["a", "b"]}}), false),
            Err(ParseError::InvalidRevisions(_))
        ));
    }

    #[test]
    fn test_attachments_inline_and_stub() {
        let doc = parser()
            .parse(
                &json!({
                    "_id": "a",
                    "_attachments": {
                        "a.txt": {"content_type": "text/plain", "data": "aGVsbG8="},
                        "b.bin": {"stub": true, "digest": "sha256-xyz", "revpos": 1}
                    }
                }),
                true,
            )
            .unwrap();
        let a = &doc.attachments["a.txt"];
        assert!(!a.stub);
        assert_eq!(a.data, Some(AttachmentData::Encoded("aGVsbG8=".into())));
        let b = &doc.attachments["b.bin"];
        assert!(b.stub);
        assert_eq!(b.digest.as_deref(), Some("sha256-xyz"));
        assert_eq!(b.content_type, DEFAULT_CONTENT_TYPE);
    }

    #[test]
    fn test_attachment_shape_errors() {
        let stub_without_digest = json!({"_id": "a", "_attachments": {"x": {"stub": true}}});
        assert!(matches!(
            parser().parse(&stub_without_digest, true),
            Err(ParseError::BadAttachment { ref name, .. }) if name == "x"
        ));
        let numeric_data = json!({"_id": "a", "_attachments": {"x": {"data": 5}}});
        assert!(parser().parse(&numeric_data, true).is_err());
    }

    #[test]
    fn test_reparent_descends_from_parent() {
        let p = parser();
        let doc = p.parse(&json!({"_id": "a", "v": 1}), true).unwrap();
        let parent = RevId::new(2, "dead");
        let moved = p.reparent(&doc, &parent);
        assert_eq!(moved.rev.pos, 3);
        assert_ne!(moved.rev.hash, doc.rev.hash);
        assert_eq!(moved.path.root_rev(), parent);
        assert!(moved.path.root_is_missing());
        assert_eq!(moved.data, doc.data);
    }
}
