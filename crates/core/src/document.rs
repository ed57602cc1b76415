//! Document records
//!
//! One [`DocumentRecord`] per document id is the unit the bulk writer reads,
//! mutates and persists. It owns the revision forest and the bodies that
//! survived stemming. Attachment payloads live in their own store and are
//! reached through the digests in each body's stubs.
//!
//! Records are persisted as MessagePack.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;

use crate::attachment::AttachmentRecord;
use crate::error::{Error, Result};
use crate::rev::RevId;
use crate::tree::RevTree;

/// JSON object body of a revision
pub type JsonMap = Map<String, JsonValue>;

/// Body of one revision
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RevisionBody {
    /// User fields (no underscore members)
    pub data: JsonMap,
    /// Whether this revision is a deletion
    pub deleted: bool,
    /// Attachment stubs by name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attachments: BTreeMap<String, AttachmentRecord>,
}

/// Persisted state of one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// External document id
    pub id: String,
    /// Winning revision
    pub rev: RevId,
    /// Full revision forest
    pub rev_tree: RevTree,
    /// Bodies for revisions not stemmed away
    pub revs: BTreeMap<RevId, RevisionBody>,
    /// Copy of the winning revision's user fields
    pub data: JsonMap,
    /// Whether the winning revision is a deletion
    pub deleted: bool,
    /// Position in the store's change order, assigned on each write
    pub seq: u64,
    /// Revisions pruned by the write in progress. Never persisted.
    #[serde(skip)]
    pub stemmed_revs: Vec<RevId>,
}

impl DocumentRecord {
    /// Body of the winning revision
    pub fn winner_body(&self) -> Option<&RevisionBody> {
        self.revs.get(&self.rev)
    }

    /// Attachment stubs of the winning revision
    pub fn winner_attachments(&self) -> Option<&BTreeMap<String, AttachmentRecord>> {
        self.winner_body().map(|b| &b.attachments)
    }

    /// Render the winning revision as a JSON document with `_id`, `_rev`,
    /// `_deleted` (when set) and `_attachments` stubs.
    pub fn to_json(&self) -> JsonValue {
        let mut out = self.data.clone();
        out.insert("_id".to_string(), JsonValue::String(self.id.clone()));
        out.insert("_rev".to_string(), JsonValue::String(self.rev.to_string()));
        if self.deleted {
            out.insert("_deleted".to_string(), JsonValue::Bool(true));
        }
        if let Some(atts) = self.winner_attachments().filter(|a| !a.is_empty()) {
            let rendered: JsonMap = atts
                .iter()
                .map(|(name, att)| (name.clone(), att.to_json()))
                .collect();
            out.insert("_attachments".to_string(), JsonValue::Object(rendered));
        }
        JsonValue::Object(out)
    }

    /// Serialize for storage
    pub fn encode(&self) -> Result<Vec<u8>> {
        rmp_serde::to_vec_named(self).map_err(Error::from)
    }

    /// Deserialize from storage
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        rmp_serde::from_slice(bytes).map_err(Error::from)
    }
}

/// Store-wide metadata record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMeta {
    /// Last assigned sequence number
    pub seq: u64,
    /// Number of documents whose winner is not deleted
    pub doc_count: u64,
    /// History depth kept by stemming
    pub revs_limit: u64,
}

impl StoreMeta {
    /// Fresh metadata for an empty store
    pub fn new(revs_limit: u64) -> Self {
        StoreMeta {
            seq: 0,
            doc_count: 0,
            revs_limit,
        }
    }

    /// Allocate the next sequence number
    pub fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    /// Apply a signed change to the live document count
    pub fn apply_doc_delta(&mut self, delta: i64) {
        if delta >= 0 {
            self.doc_count = self.doc_count.saturating_add(delta as u64);
        } else {
            self.doc_count = self.doc_count.saturating_sub(delta.unsigned_abs());
        }
    }

    /// Serialize for storage
    pub fn encode(&self) -> Result<Vec<u8>> {
        rmp_serde::to_vec_named(self).map_err(Error::from)
    }

    /// Deserialize from storage
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        rmp_serde::from_slice(bytes).map_err(Error::from)
    }
}
