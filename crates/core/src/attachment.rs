//! Attachment types
//!
//! Three shapes of the same thing:
//! - [`Attachment`]: what arrives in a revision, either inline payload or a stub
//! - [`AttachmentRecord`]: the per-name entry kept in a revision body (always a stub once written)
//! - [`StoredAttachment`]: the payload, held once per digest in the attachment store
//!
//! Payloads are shared across documents. A stored payload lists every
//! `(document, revision)` whose body names it and is removed once that
//! list empties.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};
use crate::rev::RevId;

/// Attachment payload as it travels through the write path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttachmentData {
    /// Text-encoded (base64) payload, as submitted
    Encoded(String),
    /// Decoded bytes
    Binary(Vec<u8>),
}

/// An attachment named in an incoming revision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// MIME type, as submitted
    pub content_type: String,
    /// Content address, set by the processor (or carried by a stub)
    pub digest: Option<String>,
    /// Decoded length in bytes
    pub length: Option<u64>,
    /// Generation of the revision that first carried this content
    pub revpos: Option<u64>,
    /// Reference to an already-stored payload
    pub stub: bool,
    /// Payload; absent for stubs
    pub data: Option<AttachmentData>,
}

impl Attachment {
    /// An inline attachment carrying base64 text
    pub fn inline(content_type: impl Into<String>, base64: impl Into<String>) -> Self {
        Attachment {
            content_type: content_type.into(),
            digest: None,
            length: None,
            revpos: None,
            stub: false,
            data: Some(AttachmentData::Encoded(base64.into())),
        }
    }

    /// A stub referencing a payload by digest
    pub fn stub(content_type: impl Into<String>, digest: impl Into<String>) -> Self {
        Attachment {
            content_type: content_type.into(),
            digest: Some(digest.into()),
            length: None,
            revpos: None,
            stub: true,
            data: None,
        }
    }

    /// Decoded bytes, once the processor has run
    pub fn binary(&self) -> Option<&[u8]> {
        match &self.data {
            Some(AttachmentData::Binary(bytes)) => Some(bytes),
            _ => None,
        }
    }
}

/// Per-name attachment metadata kept in a revision body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRecord {
    /// Content address of the payload
    pub digest: String,
    /// MIME type
    pub content_type: String,
    /// Payload length in bytes
    pub length: u64,
    /// Generation of the revision that first carried this content
    pub revpos: u64,
    /// Always true once the revision is written
    pub stub: bool,
}

impl AttachmentRecord {
    /// Render as the `_attachments` entry of a JSON document
    pub fn to_json(&self) -> JsonValue {
        json!({
            "stub": self.stub,
            "digest": self.digest,
            "content_type": self.content_type,
            "length": self.length,
            "revpos": self.revpos,
        })
    }
}

/// Payload held in the attachment store, keyed by digest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredAttachment {
    /// Content address of `data`
    pub digest: String,
    /// MIME type of the first write
    pub content_type: String,
    /// Length of `data`
    pub length: u64,
    /// Decoded bytes
    pub data: Vec<u8>,
    /// Revisions whose bodies reference this payload, by document id
    pub refs: BTreeMap<String, BTreeSet<RevId>>,
}

impl StoredAttachment {
    /// A payload nothing references yet
    pub fn new(
        digest: impl Into<String>,
        content_type: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        StoredAttachment {
            digest: digest.into(),
            content_type: content_type.into(),
            length: data.len() as u64,
            data,
            refs: BTreeMap::new(),
        }
    }

    /// Record that revision `rev` of document `id` names this payload
    pub fn add_ref(&mut self, id: &str, rev: &RevId) {
        self.refs.entry(id.to_string()).or_default().insert(rev.clone());
    }

    /// Forget the reference from revision `rev` of document `id`
    pub fn remove_ref(&mut self, id: &str, rev: &RevId) {
        if let Some(revs) = self.refs.get_mut(id) {
            revs.remove(rev);
            if revs.is_empty() {
                self.refs.remove(id);
            }
        }
    }

    /// Whether any document revision still names this payload
    pub fn is_referenced(&self) -> bool {
        !self.refs.is_empty()
    }

    /// Whether revision `rev` of document `id` names this payload
    pub fn is_referenced_by(&self, id: &str, rev: &RevId) -> bool {
        self.refs.get(id).map_or(false, |revs| revs.contains(rev))
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
