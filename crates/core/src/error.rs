//! Error types for revdb
//!
//! Two tiers, matching how a bulk write reports failure:
//! - [`Error`] is batch-fatal. It is returned as the `Err` of a call and no
//!   per-document results accompany it.
//! - [`DocError`] is per-document. It occupies one slot of the results
//!   sequence and never affects sibling documents.
//!
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use thiserror::Error;

/// Result type alias for revdb operations
pub type Result<T> = std::result::Result<T, Error>;

/// Batch-fatal errors
#[derive(Debug, Error)]
pub enum Error {
    /// A raw document could not be parsed; no transaction was opened
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// A stub referenced a digest the document does not hold
    #[error("Missing stub: unknown stub attachment with digest {digest}")]
    MissingStub {
        /// Digest named by the stub
        digest: String,
    },

    /// Backend transaction failure
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Point lookup found nothing
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration rejected
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Malformed input document
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    /// Input was not a JSON object
    #[error("Document must be a JSON object")]
    NotAnObject,

    /// `_id` missing where it cannot be generated
    #[error("_id is required for puts")]
    MissingId,

    /// `_id` present but not a string
    #[error("_id field must contain a string")]
    InvalidId,

    /// `_id` uses a reserved underscore prefix
    #[error("Only reserved document ids may start with underscore: {0}")]
    ReservedId(String),

    /// `_rev` is not `<generation>-<hash>`
    #[error("Invalid rev format: {0}")]
    InvalidRev(String),

    /// Replication-mode document without `_rev` or `_revisions`
    #[error("Document has no revision information")]
    MissingRev,

    /// `_revisions` is malformed
    #[error("Invalid _revisions: {0}")]
    InvalidRevisions(String),

    /// Unknown underscore member
    #[error("Bad special document member: {0}")]
    BadSpecialMember(String),

    /// `_attachments` entry is malformed
    #[error("Bad attachment {name}: {reason}")]
    BadAttachment {
        /// Attachment name
        name: String,
        /// What is wrong with it
        reason: String,
    },
}

/// Backend transaction failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// Transaction aborted
    #[error("Transaction aborted: {reason}")]
    Aborted {
        /// Human-readable reason for abort
        reason: String,
    },

    /// Could not obtain the transaction in time
    #[error("Transaction timed out after {after_ms}ms")]
    Timeout {
        /// Configured timeout
        after_ms: u64,
    },

    /// Backend is closed
    #[error("Backend is closed")]
    Closed,

    /// Write attempted in a read-only transaction
    #[error("Write in read-only transaction")]
    ReadOnly,
}

/// Per-document failure, reported in that document's result slot
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DocError {
    /// Edit does not extend a current leaf under new-edits policy
    #[error("Document update conflict: {id}")]
    Conflict {
        /// Document id
        id: String,
    },

    /// Deletion of a document that was never written
    #[error("Missing document {id}: deleted")]
    MissingDoc {
        /// Document id
        id: String,
    },

    /// Undecodable attachment payload
    #[error("Invalid attachment {name} on {id}: {reason}")]
    InvalidArgument {
        /// Document id
        id: String,
        /// Attachment name
        name: String,
        /// What is wrong with it
        reason: String,
    },
}

impl DocError {
    /// Short error name
    pub fn name(&self) -> &'static str {
        match self {
            DocError::Conflict { .. } => "conflict",
            DocError::MissingDoc { .. } => "not_found",
            DocError::InvalidArgument { .. } => "bad_request",
        }
    }

    /// Human-readable reason
    pub fn reason(&self) -> String {
        match self {
            DocError::Conflict { .. } => "Document update conflict".to_string(),
            DocError::MissingDoc { .. } => "deleted".to_string(),
            DocError::InvalidArgument { reason, .. } => reason.clone(),
        }
    }

    /// HTTP-style status code
    pub fn status(&self) -> u16 {
        match self {
            DocError::Conflict { .. } => 409,
            DocError::MissingDoc { .. } => 404,
            DocError::InvalidArgument { .. } => 400,
        }
    }

    /// `{"id": .., "error": .., "reason": ..}`
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({"id": self.id(), "error": self.name(), "reason": self.reason()})
    }

    /// Document the error is about
    pub fn id(&self) -> &str {
        match self {
            DocError::Conflict { id }
            | DocError::MissingDoc { id }
            | DocError::InvalidArgument { id, .. } => id,
        }
    }
}

impl Serialize for DocError {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("id", self.id())?;
        map.serialize_entry("error", self.name())?;
        map.serialize_entry("reason", &self.reason())?;
        map.end()
    }
}
