//! Core types for revdb
//!
//! This crate defines the data model shared by every layer:
//! - RevId: `(generation, hash)` revision identifier
//! - RevTree / RevPath / RevNode: the per-document revision forest
//! - DocumentRecord / RevisionBody / StoreMeta: persisted records
//! - Attachment types: incoming, per-revision stub, stored payload
//! - Error: batch-fatal and per-document error taxonomy
//! - WriteOk / WriteResult: per-document bulk write outcomes

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod attachment;
pub mod document;
pub mod error;
pub mod limits;
pub mod result;
pub mod rev;
pub mod tree;

pub use attachment::{Attachment, AttachmentData, AttachmentRecord, StoredAttachment};
pub use document::{DocumentRecord, JsonMap, RevisionBody, StoreMeta};
pub use error::{BackendError, DocError, Error, ParseError, Result};
pub use result::{results_to_json, WriteOk, WriteResult};
pub use rev::RevId;
pub use tree::{LeafInfo, RevNode, RevPath, RevStatus, RevTree};
