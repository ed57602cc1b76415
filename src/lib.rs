//! revdb - multi-version document store write path
//!
//! revdb stores JSON documents as revision forests in the style of
//! replicating document databases: every edit is a new revision, concurrent
//! edits become branches, and one deterministic winner is exposed per
//! document.
//!
//! # Quick Start
//!
//! ```ignore
//! use revdb::{BulkWriteOptions, DocStore, StoreConfig};
//! use serde_json::json;
//!
//! let store = DocStore::open_in_memory("users", StoreConfig::default())?;
//!
//! // Create, then update against the returned revision
//! let results = store.bulk_write(&[json!({"_id": "alice", "age": 30})], BulkWriteOptions::default())?;
//! let rev = results[0].as_ref().unwrap().rev.to_string();
//! store.bulk_write(&[json!({"_id": "alice", "_rev": rev, "age": 31})], BulkWriteOptions::default())?;
//! ```
//!
//! # Architecture
//!
//! - `revdb-core`: data model and errors
//! - `revdb-revtree`: merge, stemming, winner selection
//! - `revdb-storage`: transactional backend seam
//! - `revdb-engine`: parser, attachments, resolution, bulk coordinator

pub use revdb_core::{
    results_to_json, Attachment, AttachmentRecord, BackendError, DocError, DocumentRecord, Error,
    ParseError, Result, RevId, RevStatus, RevTree, WriteOk, WriteResult,
};
pub use revdb_engine::{
    BulkWriteOptions, ChangeListener, DocParser, DocStore, JsonDocParser, StoreConfig, StoreInfo,
};
pub use revdb_revtree::{winning_rev, MergeKind};
pub use revdb_storage::{Backend, MemoryBackend, StoreName, Transaction, TxnMode};
