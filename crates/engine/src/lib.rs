//! Bulk write engine for revdb
//!
//! This crate turns batches of JSON documents into committed records:
//! - Parser: raw JSON to typed edits with revision branches
//! - Attachment pre-pass: base64 decode and content addressing
//! - Resolver: conflict policy, resurrection, skip of known revisions
//! - Coordinator: one transaction per batch, results in input order
//! - DocStore: facade with the read path and change notification
//!
//! Settings come from `revdb.toml` (see [`StoreConfig`]).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod attachment;
pub mod config;
pub mod coordinator;
pub mod digest;
pub mod notifier;
pub mod parser;
pub mod resolver;
pub mod store;

pub use config::{StoreConfig, CONFIG_FILE_NAME};
pub use coordinator::{BulkWriteOptions, BulkWriter};
pub use digest::{Digester, Sha256Digester};
pub use notifier::{ChangeListener, ChangeNotifier};
pub use parser::{DocParser, JsonDocParser, ParsedDoc};
pub use resolver::{resolve, Accepted, Resolution, ResolveOptions};
pub use store::{DocStore, StoreInfo};
