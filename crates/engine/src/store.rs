//! Document store facade
//!
//! [`DocStore`] bundles a backend with the collaborators a bulk write needs
//! (parser, digester, listeners, settings) and exposes the write path and
//! the point-lookup read path.
//!
//! ## Usage
//!
//! ```ignore
//! let store = DocStore::open_in_memory("users", StoreConfig::default())?;
//! let results = store.bulk_write(&[json!({"_id": "alice", "age": 30})], BulkWriteOptions::default())?;
//! let record = store.get("alice")?;
//! ```

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use revdb_core::limits::META_KEY;
use revdb_core::{DocumentRecord, Error, Result, RevId, StoreMeta, StoredAttachment, WriteResult};
use revdb_storage::{Backend, MemoryBackend, StoreName, TxnMode};

use crate::config::{StoreConfig, CONFIG_FILE_NAME};
use crate::coordinator::{BulkWriteOptions, BulkWriter};
use crate::digest::{Digester, Sha256Digester};
use crate::notifier::{ChangeListener, ChangeNotifier};
use crate::parser::{DocParser, JsonDocParser};

/// Store summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreInfo {
    /// Backend name
    pub name: String,
    /// Non-deleted documents
    pub doc_count: u64,
    /// Sequence of the most recent write
    pub update_seq: u64,
    /// History depth kept by stemming
    pub revs_limit: u64,
}

/// A revisioned document store over backend `B`
pub struct DocStore<B: Backend = MemoryBackend> {
    backend: B,
    config: StoreConfig,
    parser: Arc<dyn DocParser>,
    digester: Arc<dyn Digester>,
    notifier: ChangeNotifier,
}

impl<B: Backend> std::fmt::Debug for DocStore<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocStore")
            .field("backend", &self.backend.name())
            .field("config", &self.config)
            .field("notifier", &self.notifier)
            .finish()
    }
}

impl DocStore<MemoryBackend> {
    /// Open an empty in-memory store
    pub fn open_in_memory(name: impl Into<String>, config: StoreConfig) -> Result<Self> {
        let backend = MemoryBackend::with_timeout(name, config.txn_timeout());
        Self::with_backend(backend, config)
    }

    /// Open an in-memory store configured by `revdb.toml` in `dir`.
    ///
    /// The directory is created if needed and a commented default config
    /// is written on first open.
    pub fn open(dir: impl AsRef<Path>, name: impl Into<String>) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|e| {
            Error::InvalidConfig(format!(
                "Failed to create store directory '{}': {}",
                dir.display(),
                e
            ))
        })?;
        let config = StoreConfig::load_or_init(&dir.join(CONFIG_FILE_NAME))?;
        Self::open_in_memory(name, config)
    }
}

impl<B: Backend> DocStore<B> {
    /// Wrap an existing backend.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `config` fails validation.
    pub fn with_backend(backend: B, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let digester: Arc<dyn Digester> = Arc::new(Sha256Digester);
        let parser = Arc::new(JsonDocParser::with_digester(
            config.deterministic_revs,
            Arc::clone(&digester),
        ));
        info!(
            target: "revdb::config",
            backend = backend.name(),
            revs_limit = config.revs_limit,
            auto_compaction = config.auto_compaction,
            "Store opened"
        );
        Ok(DocStore {
            backend,
            config,
            parser,
            digester,
            notifier: ChangeNotifier::new(),
        })
    }

    /// Replace the document parser.
    ///
    /// Call after [`with_digester`](Self::with_digester), which installs a
    /// fresh default parser.
    pub fn with_parser(mut self, parser: Arc<dyn DocParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Replace the digester, and the default parser with one that hashes
    /// revisions through it
    pub fn with_digester(mut self, digester: Arc<dyn Digester>) -> Self {
        self.parser = Arc::new(JsonDocParser::with_digester(
            self.config.deterministic_revs,
            Arc::clone(&digester),
        ));
        self.digester = digester;
        self
    }

    /// Store settings
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Underlying backend
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Register a listener for post-commit change notifications
    pub fn subscribe(&self, listener: Arc<dyn ChangeListener>) {
        self.notifier.subscribe(listener);
    }

    /// Write a batch of documents in one transaction.
    ///
    /// Returns one result per input document, in input order. See
    /// [`BulkWriter::write`] for the failure model.
    pub fn bulk_write(
        &self,
        docs: &[JsonValue],
        opts: BulkWriteOptions,
    ) -> Result<Vec<WriteResult>> {
        BulkWriter {
            backend: &self.backend,
            parser: self.parser.as_ref(),
            digester: self.digester.as_ref(),
            notifier: &self.notifier,
            config: &self.config,
        }
        .write(docs, opts)
    }

    /// Point lookup of a document record
    pub fn get(&self, id: &str) -> Result<Option<DocumentRecord>> {
        let txn = self.backend.begin(&[StoreName::Documents], TxnMode::ReadOnly)?;
        let record = txn
            .get(StoreName::Documents, id)?
            .map(|bytes| DocumentRecord::decode(&bytes))
            .transpose()?;
        txn.commit()?;
        Ok(record)
    }

    /// Raw bytes of attachment `name` as of `rev`, or of the winning
    /// revision when `rev` is `None`.
    pub fn get_attachment(&self, id: &str, name: &str, rev: Option<&RevId>) -> Result<Vec<u8>> {
        let txn = self
            .backend
            .begin(&[StoreName::Documents, StoreName::Attachments], TxnMode::ReadOnly)?;
        let record = txn
            .get(StoreName::Documents, id)?
            .map(|bytes| DocumentRecord::decode(&bytes))
            .transpose()?
            .ok_or_else(|| Error::NotFound(format!("document {}", id)))?;
        let rev = rev.unwrap_or(&record.rev);
        let body = record
            .revs
            .get(rev)
            .ok_or_else(|| Error::NotFound(format!("revision {} of {}", rev, id)))?;
        let stub = body
            .attachments
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("attachment {} of {}@{}", name, id, rev)))?;
        let stored = txn
            .get(StoreName::Attachments, &stub.digest)?
            .map(|bytes| StoredAttachment::decode(&bytes))
            .transpose()?
            .ok_or_else(|| {
                Error::NotFound(format!("attachment payload {} of {}", stub.digest, id))
            })?;
        txn.commit()?;
        debug!(target: "revdb::attach", id, name, rev = %rev, length = stored.length, "Attachment read");
        Ok(stored.data)
    }

    /// Stored payload under `digest`, with the revisions referencing it
    pub fn stored_attachment(&self, digest: &str) -> Result<Option<StoredAttachment>> {
        let txn = self.backend.begin(&[StoreName::Attachments], TxnMode::ReadOnly)?;
        let stored = txn
            .get(StoreName::Attachments, digest)?
            .map(|bytes| StoredAttachment::decode(&bytes))
            .transpose()?;
        txn.commit()?;
        Ok(stored)
    }

    /// Document count, last sequence and history depth
    pub fn info(&self) -> Result<StoreInfo> {
        let txn = self.backend.begin(&[StoreName::Meta], TxnMode::ReadOnly)?;
        let meta = match txn.get(StoreName::Meta, META_KEY)? {
            Some(bytes) => StoreMeta::decode(&bytes)?,
            None => StoreMeta::new(self.config.revs_limit),
        };
        txn.commit()?;
        Ok(StoreInfo {
            name: self.backend.name().to_string(),
            doc_count: meta.doc_count,
            update_seq: meta.seq,
            revs_limit: self.config.revs_limit,
        })
    }
}
