//! Bulk transaction coordinator
//!
//! Drives one bulk write from raw documents to committed records:
//!
//! 1. Parse every document. Any parse failure fails the call before a
//!    transaction is opened.
//! 2. Open one read-write transaction over the document, attachment and
//!    metadata stores.
//! 3. Run the attachment pre-pass and fetch every referenced record, both
//!    fanned out on rayon and joined before anything is resolved. Then
//!    fetch every payload the batch names by digest.
//! 4. In input order, resolve each document against the current state of
//!    its id (which includes earlier writes of the same batch), then build
//!    and queue the new record.
//! 5. Write the touched payloads and the metadata, commit, notify
//!    listeners.
//!
//! Payloads are shared by every document in the store. A stub is valid if
//! its digest is stored by any document, or written earlier in the batch.
//!
//! Per-document failures land in that document's result slot. Backend
//! failures, undecodable records and stubs naming unknown payloads abort
//! the transaction and fail the call with no results.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use revdb_core::limits::META_KEY;
use revdb_core::{
    AttachmentRecord, DocError, DocumentRecord, Error, JsonMap, Result, RevId, RevTree,
    RevisionBody, StoreMeta, StoredAttachment, WriteOk, WriteResult,
};
use revdb_revtree::{compact_tree, winning_leaf};
use revdb_storage::{Backend, StoreName, Transaction, TxnMode};

use crate::attachment::process_batch;
use crate::config::StoreConfig;
use crate::digest::Digester;
use crate::notifier::ChangeNotifier;
use crate::parser::{DocParser, ParsedDoc};
use crate::resolver::{resolve, Accepted, Resolution, ResolveOptions};

/// Options of one bulk write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkWriteOptions {
    /// Client edits (`true`) or replication-style history application (`false`)
    pub new_edits: bool,
    /// Caller marks this batch as a removal: a deletion of an id the store
    /// never held fails with a missing-document error. Without it such a
    /// deletion is stored as a tombstone, which is how replicas receive
    /// deletions of documents they never saw.
    pub was_delete: bool,
}

impl Default for BulkWriteOptions {
    fn default() -> Self {
        BulkWriteOptions {
            new_edits: true,
            was_delete: false,
        }
    }
}

impl BulkWriteOptions {
    /// Options for applying replicated history
    pub fn replication() -> Self {
        BulkWriteOptions {
            new_edits: false,
            was_delete: false,
        }
    }

    /// Options for a client batch that removes documents
    pub fn removal() -> Self {
        BulkWriteOptions {
            new_edits: true,
            was_delete: true,
        }
    }
}

/// Collaborators a bulk write runs against
pub struct BulkWriter<'a> {
    /// Transactional storage
    pub backend: &'a dyn Backend,
    /// Raw document parser
    pub parser: &'a dyn DocParser,
    /// Attachment digests
    pub digester: &'a dyn Digester,
    /// Post-commit listeners
    pub notifier: &'a ChangeNotifier,
    /// Store settings
    pub config: &'a StoreConfig,
}

struct BatchOutcome {
    results: Vec<WriteResult>,
    written: usize,
    last_seq: u64,
}

impl BulkWriter<'_> {
    /// Write a batch; returns one result per input document, in input order.
    pub fn write(&self, raw_docs: &[JsonValue], opts: BulkWriteOptions) -> Result<Vec<WriteResult>> {
        let docs = raw_docs
            .iter()
            .enumerate()
            .map(|(index, raw)| {
                self.parser.parse(raw, opts.new_edits).map_err(|e| {
                    debug!(target: "revdb::bulk", index, error = %e, "Batch rejected at parse");
                    Error::Parse(e)
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if docs.is_empty() {
            return Ok(Vec::new());
        }

        let mut txn = self
            .backend
            .begin(&StoreName::ALL, TxnMode::ReadWrite)
            .map_err(|e| {
                warn!(target: "revdb::bulk", error = %e, "Could not open bulk write transaction");
                Error::Backend(e)
            })?;

        let outcome = match self.run(txn.as_mut(), docs, opts) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(target: "revdb::bulk", error = %e, "Bulk write aborted");
                txn.abort(&e.to_string());
                return Err(e);
            }
        };

        txn.commit().map_err(|e| {
            warn!(target: "revdb::bulk", error = %e, "Bulk write commit failed");
            Error::Backend(e)
        })?;

        info!(
            target: "revdb::bulk",
            docs = outcome.results.len(),
            written = outcome.written,
            seq = outcome.last_seq,
            new_edits = opts.new_edits,
            was_delete = opts.was_delete,
            "Bulk write committed"
        );

        if outcome.written > 0 {
            self.notifier.notify(self.backend.name());
        }
        Ok(outcome.results)
    }

    fn run(
        &self,
        txn: &mut dyn Transaction,
        mut docs: Vec<ParsedDoc>,
        opts: BulkWriteOptions,
    ) -> Result<BatchOutcome> {
        let mut meta = match txn.get(StoreName::Meta, META_KEY)? {
            Some(bytes) => StoreMeta::decode(&bytes)?,
            None => StoreMeta::new(self.config.revs_limit),
        };
        meta.revs_limit = self.config.revs_limit;

        let mut ids: Vec<String> = Vec::new();
        {
            let mut seen = FxHashSet::default();
            for doc in &docs {
                if seen.insert(doc.id.as_str()) {
                    ids.push(doc.id.clone());
                }
            }
        }

        // Barrier: every attachment processed and every prior record loaded.
        let digester = self.digester;
        let reader: &dyn Transaction = &*txn;
        let (attachment_slots, fetched) = rayon::join(
            || process_batch(&mut docs, digester),
            || {
                ids.par_iter()
                    .map(|id| load_record(reader, id))
                    .collect::<Vec<_>>()
            },
        );

        let mut current: FxHashMap<String, DocumentRecord> = FxHashMap::default();
        for (id, slot) in ids.into_iter().zip(fetched) {
            if let Some(record) = slot? {
                current.insert(id, record);
            }
        }
        let mut payloads =
            PayloadCache::prefetch(reader, batch_digests(&docs, &attachment_slots))?;

        let resolve_opts = ResolveOptions {
            new_edits: opts.new_edits,
            revs_limit: self.config.revs_limit,
            was_delete: opts.was_delete,
        };
        let mut results = Vec::with_capacity(docs.len());
        let mut written = 0;

        for (doc, attachments) in docs.into_iter().zip(attachment_slots) {
            if let Err(err) = attachments {
                results.push(Err(err));
                continue;
            }
            let id = doc.id.clone();
            match resolve(doc, current.get(&id), resolve_opts, self.parser) {
                Resolution::Skip(rev) => {
                    debug!(target: "revdb::bulk", id = %id, rev = %rev, "Revision already recorded");
                    results.push(Ok(WriteOk { id, rev }));
                }
                Resolution::Reject(err) => {
                    debug!(target: "revdb::bulk", id = %id, error = %err, "Document rejected");
                    results.push(Err(err));
                }
                Resolution::Accept(accepted) => {
                    let rev = accepted.doc.rev.clone();
                    let prior = current.remove(&id);
                    let record =
                        self.build_record(*accepted, prior, &mut meta, &*txn, &mut payloads)?;
                    txn.put(StoreName::Documents, &record.id, record.encode()?)?;
                    current.insert(id.clone(), record);
                    results.push(Ok(WriteOk { id, rev }));
                    written += 1;
                }
            }
        }

        payloads.flush(txn)?;
        if written > 0 {
            txn.put(StoreName::Meta, META_KEY, meta.encode()?)?;
        }

        Ok(BatchOutcome {
            results,
            written,
            last_seq: meta.seq,
        })
    }

    /// Fold an accepted edit into the document's record
    fn build_record(
        &self,
        accepted: Accepted,
        prior: Option<DocumentRecord>,
        meta: &mut StoreMeta,
        txn: &dyn Transaction,
        payloads: &mut PayloadCache,
    ) -> Result<DocumentRecord> {
        let Accepted {
            doc,
            mut tree,
            stemmed_revs,
            ..
        } = accepted;

        let was_live = prior.as_ref().map(|p| !p.deleted);
        let mut record = prior.unwrap_or_else(|| DocumentRecord {
            id: doc.id.clone(),
            rev: doc.rev.clone(),
            rev_tree: RevTree::new(),
            revs: BTreeMap::new(),
            data: JsonMap::new(),
            deleted: doc.deleted,
            seq: 0,
            stemmed_revs: Vec::new(),
        });

        let mut released = stemmed_revs;
        if self.config.auto_compaction {
            released.extend(compact_tree(&mut tree));
            released.sort();
            released.dedup();
        }
        record.rev_tree = tree;

        let stubs = store_attachments(&record, &doc, txn, payloads)?;
        record.revs.insert(
            doc.rev.clone(),
            RevisionBody {
                data: doc.data,
                deleted: doc.deleted,
                attachments: stubs,
            },
        );
        release_bodies(&mut record, &released, txn, payloads)?;

        if let Some(winner) = winning_leaf(&record.rev_tree) {
            match record.revs.get(&winner.rev) {
                Some(body) => {
                    record.data = body.data.clone();
                    record.deleted = body.deleted;
                }
                None => {
                    record.data = JsonMap::new();
                    record.deleted = winner.status.is_deleted();
                }
            }
            record.rev = winner.rev;
        }

        let delta = match (was_live, !record.deleted) {
            (None | Some(false), true) => 1,
            (Some(true), false) => -1,
            _ => 0,
        };
        meta.apply_doc_delta(delta);
        record.seq = meta.next_seq();
        record.stemmed_revs = released;
        Ok(record)
    }
}

fn load_record(txn: &dyn Transaction, id: &str) -> Result<Option<DocumentRecord>> {
    txn.get(StoreName::Documents, id)?
        .map(|bytes| DocumentRecord::decode(&bytes))
        .transpose()
}

fn load_payload(txn: &dyn Transaction, digest: &str) -> Result<Option<StoredAttachment>> {
    txn.get(StoreName::Attachments, digest)?
        .map(|bytes| StoredAttachment::decode(&bytes))
        .transpose()
}

/// Unique digests named by documents whose pre-pass succeeded
fn batch_digests(
    docs: &[ParsedDoc],
    slots: &[std::result::Result<(), DocError>],
) -> Vec<String> {
    let mut seen = FxHashSet::default();
    docs.iter()
        .zip(slots)
        .filter(|(_, slot)| slot.is_ok())
        .flat_map(|(doc, _)| doc.attachments.values())
        .filter_map(|att| att.digest.as_deref())
        .filter(|digest| seen.insert(*digest))
        .map(str::to_string)
        .collect()
}

/// Attachment payloads read or changed by the batch in progress.
///
/// A `None` entry records that the digest is not stored. Touched entries
/// are written back on flush, or removed if nothing references them.
struct PayloadCache {
    entries: FxHashMap<String, Option<StoredAttachment>>,
    dirty: BTreeSet<String>,
}

impl PayloadCache {
    fn prefetch(txn: &dyn Transaction, digests: Vec<String>) -> Result<Self> {
        let fetched = digests
            .par_iter()
            .map(|digest| load_payload(txn, digest))
            .collect::<Vec<_>>();
        let mut entries = FxHashMap::default();
        for (digest, slot) in digests.into_iter().zip(fetched) {
            entries.insert(digest, slot?);
        }
        Ok(PayloadCache {
            entries,
            dirty: BTreeSet::new(),
        })
    }

    /// Cached state of `digest`, read through on first use
    fn slot(
        &mut self,
        txn: &dyn Transaction,
        digest: &str,
    ) -> Result<&mut Option<StoredAttachment>> {
        let slot = match self.entries.entry(digest.to_string()) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => e.insert(load_payload(txn, digest)?),
        };
        Ok(slot)
    }

    fn touch(&mut self, digest: &str) {
        self.dirty.insert(digest.to_string());
    }

    fn flush(self, txn: &mut dyn Transaction) -> Result<()> {
        let mut removed = 0;
        for digest in &self.dirty {
            match self.entries.get(digest) {
                Some(Some(stored)) if stored.is_referenced() => {
                    txn.put(StoreName::Attachments, digest, stored.encode()?)?;
                }
                _ => {
                    txn.delete(StoreName::Attachments, digest)?;
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            debug!(target: "revdb::attach", removed, "Dropped unreferenced attachments");
        }
        Ok(())
    }
}

/// Reference the written revision's payloads and return the stubs its
/// body keeps.
///
/// Inline payloads are stored before stubs are checked, so a stub may name
/// content that arrives inline in the same revision.
fn store_attachments(
    record: &DocumentRecord,
    doc: &ParsedDoc,
    txn: &dyn Transaction,
    payloads: &mut PayloadCache,
) -> Result<BTreeMap<String, AttachmentRecord>> {
    let inline = doc.attachments.iter().filter(|(_, att)| !att.stub);
    let stubbed = doc.attachments.iter().filter(|(_, att)| att.stub);

    let mut stubs = BTreeMap::new();
    for (name, att) in inline.chain(stubbed) {
        let digest = att.digest.clone().ok_or_else(|| {
            Error::Serialization(format!("attachment {} reached the writer without a digest", name))
        })?;

        let stub = if att.stub {
            let Some(stored) = payloads.slot(txn, &digest)?.as_mut() else {
                warn!(target: "revdb::attach", id = %doc.id, name = %name, digest = %digest, "Stub names an unknown attachment");
                return Err(Error::MissingStub { digest });
            };
            stored.add_ref(&doc.id, &doc.rev);
            let content_type = stored.content_type.clone();
            let length = stored.length;
            payloads.touch(&digest);
            let revpos = att
                .revpos
                .or_else(|| first_revpos(&record.revs, &digest))
                .unwrap_or(doc.rev.pos);
            AttachmentRecord {
                digest,
                content_type,
                length,
                revpos,
                stub: true,
            }
        } else {
            let bytes = att.binary().ok_or_else(|| {
                Error::Serialization(format!("attachment {} reached the writer undecoded", name))
            })?;
            let stored = payloads.slot(txn, &digest)?.get_or_insert_with(|| {
                StoredAttachment::new(digest.clone(), att.content_type.clone(), bytes.to_vec())
            });
            stored.add_ref(&doc.id, &doc.rev);
            payloads.touch(&digest);
            AttachmentRecord {
                digest,
                content_type: att.content_type.clone(),
                length: bytes.len() as u64,
                revpos: doc.rev.pos,
                stub: true,
            }
        };
        stubs.insert(name.clone(), stub);
    }
    Ok(stubs)
}

fn first_revpos(revs: &BTreeMap<RevId, RevisionBody>, digest: &str) -> Option<u64> {
    revs.values()
        .flat_map(|body| body.attachments.values())
        .filter(|a| a.digest == digest)
        .map(|a| a.revpos)
        .min()
}

/// Drop released bodies and their references to stored payloads
fn release_bodies(
    record: &mut DocumentRecord,
    released: &[RevId],
    txn: &dyn Transaction,
    payloads: &mut PayloadCache,
) -> Result<()> {
    for rev in released {
        let Some(body) = record.revs.remove(rev) else {
            continue;
        };
        for stub in body.attachments.values() {
            if let Some(stored) = payloads.slot(txn, &stub.digest)?.as_mut() {
                stored.remove_ref(&record.id, rev);
                payloads.touch(&stub.digest);
            }
        }
    }
    Ok(())
}
