//! Backend interface
//!
//! The bulk writer talks to storage only through these two traits. A
//! backend hands out transactions scoped to a set of named stores; a
//! transaction offers point reads and writes by key and ends in exactly one
//! of commit or abort.
//!
//! Writes made through a transaction become visible to other transactions
//! only on a successful commit. Dropping a transaction without committing
//! is an abort.

use revdb_core::BackendError;

/// Result type for backend operations
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Logical stores a transaction can span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StoreName {
    /// Document records keyed by document id
    Documents,
    /// Attachment payloads keyed by digest, shared across documents
    Attachments,
    /// Store-wide metadata (sequence counter, document count)
    Meta,
}

impl StoreName {
    /// Every store, in a stable order
    pub const ALL: [StoreName; 3] = [
        StoreName::Documents,
        StoreName::Attachments,
        StoreName::Meta,
    ];

    /// Canonical name
    pub fn as_str(self) -> &'static str {
        match self {
            StoreName::Documents => "document-store",
            StoreName::Attachments => "attachment-store",
            StoreName::Meta => "meta-store",
        }
    }
}

impl std::fmt::Display for StoreName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transaction access mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnMode {
    /// Reads only; `put` and `delete` fail with [`BackendError::ReadOnly`]
    ReadOnly,
    /// Reads and writes
    ReadWrite,
}

/// Transactional key-value backend
pub trait Backend: Send + Sync {
    /// Name used in change notifications and store info
    fn name(&self) -> &str;

    /// Open a transaction over `stores`.
    ///
    /// Blocks until the backend can grant the transaction or its timeout
    /// elapses, in which case [`BackendError::Timeout`] is returned.
    fn begin(
        &self,
        stores: &[StoreName],
        mode: TxnMode,
    ) -> BackendResult<Box<dyn Transaction + '_>>;
}

/// One open transaction.
///
/// `get` takes `&self` and transactions are `Sync`, so independent reads
/// may be issued from several threads at once.
pub trait Transaction: Sync {
    /// Read the value under `key`, seeing this transaction's own writes
    fn get(&self, store: StoreName, key: &str) -> BackendResult<Option<Vec<u8>>>;

    /// Buffer a write of `value` under `key`
    fn put(&mut self, store: StoreName, key: &str, value: Vec<u8>) -> BackendResult<()>;

    /// Buffer removal of `key`. Removing an absent key is not an error.
    fn delete(&mut self, store: StoreName, key: &str) -> BackendResult<()>;

    /// Number of buffered writes, removals included
    fn pending_writes(&self) -> usize;

    /// Apply every buffered write atomically
    fn commit(self: Box<Self>) -> BackendResult<()>;

    /// Discard every buffered write
    fn abort(self: Box<Self>, reason: &str);
}
