//! In-memory transactional backend
//!
//! All stores live behind one `parking_lot::RwLock`. A read-write
//! transaction holds the write lock for its whole lifetime, which
//! serialises writers (and therefore sequence allocation) across batches;
//! read-only transactions share the read lock.
//!
//! Writes are buffered in the transaction and only applied to the shared
//! maps inside `commit`, so an aborted or dropped transaction leaves no
//! trace.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use revdb_core::limits::DEFAULT_TXN_TIMEOUT_MS;
use revdb_core::BackendError;

use crate::backend::{Backend, BackendResult, StoreName, Transaction, TxnMode};

type StoreMap = FxHashMap<String, Vec<u8>>;

#[derive(Debug, Default)]
struct Stores {
    documents: StoreMap,
    attachments: StoreMap,
    meta: StoreMap,
}

impl Stores {
    fn get(&self, store: StoreName) -> &StoreMap {
        match store {
            StoreName::Documents => &self.documents,
            StoreName::Attachments => &self.attachments,
            StoreName::Meta => &self.meta,
        }
    }

    fn get_mut(&mut self, store: StoreName) -> &mut StoreMap {
        match store {
            StoreName::Documents => &mut self.documents,
            StoreName::Attachments => &mut self.attachments,
            StoreName::Meta => &mut self.meta,
        }
    }
}

/// In-memory backend
#[derive(Debug)]
pub struct MemoryBackend {
    name: String,
    stores: RwLock<Stores>,
    timeout: Duration,
    closed: AtomicBool,
}

impl MemoryBackend {
    /// Create an empty backend with the default transaction timeout
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_timeout(name, Duration::from_millis(DEFAULT_TXN_TIMEOUT_MS))
    }

    /// Create an empty backend that gives up waiting for a transaction
    /// after `timeout`
    pub fn with_timeout(name: impl Into<String>, timeout: Duration) -> Self {
        MemoryBackend {
            name: name.into(),
            stores: RwLock::new(Stores::default()),
            timeout,
            closed: AtomicBool::new(false),
        }
    }

    /// Refuse every later `begin` with [`BackendError::Closed`]
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Number of committed keys in `store`
    pub fn len(&self, store: StoreName) -> usize {
        self.stores.read().get(store).len()
    }

    /// True if nothing was ever committed to `store`
    pub fn is_empty(&self, store: StoreName) -> bool {
        self.len(store) == 0
    }

    fn timeout_error(&self) -> BackendError {
        BackendError::Timeout {
            after_ms: self.timeout.as_millis() as u64,
        }
    }
}

impl Backend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn begin(
        &self,
        stores: &[StoreName],
        mode: TxnMode,
    ) -> BackendResult<Box<dyn Transaction + '_>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BackendError::Closed);
        }

        let guard = match mode {
            TxnMode::ReadOnly => self
                .stores
                .try_read_for(self.timeout)
                .map(StoreGuard::Read),
            TxnMode::ReadWrite => self
                .stores
                .try_write_for(self.timeout)
                .map(StoreGuard::Write),
        };
        let Some(guard) = guard else {
            warn!(target: "revdb::txn", backend = %self.name, ?mode, "Transaction timed out waiting for lock");
            return Err(self.timeout_error());
        };

        Ok(Box::new(MemoryTransaction {
            guard,
            scope: stores.to_vec(),
            mode,
            overlay: BTreeMap::new(),
        }))
    }
}

enum StoreGuard<'a> {
    Read(RwLockReadGuard<'a, Stores>),
    Write(RwLockWriteGuard<'a, Stores>),
}

impl StoreGuard<'_> {
    fn stores(&self) -> &Stores {
        match self {
            StoreGuard::Read(g) => g,
            StoreGuard::Write(g) => g,
        }
    }
}

/// Transaction over a [`MemoryBackend`]
pub struct MemoryTransaction<'a> {
    guard: StoreGuard<'a>,
    scope: Vec<StoreName>,
    mode: TxnMode,
    // `None` marks a removal
    overlay: BTreeMap<(StoreName, String), Option<Vec<u8>>>,
}

impl MemoryTransaction<'_> {
    fn check_scope(&self, store: StoreName) -> BackendResult<()> {
        if self.scope.contains(&store) {
            Ok(())
        } else {
            Err(BackendError::Aborted {
                reason: format!("{} is not part of this transaction", store),
            })
        }
    }

    fn check_writable(&self, store: StoreName) -> BackendResult<()> {
        self.check_scope(store)?;
        if self.mode == TxnMode::ReadOnly {
            return Err(BackendError::ReadOnly);
        }
        Ok(())
    }
}

impl Transaction for MemoryTransaction<'_> {
    fn get(&self, store: StoreName, key: &str) -> BackendResult<Option<Vec<u8>>> {
        self.check_scope(store)?;
        if let Some(pending) = self.overlay.get(&(store, key.to_string())) {
            return Ok(pending.clone());
        }
        Ok(self.guard.stores().get(store).get(key).cloned())
    }

    fn put(&mut self, store: StoreName, key: &str, value: Vec<u8>) -> BackendResult<()> {
        self.check_writable(store)?;
        self.overlay.insert((store, key.to_string()), Some(value));
        Ok(())
    }

    fn delete(&mut self, store: StoreName, key: &str) -> BackendResult<()> {
        self.check_writable(store)?;
        self.overlay.insert((store, key.to_string()), None);
        Ok(())
    }

    fn pending_writes(&self) -> usize {
        self.overlay.len()
    }

    fn commit(self: Box<Self>) -> BackendResult<()> {
        let this = *self;
        match this.guard {
            StoreGuard::Write(mut stores) => {
                let writes = this.overlay.len();
                for ((store, key), value) in this.overlay {
                    let map = stores.get_mut(store);
                    match value {
                        Some(value) => {
                            map.insert(key, value);
                        }
                        None => {
                            map.remove(&key);
                        }
                    }
                }
                debug!(target: "revdb::txn", writes, "Transaction committed");
                Ok(())
            }
            StoreGuard::Read(_) => Ok(()),
        }
    }

    fn abort(self: Box<Self>, reason: &str) {
        debug!(target: "revdb::txn", discarded = self.overlay.len(), reason, "Transaction aborted");
    }
}
