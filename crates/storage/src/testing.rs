//! Fault injection for backend tests
//!
//! `FaultyBackend` wraps another backend and fails chosen operations on
//! demand, so callers can check that a failing commit really leaves
//! nothing behind.
//!
//! ```ignore
//! use revdb_storage::testing::{FaultPoint, FaultyBackend};
//!
//! let backend = FaultyBackend::new(MemoryBackend::new("db"));
//! backend.arm(FaultPoint::Commit);
//! // the next commit aborts instead
//! ```

use std::sync::atomic::{AtomicU8, Ordering};

use revdb_core::BackendError;

use crate::backend::{Backend, BackendResult, StoreName, Transaction, TxnMode};

/// Where the next injected failure happens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPoint {
    /// No failure armed
    None,
    /// `begin` returns a timeout
    Begin,
    /// `put` fails with an abort
    Put,
    /// `commit` aborts the transaction instead of applying it
    Commit,
}

impl FaultPoint {
    fn code(self) -> u8 {
        match self {
            FaultPoint::None => 0,
            FaultPoint::Begin => 1,
            FaultPoint::Put => 2,
            FaultPoint::Commit => 3,
        }
    }
}

// Disarms on firing, so each armed fault happens once.
fn fire(armed: &AtomicU8, point: FaultPoint) -> bool {
    armed
        .compare_exchange(
            point.code(),
            FaultPoint::None.code(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        )
        .is_ok()
}

/// Backend wrapper that fails one armed operation
#[derive(Debug)]
pub struct FaultyBackend<B> {
    inner: B,
    armed: AtomicU8,
}

impl<B: Backend> FaultyBackend<B> {
    /// Wrap `inner` with nothing armed
    pub fn new(inner: B) -> Self {
        FaultyBackend {
            inner,
            armed: AtomicU8::new(FaultPoint::None.code()),
        }
    }

    /// Fail the next operation at `point`
    pub fn arm(&self, point: FaultPoint) {
        self.armed.store(point.code(), Ordering::SeqCst);
    }

    /// The wrapped backend
    pub fn inner(&self) -> &B {
        &self.inner
    }
}

impl<B: Backend> Backend for FaultyBackend<B> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn begin(
        &self,
        stores: &[StoreName],
        mode: TxnMode,
    ) -> BackendResult<Box<dyn Transaction + '_>> {
        if fire(&self.armed, FaultPoint::Begin) {
            return Err(BackendError::Timeout { after_ms: 0 });
        }
        let inner = self.inner.begin(stores, mode)?;
        Ok(Box::new(FaultyTransaction {
            inner,
            armed: &self.armed,
        }))
    }
}

struct FaultyTransaction<'a> {
    inner: Box<dyn Transaction + 'a>,
    armed: &'a AtomicU8,
}

impl Transaction for FaultyTransaction<'_> {
    fn get(&self, store: StoreName, key: &str) -> BackendResult<Option<Vec<u8>>> {
        self.inner.get(store, key)
    }

    fn put(&mut self, store: StoreName, key: &str, value: Vec<u8>) -> BackendResult<()> {
        if fire(self.armed, FaultPoint::Put) {
            return Err(BackendError::Aborted {
                reason: "injected put failure".to_string(),
            });
        }
        self.inner.put(store, key, value)
    }

    fn delete(&mut self, store: StoreName, key: &str) -> BackendResult<()> {
        self.inner.delete(store, key)
    }

    fn pending_writes(&self) -> usize {
        self.inner.pending_writes()
    }

    fn commit(self: Box<Self>) -> BackendResult<()> {
        if fire(self.armed, FaultPoint::Commit) {
            self.inner.abort("injected commit failure");
            return Err(BackendError::Aborted {
                reason: "injected commit failure".to_string(),
            });
        }
        self.inner.commit()
    }

    fn abort(self: Box<Self>, reason: &str) {
        self.inner.abort(reason)
    }
}
