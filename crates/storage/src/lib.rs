//! Storage layer for revdb
//!
//! This crate defines the backend seam the bulk writer commits through:
//! - Backend / Transaction: scoped, atomic point reads and writes
//! - MemoryBackend: `parking_lot::RwLock` backed implementation with
//!   buffered writes and lock timeouts
//! - testing: fault injection wrapper for atomicity tests

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod memory;
pub mod testing;

pub use backend::{Backend, BackendResult, StoreName, Transaction, TxnMode};
pub use memory::{MemoryBackend, MemoryTransaction};
