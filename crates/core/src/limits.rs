//! Defaults and fixed limits
//!
//! Defaults can be overridden through the store configuration; the
//! fixed values are part of the on-disk and wire contract.

/// Default history depth kept by stemming
pub const DEFAULT_REVS_LIMIT: u64 = 1000;

/// Default time to wait for the backend transaction
pub const DEFAULT_TXN_TIMEOUT_MS: u64 = 5000;

/// Highest revision generation accepted from input. Every generation the
/// store mints or persists stays at or below it.
pub const MAX_REV_POS: u64 = u32::MAX as u64;

/// Number of digest bytes (hex encoded) used for deterministic revision hashes
pub const REV_HASH_BYTES: usize = 16;

/// Prefixes that may start a document id even though they begin with `_`
pub const RESERVED_ID_PREFIXES: &[&str] = &["_design/", "_local/"];

/// Underscore members a document may carry
pub const RESERVED_MEMBERS: &[&str] = &[
    "_id",
    "_rev",
    "_deleted",
    "_revisions",
    "_attachments",
    "_revs_info",
    "_conflicts",
    "_deleted_conflicts",
    "_local_seq",
    "_rev_tree",
    "_replication_id",
    "_replication_state",
    "_replication_state_time",
    "_replication_state_reason",
    "_replication_stats",
    "_removed",
];

/// Key of the metadata record within the metadata store
pub const META_KEY: &str = "_meta";

const _: () = assert!(DEFAULT_REVS_LIMIT >= 1);
const _: () = assert!(REV_HASH_BYTES > 0 && REV_HASH_BYTES <= 32);
