//! Revision tree algorithms for revdb
//!
//! - merge: attach an incoming branch and classify how it attached
//! - stem: bound how much history keeps a body
//! - winner: deterministic winning revision selection
//! - compact: release every non-leaf body

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod compact;
pub mod merge;
pub mod stem;
pub mod winner;

pub use compact::compact_tree;
pub use merge::{merge, merge_path, MergeKind, MergeOutcome};
pub use stem::stem;
pub use winner::{conflicting_leaves, is_deleted, winning_leaf, winning_rev};
