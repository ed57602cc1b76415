//! Revision identifiers
//!
//! A revision is named by its generation (`pos`, the distance from the
//! first edit, starting at 1) and an opaque `hash` token. The textual
//! form is `"<pos>-<hash>"`, which is what travels over the wire and what
//! callers see in write results.
//!
//! Ordering is by generation first, then by hash (byte-wise lexicographic).
//! This ordering is what the winning-revision rule relies on, so it must
//! never depend on anything except the two fields.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::ParseError;
use crate::limits::MAX_REV_POS;

/// Revision identifier: `(generation, hash)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RevId {
    /// Generation, 1 for a document's first edit
    pub pos: u64,
    /// Opaque revision token
    pub hash: String,
}

impl RevId {
    /// Create a revision id from its parts
    pub fn new(pos: u64, hash: impl Into<String>) -> Self {
        RevId {
            pos,
            hash: hash.into(),
        }
    }

    /// True for generation-1 revisions (a fresh root edit)
    pub fn is_root(&self) -> bool {
        self.pos == 1
    }
}

impl Ord for RevId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.pos
            .cmp(&other.pos)
            .then_with(|| self.hash.cmp(&other.hash))
    }
}

impl PartialOrd for RevId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for RevId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.pos, self.hash)
    }
}

impl FromStr for RevId {
    type Err = ParseError;

    /// Parse `"<digits>-<hash>"`. The generation must be in
    /// `1..=MAX_REV_POS` and the hash non-empty.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::InvalidRev(s.to_string());
        let (left, right) = s.split_once('-').ok_or_else(invalid)?;
        if left.is_empty() || !left.bytes().all(|b| b.is_ascii_digit()) || right.is_empty() {
            return Err(invalid());
        }
        let pos: u64 = left.parse().map_err(|_| invalid())?;
        if pos == 0 || pos > MAX_REV_POS {
            return Err(invalid());
        }
        Ok(RevId::new(pos, right))
    }
}

// Serialized as the textual form so that persisted maps keyed by revision
// stay readable and stable.
impl Serialize for RevId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RevId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
