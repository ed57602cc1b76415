//! Content digests
//!
//! Attachments are addressed by a digest tag of the form
//! `<algorithm>-<base64 of the raw hash>`. Any two stores that share a
//! `Digester` produce the same tag for the same bytes, which is what lets
//! replicas deduplicate payloads and verify stubs.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use sha2::{Digest, Sha256};

/// Computes content addresses
pub trait Digester: Send + Sync {
    /// Raw hash of `bytes`
    fn hash(&self, bytes: &[u8]) -> Vec<u8>;

    /// Algorithm name used as the tag prefix
    fn algorithm(&self) -> &'static str;

    /// Tagged digest of `bytes`, e.g. `sha256-47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU=` for no bytes
    fn digest(&self, bytes: &[u8]) -> String {
        format!("{}-{}", self.algorithm(), BASE64.encode(self.hash(bytes)))
    }
}

/// SHA-256 digester
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Digester;

impl Digester for Sha256Digester {
    fn hash(&self, bytes: &[u8]) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hasher.finalize().to_vec()
    }

    fn algorithm(&self) -> &'static str {
        "sha256"
    }
}
