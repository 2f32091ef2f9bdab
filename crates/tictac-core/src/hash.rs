//! Content addressing for records and proposals
//!
//! Every value that must be referred to by content (state snapshots, signed
//! proposals) is hashed through this module so there is a single place where
//! the digest algorithm is chosen.
//!
//! Current algorithm: **SHA-256** (32-byte output).
//!
//! ```ignore
//! use tictac_core::hash::hasher;
//!
//! let mut h = hasher(b"TICTAC_RECORD");
//! h.update(&encoded);
//! let key = h.finalize();
//! ```

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A 32-byte digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Hash32(pub [u8; 32]);

impl Hash32 {
    /// Wrap raw digest bytes
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Borrow the digest bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Short hex prefix used in log lines
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash32({})", self.short())
    }
}

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Incremental, domain-separated hasher.
pub struct DomainHasher(Sha256);

impl DomainHasher {
    /// Feed more bytes into the digest
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    /// Finish and return the digest
    pub fn finalize(self) -> Hash32 {
        let digest = self.0.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Hash32(out)
    }
}

/// Start a hasher bound to `domain`.
///
/// The domain tag is length-prefixed so that two domains can never produce
/// colliding preimages by concatenation.
pub fn hasher(domain: &[u8]) -> DomainHasher {
    let mut inner = Sha256::new();
    inner.update((domain.len() as u64).to_le_bytes());
    inner.update(domain);
    DomainHasher(inner)
}

/// Hash `data` under `domain` in one call.
pub fn hash(domain: &[u8], data: &[u8]) -> Hash32 {
    let mut h = hasher(domain);
    h.update(data);
    h.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_determinism() {
        assert_eq!(hash(b"d", b"hello"), hash(b"d", b"hello"));
    }

    #[test]
    fn test_domain_separation() {
        assert_ne!(hash(b"a", b"payload"), hash(b"b", b"payload"));
        // Moving bytes between tag and payload must not collide.
        assert_ne!(hash(b"ab", b"c"), hash(b"a", b"bc"));
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let mut h = hasher(b"d");
        h.update(b"hel");
        h.update(b"lo");
        assert_eq!(h.finalize(), hash(b"d", b"hello"));
    }
}
