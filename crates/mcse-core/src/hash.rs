//! Unit identifiers.
//!
//! A unit is named by the SHA-256 digest of its parents, authors, payload
//! and timestamp. Ties between otherwise equal candidates in the DAG are
//! broken on these bytes, so the ordering of [`Hash`] is part of the
//! protocol.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

const SHORT_BYTES: usize = 4;

/// Identifier of a unit. Ordered bytewise.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash([u8; 32]);

impl Hash {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First four bytes in hex, for logs and error messages.
    pub fn short(&self) -> String {
        let mut out = String::with_capacity(SHORT_BYTES * 2);
        for byte in &self.0[..SHORT_BYTES] {
            out.push_str(&format!("{:02x}", byte));
        }
        out
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.short())
    }
}

/// Streams unit fields into a digest.
#[derive(Default)]
pub struct Hasher(Sha256);

impl Hasher {
    pub fn new() -> Self {
        Hasher::default()
    }

    /// Raw bytes of a fixed-width field.
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    /// A variable-width field, prefixed with its length.
    pub fn update_field(&mut self, data: &[u8]) {
        self.0.update((data.len() as u64).to_le_bytes());
        self.0.update(data);
    }

    pub fn finalize(self) -> Hash {
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&self.0.finalize());
        Hash(bytes)
    }

    /// Digest of a single buffer.
    pub fn hash(data: &[u8]) -> Hash {
        let mut hasher = Hasher::new();
        hasher.update(data);
        hasher.finalize()
    }
}
