//! Unit definition and builder.
//!
//! A unit is an immutable, content-addressed node of the ledger DAG:
//! - Its hash is computed from every other field
//! - It references 1..=16 parents in ascending hash order (none for genesis)
//! - It is signed by one or more author addresses

use crate::hash::{Hash, Hasher};
use crate::witness::Address;
use serde::{Deserialize, Serialize};

/// A node in the ledger DAG.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    /// Content hash over every other field.
    pub hash: Hash,

    /// Parent hashes, strictly ascending. Empty only for genesis.
    pub parents: Vec<Hash>,

    /// Signer identities.
    pub authors: Vec<Address>,

    /// Opaque application payload.
    pub payload: Vec<u8>,

    /// Author-declared timestamp (seconds).
    pub timestamp: u64,
}

impl Unit {
    pub fn is_genesis(&self) -> bool {
        self.parents.is_empty()
    }

    /// Whether `hash` is a direct parent.
    pub fn has_parent(&self, hash: &Hash) -> bool {
        self.parents.contains(hash)
    }

    /// Whether the parents form a strictly ascending (hence duplicate-free) list.
    pub fn parents_are_ordered(&self) -> bool {
        self.parents.windows(2).all(|w| w[0] < w[1])
    }

    fn compute_hash(parents: &[Hash], authors: &[Address], payload: &[u8], timestamp: u64) -> Hash {
        let mut hasher = Hasher::new();

        hasher.update(&(parents.len() as u64).to_le_bytes());
        for parent in parents {
            hasher.update(parent.as_bytes());
        }

        hasher.update(&(authors.len() as u64).to_le_bytes());
        for author in authors {
            hasher.update_field(author.as_str().as_bytes());
        }

        hasher.update_field(payload);
        hasher.update(&timestamp.to_le_bytes());

        hasher.finalize()
    }

    /// Verify that the hash matches the unit's contents.
    pub fn verify(&self) -> bool {
        Self::compute_hash(&self.parents, &self.authors, &self.payload, self.timestamp) == self.hash
    }
}

/// Builder for units.
///
/// Parents are sorted and deduplicated on build so callers can list them
/// in any order.
#[derive(Clone, Debug, Default)]
pub struct UnitBuilder {
    parents: Vec<Hash>,
    authors: Vec<Address>,
    payload: Vec<u8>,
    timestamp: u64,
}

impl UnitBuilder {
    pub fn new() -> Self {
        UnitBuilder::default()
    }

    pub fn with_parents(mut self, parents: Vec<Hash>) -> Self {
        self.parents = parents;
        self
    }

    pub fn with_parent(mut self, parent: Hash) -> Self {
        self.parents.push(parent);
        self
    }

    pub fn with_author(mut self, author: Address) -> Self {
        self.authors.push(author);
        self
    }

    pub fn with_authors(mut self, authors: Vec<Address>) -> Self {
        self.authors = authors;
        self
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Build the unit, computing its hash.
    pub fn build(mut self) -> Unit {
        self.parents.sort();
        self.parents.dedup();
        let hash = Unit::compute_hash(&self.parents, &self.authors, &self.payload, self.timestamp);

        Unit {
            hash,
            parents: self.parents,
            authors: self.authors,
            payload: self.payload,
            timestamp: self.timestamp,
        }
    }

    /// Build a genesis unit signed by a single author.
    pub fn genesis(author: Address) -> Unit {
        UnitBuilder::new().with_author(author).build()
    }

    /// Build a genesis unit co-signed by several authors.
    pub fn genesis_signed_by(authors: Vec<Address>) -> Unit {
        UnitBuilder::new().with_authors(authors).build()
    }
}
