//! Author addresses and the witness set.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A signer identity authoring units.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(String);

impl Address {
    pub fn new(address: impl Into<String>) -> Self {
        Address(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Address::new(s)
    }
}

/// The designated addresses whose authorship measures consensus progress.
///
/// The majority threshold defaults to `len / 2 + 1`, which is
/// [`MAJORITY_OF_WITNESSES`](crate::MAJORITY_OF_WITNESSES) for a full list
/// of twelve.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessSet {
    witnesses: BTreeSet<Address>,
    majority: usize,
}

impl WitnessSet {
    /// Create a witness set with the default majority threshold.
    pub fn new(witnesses: impl IntoIterator<Item = Address>) -> Self {
        let witnesses: BTreeSet<Address> = witnesses.into_iter().collect();
        let majority = witnesses.len() / 2 + 1;
        WitnessSet {
            witnesses,
            majority,
        }
    }

    /// Override the majority threshold.
    ///
    /// The threshold is clamped to `1..=len` so an empty or oversized
    /// value cannot make stability unreachable by construction.
    pub fn with_majority(mut self, majority: usize) -> Self {
        self.majority = majority.clamp(1, self.witnesses.len().max(1));
        self
    }

    /// Build a set of `count` synthetic witnesses named `prefix-0..`.
    pub fn numbered(prefix: &str, count: usize) -> Self {
        WitnessSet::new((0..count).map(|i| Address::new(format!("{}-{}", prefix, i))))
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.witnesses.contains(address)
    }

    pub fn majority(&self) -> usize {
        self.majority
    }

    pub fn len(&self) -> usize {
        self.witnesses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.witnesses.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Address> {
        self.witnesses.iter()
    }

    /// Witness authors among `authors`, skipping non-witnesses.
    pub fn filter<'a>(&'a self, authors: &'a [Address]) -> impl Iterator<Item = &'a Address> + 'a {
        authors.iter().filter(move |a| self.contains(a))
    }
}
