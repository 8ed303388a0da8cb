//! Write transactions.
//!
//! A [`Txn`] stages mutations without touching the store. Nothing becomes
//! visible to readers until [`UnitStore::commit`](crate::UnitStore::commit)
//! applies the whole list atomically.

use mcse_core::{Hash, PayoutRecord, Unit, UnitProps};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// A single durable mutation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutation {
    /// Insert a new unit with its parent edges; clears the parents' free flags.
    InsertUnit { unit: Unit, props: UnitProps },

    /// Replace the derived properties of an existing unit.
    UpdateProps(UnitProps),

    /// Remove a childless unit and its parent edges.
    RemoveUnit(Hash),

    /// Store witness payment bookkeeping for a stable MCI.
    RecordPayout(PayoutRecord),

    /// Advance the stable frontier scalar.
    SetStableFrontier(u64),
}

impl Mutation {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Mutation::InsertUnit { .. } => "insert_unit",
            Mutation::UpdateProps(_) => "update_props",
            Mutation::RemoveUnit(_) => "remove_unit",
            Mutation::RecordPayout(_) => "record_payout",
            Mutation::SetStableFrontier(_) => "set_stable_frontier",
        }
    }
}

/// A staged write transaction.
#[derive(Debug)]
pub struct Txn {
    id: u64,
    mutations: Vec<Mutation>,
    deadline: Option<Instant>,
}

impl Txn {
    pub fn new(id: u64) -> Self {
        Txn {
            id,
            mutations: Vec::new(),
            deadline: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn push(&mut self, mutation: Mutation) {
        self.mutations.push(mutation);
    }

    pub fn extend(&mut self, mutations: impl IntoIterator<Item = Mutation>) {
        self.mutations.extend(mutations);
    }

    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    /// Refuse to make the transaction durable after `deadline`.
    pub fn set_deadline(&mut self, deadline: Instant) {
        self.deadline = Some(deadline);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether this transaction already stages an insert of `hash`.
    pub fn stages_unit(&self, hash: &Hash) -> bool {
        self.mutations
            .iter()
            .any(|m| matches!(m, Mutation::InsertUnit { unit, .. } if unit.hash == *hash))
    }

    pub(crate) fn into_parts(self) -> (u64, Vec<Mutation>, Option<Instant>) {
        (self.id, self.mutations, self.deadline)
    }
}

/// Outcome of a successful commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitReceipt {
    pub txn_id: u64,
    pub mutations: usize,
    pub stable_frontier: Option<u64>,
}
