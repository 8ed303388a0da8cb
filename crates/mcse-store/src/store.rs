//! The storage trait.

use crate::error::Result;
use crate::txn::{CommitReceipt, Mutation, Txn};
use mcse_core::{Hash, PayoutRecord, Unit, UnitProps};

/// Counters describing the store's contents and activity.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub units: usize,
    pub edges: usize,
    pub stable_frontier: Option<u64>,
    pub commits: u64,
    pub rollbacks: u64,
    pub failed_commits: u64,
}

/// Durable, transactional storage of units, parent edges and the
/// main-chain-index tables.
///
/// Readers never observe a partially applied transaction: either every
/// mutation of a committed [`Txn`] is visible or none is.
pub trait UnitStore: Send + Sync {
    /// Open a new write transaction.
    fn begin(&self) -> Txn;

    /// Apply every staged mutation atomically.
    ///
    /// On error nothing from `txn` is visible and the caller may retry
    /// with a fresh transaction.
    fn commit(&self, txn: Txn) -> Result<CommitReceipt>;

    /// Discard a transaction without applying it.
    fn rollback(&self, txn: Txn);

    fn read_unit(&self, hash: &Hash) -> Result<Option<Unit>>;

    fn read_props(&self, hash: &Hash) -> Result<Option<UnitProps>>;

    fn read_parents(&self, hash: &Hash) -> Result<Option<Vec<Hash>>> {
        Ok(self.read_props(hash)?.map(|p| p.parents))
    }

    /// Children of `hash` in hash order.
    fn read_children(&self, hash: &Hash) -> Result<Vec<Hash>>;

    fn contains(&self, hash: &Hash) -> Result<bool>;

    /// Highest MCI persisted as stable.
    fn stable_frontier(&self) -> Result<Option<u64>>;

    /// Units carrying main chain index `mci`, in hash order.
    fn units_at_mci(&self, mci: u64) -> Result<Vec<Hash>>;

    /// The main-chain unit at `mci`.
    fn mc_unit_at(&self, mci: u64) -> Result<Option<Hash>>;

    /// Properties of every unit not yet stable.
    fn unstable_units(&self) -> Result<Vec<UnitProps>>;

    /// Units without children.
    fn free_units(&self) -> Result<Vec<Hash>>;

    fn payout_record(&self, mci: u64) -> Result<Option<PayoutRecord>>;

    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn stats(&self) -> StoreStats;

    /// Stage a unit insert.
    fn append(&self, txn: &mut Txn, unit: Unit, props: UnitProps) -> Result<()> {
        txn.push(Mutation::InsertUnit { unit, props });
        Ok(())
    }
}
