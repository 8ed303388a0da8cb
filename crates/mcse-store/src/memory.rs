//! In-memory unit store with fault injection.

use crate::error::{Result, StoreError};
use crate::state::{StoreState, UndoLog};
use crate::store::{StoreStats, UnitStore};
use crate::txn::{CommitReceipt, Mutation, Txn};
use mcse_core::{Hash, PayoutRecord, Unit, UnitProps};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, warn};

/// Where an armed fault fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailPoint {
    /// The next commit fails at its durability point, after every
    /// mutation was applied.
    NextCommit,

    /// The next commit fails after applying this many mutations.
    AfterMutations(usize),

    /// The next read query fails.
    NextRead,
}

/// One-shot fail points shared by a store and its tests.
#[derive(Debug, Default)]
pub struct FaultInjector {
    armed: Mutex<Vec<FailPoint>>,
}

impl FaultInjector {
    pub fn new() -> Self {
        FaultInjector::default()
    }

    /// Arm a fail point; it fires once.
    pub fn arm(&self, point: FailPoint) {
        self.armed.lock().push(point);
    }

    pub fn disarm_all(&self) {
        self.armed.lock().clear();
    }

    pub fn is_armed(&self) -> bool {
        !self.armed.lock().is_empty()
    }

    fn take(&self, wanted: impl Fn(&FailPoint) -> bool) -> Option<FailPoint> {
        let mut armed = self.armed.lock();
        let pos = armed.iter().position(wanted)?;
        Some(armed.remove(pos))
    }

    fn check_read(&self) -> Result<()> {
        match self.take(|p| *p == FailPoint::NextRead) {
            Some(_) => Err(StoreError::InjectedFailure("read".to_string())),
            None => Ok(()),
        }
    }

    fn check_applied(&self, applied: usize) -> Result<()> {
        match self.take(|p| *p == FailPoint::AfterMutations(applied)) {
            Some(_) => Err(StoreError::InjectedFailure(format!(
                "after {} mutations",
                applied
            ))),
            None => Ok(()),
        }
    }

    fn check_durability_point(&self) -> Result<()> {
        match self.take(|p| *p == FailPoint::NextCommit) {
            Some(_) => Err(StoreError::InjectedFailure("commit".to_string())),
            None => Ok(()),
        }
    }
}

/// In-memory [`UnitStore`].
///
/// Commits apply mutations under the state write lock while recording an
/// undo log; any failure restores every touched key before the lock is
/// released, so readers only ever see whole transactions.
pub struct MemoryUnitStore {
    state: RwLock<StoreState>,
    next_txn: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
    failed_commits: AtomicU64,
    faults: FaultInjector,
}

impl MemoryUnitStore {
    pub fn new() -> Self {
        Self::from_state(StoreState::default(), 1)
    }

    pub(crate) fn from_state(state: StoreState, next_txn: u64) -> Self {
        MemoryUnitStore {
            state: RwLock::new(state),
            next_txn: AtomicU64::new(next_txn),
            commits: AtomicU64::new(0),
            rollbacks: AtomicU64::new(0),
            failed_commits: AtomicU64::new(0),
            faults: FaultInjector::new(),
        }
    }

    /// Fail points for this store.
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Commit `txn`, calling `persist` as the durability point once every
    /// mutation has been applied in memory.
    pub(crate) fn commit_with<F>(&self, txn: Txn, persist: F) -> Result<CommitReceipt>
    where
        F: FnOnce(u64, &[Mutation]) -> Result<()>,
    {
        let (txn_id, mutations, deadline) = txn.into_parts();
        let mut state = self.state.write();
        let mut undo = UndoLog::default();

        let outcome = Self::apply_all(&mut state, &mutations, &mut undo, &self.faults)
            .and_then(|()| match deadline {
                Some(deadline) if Instant::now() > deadline => Err(StoreError::DeadlineExceeded),
                _ => Ok(()),
            })
            .and_then(|()| self.faults.check_durability_point())
            .and_then(|()| persist(txn_id, &mutations));

        match outcome {
            Ok(()) => {
                self.commits.fetch_add(1, Ordering::Relaxed);
                debug!(
                    txn_id,
                    mutations = mutations.len(),
                    stable_frontier = ?state.stable_frontier,
                    "store.commit"
                );
                Ok(CommitReceipt {
                    txn_id,
                    mutations: mutations.len(),
                    stable_frontier: state.stable_frontier,
                })
            }
            Err(err) => {
                let undone = undo.len();
                state.revert(undo);
                self.failed_commits.fetch_add(1, Ordering::Relaxed);
                warn!(txn_id, undone, error = %err, "store.commit_failed");
                Err(err)
            }
        }
    }

    fn apply_all(
        state: &mut StoreState,
        mutations: &[Mutation],
        undo: &mut UndoLog,
        faults: &FaultInjector,
    ) -> Result<()> {
        for (applied, mutation) in mutations.iter().enumerate() {
            faults.check_applied(applied)?;
            state.apply(mutation, undo)?;
        }
        Ok(())
    }
}

impl Default for MemoryUnitStore {
    fn default() -> Self {
        Self::new()
    }
}

impl UnitStore for MemoryUnitStore {
    fn begin(&self) -> Txn {
        Txn::new(self.next_txn.fetch_add(1, Ordering::Relaxed))
    }

    fn commit(&self, txn: Txn) -> Result<CommitReceipt> {
        self.commit_with(txn, |_, _| Ok(()))
    }

    fn rollback(&self, txn: Txn) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
        debug!(txn_id = txn.id(), mutations = txn.len(), "store.rollback");
    }

    fn read_unit(&self, hash: &Hash) -> Result<Option<Unit>> {
        self.faults.check_read()?;
        Ok(self.state.read().units.get(hash).cloned())
    }

    fn read_props(&self, hash: &Hash) -> Result<Option<UnitProps>> {
        self.faults.check_read()?;
        Ok(self.state.read().props.get(hash).cloned())
    }

    fn read_children(&self, hash: &Hash) -> Result<Vec<Hash>> {
        self.faults.check_read()?;
        Ok(self
            .state
            .read()
            .children
            .get(hash)
            .map(|c| c.iter().copied().collect())
            .unwrap_or_default())
    }

    fn contains(&self, hash: &Hash) -> Result<bool> {
        self.faults.check_read()?;
        Ok(self.state.read().units.contains_key(hash))
    }

    fn stable_frontier(&self) -> Result<Option<u64>> {
        self.faults.check_read()?;
        Ok(self.state.read().stable_frontier)
    }

    fn units_at_mci(&self, mci: u64) -> Result<Vec<Hash>> {
        self.faults.check_read()?;
        Ok(self
            .state
            .read()
            .by_mci
            .get(&mci)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default())
    }

    fn mc_unit_at(&self, mci: u64) -> Result<Option<Hash>> {
        self.faults.check_read()?;
        Ok(self.state.read().mc_unit_at(mci))
    }

    fn unstable_units(&self) -> Result<Vec<UnitProps>> {
        self.faults.check_read()?;
        let state = self.state.read();
        let mut units: Vec<UnitProps> = state
            .props
            .values()
            .filter(|p| !p.is_stable)
            .cloned()
            .collect();
        units.sort_by(|a, b| a.level.cmp(&b.level).then(a.unit.cmp(&b.unit)));
        Ok(units)
    }

    fn free_units(&self) -> Result<Vec<Hash>> {
        self.faults.check_read()?;
        let state = self.state.read();
        let mut free: Vec<Hash> = state
            .props
            .values()
            .filter(|p| p.is_free)
            .map(|p| p.unit)
            .collect();
        free.sort();
        Ok(free)
    }

    fn payout_record(&self, mci: u64) -> Result<Option<PayoutRecord>> {
        self.faults.check_read()?;
        Ok(self.state.read().payouts.get(&mci).cloned())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.state.read().units.len())
    }

    fn stats(&self) -> StoreStats {
        let state = self.state.read();
        StoreStats {
            units: state.units.len(),
            edges: state.edge_count(),
            stable_frontier: state.stable_frontier,
            commits: self.commits.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
            failed_commits: self.failed_commits.load(Ordering::Relaxed),
        }
    }
}
