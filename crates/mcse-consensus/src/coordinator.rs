//! Atomic commits of storage and mirror.
//!
//! [`CommitCoordinator`] is the only path that mutates the
//! [`GraphIndex`]. It writes a [`ChangeSet`] to storage in one
//! transaction and publishes it to the mirror only after that transaction
//! has committed. A failed commit leaves the mirror untouched and the
//! change set is dropped.

use crate::error::CommitError;
use crate::stability::StabilityAdvance;
use mcse_graph::{ChangeSet, GraphIndex, StagedView};
use mcse_store::{CommitReceipt, UnitStore};
use parking_lot::{RwLock, RwLockReadGuard};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

type Result<T> = std::result::Result<T, CommitError>;

/// Read handle over the committed state: mirror first, then storage.
pub struct GraphReader<S: UnitStore + ?Sized> {
    store: Arc<S>,
    index: Arc<RwLock<GraphIndex>>,
}

impl<S: UnitStore + ?Sized> Clone for GraphReader<S> {
    fn clone(&self) -> Self {
        GraphReader {
            store: Arc::clone(&self.store),
            index: Arc::clone(&self.index),
        }
    }
}

impl<S: UnitStore + ?Sized> GraphReader<S> {
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Shared access to the mirror. Do not hold across a commit.
    pub fn index(&self) -> RwLockReadGuard<'_, GraphIndex> {
        self.index.read()
    }

    /// Run `f` against a consistent view of the committed graph.
    pub fn with_view<R>(&self, f: impl FnOnce(&StagedView<'_, S>) -> R) -> R {
        let index = self.index.read();
        let view = StagedView::new(&index, &*self.store, None);
        f(&view)
    }
}

pub struct CommitCoordinator<S: UnitStore + ?Sized> {
    store: Arc<S>,
    index: Arc<RwLock<GraphIndex>>,
    verify_mirror: bool,
}

impl<S: UnitStore + ?Sized> CommitCoordinator<S> {
    pub fn new(store: Arc<S>, index: GraphIndex, verify_mirror: bool) -> Self {
        CommitCoordinator {
            store,
            index: Arc::new(RwLock::new(index)),
            verify_mirror,
        }
    }

    pub fn reader(&self) -> GraphReader<S> {
        GraphReader {
            store: Arc::clone(&self.store),
            index: Arc::clone(&self.index),
        }
    }

    /// Commit `changes` durably, then publish them to the mirror.
    pub fn commit(&self, changes: ChangeSet, deadline: Option<Instant>) -> Result<CommitReceipt> {
        if self.verify_mirror {
            self.verify()?;
        }

        let mut txn = self.store.begin();
        txn.extend(changes.to_mutations());
        if let Some(deadline) = deadline {
            txn.set_deadline(deadline);
        }
        let txn_id = txn.id();

        match self.store.commit(txn) {
            Ok(receipt) => {
                self.index.write().publish(&changes);
                debug!(
                    txn_id,
                    mutations = receipt.mutations,
                    stable_frontier = ?receipt.stable_frontier,
                    "commit.published"
                );
                Ok(receipt)
            }
            Err(err) => {
                warn!(txn_id, error = %err, "commit.rollback");
                Err(err.into())
            }
        }
    }

    /// Commit a planned stability advance as one transaction.
    pub fn commit_stability_advance(
        &self,
        advance: &StabilityAdvance,
        changes: ChangeSet,
        deadline: Option<Instant>,
    ) -> Result<CommitReceipt> {
        let mirror_frontier = self.index.read().last_stable_mci();
        if advance.from != mirror_frontier {
            return Err(CommitError::NonContiguousAdvance {
                expected: mirror_frontier + 1,
                found: advance.from + 1,
            });
        }
        let mut expected = advance.from + 1;
        for mci in advance.mcis() {
            if mci != expected {
                return Err(CommitError::NonContiguousAdvance {
                    expected,
                    found: mci,
                });
            }
            expected += 1;
        }
        if changes.stable_frontier() != Some(advance.to) {
            return Err(CommitError::NonContiguousAdvance {
                expected: advance.to,
                found: changes.stable_frontier().unwrap_or(advance.from),
            });
        }

        self.commit(changes, deadline)
    }

    /// Compare the mirror's frontier with storage; on mismatch rebuild the
    /// mirror and refuse the operation.
    fn verify(&self) -> Result<()> {
        let mirror = self.index.read().last_stable_mci();
        let durable = self.store.stable_frontier()?.unwrap_or(0);
        if mirror == durable {
            return Ok(());
        }

        let rebuilt = GraphIndex::rebuild(&*self.store)?;
        *self.index.write() = rebuilt;
        error!(
            mirror_frontier = mirror,
            durable_frontier = durable,
            operator_attention = true,
            "commit.consistency_violation"
        );
        Err(CommitError::ConsistencyViolation(format!(
            "mirror frontier {} disagrees with durable frontier {}; mirror rebuilt",
            mirror, durable
        )))
    }
}
