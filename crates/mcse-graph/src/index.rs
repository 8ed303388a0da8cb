//! The in-memory graph mirror.

use crate::changes::ChangeSet;
use crate::error::Result;
use mcse_core::{Hash, UnitProps};
use mcse_store::UnitStore;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::info;

/// Counters describing the mirror.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GraphStats {
    pub unstable_units: usize,
    pub stable_mcis: usize,
    pub stable_units: usize,
    pub free_units: usize,
    pub last_stable_mci: u64,
}

/// Mirror of unstable unit properties with a stable-by-MCI index.
///
/// Entries move from the unstable map to the stable index exactly once,
/// when a committed [`ChangeSet`] is published. The mirror is only ever
/// mutated through [`publish`](GraphIndex::publish) and
/// [`rebuild`](GraphIndex::rebuild).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GraphIndex {
    unstable: HashMap<Hash, UnitProps>,

    /// Parent -> children that are still unstable.
    children: HashMap<Hash, BTreeSet<Hash>>,

    stable_by_mci: BTreeMap<u64, Vec<Hash>>,
    stable_mci: HashMap<Hash, u64>,
    last_stable_mci: u64,
    free: BTreeSet<Hash>,
}

impl GraphIndex {
    pub fn new() -> Self {
        GraphIndex::default()
    }

    /// Reconstruct the mirror from durable storage.
    pub fn rebuild<S: UnitStore + ?Sized>(store: &S) -> Result<Self> {
        let mut index = GraphIndex::new();
        let frontier = store.stable_frontier()?;
        index.last_stable_mci = frontier.unwrap_or(0);

        for props in store.unstable_units()? {
            index.link(&props);
            index.unstable.insert(props.unit, props);
        }

        if let Some(frontier) = frontier {
            for mci in 0..=frontier {
                let units = store.units_at_mci(mci)?;
                if units.is_empty() {
                    continue;
                }
                for hash in &units {
                    index.stable_mci.insert(*hash, mci);
                }
                index.stable_by_mci.insert(mci, units);
            }
        }

        index.free = store.free_units()?.into_iter().collect();

        info!(
            unstable = index.unstable.len(),
            stable_mcis = index.stable_by_mci.len(),
            last_stable_mci = index.last_stable_mci,
            "graph.rebuild"
        );
        Ok(index)
    }

    /// Apply a change set that has been durably committed.
    pub fn publish(&mut self, changes: &ChangeSet) {
        for props in changes.touched() {
            if changes.is_removed(&props.unit) {
                continue;
            }
            if props.is_stable {
                self.unlink(props);
                self.unstable.remove(&props.unit);
            } else {
                self.link(props);
                self.unstable.insert(props.unit, props.clone());
            }
            if props.is_free {
                self.free.insert(props.unit);
            } else {
                self.free.remove(&props.unit);
            }
        }

        for hash in changes.removed() {
            if let Some(props) = self.unstable.remove(hash) {
                self.unlink(&props);
            }
            self.children.remove(hash);
            self.free.remove(hash);
            if let Some(mci) = self.stable_mci.remove(hash) {
                if let Some(units) = self.stable_by_mci.get_mut(&mci) {
                    units.retain(|h| h != hash);
                }
            }
        }

        for (mci, units) in changes.stabilized() {
            for hash in units {
                self.stable_mci.insert(*hash, *mci);
            }
            self.stable_by_mci.insert(*mci, units.clone());
        }

        if let Some(frontier) = changes.stable_frontier() {
            self.last_stable_mci = frontier;
        }
    }

    fn link(&mut self, props: &UnitProps) {
        for parent in &props.parents {
            self.children.entry(*parent).or_default().insert(props.unit);
        }
    }

    fn unlink(&mut self, props: &UnitProps) {
        for parent in &props.parents {
            if let Some(children) = self.children.get_mut(parent) {
                children.remove(&props.unit);
                if children.is_empty() {
                    self.children.remove(parent);
                }
            }
        }
    }

    /// Mirrored properties of an unstable unit.
    pub fn props(&self, hash: &Hash) -> Option<&UnitProps> {
        self.unstable.get(hash)
    }

    pub fn is_unstable(&self, hash: &Hash) -> bool {
        self.unstable.contains_key(hash)
    }

    /// Children of an unstable unit. `None` for units the mirror does not
    /// track as unstable, whose children must be read from storage.
    pub fn children_of(&self, hash: &Hash) -> Option<Vec<Hash>> {
        if !self.unstable.contains_key(hash) {
            return None;
        }
        Some(
            self.children
                .get(hash)
                .map(|c| c.iter().copied().collect())
                .unwrap_or_default(),
        )
    }

    pub fn unstable_units(&self) -> impl Iterator<Item = &UnitProps> {
        self.unstable.values()
    }

    pub fn free_units(&self) -> impl Iterator<Item = &Hash> {
        self.free.iter()
    }

    pub fn last_stable_mci(&self) -> u64 {
        self.last_stable_mci
    }

    pub fn stable_mci_of(&self, hash: &Hash) -> Option<u64> {
        self.stable_mci.get(hash).copied()
    }

    pub fn units_at_stable_mci(&self, mci: u64) -> Option<&[Hash]> {
        self.stable_by_mci.get(&mci).map(|v| v.as_slice())
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            unstable_units: self.unstable.len(),
            stable_mcis: self.stable_by_mci.len(),
            stable_units: self.stable_mci.len(),
            free_units: self.free.len(),
            last_stable_mci: self.last_stable_mci,
        }
    }
}
