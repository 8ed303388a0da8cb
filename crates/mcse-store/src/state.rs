//! Materialised store state and the mutation/undo machinery.

use crate::error::{Result, StoreError};
use crate::txn::Mutation;
use mcse_core::{Hash, PayoutRecord, Unit, UnitProps};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Prior value of one touched key, restored on rollback.
#[derive(Debug)]
enum Undo {
    Unit(Hash, Option<Unit>),
    Props(Hash, Option<UnitProps>),
    Children(Hash, Option<BTreeSet<Hash>>),
    ByMci(u64, Option<BTreeSet<Hash>>),
    Frontier(Option<u64>),
    Payout(u64, Option<PayoutRecord>),
}

/// Undo entries in application order.
#[derive(Debug, Default)]
pub(crate) struct UndoLog(Vec<Undo>);

impl UndoLog {
    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }
}

/// Every table of the store.
#[derive(Clone, Debug, Default)]
pub(crate) struct StoreState {
    pub(crate) units: HashMap<Hash, Unit>,
    pub(crate) props: HashMap<Hash, UnitProps>,
    /// Edge table, parent -> children.
    pub(crate) children: HashMap<Hash, BTreeSet<Hash>>,
    pub(crate) by_mci: BTreeMap<u64, BTreeSet<Hash>>,
    pub(crate) stable_frontier: Option<u64>,
    pub(crate) payouts: BTreeMap<u64, PayoutRecord>,
}

impl StoreState {
    /// Apply one mutation, recording prior values in `undo`.
    ///
    /// On error the state may be partially modified; the caller reverts
    /// with the same undo log.
    pub(crate) fn apply(&mut self, mutation: &Mutation, undo: &mut UndoLog) -> Result<()> {
        match mutation {
            Mutation::InsertUnit { unit, props } => self.insert_unit(unit, props, undo),
            Mutation::UpdateProps(props) => self.update_props(props, undo),
            Mutation::RemoveUnit(hash) => self.remove_unit(hash, undo),
            Mutation::RecordPayout(record) => {
                undo.0
                    .push(Undo::Payout(record.mci, self.payouts.get(&record.mci).cloned()));
                self.payouts.insert(record.mci, record.clone());
                Ok(())
            }
            Mutation::SetStableFrontier(mci) => {
                if let Some(current) = self.stable_frontier {
                    if *mci < current {
                        return Err(StoreError::SchemaViolation(format!(
                            "stable frontier cannot move back from {} to {}",
                            current, mci
                        )));
                    }
                }
                undo.0.push(Undo::Frontier(self.stable_frontier));
                self.stable_frontier = Some(*mci);
                Ok(())
            }
        }
    }

    /// Restore every key touched since `undo` was created.
    pub(crate) fn revert(&mut self, undo: UndoLog) {
        for entry in undo.0.into_iter().rev() {
            match entry {
                Undo::Unit(hash, prev) => restore(&mut self.units, hash, prev),
                Undo::Props(hash, prev) => restore(&mut self.props, hash, prev),
                Undo::Children(hash, prev) => restore(&mut self.children, hash, prev),
                Undo::ByMci(mci, prev) => match prev {
                    Some(set) => {
                        self.by_mci.insert(mci, set);
                    }
                    None => {
                        self.by_mci.remove(&mci);
                    }
                },
                Undo::Frontier(prev) => self.stable_frontier = prev,
                Undo::Payout(mci, prev) => match prev {
                    Some(record) => {
                        self.payouts.insert(mci, record);
                    }
                    None => {
                        self.payouts.remove(&mci);
                    }
                },
            }
        }
    }

    fn insert_unit(&mut self, unit: &Unit, props: &UnitProps, undo: &mut UndoLog) -> Result<()> {
        if self.units.contains_key(&unit.hash) {
            return Err(StoreError::DuplicateUnit(unit.hash));
        }
        if props.unit != unit.hash || props.parents != unit.parents {
            return Err(StoreError::SchemaViolation(format!(
                "props do not describe unit {}",
                unit.hash.short()
            )));
        }
        if unit.parents.is_empty() && !self.units.is_empty() {
            return Err(StoreError::SchemaViolation(
                "a second genesis unit cannot be stored".to_string(),
            ));
        }
        if let Some(parent) = unit.parents.iter().find(|p| !self.units.contains_key(p)) {
            return Err(StoreError::MissingParent {
                unit: unit.hash,
                parent: *parent,
            });
        }

        undo.0.push(Undo::Unit(unit.hash, None));
        self.units.insert(unit.hash, unit.clone());

        for parent in &unit.parents {
            self.save_children(*parent, undo);
            self.children.entry(*parent).or_default().insert(unit.hash);

            if let Some(parent_props) = self.props.get(parent) {
                if parent_props.is_free {
                    let mut parent_props = parent_props.clone();
                    parent_props.is_free = false;
                    self.put_props(parent_props, undo);
                }
            }
        }

        self.put_props(props.clone(), undo);
        Ok(())
    }

    fn update_props(&mut self, props: &UnitProps, undo: &mut UndoLog) -> Result<()> {
        let current = self
            .props
            .get(&props.unit)
            .ok_or(StoreError::UnknownUnit(props.unit))?;

        if current.parents != props.parents || current.authors != props.authors {
            return Err(StoreError::SchemaViolation(format!(
                "immutable content of {} changed",
                props.unit.short()
            )));
        }
        if current.is_stable && !props.is_stable {
            return Err(StoreError::SchemaViolation(format!(
                "stable unit {} cannot become unstable",
                props.unit.short()
            )));
        }
        if current.is_stable && current.main_chain_index != props.main_chain_index {
            return Err(StoreError::SchemaViolation(format!(
                "main chain index of stable unit {} is immutable",
                props.unit.short()
            )));
        }

        self.put_props(props.clone(), undo);
        Ok(())
    }

    fn remove_unit(&mut self, hash: &Hash, undo: &mut UndoLog) -> Result<()> {
        let unit = self
            .units
            .get(hash)
            .cloned()
            .ok_or(StoreError::UnknownUnit(*hash))?;

        if self.children.get(hash).map_or(false, |c| !c.is_empty()) {
            return Err(StoreError::SchemaViolation(format!(
                "unit {} still has children",
                hash.short()
            )));
        }

        undo.0.push(Undo::Unit(*hash, Some(unit.clone())));
        self.units.remove(hash);

        for parent in &unit.parents {
            self.save_children(*parent, undo);
            let now_childless = match self.children.get_mut(parent) {
                Some(set) => {
                    set.remove(hash);
                    set.is_empty()
                }
                None => true,
            };
            if now_childless {
                if let Some(parent_props) = self.props.get(parent) {
                    if !parent_props.is_free {
                        let mut parent_props = parent_props.clone();
                        parent_props.is_free = true;
                        self.put_props(parent_props, undo);
                    }
                }
            }
        }

        self.save_children(*hash, undo);
        self.children.remove(hash);

        if let Some(old) = self.props.get(hash).cloned() {
            if let Some(mci) = old.main_chain_index {
                self.unindex_mci(mci, hash, undo);
            }
            undo.0.push(Undo::Props(*hash, Some(old)));
            self.props.remove(hash);
        }
        Ok(())
    }

    fn put_props(&mut self, props: UnitProps, undo: &mut UndoLog) {
        let hash = props.unit;
        let old = self.props.get(&hash).cloned();

        if let Some(old_mci) = old.as_ref().and_then(|p| p.main_chain_index) {
            if Some(old_mci) != props.main_chain_index {
                self.unindex_mci(old_mci, &hash, undo);
            }
        }
        if let Some(mci) = props.main_chain_index {
            let already = self.by_mci.get(&mci).map_or(false, |s| s.contains(&hash));
            if !already {
                undo.0.push(Undo::ByMci(mci, self.by_mci.get(&mci).cloned()));
                self.by_mci.entry(mci).or_default().insert(hash);
            }
        }

        undo.0.push(Undo::Props(hash, old));
        self.props.insert(hash, props);
    }

    fn unindex_mci(&mut self, mci: u64, hash: &Hash, undo: &mut UndoLog) {
        undo.0.push(Undo::ByMci(mci, self.by_mci.get(&mci).cloned()));
        if let Some(set) = self.by_mci.get_mut(&mci) {
            set.remove(hash);
            if set.is_empty() {
                self.by_mci.remove(&mci);
            }
        }
    }

    fn save_children(&mut self, hash: Hash, undo: &mut UndoLog) {
        undo.0.push(Undo::Children(hash, self.children.get(&hash).cloned()));
    }

    pub(crate) fn mc_unit_at(&self, mci: u64) -> Option<Hash> {
        self.by_mci.get(&mci).and_then(|set| {
            set.iter()
                .find(|h| self.props.get(h).map_or(false, |p| p.is_on_main_chain))
                .copied()
        })
    }

    pub(crate) fn edge_count(&self) -> usize {
        self.children.values().map(|c| c.len()).sum()
    }
}

fn restore<V>(map: &mut HashMap<Hash, V>, key: Hash, prev: Option<V>) {
    match prev {
        Some(value) => {
            map.insert(key, value);
        }
        None => {
            map.remove(&key);
        }
    }
}
