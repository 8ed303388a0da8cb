//! Shadow structure for staged graph changes.
//!
//! A write operation records everything it intends to change in a
//! [`ChangeSet`]. The change set is turned into store mutations for the
//! durable commit, and only after that commit succeeds is it published to
//! the [`GraphIndex`](crate::GraphIndex). Dropping a change set discards it.

use mcse_core::{Hash, PayoutRecord, Unit, UnitProps};
use mcse_store::Mutation;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

#[derive(Clone, Debug, Default)]
pub struct ChangeSet {
    inserted: Vec<Unit>,
    inserted_set: HashSet<Hash>,
    props: HashMap<Hash, UnitProps>,
    new_children: HashMap<Hash, BTreeSet<Hash>>,
    main_chain: BTreeMap<u64, Hash>,
    removed: Vec<Hash>,
    removed_set: HashSet<Hash>,
    stabilized: BTreeMap<u64, Vec<Hash>>,
    stable_frontier: Option<u64>,
    payouts: Vec<PayoutRecord>,
}

impl ChangeSet {
    pub fn new() -> Self {
        ChangeSet::default()
    }

    /// Stage a new unit together with its derived properties.
    pub fn insert_unit(&mut self, unit: Unit, props: UnitProps) {
        for parent in &unit.parents {
            self.new_children.entry(*parent).or_default().insert(unit.hash);
        }
        self.inserted_set.insert(unit.hash);
        self.inserted.push(unit);
        self.put(props);
    }

    /// Stage new properties for a unit.
    pub fn put(&mut self, props: UnitProps) {
        if let Some(old) = self.props.get(&props.unit) {
            if let (true, Some(mci)) = (old.is_on_main_chain, old.main_chain_index) {
                if self.main_chain.get(&mci) == Some(&old.unit) {
                    self.main_chain.remove(&mci);
                }
            }
        }
        if let (true, Some(mci)) = (props.is_on_main_chain, props.main_chain_index) {
            self.main_chain.insert(mci, props.unit);
        }
        self.props.insert(props.unit, props);
    }

    pub fn apply_updates(&mut self, updates: impl IntoIterator<Item = UnitProps>) {
        for props in updates {
            self.put(props);
        }
    }

    /// Stage removal of a unit. Units must be removed children first.
    pub fn remove(&mut self, hash: Hash) {
        if self.removed_set.insert(hash) {
            self.removed.push(hash);
        }
    }

    /// Record the units that became stable at `mci`.
    pub fn mark_stabilized(&mut self, mci: u64, mut units: Vec<Hash>) {
        units.sort();
        self.stabilized.insert(mci, units);
    }

    pub fn set_stable_frontier(&mut self, mci: u64) {
        self.stable_frontier = Some(mci);
    }

    pub fn record_payout(&mut self, record: PayoutRecord) {
        self.payouts.push(record);
    }

    /// Staged properties; `None` when untouched.
    pub fn props(&self, hash: &Hash) -> Option<&UnitProps> {
        self.props.get(hash)
    }

    pub fn touched(&self) -> impl Iterator<Item = &UnitProps> {
        self.props.values()
    }

    pub fn is_inserted(&self, hash: &Hash) -> bool {
        self.inserted_set.contains(hash)
    }

    pub fn is_removed(&self, hash: &Hash) -> bool {
        self.removed_set.contains(hash)
    }

    pub fn new_children(&self, hash: &Hash) -> Option<&BTreeSet<Hash>> {
        self.new_children.get(hash)
    }

    /// Staged main-chain unit at `mci`, if this change set placed one there.
    pub fn main_chain_unit(&self, mci: u64) -> Option<Hash> {
        self.main_chain.get(&mci).copied()
    }

    pub fn inserted(&self) -> &[Unit] {
        &self.inserted
    }

    pub fn removed(&self) -> &[Hash] {
        &self.removed
    }

    pub fn stabilized(&self) -> &BTreeMap<u64, Vec<Hash>> {
        &self.stabilized
    }

    pub fn stable_frontier(&self) -> Option<u64> {
        self.stable_frontier
    }

    pub fn payouts(&self) -> &[PayoutRecord] {
        &self.payouts
    }

    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty()
            && self.props.is_empty()
            && self.removed.is_empty()
            && self.stabilized.is_empty()
            && self.stable_frontier.is_none()
            && self.payouts.is_empty()
    }

    /// Durable mutations equivalent to this change set: inserts, property
    /// updates, removals, payouts, then the frontier.
    pub fn to_mutations(&self) -> Vec<Mutation> {
        let mut mutations = Vec::with_capacity(self.inserted.len() + self.props.len() + 2);

        for unit in &self.inserted {
            if self.removed_set.contains(&unit.hash) {
                continue;
            }
            if let Some(props) = self.props.get(&unit.hash) {
                mutations.push(Mutation::InsertUnit {
                    unit: unit.clone(),
                    props: props.clone(),
                });
            }
        }

        let mut updates: Vec<&UnitProps> = self
            .props
            .values()
            .filter(|p| !self.inserted_set.contains(&p.unit) && !self.removed_set.contains(&p.unit))
            .collect();
        updates.sort_by(|a, b| a.level.cmp(&b.level).then(a.unit.cmp(&b.unit)));
        mutations.extend(updates.into_iter().cloned().map(Mutation::UpdateProps));

        for hash in &self.removed {
            if !self.inserted_set.contains(hash) {
                mutations.push(Mutation::RemoveUnit(*hash));
            }
        }

        mutations.extend(self.payouts.iter().cloned().map(Mutation::RecordPayout));

        if let Some(mci) = self.stable_frontier {
            mutations.push(Mutation::SetStableFrontier(mci));
        }
        mutations
    }
}
