//! Read views over the mirror, the store and staged changes.

use crate::changes::ChangeSet;
use crate::error::{GraphError, Result};
use crate::index::GraphIndex;
use mcse_core::{Hash, UnitProps};
use mcse_store::UnitStore;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Source of unit properties and edges for graph algorithms.
pub trait UnitSource {
    fn props(&self, hash: &Hash) -> Result<Option<UnitProps>>;

    /// Children of `hash`, in hash order.
    fn children(&self, hash: &Hash) -> Result<Vec<Hash>>;

    fn last_stable_mci(&self) -> u64;

    /// Units with no children, in hash order.
    fn free_units(&self) -> Result<Vec<Hash>>;

    /// Every unit that is not committed stable, with its current properties.
    fn hot_units(&self) -> Result<Vec<UnitProps>>;

    /// The main-chain unit at `mci`.
    fn mc_unit_at(&self, mci: u64) -> Result<Option<Hash>>;

    fn require(&self, hash: &Hash) -> Result<UnitProps> {
        self.props(hash)?.ok_or(GraphError::UnknownUnit(*hash))
    }
}

/// The graph as it will look once `changes` commit: staged changes first,
/// then the mirror, then durable storage.
pub struct StagedView<'a, S: UnitStore + ?Sized> {
    index: &'a GraphIndex,
    store: &'a S,
    changes: Option<&'a ChangeSet>,
}

impl<'a, S: UnitStore + ?Sized> StagedView<'a, S> {
    pub fn new(index: &'a GraphIndex, store: &'a S, changes: Option<&'a ChangeSet>) -> Self {
        StagedView {
            index,
            store,
            changes,
        }
    }

    pub fn index(&self) -> &GraphIndex {
        self.index
    }

    fn is_removed(&self, hash: &Hash) -> bool {
        self.changes.map_or(false, |c| c.is_removed(hash))
    }
}

impl<S: UnitStore + ?Sized> UnitSource for StagedView<'_, S> {
    fn props(&self, hash: &Hash) -> Result<Option<UnitProps>> {
        if let Some(changes) = self.changes {
            if changes.is_removed(hash) {
                return Ok(None);
            }
            if let Some(props) = changes.props(hash) {
                return Ok(Some(props.clone()));
            }
        }
        if let Some(props) = self.index.props(hash) {
            return Ok(Some(props.clone()));
        }
        Ok(self.store.read_props(hash)?)
    }

    fn children(&self, hash: &Hash) -> Result<Vec<Hash>> {
        let staged_only = self.changes.map_or(false, |c| c.is_inserted(hash));
        let mut children: BTreeSet<Hash> = if staged_only {
            BTreeSet::new()
        } else {
            match self.index.children_of(hash) {
                Some(children) => children.into_iter().collect(),
                None => self.store.read_children(hash)?.into_iter().collect(),
            }
        };
        if let Some(staged) = self.changes.and_then(|c| c.new_children(hash)) {
            children.extend(staged.iter().copied());
        }
        children.retain(|c| !self.is_removed(c));
        Ok(children.into_iter().collect())
    }

    fn last_stable_mci(&self) -> u64 {
        self.changes
            .and_then(|c| c.stable_frontier())
            .unwrap_or_else(|| self.index.last_stable_mci())
    }

    fn free_units(&self) -> Result<Vec<Hash>> {
        let mut free: BTreeSet<Hash> = self.index.free_units().copied().collect();
        if let Some(changes) = self.changes {
            for props in changes.touched() {
                if props.is_free {
                    free.insert(props.unit);
                } else {
                    free.remove(&props.unit);
                }
            }
            free.retain(|h| !changes.is_removed(h));
        }
        Ok(free.into_iter().collect())
    }

    fn hot_units(&self) -> Result<Vec<UnitProps>> {
        let mut hot: HashMap<Hash, UnitProps> = self
            .index
            .unstable_units()
            .map(|p| (p.unit, p.clone()))
            .collect();
        if let Some(changes) = self.changes {
            for props in changes.touched() {
                if hot.contains_key(&props.unit) || changes.is_inserted(&props.unit) {
                    hot.insert(props.unit, props.clone());
                }
            }
            hot.retain(|h, _| !changes.is_removed(h));
        }
        Ok(hot.into_values().collect())
    }

    fn mc_unit_at(&self, mci: u64) -> Result<Option<Hash>> {
        if let Some(hash) = self.changes.and_then(|c| c.main_chain_unit(mci)) {
            return Ok(Some(hash));
        }
        if mci <= self.index.last_stable_mci() {
            if let Some(units) = self.index.units_at_stable_mci(mci) {
                for hash in units {
                    if self.props(hash)?.map_or(false, |p| p.is_on_main_chain) {
                        return Ok(Some(*hash));
                    }
                }
            }
        }
        match self.store.mc_unit_at(mci)? {
            Some(hash) => Ok(confirm_mc(self, hash, mci)?),
            None => Ok(None),
        }
    }
}

/// Keep `hash` only if the view still places it on the main chain at `mci`.
fn confirm_mc<U: UnitSource + ?Sized>(source: &U, hash: Hash, mci: u64) -> Result<Option<Hash>> {
    Ok(source
        .props(&hash)?
        .filter(|p| p.is_on_main_chain && p.main_chain_index == Some(mci))
        .map(|p| p.unit))
}

/// Local property edits layered over another source.
///
/// Algorithms that plan changes read through an overlay, write their
/// updates into it, and hand the result back with
/// [`into_updates`](Overlay::into_updates). Edges are never changed.
pub struct Overlay<'b, U: UnitSource + ?Sized> {
    base: &'b U,
    local: HashMap<Hash, UnitProps>,
    main_chain: BTreeMap<u64, Hash>,
}

impl<'b, U: UnitSource + ?Sized> Overlay<'b, U> {
    pub fn new(base: &'b U) -> Self {
        Overlay {
            base,
            local: HashMap::new(),
            main_chain: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, props: UnitProps) {
        if let Some(old) = self.local.get(&props.unit) {
            if let (true, Some(mci)) = (old.is_on_main_chain, old.main_chain_index) {
                if self.main_chain.get(&mci) == Some(&old.unit) {
                    self.main_chain.remove(&mci);
                }
            }
        }
        if let (true, Some(mci)) = (props.is_on_main_chain, props.main_chain_index) {
            self.main_chain.insert(mci, props.unit);
        }
        self.local.insert(props.unit, props);
    }

    /// Write `props` only if it differs from what the overlay already shows.
    pub fn set_if_changed(&mut self, props: UnitProps) -> Result<bool> {
        if self.props(&props.unit)?.as_ref() == Some(&props) {
            return Ok(false);
        }
        self.set(props);
        Ok(true)
    }

    pub fn is_dirty(&self) -> bool {
        !self.local.is_empty()
    }

    /// Edited properties, in level then hash order.
    pub fn into_updates(self) -> Vec<UnitProps> {
        let mut updates: Vec<UnitProps> = self.local.into_values().collect();
        updates.sort_by(|a, b| a.level.cmp(&b.level).then(a.unit.cmp(&b.unit)));
        updates
    }
}

impl<U: UnitSource + ?Sized> UnitSource for Overlay<'_, U> {
    fn props(&self, hash: &Hash) -> Result<Option<UnitProps>> {
        match self.local.get(hash) {
            Some(props) => Ok(Some(props.clone())),
            None => self.base.props(hash),
        }
    }

    fn children(&self, hash: &Hash) -> Result<Vec<Hash>> {
        self.base.children(hash)
    }

    fn last_stable_mci(&self) -> u64 {
        self.base.last_stable_mci()
    }

    fn free_units(&self) -> Result<Vec<Hash>> {
        let mut free: BTreeSet<Hash> = self.base.free_units()?.into_iter().collect();
        for props in self.local.values() {
            if props.is_free {
                free.insert(props.unit);
            } else {
                free.remove(&props.unit);
            }
        }
        Ok(free.into_iter().collect())
    }

    fn hot_units(&self) -> Result<Vec<UnitProps>> {
        let mut hot = self.base.hot_units()?;
        for props in hot.iter_mut() {
            if let Some(local) = self.local.get(&props.unit) {
                *props = local.clone();
            }
        }
        Ok(hot)
    }

    fn mc_unit_at(&self, mci: u64) -> Result<Option<Hash>> {
        if let Some(hash) = self.main_chain.get(&mci) {
            return Ok(Some(*hash));
        }
        match self.base.mc_unit_at(mci)? {
            Some(hash) => confirm_mc(self, hash, mci),
            None => Ok(None),
        }
    }
}
