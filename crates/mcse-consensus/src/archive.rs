//! Archiving of uncovered units.
//!
//! A unit may be archived when it is not on the main chain, is not serial,
//! and no main chain unit descends from it. The unit and all its
//! descendants are removed leaves first, a bounded batch per step, each
//! step one atomic commit.

use crate::engine::Engine;
use crate::error::ArchiveError;
use mcse_core::{Hash, SequenceState, UnitProps};
use mcse_graph::{descendants_of, ChangeSet, Meter, Overlay, StagedView, UnitSource};
use mcse_store::UnitStore;
use std::collections::HashSet;
use std::time::Instant;
use tracing::info;

type Result<T> = std::result::Result<T, ArchiveError>;

/// Outcome of one archive step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveStep {
    pub root: Hash,
    pub removed: Vec<Hash>,

    /// Units still to remove under `root`.
    pub remaining: usize,

    /// Whether `root` itself is gone.
    pub done: bool,
}

/// Check archiving rules, returning the unit and all its descendants.
pub(crate) fn archivable<U: UnitSource + ?Sized>(
    source: &U,
    hash: &Hash,
    meter: &mut Meter<'_>,
) -> Result<Vec<UnitProps>> {
    let props = source
        .props(hash)?
        .ok_or(ArchiveError::UnknownUnit(*hash))?;
    if props.is_on_main_chain {
        return Err(ArchiveError::OnMainChain(*hash));
    }
    if props.sequence == SequenceState::Good {
        return Err(ArchiveError::SerialUnit(*hash));
    }

    let descendants = descendants_of(source, hash, meter)?;
    if let Some(cover) = descendants.iter().find(|d| d.is_on_main_chain) {
        return Err(ArchiveError::CoveredByMainChain {
            unit: *hash,
            by: cover.unit,
        });
    }
    if let Some(mci) = props.main_chain_index {
        let by = source.mc_unit_at(mci)?.unwrap_or(*hash);
        return Err(ArchiveError::CoveredByMainChain { unit: *hash, by });
    }
    Ok(descendants)
}

impl<S: UnitStore + ?Sized> Engine<S> {
    /// Remove up to `max_units` of `hash` and its descendants, leaves first.
    pub fn archive_step(
        &mut self,
        hash: &Hash,
        max_units: usize,
        deadline: Option<Instant>,
    ) -> Result<ArchiveStep> {
        let budget = self.budget(deadline);
        let mut meter = budget.meter();
        let reader = self.coordinator.reader();

        let (changes, removed, remaining) = {
            let index = reader.index();
            let view = StagedView::new(&index, reader.store(), None);
            let mut doomed = archivable(&view, hash, &mut meter)?;
            doomed.sort_by(|a, b| b.level.cmp(&a.level).then(a.unit.cmp(&b.unit)));

            let take = max_units.max(1).min(doomed.len());
            let remaining = doomed.len() - take;
            let batch: Vec<UnitProps> = doomed.into_iter().take(take).collect();
            let removed_set: HashSet<Hash> = batch.iter().map(|p| p.unit).collect();

            let mut changes = ChangeSet::new();
            for props in &batch {
                changes.remove(props.unit);
            }

            let mut checked = HashSet::new();
            for props in &batch {
                for parent in &props.parents {
                    if removed_set.contains(parent) || !checked.insert(*parent) {
                        continue;
                    }
                    let children = view.children(parent)?;
                    if children.iter().all(|c| removed_set.contains(c)) {
                        let mut parent_props = view.require(parent)?;
                        if !parent_props.is_free {
                            parent_props.is_free = true;
                            changes.put(parent_props);
                        }
                    }
                }
            }

            let updates = {
                let staged = StagedView::new(&index, reader.store(), Some(&changes));
                let mut overlay = Overlay::new(&staged);
                self.selector.update_main_chain(&mut overlay, &mut meter)?;
                overlay.into_updates()
            };
            changes.apply_updates(updates);

            (changes, removed_set.into_iter().collect::<Vec<_>>(), remaining)
        };

        self.coordinator.commit(changes, deadline)?;
        let mut removed = removed;
        removed.sort();
        info!(
            root = %hash,
            removed = removed.len(),
            remaining,
            "archive.batch"
        );
        Ok(ArchiveStep {
            root: *hash,
            removed,
            remaining,
            done: remaining == 0,
        })
    }

    /// Remove an uncovered unit and every descendant, one batch of
    /// `archive_batch_size` units per commit.
    pub fn archive_uncovered_unit(
        &mut self,
        hash: &Hash,
        deadline: Option<Instant>,
    ) -> Result<Vec<Hash>> {
        let batch = self.config.archive_batch_size;
        let mut removed = Vec::new();
        loop {
            let step = self.archive_step(hash, batch, deadline)?;
            removed.extend(step.removed);
            if step.done {
                return Ok(removed);
            }
        }
    }
}
