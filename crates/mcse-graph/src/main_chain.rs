//! Main chain selection.
//!
//! Level, best parent and witnessed level are pure functions of a unit's
//! parents and their best-parent chains. The main chain is the best-parent
//! chain of the best free unit; units on it receive sequential main chain
//! indices and every ancestor they newly include shares their index.

use crate::budget::Meter;
use crate::error::{GraphError, Result};
use crate::view::{Overlay, UnitSource};
use mcse_core::{Address, Hash, SequenceState, Unit, UnitProps, WitnessSet};
use std::cmp::Ordering;
use std::collections::{HashSet, VecDeque};
use tracing::debug;

/// Outcome of re-planning the main chain.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MainChainUpdate {
    pub tip: Option<Hash>,

    /// Highest MCI shared by the old and the new main chain.
    pub intersection_mci: u64,

    /// Units whose main chain index was withdrawn.
    pub demoted: usize,

    /// Newly placed main chain units, lowest MCI first.
    pub assigned: Vec<(u64, Hash)>,

    /// Highest assigned MCI after the update.
    pub last_mci: u64,
}

impl MainChainUpdate {
    pub fn is_reorg(&self) -> bool {
        self.demoted > 0
    }
}

#[derive(Clone, Debug)]
pub struct MainChainSelector {
    witnesses: WitnessSet,
    upgrade_mci: u64,
}

impl MainChainSelector {
    pub fn new(witnesses: WitnessSet, upgrade_mci: u64) -> Self {
        MainChainSelector {
            witnesses,
            upgrade_mci,
        }
    }

    pub fn witnesses(&self) -> &WitnessSet {
        &self.witnesses
    }

    pub fn upgrade_mci(&self) -> u64 {
        self.upgrade_mci
    }

    /// Total order used for best parents and tips: higher witnessed level,
    /// then higher level, then the smaller hash. `Greater` means better.
    pub fn compare(a: &UnitProps, b: &UnitProps) -> Ordering {
        a.witnessed_level
            .cmp(&b.witnessed_level)
            .then(a.level.cmp(&b.level))
            .then(b.unit.cmp(&a.unit))
    }

    pub fn best_parent<'p>(parents: &'p [UnitProps]) -> Option<&'p UnitProps> {
        parents.iter().max_by(|a, b| Self::compare(a, b))
    }

    pub fn level(parents: &[UnitProps]) -> u64 {
        parents.iter().map(|p| p.level + 1).max().unwrap_or(0)
    }

    pub fn latest_included_mc_index(parents: &[UnitProps]) -> Option<u64> {
        parents.iter().filter_map(|p| p.included_mc_index()).max()
    }

    /// Level at which the walk down the best-parent chain, starting with
    /// `authors` at `level`, first collects a majority of witnesses.
    /// Zero when the walk reaches genesis short of a majority.
    pub fn witnessed_level<U: UnitSource + ?Sized>(
        &self,
        source: &U,
        authors: &[Address],
        level: u64,
        best_parent: Option<Hash>,
        meter: &mut Meter<'_>,
    ) -> Result<u64> {
        let majority = self.witnesses.majority();
        let mut collected: HashSet<Address> = self.witnesses.filter(authors).cloned().collect();
        if collected.len() >= majority {
            return Ok(level);
        }

        let mut next = best_parent;
        while let Some(hash) = next {
            meter.tick()?;
            let props = source.require(&hash)?;
            collected.extend(self.witnesses.filter(&props.authors).cloned());
            if collected.len() >= majority {
                return Ok(props.level);
            }
            next = props.best_parent;
        }
        Ok(0)
    }

    /// Derive the stability-relevant properties of a new unit from its
    /// parents. The unit starts free, unstable and off the main chain.
    pub fn derive_props<U: UnitSource + ?Sized>(
        &self,
        source: &U,
        unit: &Unit,
        sequence: SequenceState,
        meter: &mut Meter<'_>,
    ) -> Result<UnitProps> {
        let parents = unit
            .parents
            .iter()
            .map(|p| source.require(p))
            .collect::<Result<Vec<_>>>()?;
        let best = Self::best_parent(&parents).ok_or_else(|| {
            GraphError::Inconsistent(format!("unit {} has no parents", unit.hash.short()))
        })?;
        let level = Self::level(&parents);
        let witnessed_level =
            self.witnessed_level(source, &unit.authors, level, Some(best.unit), meter)?;

        Ok(UnitProps {
            unit: unit.hash,
            parents: unit.parents.clone(),
            authors: unit.authors.clone(),
            best_parent: Some(best.unit),
            level,
            witnessed_level,
            latest_included_mc_index: Self::latest_included_mc_index(&parents),
            main_chain_index: None,
            is_on_main_chain: false,
            is_stable: false,
            is_free: true,
            sequence,
        })
    }

    /// The best free unit.
    pub fn select_tip<U: UnitSource + ?Sized>(&self, source: &U) -> Result<Option<Hash>> {
        let free = source
            .free_units()?
            .iter()
            .map(|h| source.require(h))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::best_parent(&free).map(|p| p.unit))
    }

    /// Re-plan the main chain from the current tip, writing every change
    /// into `overlay`.
    ///
    /// Main chain units above the intersection with the new chain are
    /// demoted and renumbered. Fails with
    /// [`GraphError::Inconsistent`] if that would touch a stable MCI.
    pub fn update_main_chain<U: UnitSource + ?Sized>(
        &self,
        overlay: &mut Overlay<'_, U>,
        meter: &mut Meter<'_>,
    ) -> Result<MainChainUpdate> {
        let tip = match self.select_tip(overlay)? {
            Some(tip) => tip,
            None => return Ok(MainChainUpdate::default()),
        };

        let mut chain = Vec::new();
        let mut cursor = overlay.require(&tip)?;
        while !cursor.is_on_main_chain {
            meter.tick()?;
            let best_parent = cursor.best_parent.ok_or_else(|| {
                GraphError::Inconsistent(format!(
                    "unit {} is off the main chain without a best parent",
                    cursor.unit.short()
                ))
            })?;
            chain.push(cursor.unit);
            cursor = overlay.require(&best_parent)?;
        }
        let base = cursor.main_chain_index.ok_or_else(|| {
            GraphError::Inconsistent(format!(
                "main chain unit {} has no index",
                cursor.unit.short()
            ))
        })?;

        let mut update = MainChainUpdate {
            tip: Some(tip),
            intersection_mci: base,
            last_mci: base,
            ..MainChainUpdate::default()
        };
        let stale_above = overlay.mc_unit_at(base + 1)?.is_some();
        if chain.is_empty() && !stale_above {
            return Ok(update);
        }

        if stale_above {
            let last_stable = overlay.last_stable_mci();
            if base < last_stable {
                return Err(GraphError::Inconsistent(format!(
                    "main chain would reorganise at MCI {} below stable MCI {}",
                    base + 1,
                    last_stable
                )));
            }
            for mut props in overlay.hot_units()? {
                meter.tick()?;
                if props.is_stable || props.main_chain_index.map_or(true, |m| m <= base) {
                    continue;
                }
                props.main_chain_index = None;
                props.is_on_main_chain = false;
                overlay.set(props);
                update.demoted += 1;
            }
        }

        let mut mci = base;
        for hash in chain.into_iter().rev() {
            mci += 1;
            let mut props = overlay.require(&hash)?;
            props.main_chain_index = Some(mci);
            props.is_on_main_chain = true;
            let mut queue: VecDeque<Hash> = props.parents.iter().copied().collect();
            overlay.set(props);
            update.assigned.push((mci, hash));

            while let Some(ancestor) = queue.pop_front() {
                meter.tick()?;
                let mut props = overlay.require(&ancestor)?;
                if props.main_chain_index.is_some() {
                    continue;
                }
                props.main_chain_index = Some(mci);
                queue.extend(props.parents.iter().copied());
                overlay.set(props);
            }
        }
        update.last_mci = mci;

        self.refresh_latest_included(overlay, meter)?;

        debug!(
            tip = %tip,
            intersection = base,
            demoted = update.demoted,
            last_mci = mci,
            "main_chain.update"
        );
        Ok(update)
    }

    /// Recompute `latest_included_mc_index` of every unstable unit, parents
    /// before children.
    fn refresh_latest_included<U: UnitSource + ?Sized>(
        &self,
        overlay: &mut Overlay<'_, U>,
        meter: &mut Meter<'_>,
    ) -> Result<()> {
        let mut hot: Vec<UnitProps> = overlay
            .hot_units()?
            .into_iter()
            .filter(|p| !p.is_stable)
            .collect();
        hot.sort_by(|a, b| a.level.cmp(&b.level).then(a.unit.cmp(&b.unit)));

        for unit in hot {
            meter.tick()?;
            let mut props = overlay.require(&unit.unit)?;
            let parents = props
                .parents
                .iter()
                .map(|p| overlay.require(p))
                .collect::<Result<Vec<_>>>()?;
            let latest = Self::latest_included_mc_index(&parents);
            if props.latest_included_mc_index != latest {
                props.latest_included_mc_index = latest;
                overlay.set(props);
            }
        }
        Ok(())
    }
}
