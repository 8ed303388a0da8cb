//! Stability decisions.
//!
//! An MCI `m` is stable once no alternative branch diverging just below it
//! can still outgrow the main chain: the smallest witnessed level among the
//! later main chain units that make up a witness majority must exceed the
//! highest level among the relevant alternative best children.

use mcse_core::{Hash, PayoutRecord, ProtocolEra, SequenceState, UnitProps, WitnessSet};
use mcse_graph::{
    collect_best_children, ChangeSet, GraphError, MainChainSelector, Meter, Overlay, UnitSource,
};
use std::collections::{BTreeMap, HashSet, VecDeque};
use tracing::debug;

type Result<T> = std::result::Result<T, GraphError>;

/// Why an MCI is or is not stable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StabilityVerdict {
    pub mci: u64,
    pub era: ProtocolEra,

    /// Main chain unit at `mci`.
    pub candidate: Hash,

    /// `None` when the later main chain does not yet carry a witness majority.
    pub min_mc_witnessed_level: Option<u64>,

    pub max_alt_level: u64,

    /// Alternative best children that bounded `max_alt_level`.
    pub alt_candidates: usize,

    pub stable: bool,
}

impl StabilityVerdict {
    /// The stability rule itself.
    pub fn decide(min_mc_witnessed_level: u64, max_alt_level: u64) -> bool {
        min_mc_witnessed_level > max_alt_level
    }
}

/// Units that became stable at one MCI.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StabilizedMci {
    pub mci: u64,
    pub mc_unit: Hash,
    pub units: Vec<Hash>,
    pub payout: PayoutRecord,
}

/// A planned, not yet committed, advance of the stable frontier.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StabilityAdvance {
    /// Frontier before the advance.
    pub from: u64,

    /// Frontier after the advance; equal to `from` when nothing qualified.
    pub to: u64,

    pub stabilized: Vec<StabilizedMci>,

    /// Property updates flipping `is_stable`.
    pub updates: Vec<UnitProps>,
}

impl StabilityAdvance {
    pub fn is_empty(&self) -> bool {
        self.stabilized.is_empty()
    }

    pub fn mcis(&self) -> impl Iterator<Item = u64> + '_ {
        self.stabilized.iter().map(|s| s.mci)
    }

    /// Stage the advance as a single change set.
    pub fn to_change_set(&self) -> ChangeSet {
        let mut changes = ChangeSet::new();
        changes.apply_updates(self.updates.iter().cloned());
        for stabilized in &self.stabilized {
            changes.mark_stabilized(stabilized.mci, stabilized.units.clone());
            changes.record_payout(stabilized.payout.clone());
        }
        if !self.is_empty() {
            changes.set_stable_frontier(self.to);
        }
        changes
    }
}

#[derive(Clone, Debug)]
pub struct StabilityEngine {
    witnesses: WitnessSet,
    upgrade_mci: u64,
}

impl StabilityEngine {
    pub fn new(witnesses: WitnessSet, upgrade_mci: u64) -> Self {
        StabilityEngine {
            witnesses,
            upgrade_mci,
        }
    }

    /// Evaluate the MCI `mci`. `None` if no main chain unit sits there yet.
    pub fn evaluate<U: UnitSource + ?Sized>(
        &self,
        source: &U,
        mci: u64,
        meter: &mut Meter<'_>,
    ) -> Result<Option<StabilityVerdict>> {
        let candidate = match source.mc_unit_at(mci)? {
            Some(hash) => source.require(&hash)?,
            None => return Ok(None),
        };
        let era = ProtocolEra::for_mci(mci, self.upgrade_mci);
        let min_mc_witnessed_level = self.min_mc_witnessed_level(source, &candidate, meter)?;

        let (max_alt_level, alt_candidates) = match candidate.best_parent {
            Some(best_parent) => {
                let alts = self.alt_candidates(source, &candidate, best_parent, era, meter)?;
                let max = alts.iter().map(|p| p.level).max().unwrap_or(candidate.level);
                (max, alts.len())
            }
            None => (candidate.level, 0),
        };

        let stable = min_mc_witnessed_level
            .map_or(false, |min| StabilityVerdict::decide(min, max_alt_level));

        Ok(Some(StabilityVerdict {
            mci,
            era,
            candidate: candidate.unit,
            min_mc_witnessed_level,
            max_alt_level,
            alt_candidates,
            stable,
        }))
    }

    /// Walk from the tip down the main chain over units above the
    /// candidate, collecting witness authors. Returns the smallest
    /// witnessed level among units that added a new witness, once a
    /// majority is collected.
    fn min_mc_witnessed_level<U: UnitSource + ?Sized>(
        &self,
        source: &U,
        candidate: &UnitProps,
        meter: &mut Meter<'_>,
    ) -> Result<Option<u64>> {
        let free = source
            .free_units()?
            .iter()
            .map(|h| source.require(h))
            .collect::<Result<Vec<_>>>()?;
        let mut cursor = match MainChainSelector::best_parent(&free) {
            Some(tip) => tip.clone(),
            None => return Ok(None),
        };

        let majority = self.witnesses.majority();
        let mut collected = HashSet::new();
        let mut min_level: Option<u64> = None;

        loop {
            meter.tick()?;
            if cursor.level <= candidate.level {
                return Ok(None);
            }
            let before = collected.len();
            collected.extend(self.witnesses.filter(&cursor.authors).cloned());
            if collected.len() > before {
                min_level = Some(min_level.map_or(cursor.witnessed_level, |m| {
                    m.min(cursor.witnessed_level)
                }));
            }
            if collected.len() >= majority {
                return Ok(min_level);
            }
            cursor = match cursor.best_parent {
                Some(parent) => source.require(&parent)?,
                None => return Ok(None),
            };
        }
    }

    /// Alternative best children of the branches that diverge at the
    /// candidate's best parent, filtered by the era's rules.
    fn alt_candidates<U: UnitSource + ?Sized>(
        &self,
        source: &U,
        candidate: &UnitProps,
        best_parent: Hash,
        era: ProtocolEra,
        meter: &mut Meter<'_>,
    ) -> Result<Vec<UnitProps>> {
        let mut roots = Vec::new();
        for child in source.children(&best_parent)? {
            if child == candidate.unit {
                continue;
            }
            let props = source.require(&child)?;
            if props.best_parent == Some(best_parent) && !props.is_on_main_chain {
                roots.push(child);
            }
        }
        if roots.is_empty() {
            return Ok(Vec::new());
        }

        let mut alts = Vec::new();
        for props in collect_best_children(source, &roots, meter)? {
            if era.excludes_conflicting_units() && props.sequence == SequenceState::FinalBad {
                continue;
            }
            if era.counts_only_witnessed_level_increases() {
                let raises = match props.best_parent {
                    Some(parent) => props.witnessed_level > source.require(&parent)?.witnessed_level,
                    None => false,
                };
                if !raises {
                    continue;
                }
            }
            alts.push(props);
        }
        Ok(alts)
    }

    /// Plan the advance of as many consecutive MCIs above the current
    /// frontier as the evidence supports.
    ///
    /// A traversal cutoff after at least one MCI was proven stable ends the
    /// plan at that prefix. The remaining MCIs wait for the next pass.
    pub fn plan_advance<U: UnitSource + ?Sized>(
        &self,
        source: &U,
        meter: &mut Meter<'_>,
    ) -> Result<StabilityAdvance> {
        let from = source.last_stable_mci();
        let mut overlay = Overlay::new(source);
        let mut stabilized = Vec::new();
        let mut next = from + 1;

        loop {
            match self.try_stabilize(&mut overlay, next, meter) {
                Ok(Some(done)) => stabilized.push(done),
                Ok(None) => break,
                Err(err) if err.is_traversal_cutoff() && !stabilized.is_empty() => {
                    debug!(mci = next, error = %err, "stability.cutoff_after_prefix");
                    break;
                }
                Err(err) => return Err(err),
            }
            next += 1;
        }

        let to = stabilized.last().map_or(from, |s: &StabilizedMci| s.mci);
        Ok(StabilityAdvance {
            from,
            to,
            stabilized,
            updates: overlay.into_updates(),
        })
    }

    /// Evaluate `mci` and stabilize it if it qualifies. `None` when it does not.
    fn try_stabilize<U: UnitSource + ?Sized>(
        &self,
        overlay: &mut Overlay<'_, U>,
        mci: u64,
        meter: &mut Meter<'_>,
    ) -> Result<Option<StabilizedMci>> {
        let verdict = match self.evaluate(&*overlay, mci, meter)? {
            Some(verdict) => verdict,
            None => return Ok(None),
        };
        debug!(
            mci,
            min_mc_wl = ?verdict.min_mc_witnessed_level,
            max_alt_level = verdict.max_alt_level,
            stable = verdict.stable,
            "stability.evaluate"
        );
        if !verdict.stable {
            return Ok(None);
        }
        self.stabilize(overlay, mci, verdict.candidate, meter).map(Some)
    }

    /// Flip every unit carrying `mci` to stable and build its payout record.
    ///
    /// Units at one MCI are the main chain unit plus the ancestors it
    /// newly included, all reachable through parents that share the MCI.
    fn stabilize<U: UnitSource + ?Sized>(
        &self,
        overlay: &mut Overlay<'_, U>,
        mci: u64,
        mc_unit: Hash,
        meter: &mut Meter<'_>,
    ) -> Result<StabilizedMci> {
        let mut units = Vec::new();
        let mut witness_units: BTreeMap<_, u32> = BTreeMap::new();
        let mut flips = Vec::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([mc_unit]);
        visited.insert(mc_unit);

        while let Some(hash) = queue.pop_front() {
            meter.tick()?;
            let mut props = overlay.require(&hash)?;
            if props.main_chain_index != Some(mci) {
                continue;
            }
            for parent in &props.parents {
                if visited.insert(*parent) {
                    queue.push_back(*parent);
                }
            }
            for witness in self.witnesses.filter(&props.authors) {
                *witness_units.entry(witness.clone()).or_default() += 1;
            }
            units.push(hash);
            if !props.is_stable {
                props.is_stable = true;
                flips.push(props);
            }
        }

        // Nothing is staged unless the whole MCI was walked.
        for props in flips {
            overlay.set(props);
        }
        units.sort();
        Ok(StabilizedMci {
            mci,
            mc_unit,
            units: units.clone(),
            payout: PayoutRecord {
                mci,
                mc_unit,
                units,
                witness_units,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decide_is_strict() {
        assert!(StabilityVerdict::decide(26, 25));
        assert!(!StabilityVerdict::decide(25, 25));
        assert!(!StabilityVerdict::decide(24, 25));
    }

    #[test]
    fn test_empty_advance_stages_nothing() {
        let advance = StabilityAdvance {
            from: 4,
            to: 4,
            ..StabilityAdvance::default()
        };
        assert!(advance.is_empty());
        assert!(advance.to_change_set().is_empty());
    }
}
