//! Bounded, iterative DAG walks.
//!
//! None of these walks recurse. Each keeps an explicit work queue and a
//! visited set and ticks a [`Meter`] per unit, so a crafted deep chain
//! yields a [`TraversalError`](crate::TraversalError) instead of
//! exhausting the stack or monopolising the writer.

use crate::budget::Meter;
use crate::error::Result;
use crate::view::UnitSource;
use mcse_core::{Hash, ProtocolEra, UnitProps};
use std::collections::{HashSet, VecDeque};

/// Whether `target` is an ancestor of, or equal to, any unit in `later`.
///
/// Walks parent edges upward from `later`, pruning branches that provably
/// cannot reach `target`:
/// - parents whose level is not above the target's
/// - stable parents sealed at an MCI below the target's, or any stable
///   parent when the target itself is unstable
/// - parents whose MCI is at or below the target's latest included MCI
/// - in the current era, parents whose witnessed level is below the target's
///
/// `upgrade_mci` selects the era from the target's own MCI (or its latest
/// included MCI while it has none).
pub fn is_included_or_equal<U: UnitSource + ?Sized>(
    source: &U,
    target: &Hash,
    later: &[Hash],
    upgrade_mci: u64,
    meter: &mut Meter<'_>,
) -> Result<bool> {
    if later.contains(target) {
        return Ok(true);
    }
    let target_props = source.require(target)?;
    let era_key = target_props
        .main_chain_index
        .or(target_props.latest_included_mc_index)
        .unwrap_or(0);
    let era = ProtocolEra::for_mci(era_key, upgrade_mci);
    let stable_mci = target_props
        .main_chain_index
        .filter(|_| target_props.is_stable);

    let mut queue: VecDeque<Hash> = VecDeque::new();
    let mut visited: HashSet<Hash> = HashSet::new();
    for hash in later {
        if visited.insert(*hash) {
            queue.push_back(*hash);
        }
    }

    while let Some(hash) = queue.pop_front() {
        meter.tick()?;
        let current = source.require(&hash)?;

        if let Some(tm) = stable_mci {
            let on_mc_above = current.is_on_main_chain
                && current.main_chain_index.map_or(false, |m| m >= tm);
            let includes_mc_above = current.latest_included_mc_index.map_or(false, |l| l >= tm);
            if on_mc_above || includes_mc_above {
                return Ok(true);
            }
        }

        for parent in &current.parents {
            if *parent == *target {
                return Ok(true);
            }
            if visited.contains(parent) {
                continue;
            }
            let props = source.require(parent)?;
            if prunes(&props, &target_props, stable_mci, era) {
                visited.insert(*parent);
                continue;
            }
            visited.insert(*parent);
            queue.push_back(*parent);
        }
    }
    Ok(false)
}

fn prunes(
    candidate: &UnitProps,
    target: &UnitProps,
    target_stable_mci: Option<u64>,
    era: ProtocolEra,
) -> bool {
    if candidate.level <= target.level {
        return true;
    }
    if candidate.is_stable {
        match (candidate.main_chain_index, target_stable_mci) {
            (_, None) => return true,
            (Some(c), Some(tm)) if c < tm => return true,
            _ => {}
        }
    }
    if let (Some(c), Some(limci)) = (candidate.main_chain_index, target.latest_included_mc_index) {
        if c <= limci {
            return true;
        }
    }
    era.enforces_witnessed_level_non_retreat() && candidate.witnessed_level < target.witnessed_level
}

/// Every unit reachable from `roots` through best-child edges, roots
/// included, in breadth-first order.
///
/// A best child of `x` is a child whose best parent is `x`.
pub fn collect_best_children<U: UnitSource + ?Sized>(
    source: &U,
    roots: &[Hash],
    meter: &mut Meter<'_>,
) -> Result<Vec<UnitProps>> {
    let mut collected = Vec::new();
    let mut visited: HashSet<Hash> = HashSet::new();
    let mut queue: VecDeque<Hash> = VecDeque::new();

    for root in roots {
        if visited.insert(*root) {
            queue.push_back(*root);
        }
    }

    while let Some(hash) = queue.pop_front() {
        meter.tick()?;
        let props = source.require(&hash)?;
        for child in source.children(&hash)? {
            if visited.contains(&child) {
                continue;
            }
            let child_props = source.require(&child)?;
            if child_props.best_parent == Some(hash) {
                visited.insert(child);
                queue.push_back(child);
            }
        }
        collected.push(props);
    }
    Ok(collected)
}

/// `hash` and every unit descending from it, in breadth-first order.
pub fn descendants_of<U: UnitSource + ?Sized>(
    source: &U,
    hash: &Hash,
    meter: &mut Meter<'_>,
) -> Result<Vec<UnitProps>> {
    let mut collected = Vec::new();
    let mut visited: HashSet<Hash> = HashSet::new();
    let mut queue: VecDeque<Hash> = VecDeque::new();
    visited.insert(*hash);
    queue.push_back(*hash);

    while let Some(current) = queue.pop_front() {
        meter.tick()?;
        collected.push(source.require(&current)?);
        for child in source.children(&current)? {
            if visited.insert(child) {
                queue.push_back(child);
            }
        }
    }
    Ok(collected)
}
