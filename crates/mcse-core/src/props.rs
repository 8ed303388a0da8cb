//! Derived, stability-relevant properties of a unit.

use crate::hash::Hash;
use crate::witness::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Serial status assigned by the validation collaborator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SequenceState {
    /// No conflicting unit from the same author.
    #[default]
    Good,

    /// Conflicts with another unit; outcome still pending.
    TempBad,

    /// Conflict resolved against this unit by the stable chain.
    FinalBad,
}

impl SequenceState {
    pub fn is_serial(&self) -> bool {
        matches!(self, SequenceState::Good)
    }
}

/// A lightweight projection of a unit's stability-relevant fields.
///
/// This is what the graph mirror holds for unstable units and what the
/// store persists next to the unit content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitProps {
    pub unit: Hash,
    pub parents: Vec<Hash>,
    pub authors: Vec<Address>,
    pub best_parent: Option<Hash>,
    pub level: u64,
    pub witnessed_level: u64,
    pub latest_included_mc_index: Option<u64>,
    pub main_chain_index: Option<u64>,
    pub is_on_main_chain: bool,
    pub is_stable: bool,
    /// No recorded children yet.
    pub is_free: bool,
    pub sequence: SequenceState,
}

impl UnitProps {
    /// Properties of the genesis unit: level 0, on the main chain at MCI 0, stable.
    pub fn genesis(unit: Hash, authors: Vec<Address>) -> Self {
        UnitProps {
            unit,
            parents: Vec::new(),
            authors,
            best_parent: None,
            level: 0,
            witnessed_level: 0,
            latest_included_mc_index: None,
            main_chain_index: Some(crate::GENESIS_MCI),
            is_on_main_chain: true,
            is_stable: true,
            is_free: true,
            sequence: SequenceState::Good,
        }
    }

    pub fn is_genesis(&self) -> bool {
        self.parents.is_empty()
    }

    /// The MCI this unit contributes to a child's latest included MC index:
    /// its own index when on the main chain, otherwise its own latest
    /// included index.
    pub fn included_mc_index(&self) -> Option<u64> {
        if self.is_on_main_chain {
            self.main_chain_index
        } else {
            self.latest_included_mc_index
        }
    }
}

/// Witness payment bookkeeping written when an MCI becomes stable.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutRecord {
    pub mci: u64,

    /// The main-chain unit at this MCI.
    pub mc_unit: Hash,

    /// Every unit stabilised at this MCI, in hash order.
    pub units: Vec<Hash>,

    /// Units authored by each witness among `units`.
    pub witness_units: BTreeMap<crate::Address, u32>,
}

impl PayoutRecord {
    /// Total number of witness authorships counted in this record.
    pub fn total_witness_units(&self) -> u32 {
        self.witness_units.values().sum()
    }
}
