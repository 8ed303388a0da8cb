//! Protocol eras for stability rules.
//!
//! The stability rules changed at a protocol upgrade point. The era is a
//! pure function of the main-chain index being evaluated, so every node
//! reaches the same verdict for the same historical point regardless of
//! how far its own replay has progressed.

use serde::{Deserialize, Serialize};

/// Rule set used when evaluating a given main-chain index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolEra {
    /// Before the upgrade: every alternative best child bounds stability.
    Legacy,

    /// From the upgrade on: only alternative best children that raise the
    /// witnessed level bound stability, conflicting units are excluded and
    /// witnessed levels must not retreat.
    Current,
}

impl ProtocolEra {
    /// Era for the unit or MCI at `mci`, given the MCI where the upgrade starts.
    pub fn for_mci(mci: u64, upgrade_mci: u64) -> Self {
        if mci < upgrade_mci {
            ProtocolEra::Legacy
        } else {
            ProtocolEra::Current
        }
    }

    /// Alternative best children only count when they raise the witnessed level.
    pub fn counts_only_witnessed_level_increases(self) -> bool {
        matches!(self, ProtocolEra::Current)
    }

    /// Alternative best children already resolved as final-bad are excluded.
    pub fn excludes_conflicting_units(self) -> bool {
        matches!(self, ProtocolEra::Current)
    }

    /// A unit's witnessed level must not be below its best parent's, which
    /// also makes witnessed-level pruning of inclusion walks sound.
    pub fn enforces_witnessed_level_non_retreat(self) -> bool {
        matches!(self, ProtocolEra::Current)
    }
}
