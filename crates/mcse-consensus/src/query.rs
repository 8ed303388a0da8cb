//! Stability queries for payout and other consumers.
//!
//! Everything reported stable here has been durably committed, so an
//! answer of `true` is never retracted.

use crate::coordinator::GraphReader;
use mcse_core::{Hash, PayoutRecord};
use mcse_store::{Result, UnitStore};

pub struct LedgerReader<S: UnitStore + ?Sized> {
    reader: GraphReader<S>,
}

impl<S: UnitStore + ?Sized> Clone for LedgerReader<S> {
    fn clone(&self) -> Self {
        LedgerReader {
            reader: self.reader.clone(),
        }
    }
}

impl<S: UnitStore + ?Sized> LedgerReader<S> {
    pub fn new(reader: GraphReader<S>) -> Self {
        LedgerReader { reader }
    }

    pub fn is_stable(&self, hash: &Hash) -> Result<bool> {
        Ok(self.stable_mci_of(hash)?.is_some())
    }

    /// MCI at which `hash` became stable.
    pub fn stable_mci_of(&self, hash: &Hash) -> Result<Option<u64>> {
        {
            let index = self.reader.index();
            if let Some(mci) = index.stable_mci_of(hash) {
                return Ok(Some(mci));
            }
            if index.is_unstable(hash) {
                return Ok(None);
            }
        }
        Ok(self
            .reader
            .store()
            .read_props(hash)?
            .filter(|p| p.is_stable)
            .and_then(|p| p.main_chain_index))
    }

    /// Units that became stable at `mci`, in hash order. Empty above the
    /// stable frontier.
    pub fn units_at_stable_mci(&self, mci: u64) -> Result<Vec<Hash>> {
        {
            let index = self.reader.index();
            if mci > index.last_stable_mci() {
                return Ok(Vec::new());
            }
            if let Some(units) = index.units_at_stable_mci(mci) {
                return Ok(units.to_vec());
            }
        }
        self.reader.store().units_at_mci(mci)
    }

    pub fn stable_frontier(&self) -> u64 {
        self.reader.index().last_stable_mci()
    }

    pub fn payout_record(&self, mci: u64) -> Result<Option<PayoutRecord>> {
        self.reader.store().payout_record(mci)
    }
}
