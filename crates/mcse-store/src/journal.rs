//! Durable store backed by an append-only JSON-lines journal.
//!
//! Each committed transaction is one line, written and synced before the
//! commit returns. Opening a journal replays every line into memory; a torn
//! final line from a crash mid-write is truncated away.

use crate::error::{Result, StoreError};
use crate::memory::{FaultInjector, MemoryUnitStore};
use crate::state::{StoreState, UndoLog};
use crate::store::{StoreStats, UnitStore};
use crate::txn::{CommitReceipt, Mutation, Txn};
use mcse_core::{Hash, PayoutRecord, Unit, UnitProps};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};

#[derive(Serialize, Deserialize)]
struct JournalEntry {
    txn: u64,
    mutations: Vec<Mutation>,
}

/// A [`UnitStore`] that survives restarts.
pub struct JournalUnitStore {
    path: PathBuf,
    inner: MemoryUnitStore,
    file: Mutex<File>,
    poisoned: AtomicBool,
}

impl JournalUnitStore {
    /// Open or create the journal at `path` and replay it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;

        let (state, last_txn, entries) = Self::replay(&mut file, &path)?;
        info!(path = %path.display(), entries, units = state.units.len(), "journal.open");

        Ok(JournalUnitStore {
            path,
            inner: MemoryUnitStore::from_state(state, last_txn + 1),
            file: Mutex::new(file),
            poisoned: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn faults(&self) -> &FaultInjector {
        self.inner.faults()
    }

    fn replay(file: &mut File, path: &Path) -> Result<(StoreState, u64, usize)> {
        file.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(&*file);
        let mut state = StoreState::default();
        let mut last_txn = 0;
        let mut entries = 0;
        let mut offset: u64 = 0;
        let mut torn_at = None;
        let mut line = String::new();

        loop {
            line.clear();
            let read = reader.read_line(&mut line)?;
            if read == 0 {
                break;
            }

            let complete = line.ends_with('\n');
            match serde_json::from_str::<JournalEntry>(line.trim_end()) {
                Ok(entry) if complete => {
                    let mut undo = UndoLog::default();
                    for mutation in &entry.mutations {
                        state.apply(mutation, &mut undo)?;
                    }
                    last_txn = last_txn.max(entry.txn);
                    entries += 1;
                }
                Ok(_) | Err(_) => {
                    let mut rest = String::new();
                    reader.read_line(&mut rest)?;
                    if !rest.is_empty() {
                        return Err(StoreError::SchemaViolation(format!(
                            "corrupt journal entry at byte {} of {}",
                            offset,
                            path.display()
                        )));
                    }
                    torn_at = Some(offset);
                    break;
                }
            }
            offset += read as u64;
        }

        drop(reader);
        if let Some(offset) = torn_at {
            warn!(path = %path.display(), offset, "journal.truncate_torn_tail");
            file.set_len(offset)?;
            file.sync_all()?;
        }
        file.seek(SeekFrom::End(0))?;

        Ok((state, last_txn, entries))
    }

    fn append_entry(&self, txn: u64, mutations: &[Mutation]) -> Result<()> {
        let entry = JournalEntry {
            txn,
            mutations: mutations.to_vec(),
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let mut file = self.file.lock();
        let written = file
            .write_all(line.as_bytes())
            .and_then(|()| file.sync_data());
        if let Err(err) = written {
            self.poisoned.store(true, Ordering::SeqCst);
            error!(txn, error = %err, path = %self.path.display(), "journal.write_failed");
            return Err(err.into());
        }
        Ok(())
    }
}

impl UnitStore for JournalUnitStore {
    fn begin(&self) -> Txn {
        self.inner.begin()
    }

    fn commit(&self, txn: Txn) -> Result<CommitReceipt> {
        if self.poisoned.load(Ordering::SeqCst) {
            return Err(StoreError::Poisoned);
        }
        self.inner
            .commit_with(txn, |id, mutations| self.append_entry(id, mutations))
    }

    fn rollback(&self, txn: Txn) {
        self.inner.rollback(txn)
    }

    fn read_unit(&self, hash: &Hash) -> Result<Option<Unit>> {
        self.inner.read_unit(hash)
    }

    fn read_props(&self, hash: &Hash) -> Result<Option<UnitProps>> {
        self.inner.read_props(hash)
    }

    fn read_children(&self, hash: &Hash) -> Result<Vec<Hash>> {
        self.inner.read_children(hash)
    }

    fn contains(&self, hash: &Hash) -> Result<bool> {
        self.inner.contains(hash)
    }

    fn stable_frontier(&self) -> Result<Option<u64>> {
        self.inner.stable_frontier()
    }

    fn units_at_mci(&self, mci: u64) -> Result<Vec<Hash>> {
        self.inner.units_at_mci(mci)
    }

    fn mc_unit_at(&self, mci: u64) -> Result<Option<Hash>> {
        self.inner.mc_unit_at(mci)
    }

    fn unstable_units(&self) -> Result<Vec<UnitProps>> {
        self.inner.unstable_units()
    }

    fn free_units(&self) -> Result<Vec<Hash>> {
        self.inner.free_units()
    }

    fn payout_record(&self, mci: u64) -> Result<Option<PayoutRecord>> {
        self.inner.payout_record(mci)
    }

    fn len(&self) -> Result<usize> {
        self.inner.len()
    }

    fn stats(&self) -> StoreStats {
        self.inner.stats()
    }
}
