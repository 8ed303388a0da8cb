//! Consumers of stabilized MCIs and the feed that serves them.

use crate::error::{NodeError, Result};
use async_trait::async_trait;
use mcse_consensus::LedgerReader;
use mcse_core::{Address, PayoutRecord};
use mcse_graph::CancelToken;
use mcse_store::UnitStore;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayoutError {
    #[error("Payout for MCI {found} arrived out of order, expected MCI {expected}")]
    OutOfOrder { expected: u64, found: u64 },

    #[error("Payout calculation failed: {0}")]
    Failed(String),
}

/// Receives one [`PayoutRecord`] per stabilized MCI.
///
/// Records are delivered in ascending MCI order, without gaps, and only
/// after the stability advance that produced them has been durably
/// committed. A returned error makes the node offer the same record again
/// after the configured retry delay; later MCIs wait behind it.
#[async_trait]
pub trait PayoutCalculator: Send + Sync + 'static {
    async fn on_stabilized(&self, record: &PayoutRecord) -> std::result::Result<(), PayoutError>;
}

/// A registered calculator and the next MCI owed to it.
struct Subscription {
    calculator: Arc<dyn PayoutCalculator>,
    next_mci: AtomicU64,
}

/// Ordered delivery of stored payout records.
///
/// Writers announce each new stable frontier while they still hold the
/// write lock. A single background task reads the records back from the
/// store and walks every calculator forward from its own cursor, so
/// delivery follows commit order and survives dropped callers.
#[derive(Clone)]
pub(crate) struct PayoutFeed {
    frontier: Arc<watch::Sender<u64>>,
    subscriptions: Arc<RwLock<Vec<Arc<Subscription>>>>,
}

impl PayoutFeed {
    /// Start the dispatcher on the current Tokio runtime. It stops once
    /// every handle to the feed is dropped or `cancel` fires.
    pub(crate) fn spawn(
        ledger: LedgerReader<dyn UnitStore>,
        retry: Duration,
        cancel: CancelToken,
    ) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|err| NodeError::TaskFailed(format!("payout feed needs a Tokio runtime: {}", err)))?;
        let (frontier, updates) = watch::channel(ledger.stable_frontier());
        let subscriptions = Arc::new(RwLock::new(Vec::new()));
        let dispatcher = Dispatcher {
            ledger,
            subscriptions: Arc::clone(&subscriptions),
            retry,
            cancel,
        };
        runtime.spawn(dispatcher.run(updates));
        Ok(PayoutFeed {
            frontier: Arc::new(frontier),
            subscriptions,
        })
    }

    /// Deliver every MCI from `first_mci` on to `calculator`.
    pub(crate) fn subscribe(&self, calculator: Arc<dyn PayoutCalculator>, first_mci: u64) {
        self.subscriptions.write().push(Arc::new(Subscription {
            calculator,
            next_mci: AtomicU64::new(first_mci),
        }));
    }

    /// Record a committed frontier. Never moves backwards.
    pub(crate) fn announce(&self, frontier: u64) {
        self.frontier.send_if_modified(|current| {
            if frontier > *current {
                *current = frontier;
                true
            } else {
                false
            }
        });
    }

    /// Wake the dispatcher without moving the frontier.
    pub(crate) fn wake(&self) {
        self.frontier.send_modify(|_| {});
    }
}

struct Dispatcher {
    ledger: LedgerReader<dyn UnitStore>,
    subscriptions: Arc<RwLock<Vec<Arc<Subscription>>>>,
    retry: Duration,
    cancel: CancelToken,
}

impl Dispatcher {
    async fn run(self, mut updates: watch::Receiver<u64>) {
        loop {
            let target = *updates.borrow_and_update();
            if self.cancel.is_cancelled() {
                break;
            }
            let caught_up = self.deliver_through(target).await;
            let woke = if caught_up {
                updates.changed().await
            } else {
                match tokio::time::timeout(self.retry, updates.changed()).await {
                    Ok(changed) => changed,
                    Err(_) => Ok(()),
                }
            };
            if woke.is_err() {
                break;
            }
        }
        debug!("payout.dispatcher_stopped");
    }

    /// Walk every subscription up to `target`. False if any is still behind.
    async fn deliver_through(&self, target: u64) -> bool {
        let subscriptions: Vec<Arc<Subscription>> = self.subscriptions.read().clone();
        let mut caught_up = true;
        for subscription in subscriptions {
            loop {
                let mci = subscription.next_mci.load(Ordering::Acquire);
                if mci > target || self.cancel.is_cancelled() {
                    break;
                }
                let record = match self.ledger.payout_record(mci) {
                    Ok(Some(record)) => record,
                    Ok(None) => {
                        warn!(mci, "payout.record_missing");
                        caught_up = false;
                        break;
                    }
                    Err(err) => {
                        warn!(mci, error = %err, "payout.read_failed");
                        caught_up = false;
                        break;
                    }
                };
                match subscription.calculator.on_stabilized(&record).await {
                    Ok(()) => subscription.next_mci.store(mci + 1, Ordering::Release),
                    Err(err) => {
                        warn!(mci, error = %err, "payout.notify_failed");
                        caught_up = false;
                        break;
                    }
                }
            }
        }
        caught_up
    }
}

#[derive(Debug, Default)]
struct Tally {
    next_mci: Option<u64>,
    mcis: u64,
    totals: BTreeMap<Address, u64>,
}

/// Running per-witness count of units authored on stabilized MCIs.
#[derive(Debug, Default)]
pub struct WitnessTally {
    state: Mutex<Tally>,
}

impl WitnessTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn totals(&self) -> BTreeMap<Address, u64> {
        self.state.lock().totals.clone()
    }

    pub fn count_for(&self, witness: &Address) -> u64 {
        self.state.lock().totals.get(witness).copied().unwrap_or(0)
    }

    /// Number of MCIs accounted for.
    pub fn mcis(&self) -> u64 {
        self.state.lock().mcis
    }

    pub fn last_mci(&self) -> Option<u64> {
        self.state
            .lock()
            .next_mci
            .map(|next| next.saturating_sub(1))
    }
}

#[async_trait]
impl PayoutCalculator for WitnessTally {
    async fn on_stabilized(&self, record: &PayoutRecord) -> std::result::Result<(), PayoutError> {
        let mut state = self.state.lock();
        if let Some(expected) = state.next_mci {
            if record.mci != expected {
                return Err(PayoutError::OutOfOrder {
                    expected,
                    found: record.mci,
                });
            }
        }
        for (witness, units) in &record.witness_units {
            *state.totals.entry(witness.clone()).or_insert(0) += u64::from(*units);
        }
        state.mcis += 1;
        state.next_mci = Some(record.mci + 1);
        Ok(())
    }
}
