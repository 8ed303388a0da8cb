//! The async node service.
//!
//! A [`Node`] owns one [`Engine`] behind an async mutex: the write lock.
//! Every write waits for the lock under a timeout and then runs on the
//! blocking pool with a deadline derived from the same budget. Events and
//! payout announcements are published from inside the write, so observers
//! see them in commit order. Reads go straight to the committed state and
//! never take the write lock.

use crate::config::NodeConfig;
use crate::error::{NodeError, Result};
use crate::payout::{PayoutCalculator, PayoutFeed};
use mcse_consensus::{
    Engine, EngineConfig, EngineStats, GraphReader, LedgerReader, StabilityAdvance,
    StabilityEngine, StabilityVerdict, Submission,
};
use mcse_core::{Hash, PayoutRecord, SequenceState, Unit, UnitBuilder, UnitProps};
use mcse_graph::{is_included_or_equal, CancelToken, MainChainSelector, UnitSource};
use mcse_store::{MemoryUnitStore, UnitStore};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

const EVENT_CAPACITY: usize = 1024;

/// Events emitted after committed writes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeEvent {
    UnitAccepted {
        unit: Hash,
        level: u64,
        mci: Option<u64>,
    },
    MainChainReorganized {
        intersection_mci: u64,
        demoted: usize,
    },
    Stabilized {
        from: u64,
        to: u64,
    },
    Archived {
        root: Hash,
        removed: usize,
    },
}

/// Publishes the effects of a write. Cloned into every writer closure.
#[derive(Clone)]
struct Publisher {
    events: broadcast::Sender<NodeEvent>,
    payouts: PayoutFeed,
}

impl Publisher {
    fn emit(&self, event: NodeEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    fn accepted(&self, submission: &Submission) {
        self.emit(NodeEvent::UnitAccepted {
            unit: submission.unit,
            level: submission.props.level,
            mci: submission.props.main_chain_index,
        });
        if submission.main_chain.is_reorg() {
            self.emit(NodeEvent::MainChainReorganized {
                intersection_mci: submission.main_chain.intersection_mci,
                demoted: submission.main_chain.demoted,
            });
        }
        if let Some(advance) = &submission.advance {
            self.advanced(advance);
        }
    }

    fn advanced(&self, advance: &StabilityAdvance) {
        if advance.is_empty() {
            return;
        }
        self.emit(NodeEvent::Stabilized {
            from: advance.from,
            to: advance.to,
        });
        self.payouts.announce(advance.to);
    }
}

/// Handle to a running node. Cheap to clone; clones share the engine.
///
/// Constructors must run inside a Tokio runtime: they start the payout
/// dispatcher.
#[derive(Clone)]
pub struct Node {
    engine: Arc<Mutex<Engine<dyn UnitStore>>>,
    reader: GraphReader<dyn UnitStore>,
    selector: MainChainSelector,
    stability: StabilityEngine,
    config: NodeConfig,
    engine_config: EngineConfig,
    genesis: Hash,
    publisher: Publisher,
    cancel: CancelToken,
}

impl Node {
    /// Open a node over a store that already holds a genesis unit.
    pub fn open(store: Arc<dyn UnitStore>, config: NodeConfig) -> Result<Self> {
        let (engine_config, cancel) = Self::engine_config(&config)?;
        let engine = Engine::open(store, engine_config.clone())?;
        Self::assemble(engine, config, engine_config, cancel)
    }

    /// Open a node, writing `genesis` first if the store is empty.
    pub fn bootstrap(store: Arc<dyn UnitStore>, config: NodeConfig, genesis: Unit) -> Result<Self> {
        let (engine_config, cancel) = Self::engine_config(&config)?;
        let engine = Engine::bootstrap(store, engine_config.clone(), genesis)?;
        Self::assemble(engine, config, engine_config, cancel)
    }

    /// Engine settings whose traversals all observe the node's cancel token.
    fn engine_config(config: &NodeConfig) -> Result<(EngineConfig, CancelToken)> {
        let cancel = CancelToken::new();
        let mut engine_config = config.to_engine_config()?;
        engine_config.traversal = engine_config.traversal.with_cancel(cancel.clone());
        Ok((engine_config, cancel))
    }

    /// A node over a fresh in-memory store, with a genesis unit co-signed
    /// by every configured witness.
    pub fn in_memory(config: NodeConfig) -> Result<Self> {
        let genesis = Self::genesis_unit(&config);
        let store: Arc<dyn UnitStore> = Arc::new(MemoryUnitStore::new());
        Self::bootstrap(store, config, genesis)
    }

    /// The genesis unit co-signed by every witness in `config`.
    pub fn genesis_unit(config: &NodeConfig) -> Unit {
        UnitBuilder::genesis_signed_by(config.witness_set().iter().cloned().collect())
    }

    fn assemble(
        engine: Engine<dyn UnitStore>,
        config: NodeConfig,
        engine_config: EngineConfig,
        cancel: CancelToken,
    ) -> Result<Self> {
        let reader = engine.reader();
        let genesis = engine.genesis();
        let selector =
            MainChainSelector::new(engine_config.witnesses.clone(), engine_config.era_upgrade_mci);
        let stability =
            StabilityEngine::new(engine_config.witnesses.clone(), engine_config.era_upgrade_mci);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let payouts = PayoutFeed::spawn(
            LedgerReader::new(reader.clone()),
            config.payout_retry(),
            cancel.clone(),
        )?;
        info!(
            genesis = %genesis,
            witnesses = engine_config.witnesses.len(),
            last_stable_mci = reader.index().last_stable_mci(),
            "node.started"
        );
        Ok(Node {
            engine: Arc::new(Mutex::new(engine)),
            reader,
            selector,
            stability,
            config,
            engine_config,
            genesis,
            publisher: Publisher { events, payouts },
            cancel,
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn genesis(&self) -> Hash {
        self.genesis
    }

    /// Subscribe to events for writes committed from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.publisher.events.subscribe()
    }

    /// Deliver every MCI stabilized from now on to `calculator`.
    pub fn register_payout_calculator(&self, calculator: Arc<dyn PayoutCalculator>) {
        let first_mci = self.stable_frontier() + 1;
        self.publisher.payouts.subscribe(calculator, first_mci);
    }

    /// Stop accepting writes and cancel in-flight traversals.
    ///
    /// Payout delivery stops too; calculators can resume later from
    /// [`Node::payout_record`].
    pub fn shutdown(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        self.publisher.payouts.wake();
        info!(last_stable_mci = self.stable_frontier(), "node.shutdown");
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run `f` as the single writer: wait for the write lock within
    /// `timeout`, then run on the blocking pool with the remaining budget
    /// as the deadline.
    async fn with_writer<R, F>(&self, operation: &'static str, timeout: Duration, f: F) -> Result<R>
    where
        F: FnOnce(&mut Engine<dyn UnitStore>, Instant) -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return Err(NodeError::ShutDown);
        }
        let started = Instant::now();
        let timeout_ms = timeout.as_millis() as u64;
        let guard = tokio::time::timeout(timeout, Arc::clone(&self.engine).lock_owned())
            .await
            .map_err(|_| {
                warn!(operation, timeout_ms, "node.write_lock_timeout");
                NodeError::WriteLockTimeout {
                    operation,
                    timeout_ms,
                }
            })?;
        let deadline = started + timeout;

        tokio::task::spawn_blocking(move || {
            let mut engine = guard;
            f(&mut engine, deadline)
        })
        .await
        .map_err(|err| NodeError::TaskFailed(err.to_string()))
    }

    /// Validate and accept a unit, publishing what it changed before the
    /// write lock is released.
    pub async fn submit(&self, unit: Unit, sequence: SequenceState) -> Result<Submission> {
        let publisher = self.publisher.clone();
        let submission = self
            .with_writer("submit", self.config.write_timeout(), move |engine, deadline| {
                let result = engine.submit(unit, sequence, Some(deadline));
                if let Ok(submission) = &result {
                    publisher.accepted(submission);
                }
                result
            })
            .await??;
        Ok(submission)
    }

    /// Run one stability pass.
    pub async fn advance_stability(&self) -> Result<StabilityAdvance> {
        let publisher = self.publisher.clone();
        let advance = self
            .with_writer("advance", self.config.write_timeout(), move |engine, deadline| {
                let result = engine.advance_stability(Some(deadline));
                if let Ok(advance) = &result {
                    publisher.advanced(advance);
                }
                result
            })
            .await??;
        Ok(advance)
    }

    /// Archive an uncovered unit and its descendants.
    ///
    /// Works in batches of `archive_batch_size` units, releasing the write
    /// lock and yielding between batches so submissions interleave.
    pub async fn archive_uncovered_unit(&self, hash: Hash) -> Result<Vec<Hash>> {
        let started = Instant::now();
        let budget = self.config.archive_timeout();
        let batch_size = self.config.archive_batch_size;
        let mut removed = Vec::new();

        loop {
            let elapsed = started.elapsed();
            if elapsed >= budget {
                warn!(unit = %hash, removed = removed.len(), "archive.budget_exhausted");
                return Err(NodeError::ArchiveBudgetExhausted {
                    unit: hash,
                    removed: removed.len(),
                    timeout_ms: self.config.archive_timeout_ms,
                });
            }
            let wait = self.config.write_timeout().min(budget - elapsed);
            let step = self
                .with_writer("archive", wait, move |engine, deadline| {
                    engine.archive_step(&hash, batch_size, Some(deadline))
                })
                .await??;

            debug!(
                root = %hash,
                batch = step.removed.len(),
                remaining = step.remaining,
                "node.archive_batch"
            );
            removed.extend(step.removed);
            if step.done {
                break;
            }
            tokio::task::yield_now().await;
        }

        removed.sort();
        self.publisher.emit(NodeEvent::Archived {
            root: hash,
            removed: removed.len(),
        });
        Ok(removed)
    }

    /// Periodically run stability passes until the ticker is shut down.
    ///
    /// Retryable failures are logged and retried on the next tick.
    pub fn spawn_stability_ticker(&self, period: Duration) -> StabilityTicker {
        let node = self.clone();
        let (stop, mut stopped) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match node.advance_stability().await {
                            Ok(advance) if !advance.is_empty() => {
                                debug!(from = advance.from, to = advance.to, "stability.tick");
                            }
                            Ok(_) => {}
                            Err(NodeError::ShutDown) => break,
                            Err(err) if err.is_retryable() => {
                                warn!(error = %err, "stability.tick_deferred");
                            }
                            Err(err) => {
                                error!(error = %err, "stability.tick_failed");
                            }
                        }
                    }
                    changed = stopped.changed() => {
                        if changed.is_err() || *stopped.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        StabilityTicker { stop, handle }
    }

    // Reads

    pub fn ledger(&self) -> LedgerReader<dyn UnitStore> {
        LedgerReader::new(self.reader.clone())
    }

    pub fn is_stable(&self, hash: &Hash) -> Result<bool> {
        Ok(self.ledger().is_stable(hash)?)
    }

    pub fn stable_mci_of(&self, hash: &Hash) -> Result<Option<u64>> {
        Ok(self.ledger().stable_mci_of(hash)?)
    }

    pub fn units_at_stable_mci(&self, mci: u64) -> Result<Vec<Hash>> {
        Ok(self.ledger().units_at_stable_mci(mci)?)
    }

    pub fn stable_frontier(&self) -> u64 {
        self.ledger().stable_frontier()
    }

    pub fn payout_record(&self, mci: u64) -> Result<Option<PayoutRecord>> {
        Ok(self.ledger().payout_record(mci)?)
    }

    pub fn props(&self, hash: &Hash) -> Result<Option<UnitProps>> {
        Ok(self.reader.with_view(|view| view.props(hash))?)
    }

    pub fn tip(&self) -> Result<Option<Hash>> {
        Ok(self
            .reader
            .with_view(|view| self.selector.select_tip(view))?)
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            graph: self.reader.index().stats(),
            store: self.reader.store().stats(),
        }
    }

    /// Whether `target` is an ancestor of, or equal to, any of `later`.
    pub async fn is_included_or_equal(&self, target: Hash, later: Vec<Hash>) -> Result<bool> {
        let reader = self.reader.clone();
        let budget = self
            .engine_config
            .traversal
            .clone()
            .with_timeout(self.config.write_timeout());
        let upgrade = self.engine_config.era_upgrade_mci;
        let included = tokio::task::spawn_blocking(move || {
            reader.with_view(|view| {
                is_included_or_equal(view, &target, &later, upgrade, &mut budget.meter())
            })
        })
        .await
        .map_err(|err| NodeError::TaskFailed(err.to_string()))??;
        Ok(included)
    }

    /// Why `mci` is or is not stable, against committed state.
    pub async fn evaluate(&self, mci: u64) -> Result<Option<StabilityVerdict>> {
        let reader = self.reader.clone();
        let stability = self.stability.clone();
        let budget = self
            .engine_config
            .traversal
            .clone()
            .with_timeout(self.config.write_timeout());
        let verdict = tokio::task::spawn_blocking(move || {
            reader.with_view(|view| stability.evaluate(view, mci, &mut budget.meter()))
        })
        .await
        .map_err(|err| NodeError::TaskFailed(err.to_string()))??;
        Ok(verdict)
    }
}

/// Handle to a background stability ticker.
pub struct StabilityTicker {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl StabilityTicker {
    /// Stop the ticker and wait for its task to finish.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        if let Err(err) = self.handle.await {
            warn!(error = %err, "stability.ticker_join_failed");
        }
    }
}
