//! The single-writer ingest and stability engine.

use crate::coordinator::{CommitCoordinator, GraphReader};
use crate::error::{CommitError, EngineError, Result, ValidationError};
use crate::query::LedgerReader;
use crate::stability::{StabilityAdvance, StabilityEngine, StabilityVerdict};
use mcse_core::{
    Hash, PayoutRecord, SequenceState, Unit, UnitProps, WitnessSet, COUNT_WITNESSES,
    MAJORITY_OF_WITNESSES, MAX_PARENTS_PER_UNIT,
};
use mcse_graph::{
    is_included_or_equal, ChangeSet, GraphError, GraphIndex, GraphStats, MainChainSelector,
    MainChainUpdate, Overlay, StagedView, TraversalBudget, UnitSource,
};
use mcse_store::{StoreStats, UnitStore};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Settings the engine needs.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub witnesses: WitnessSet,

    /// First MCI evaluated under the current era's rules.
    pub era_upgrade_mci: u64,

    pub traversal: TraversalBudget,

    /// Units removed per archive step.
    pub archive_batch_size: usize,

    /// Run a stability pass after every accepted unit.
    pub stabilize_on_ingest: bool,

    /// Compare mirror and storage frontiers before every commit.
    pub verify_mirror_on_commit: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            witnesses: WitnessSet::numbered("witness", COUNT_WITNESSES)
                .with_majority(MAJORITY_OF_WITNESSES),
            era_upgrade_mci: 0,
            traversal: TraversalBudget::default(),
            archive_batch_size: 32,
            stabilize_on_ingest: true,
            verify_mirror_on_commit: true,
        }
    }
}

impl EngineConfig {
    pub fn with_witnesses(mut self, witnesses: WitnessSet) -> Self {
        self.witnesses = witnesses;
        self
    }

    pub fn with_era_upgrade_mci(mut self, mci: u64) -> Self {
        self.era_upgrade_mci = mci;
        self
    }

    pub fn with_traversal(mut self, budget: TraversalBudget) -> Self {
        self.traversal = budget;
        self
    }

    pub fn with_stabilize_on_ingest(mut self, enabled: bool) -> Self {
        self.stabilize_on_ingest = enabled;
        self
    }
}

/// Result of accepting a unit.
#[derive(Clone, Debug)]
pub struct Submission {
    pub unit: Hash,

    /// Properties as committed with the unit.
    pub props: UnitProps,

    pub main_chain: MainChainUpdate,

    /// Stability pass run after ingest, if enabled and successful.
    pub advance: Option<StabilityAdvance>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineStats {
    pub graph: GraphStats,
    pub store: StoreStats,
}

/// Owns the write path: validation, main chain maintenance, stability
/// advances and archiving all funnel through one [`CommitCoordinator`].
///
/// Write operations take `&mut self`; wrap the engine in a lock to share it.
pub struct Engine<S: UnitStore + ?Sized> {
    pub(crate) config: EngineConfig,
    pub(crate) selector: MainChainSelector,
    pub(crate) stability: StabilityEngine,
    pub(crate) coordinator: CommitCoordinator<S>,
    genesis: Hash,
}

impl<S: UnitStore + ?Sized> Engine<S> {
    /// Open an engine over a store that already holds a genesis unit.
    pub fn open(store: Arc<S>, config: EngineConfig) -> Result<Self> {
        let genesis = store.mc_unit_at(0)?.ok_or(EngineError::NotBootstrapped)?;
        let index = GraphIndex::rebuild(&*store)?;
        info!(
            genesis = %genesis,
            last_stable_mci = index.last_stable_mci(),
            unstable = index.stats().unstable_units,
            "engine.open"
        );
        Ok(Self::assemble(store, config, index, genesis))
    }

    /// Open an engine, writing `genesis` first if the store is empty.
    pub fn bootstrap(store: Arc<S>, config: EngineConfig, genesis: Unit) -> Result<Self> {
        if let Some(existing) = store.mc_unit_at(0)? {
            if existing != genesis.hash {
                return Err(ValidationError::UnexpectedGenesis {
                    existing,
                    offered: genesis.hash,
                }
                .into());
            }
            return Self::open(store, config);
        }

        if let Some(parent) = genesis.parents.first() {
            return Err(ValidationError::MissingParent {
                unit: genesis.hash,
                parent: *parent,
            }
            .into());
        }
        if genesis.authors.is_empty() {
            return Err(ValidationError::NoAuthors(genesis.hash).into());
        }
        if !genesis.verify() {
            return Err(ValidationError::HashMismatch(genesis.hash).into());
        }

        let hash = genesis.hash;
        let props = UnitProps::genesis(hash, genesis.authors.clone());
        let mut witness_units = BTreeMap::new();
        for witness in config.witnesses.filter(&genesis.authors) {
            witness_units.insert(witness.clone(), 1);
        }

        let mut changes = ChangeSet::new();
        changes.insert_unit(genesis, props);
        changes.mark_stabilized(0, vec![hash]);
        changes.record_payout(PayoutRecord {
            mci: 0,
            mc_unit: hash,
            units: vec![hash],
            witness_units,
        });
        changes.set_stable_frontier(0);

        let engine = Self::assemble(store, config, GraphIndex::new(), hash);
        engine.coordinator.commit(changes, None)?;
        info!(genesis = %hash, "engine.bootstrap");
        Ok(engine)
    }

    fn assemble(store: Arc<S>, config: EngineConfig, index: GraphIndex, genesis: Hash) -> Self {
        let selector = MainChainSelector::new(config.witnesses.clone(), config.era_upgrade_mci);
        let stability = StabilityEngine::new(config.witnesses.clone(), config.era_upgrade_mci);
        let coordinator = CommitCoordinator::new(store, index, config.verify_mirror_on_commit);
        Engine {
            config,
            selector,
            stability,
            coordinator,
            genesis,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn genesis(&self) -> Hash {
        self.genesis
    }

    pub fn reader(&self) -> GraphReader<S> {
        self.coordinator.reader()
    }

    pub fn ledger(&self) -> LedgerReader<S> {
        LedgerReader::new(self.coordinator.reader())
    }

    pub fn last_stable_mci(&self) -> u64 {
        self.coordinator.reader().index().last_stable_mci()
    }

    pub fn stats(&self) -> EngineStats {
        let reader = self.coordinator.reader();
        let graph = reader.index().stats();
        EngineStats {
            graph,
            store: reader.store().stats(),
        }
    }

    pub(crate) fn budget(&self, deadline: Option<Instant>) -> TraversalBudget {
        match deadline {
            Some(deadline) => self.config.traversal.clone().with_deadline(deadline),
            None => self.config.traversal.clone(),
        }
    }

    /// Validate, derive, place on the DAG and commit a new unit.
    ///
    /// When `stabilize_on_ingest` is set a stability pass follows in its own
    /// transaction; its failure is logged and left for the next tick.
    pub fn submit(
        &mut self,
        unit: Unit,
        sequence: SequenceState,
        deadline: Option<Instant>,
    ) -> Result<Submission> {
        let hash = unit.hash;
        let budget = self.budget(deadline);
        let mut meter = budget.meter();
        let reader = self.coordinator.reader();

        let (changes, main_chain) = {
            let index = reader.index();
            let view = StagedView::new(&index, reader.store(), None);
            self.validate(&view, &unit)?;

            let props = self.selector.derive_props(&view, &unit, sequence, &mut meter)?;

            let mut parents = Vec::with_capacity(unit.parents.len());
            for parent in &unit.parents {
                let mut props = view.require(parent)?;
                if props.is_free {
                    props.is_free = false;
                    parents.push(props);
                }
            }

            let mut changes = ChangeSet::new();
            changes.insert_unit(unit, props);
            changes.apply_updates(parents);

            let (updates, main_chain) = {
                let staged = StagedView::new(&index, reader.store(), Some(&changes));
                let mut overlay = Overlay::new(&staged);
                let update = self
                    .selector
                    .update_main_chain(&mut overlay, &mut meter)
                    .map_err(|err| Self::escalate(hash, err))?;
                (overlay.into_updates(), update)
            };
            changes.apply_updates(updates);
            (changes, main_chain)
        };

        let props = changes
            .props(&hash)
            .cloned()
            .ok_or(GraphError::UnknownUnit(hash))?;
        self.coordinator.commit(changes, deadline)?;
        debug!(
            unit = %hash,
            level = props.level,
            witnessed_level = props.witnessed_level,
            mci = ?props.main_chain_index,
            reorg = main_chain.is_reorg(),
            "ingest.accepted"
        );

        let advance = if self.config.stabilize_on_ingest {
            match self.advance_stability(deadline) {
                Ok(advance) => Some(advance),
                Err(err) => {
                    warn!(unit = %hash, error = %err, retryable = err.is_retryable(), "stability.deferred");
                    None
                }
            }
        } else {
            None
        };

        Ok(Submission {
            unit: hash,
            props,
            main_chain,
            advance,
        })
    }

    /// A main chain plan that would move a stable MCI means the mirror or
    /// storage is wrong, not the unit.
    fn escalate(unit: Hash, err: GraphError) -> EngineError {
        match err {
            GraphError::Inconsistent(reason) => {
                error!(unit = %unit, reason = %reason, operator_attention = true, "ingest.consistency_violation");
                CommitError::ConsistencyViolation(reason).into()
            }
            other => other.into(),
        }
    }

    fn validate<U: UnitSource + ?Sized>(&self, view: &U, unit: &Unit) -> Result<()> {
        let hash = unit.hash;
        if unit.parents.is_empty() {
            return Err(ValidationError::NoParents(hash).into());
        }
        if unit.parents.len() > MAX_PARENTS_PER_UNIT {
            return Err(ValidationError::TooManyParents {
                unit: hash,
                count: unit.parents.len(),
                max: MAX_PARENTS_PER_UNIT,
            }
            .into());
        }
        if !unit.parents_are_ordered() {
            return Err(ValidationError::UnsortedParents(hash).into());
        }
        if unit.authors.is_empty() {
            return Err(ValidationError::NoAuthors(hash).into());
        }
        if !unit.verify() {
            return Err(ValidationError::HashMismatch(hash).into());
        }
        if view.props(&hash)?.is_some() {
            return Err(ValidationError::DuplicateUnit(hash).into());
        }
        for parent in &unit.parents {
            if view.props(parent)?.is_none() {
                return Err(ValidationError::MissingParent {
                    unit: hash,
                    parent: *parent,
                }
                .into());
            }
        }
        Ok(())
    }

    /// Advance the stable frontier over every consecutive MCI that
    /// qualifies, in one transaction. A no-op when none does.
    pub fn advance_stability(&mut self, deadline: Option<Instant>) -> Result<StabilityAdvance> {
        let budget = self.budget(deadline);
        let reader = self.coordinator.reader();
        let advance = {
            let index = reader.index();
            let view = StagedView::new(&index, reader.store(), None);
            self.stability.plan_advance(&view, &mut budget.meter())?
        };

        if advance.is_empty() {
            debug!(frontier = advance.from, "stability.idle");
            return Ok(advance);
        }

        let changes = advance.to_change_set();
        self.coordinator
            .commit_stability_advance(&advance, changes, deadline)?;
        info!(
            from = advance.from,
            to = advance.to,
            mcis = advance.stabilized.len(),
            "stability.advance"
        );
        Ok(advance)
    }

    /// Evaluate the stability rule for `mci` against committed state.
    pub fn evaluate(&self, mci: u64) -> Result<Option<StabilityVerdict>> {
        let budget = self.budget(None);
        Ok(self.coordinator.reader().with_view(|view| {
            self.stability.evaluate(view, mci, &mut budget.meter())
        })?)
    }

    /// Whether `target` is an ancestor of, or equal to, any of `later`.
    pub fn is_included_or_equal(&self, target: &Hash, later: &[Hash]) -> Result<bool> {
        let budget = self.budget(None);
        let upgrade = self.config.era_upgrade_mci;
        Ok(self.coordinator.reader().with_view(|view| {
            is_included_or_equal(view, target, later, upgrade, &mut budget.meter())
        })?)
    }

    /// Committed properties of a unit.
    pub fn props(&self, hash: &Hash) -> Result<Option<UnitProps>> {
        Ok(self.coordinator.reader().with_view(|view| view.props(hash))?)
    }

    /// The current main chain tip.
    pub fn tip(&self) -> Result<Option<Hash>> {
        Ok(self
            .coordinator
            .reader()
            .with_view(|view| self.selector.select_tip(view))?)
    }
}
