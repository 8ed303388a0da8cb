//! Integration tests for mcse-consensus.

use mcse_consensus::{
    ArchiveError, Engine, EngineConfig, EngineError, StabilityVerdict, ValidationError,
};
use mcse_core::{Address, Hash, Hasher, ProtocolEra, SequenceState, Unit, UnitBuilder};
use mcse_graph::TraversalBudget;
use mcse_store::{FailPoint, MemoryUnitStore, Mutation, UnitStore};
use proptest::prelude::*;
use std::sync::Arc;

struct Harness {
    engine: Engine<MemoryUnitStore>,
    store: Arc<MemoryUnitStore>,
    witnesses: Vec<Address>,
    genesis: Unit,
    clock: u64,
}

impl Harness {
    fn new(config: EngineConfig) -> Self {
        let witnesses: Vec<Address> = config.witnesses.iter().cloned().collect();
        let genesis = UnitBuilder::genesis_signed_by(witnesses.clone());
        let store = Arc::new(MemoryUnitStore::new());
        let engine = Engine::bootstrap(Arc::clone(&store), config, genesis.clone()).unwrap();
        Harness {
            engine,
            store,
            witnesses,
            genesis,
            clock: 0,
        }
    }

    fn witness(&self, k: usize) -> Address {
        self.witnesses[k % self.witnesses.len()].clone()
    }

    fn build(&mut self, parents: Vec<Hash>, author: Address) -> Unit {
        self.clock += 1;
        UnitBuilder::new()
            .with_parents(parents)
            .with_author(author)
            .with_timestamp(self.clock)
            .build()
    }

    fn add_with(&mut self, parents: Vec<Hash>, author: Address, sequence: SequenceState) -> Unit {
        let unit = self.build(parents, author);
        self.engine.submit(unit.clone(), sequence, None).unwrap();
        unit
    }

    fn add(&mut self, parents: Vec<Hash>, author: Address) -> Unit {
        self.add_with(parents, author, SequenceState::Good)
    }

    /// Main chain units `start..start + count` on top of `from`, unit k
    /// authored by witness k mod 12.
    fn extend_chain(&mut self, from: &Unit, start: usize, count: usize) -> Vec<Unit> {
        let mut last = from.clone();
        let mut units = Vec::with_capacity(count);
        for k in start..start + count {
            let author = self.witness(k);
            last = self.add(vec![last.hash], author);
            units.push(last.clone());
        }
        units
    }

    /// Genesis followed by `len` honest main chain units.
    fn honest_chain(&mut self, len: usize) -> Vec<Unit> {
        let genesis = self.genesis.clone();
        let mut units = vec![genesis.clone()];
        units.extend(self.extend_chain(&genesis, 1, len));
        units
    }

    fn is_stable(&self, unit: &Unit) -> bool {
        self.engine.ledger().is_stable(&unit.hash).unwrap()
    }
}

fn manual() -> EngineConfig {
    EngineConfig::default().with_stabilize_on_ingest(false)
}

#[test]
fn test_honest_chain_frontier_trails_tip() {
    let mut h = Harness::new(EngineConfig::default());
    let units = h.honest_chain(20);

    assert_eq!(h.engine.last_stable_mci(), 7);
    for unit in &units[..=7] {
        assert!(h.is_stable(unit));
    }
    for unit in &units[8..] {
        assert!(!h.is_stable(unit));
    }

    let ledger = h.engine.ledger();
    assert_eq!(ledger.units_at_stable_mci(5).unwrap(), vec![units[5].hash]);
    assert!(ledger.units_at_stable_mci(8).unwrap().is_empty());
    assert_eq!(ledger.stable_mci_of(&units[3].hash).unwrap(), Some(3));

    let payout = ledger.payout_record(5).unwrap().unwrap();
    assert_eq!(payout.mc_unit, units[5].hash);
    assert_eq!(payout.total_witness_units(), 1);
    let genesis_payout = ledger.payout_record(0).unwrap().unwrap();
    assert_eq!(genesis_payout.total_witness_units(), 12);
}

#[test]
fn test_stabilizes_several_mcis_in_one_pass() {
    let mut h = Harness::new(manual());
    let units = h.honest_chain(16);
    assert_eq!(h.engine.last_stable_mci(), 0);

    let advance = h.engine.advance_stability(None).unwrap();
    assert_eq!(advance.from, 0);
    assert_eq!(advance.to, 3);
    assert_eq!(advance.mcis().collect::<Vec<_>>(), vec![1, 2, 3]);

    for unit in &units[..=3] {
        assert!(h.is_stable(unit));
    }
    assert!(!h.is_stable(&units[4]));
    assert!(!h.is_stable(&units[5]));

    let verdict = h.engine.evaluate(4).unwrap().unwrap();
    assert_eq!(verdict.min_mc_witnessed_level, Some(4));
    assert_eq!(verdict.max_alt_level, 4);
    assert!(!verdict.stable);
}

#[test]
fn test_cutoff_commits_proven_prefix() {
    let mut h = Harness::new(manual());
    h.honest_chain(20);

    // Too tight for all seven ready MCIs in one pass.
    let tight = manual().with_traversal(TraversalBudget::new(30, 100));
    let mut engine = Engine::open(Arc::clone(&h.store), tight).unwrap();

    let first = engine.advance_stability(None).unwrap();
    assert!(!first.is_empty());
    assert_eq!(first.from, 0);
    assert!(first.to < 7);
    assert_eq!(h.store.stable_frontier().unwrap(), Some(first.to));
    assert!(engine.ledger().payout_record(first.to).unwrap().is_some());
    assert!(engine.ledger().payout_record(first.to + 1).unwrap().is_none());

    let mut frontier = first.to;
    for _ in 0..7 {
        let advance = engine.advance_stability(None).unwrap();
        assert_eq!(advance.from, frontier);
        frontier = advance.to;
    }
    assert_eq!(frontier, 7);
    assert_eq!(engine.last_stable_mci(), 7);
}

#[test]
fn test_advance_without_candidates_is_noop() {
    let mut h = Harness::new(manual());
    h.honest_chain(16);
    h.engine.advance_stability(None).unwrap();
    let before = h.engine.reader().index().clone();
    let commits = h.store.stats().commits;

    let again = h.engine.advance_stability(None).unwrap();
    assert!(again.is_empty());
    assert_eq!(again.from, 3);
    assert_eq!(again.to, 3);
    assert_eq!(*h.engine.reader().index(), before);
    assert_eq!(h.store.stats().commits, commits);
}

#[test]
fn test_alt_branch_blocks_stability() {
    let mut h = Harness::new(manual());
    let units = h.honest_chain(25);

    // Witness-authored branch off the unit at MCI 9, raising its
    // witnessed level at every step, up to level 15.
    let mut last = units[9].clone();
    for i in 1..=6 {
        let author = h.witness(9 + i);
        last = h.add(vec![last.hash], author);
    }
    assert_eq!(h.engine.tip().unwrap(), Some(units[25].hash));

    h.engine.advance_stability(None).unwrap();
    assert_eq!(h.engine.last_stable_mci(), 9);

    let verdict = h.engine.evaluate(10).unwrap().unwrap();
    assert_eq!(verdict.era, ProtocolEra::Current);
    assert_eq!(verdict.min_mc_witnessed_level, Some(13));
    assert_eq!(verdict.max_alt_level, 15);
    assert_eq!(verdict.alt_candidates, 6);
    assert!(!verdict.stable);
    assert!(!StabilityVerdict::decide(24, 25));

    let tip = units[25].clone();
    h.extend_chain(&tip, 26, 3);
    h.engine.advance_stability(None).unwrap();
    assert_eq!(h.engine.last_stable_mci(), 15);
    assert!(!h.is_stable(&last));
}

#[test]
fn test_era_decides_which_alt_units_count() {
    let build = |upgrade: u64| {
        let mut h = Harness::new(manual().with_era_upgrade_mci(upgrade));
        let units = h.honest_chain(25);
        let mut last = units[9].clone();
        for _ in 0..6 {
            last = h.add(vec![last.hash], Address::new("mallory"));
        }
        h.engine.advance_stability(None).unwrap();
        h.engine.last_stable_mci()
    };

    assert_eq!(build(0), 12);
    assert_eq!(build(1_000), 9);
}

#[test]
fn test_final_bad_alt_units_do_not_count() {
    let mut h = Harness::new(manual());
    let units = h.honest_chain(25);
    let mut last = units[9].clone();
    for i in 1..=6 {
        let author = h.witness(9 + i);
        last = h.add_with(vec![last.hash], author, SequenceState::FinalBad);
    }

    h.engine.advance_stability(None).unwrap();
    assert_eq!(h.engine.last_stable_mci(), 12);
}

#[test]
fn test_failed_batch_commit_changes_nothing() {
    let mut h = Harness::new(manual());
    let units = h.honest_chain(16);
    let mirror = h.engine.reader().index().clone();

    h.store.faults().arm(FailPoint::NextCommit);
    let err = h.engine.advance_stability(None).unwrap_err();
    assert!(err.is_retryable());

    for unit in &units[1..=3] {
        assert!(!h.is_stable(unit));
    }
    assert_eq!(*h.engine.reader().index(), mirror);
    assert_eq!(h.store.stable_frontier().unwrap(), Some(0));
    assert!(h.store.payout_record(1).unwrap().is_none());

    let advance = h.engine.advance_stability(None).unwrap();
    assert_eq!(advance.to, 3);
    for unit in &units[1..=3] {
        assert!(h.is_stable(unit));
    }
}

#[test]
fn test_failure_midway_through_batch_changes_nothing() {
    let mut h = Harness::new(manual());
    let units = h.honest_chain(16);
    let mirror = h.engine.reader().index().clone();

    h.store.faults().arm(FailPoint::AfterMutations(2));
    assert!(h.engine.advance_stability(None).is_err());
    assert_eq!(*h.engine.reader().index(), mirror);
    assert!(!h.store.read_props(&units[1].hash).unwrap().unwrap().is_stable);
}

#[test]
fn test_failed_ingest_commit_leaves_unit_out() {
    let mut h = Harness::new(EngineConfig::default());
    let units = h.honest_chain(3);
    let mirror = h.engine.reader().index().clone();

    let unit = h.build(vec![units[3].hash], Address::new("alice"));
    h.store.faults().arm(FailPoint::NextCommit);
    assert!(h.engine.submit(unit.clone(), SequenceState::Good, None).is_err());

    assert!(h.engine.props(&unit.hash).unwrap().is_none());
    assert_eq!(*h.engine.reader().index(), mirror);

    let accepted = h.engine.submit(unit, SequenceState::Good, None).unwrap();
    assert_eq!(accepted.props.main_chain_index, Some(4));
}

#[test]
fn test_long_chain_inclusion_on_small_stack() {
    std::thread::Builder::new()
        .stack_size(512 * 1024)
        .spawn(|| {
            let mut h = Harness::new(manual());
            let units = h.honest_chain(1_000);
            let head = units[1_000].hash;
            let tail = units[1].hash;

            assert!(h.engine.is_included_or_equal(&tail, &[head]).unwrap());
            assert!(!h.engine.is_included_or_equal(&head, &[tail]).unwrap());
            assert!(h.engine.is_included_or_equal(&head, &[head]).unwrap());

            h.engine.advance_stability(None).unwrap();
            assert_eq!(h.engine.last_stable_mci(), 987);
            assert!(h.engine.is_included_or_equal(&tail, &[head]).unwrap());
        })
        .unwrap()
        .join()
        .unwrap();
}

#[test]
fn test_validation_rejections() {
    let mut h = Harness::new(EngineConfig::default());
    let units = h.honest_chain(2);
    let author = Address::new("alice");

    let duplicate = units[2].clone();
    let err = h.engine.submit(duplicate, SequenceState::Good, None).unwrap_err();
    assert!(matches!(err, EngineError::Validation(ValidationError::DuplicateUnit(_))));

    let ghost = Hasher::hash(b"ghost");
    let orphan = h.build(vec![ghost], author.clone());
    let err = h.engine.submit(orphan, SequenceState::Good, None).unwrap_err();
    assert!(matches!(err, EngineError::Validation(ValidationError::MissingParent { .. })));
    assert!(!err.is_retryable());

    let mut unsorted = h.build(vec![units[1].hash, units[2].hash], author.clone());
    unsorted.parents.reverse();
    let err = h.engine.submit(unsorted, SequenceState::Good, None).unwrap_err();
    assert!(matches!(err, EngineError::Validation(ValidationError::UnsortedParents(_))));

    let mut tampered = h.build(vec![units[2].hash], author.clone());
    tampered.payload = b"forged".to_vec();
    let err = h.engine.submit(tampered, SequenceState::Good, None).unwrap_err();
    assert!(matches!(err, EngineError::Validation(ValidationError::HashMismatch(_))));

    let anonymous = UnitBuilder::new().with_parent(units[2].hash).build();
    let err = h.engine.submit(anonymous, SequenceState::Good, None).unwrap_err();
    assert!(matches!(err, EngineError::Validation(ValidationError::NoAuthors(_))));

    let parentless = UnitBuilder::new().with_author(author.clone()).build();
    let err = h.engine.submit(parentless, SequenceState::Good, None).unwrap_err();
    assert!(matches!(err, EngineError::Validation(ValidationError::NoParents(_))));

    let crowd: Vec<Hash> = (0..17u8).map(|i| Hasher::hash(&[i])).collect();
    let crowded = h.build(crowd, author);
    let err = h.engine.submit(crowded, SequenceState::Good, None).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Validation(ValidationError::TooManyParents { count: 17, .. })
    ));

    assert_eq!(h.store.len().unwrap(), 3);
}

#[test]
fn test_bootstrap_is_idempotent_and_rejects_other_genesis() {
    let config = EngineConfig::default();
    let witnesses: Vec<Address> = config.witnesses.iter().cloned().collect();
    let genesis = UnitBuilder::genesis_signed_by(witnesses);
    let store = Arc::new(MemoryUnitStore::new());

    Engine::bootstrap(Arc::clone(&store), config.clone(), genesis.clone()).unwrap();
    let reopened = Engine::bootstrap(Arc::clone(&store), config.clone(), genesis.clone()).unwrap();
    assert_eq!(reopened.genesis(), genesis.hash);

    let other = UnitBuilder::genesis(Address::new("impostor"));
    let err = Engine::bootstrap(Arc::clone(&store), config.clone(), other).err().unwrap();
    assert!(matches!(
        err,
        EngineError::Validation(ValidationError::UnexpectedGenesis { .. })
    ));

    let empty = Arc::new(MemoryUnitStore::new());
    assert!(matches!(
        Engine::open(empty, config).err().unwrap(),
        EngineError::NotBootstrapped
    ));
}

#[test]
fn test_reopen_rebuilds_same_mirror() {
    let mut h = Harness::new(EngineConfig::default());
    h.honest_chain(20);
    let mirror = h.engine.reader().index().clone();

    let reopened = Engine::open(Arc::clone(&h.store), EngineConfig::default()).unwrap();
    assert_eq!(*reopened.reader().index(), mirror);
    assert_eq!(reopened.last_stable_mci(), 7);
}

#[test]
fn test_mirror_divergence_is_a_consistency_violation() {
    let mut h = Harness::new(EngineConfig::default());
    let units = h.honest_chain(3);

    let mut txn = h.store.begin();
    txn.push(Mutation::SetStableFrontier(5));
    h.store.commit(txn).unwrap();

    let unit = h.build(vec![units[3].hash], Address::new("alice"));
    let err = h.engine.submit(unit, SequenceState::Good, None).unwrap_err();
    assert!(err.is_consistency_violation());
    assert!(err.is_retryable());
    assert_eq!(h.engine.last_stable_mci(), 5);
}

#[test]
fn test_archive_uncovered_branch_leaves_first() {
    let mut config = EngineConfig::default();
    config.archive_batch_size = 1;
    let mut h = Harness::new(config);
    let units = h.honest_chain(20);
    let mallory = Address::new("mallory");

    let x = h.add_with(vec![units[15].hash], mallory.clone(), SequenceState::TempBad);
    let y = h.add_with(vec![x.hash], mallory, SequenceState::TempBad);
    assert_eq!(h.engine.tip().unwrap(), Some(units[20].hash));

    let first = h.engine.archive_step(&x.hash, 1, None).unwrap();
    assert_eq!(first.removed, vec![y.hash]);
    assert_eq!(first.remaining, 1);
    assert!(!first.done);
    assert!(h.engine.props(&x.hash).unwrap().unwrap().is_free);

    let removed = h.engine.archive_uncovered_unit(&x.hash, None).unwrap();
    assert_eq!(removed, vec![x.hash]);
    assert!(!h.store.contains(&x.hash).unwrap());
    assert!(!h.store.contains(&y.hash).unwrap());
    assert!(!h.engine.reader().index().is_unstable(&x.hash));
    assert_eq!(h.engine.tip().unwrap(), Some(units[20].hash));
}

#[test]
fn test_archive_refusals() {
    let mut h = Harness::new(EngineConfig::default());
    let units = h.honest_chain(20);
    let mallory = Address::new("mallory");

    let err = h.engine.archive_uncovered_unit(&units[20].hash, None).unwrap_err();
    assert!(matches!(err, ArchiveError::OnMainChain(_)));

    let serial = h.add(vec![units[16].hash], mallory.clone());
    let err = h.engine.archive_uncovered_unit(&serial.hash, None).unwrap_err();
    assert!(matches!(err, ArchiveError::SerialUnit(_)));

    let bad = h.add_with(vec![units[17].hash], mallory, SequenceState::TempBad);
    let author = h.witness(21);
    let cover = h.add(vec![units[20].hash, bad.hash], author);
    let err = h.engine.archive_uncovered_unit(&bad.hash, None).unwrap_err();
    match err {
        ArchiveError::CoveredByMainChain { unit, by } => {
            assert_eq!(unit, bad.hash);
            assert_eq!(by, cover.hash);
        }
        other => panic!("unexpected error: {}", other),
    }

    let err = h
        .engine
        .archive_uncovered_unit(&Hasher::hash(b"nothing"), None)
        .unwrap_err();
    assert!(matches!(err, ArchiveError::UnknownUnit(_)));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_stability_is_monotone_and_main_chain_unique(
        steps in prop::collection::vec(
            (any::<bool>(), prop::collection::vec(any::<usize>(), 0..3), 0usize..16, any::<bool>()),
            1..60,
        )
    ) {
        let mut h = Harness::new(EngineConfig::default());
        let mut all = vec![h.genesis.hash];
        let mut stable_seen: Vec<Hash> = vec![h.genesis.hash];
        let mut frontier = 0;

        for (side, extras, author, bad) in steps {
            let tip = h.engine.tip().unwrap().unwrap();
            let author = if author < 12 { h.witness(author) } else { Address::new(format!("user-{}", author)) };
            let parents = if side {
                let last = h.engine.props(&tip).unwrap().unwrap().main_chain_index.unwrap();
                let from = h.engine.last_stable_mci();
                let pick = from + extras.first().copied().unwrap_or(0) as u64 % (last - from + 1);
                vec![h.store.mc_unit_at(pick).unwrap().unwrap()]
            } else {
                let mut parents = vec![tip];
                parents.extend(extras.iter().map(|i| all[i % all.len()]));
                parents
            };
            let sequence = if side && bad { SequenceState::TempBad } else { SequenceState::Good };
            let unit = h.add_with(parents, author, sequence);
            all.push(unit.hash);

            let now = h.engine.last_stable_mci();
            prop_assert!(now >= frontier);
            frontier = now;
            for hash in &stable_seen {
                prop_assert!(h.engine.ledger().is_stable(hash).unwrap());
            }
            stable_seen = all
                .iter()
                .copied()
                .filter(|hash| h.engine.ledger().is_stable(hash).unwrap())
                .collect();
        }

        let tip = h.engine.tip().unwrap().unwrap();
        let last = h.engine.props(&tip).unwrap().unwrap().main_chain_index.unwrap();
        for mci in 0..=last {
            let on_chain = h
                .store
                .units_at_mci(mci)
                .unwrap()
                .into_iter()
                .filter(|hash| h.store.read_props(hash).unwrap().unwrap().is_on_main_chain)
                .count();
            prop_assert_eq!(on_chain, 1);
        }
        for hash in &all[1..] {
            let props = h.store.read_props(hash).unwrap().unwrap();
            for parent in &props.parents {
                prop_assert!(props.level > h.store.read_props(parent).unwrap().unwrap().level);
            }
            let best_parent = h.store.read_props(&props.best_parent.unwrap()).unwrap().unwrap();
            prop_assert!(props.witnessed_level >= best_parent.witnessed_level);
        }
    }

    #[test]
    fn prop_injected_failures_never_touch_the_mirror(len in 14usize..24, fail_after in 0usize..12) {
        let mut h = Harness::new(manual());
        h.honest_chain(len);
        let mirror = h.engine.reader().index().clone();
        let frontier = h.store.stable_frontier().unwrap();

        h.store.faults().arm(FailPoint::AfterMutations(fail_after));
        match h.engine.advance_stability(None) {
            Ok(advance) => {
                prop_assert!(advance.to > 0);
                h.store.faults().disarm_all();
            }
            Err(err) => {
                prop_assert!(err.is_retryable());
                let after = h.engine.reader().index().clone();
                prop_assert_eq!(after, mirror);
                prop_assert_eq!(h.store.stable_frontier().unwrap(), frontier);
            }
        }
    }
}
