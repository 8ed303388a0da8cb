//! Integration tests for mcse-store.

use mcse_core::{Address, Unit, UnitBuilder, UnitProps};
use mcse_store::{
    FailPoint, JournalUnitStore, MemoryUnitStore, Mutation, StoreError, UnitStore,
};
use proptest::prelude::*;
use tempfile::tempdir;

fn genesis() -> (Unit, UnitProps) {
    let unit = UnitBuilder::genesis(Address::new("w-0"));
    let props = UnitProps::genesis(unit.hash, unit.authors.clone());
    (unit, props)
}

fn chain_props(unit: &Unit, level: u64, mci: u64) -> UnitProps {
    let mut props = UnitProps::genesis(unit.hash, unit.authors.clone());
    props.parents = unit.parents.clone();
    props.best_parent = unit.parents.first().copied();
    props.level = level;
    props.main_chain_index = Some(mci);
    props.is_stable = false;
    props
}

/// Build a linear chain of `len` units on top of genesis.
fn build_chain(store: &dyn UnitStore, len: usize) -> Vec<Unit> {
    let (g, gp) = genesis();
    let mut txn = store.begin();
    store.append(&mut txn, g.clone(), gp).unwrap();
    txn.push(Mutation::SetStableFrontier(0));
    store.commit(txn).unwrap();

    let mut units = vec![g];
    for i in 1..=len {
        let parent = units[i - 1].hash;
        let unit = UnitBuilder::new()
            .with_parent(parent)
            .with_author(Address::new("alice"))
            .with_timestamp(i as u64)
            .build();
        let props = chain_props(&unit, i as u64, i as u64);
        let mut txn = store.begin();
        store.append(&mut txn, unit.clone(), props).unwrap();
        store.commit(txn).unwrap();
        units.push(unit);
    }
    units
}

#[test]
fn test_memory_store_chain_queries() {
    let store = MemoryUnitStore::new();
    let units = build_chain(&store, 5);

    for (i, unit) in units.iter().enumerate() {
        assert_eq!(store.mc_unit_at(i as u64).unwrap(), Some(unit.hash));
        assert_eq!(store.units_at_mci(i as u64).unwrap(), vec![unit.hash]);
    }
    assert_eq!(store.free_units().unwrap(), vec![units[5].hash]);
    assert_eq!(store.unstable_units().unwrap().len(), 5);

    let stats = store.stats();
    assert_eq!(stats.units, 6);
    assert_eq!(stats.edges, 5);
    assert_eq!(stats.stable_frontier, Some(0));
}

#[test]
fn test_missing_parent_rejected() {
    let store = MemoryUnitStore::new();
    build_chain(&store, 1);

    let orphan_parent = UnitBuilder::new()
        .with_author(Address::new("ghost"))
        .with_payload(vec![9])
        .build();
    let orphan = UnitBuilder::new()
        .with_parent(orphan_parent.hash)
        .with_author(Address::new("alice"))
        .build();
    let props = chain_props(&orphan, 1, 1);

    let mut txn = store.begin();
    store.append(&mut txn, orphan.clone(), props).unwrap();
    let err = store.commit(txn).unwrap_err();
    assert!(matches!(err, StoreError::MissingParent { .. }));
    assert!(!err.is_retryable());
}

#[test]
fn test_stabilization_batch_atomic_under_fault() {
    let store = MemoryUnitStore::new();
    let units = build_chain(&store, 4);

    let mut txn = store.begin();
    for (i, unit) in units.iter().enumerate().skip(1).take(3) {
        let mut props = store.read_props(&unit.hash).unwrap().unwrap();
        props.is_stable = true;
        props.is_on_main_chain = true;
        txn.push(Mutation::UpdateProps(props));
        txn.push(Mutation::SetStableFrontier(i as u64));
    }
    store.faults().arm(FailPoint::NextCommit);
    assert!(store.commit(txn).is_err());

    assert_eq!(store.stable_frontier().unwrap(), Some(0));
    for unit in &units[1..] {
        assert!(!store.read_props(&unit.hash).unwrap().unwrap().is_stable);
    }
}

#[test]
fn test_journal_store_survives_reopen_with_chain() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("chain.journal");

    let units = {
        let store = JournalUnitStore::open(&path).unwrap();
        build_chain(&store, 10)
    };

    let store = JournalUnitStore::open(&path).unwrap();
    assert_eq!(store.len().unwrap(), 11);
    assert_eq!(store.mc_unit_at(10).unwrap(), Some(units[10].hash));
    assert_eq!(store.free_units().unwrap(), vec![units[10].hash]);
}

proptest! {
    #[test]
    fn prop_failed_commit_changes_nothing(len in 1usize..12, fail_after in 0usize..12) {
        let store = MemoryUnitStore::new();
        let units = build_chain(&store, len);
        let before = store.stats();
        let parent = units[len].hash;

        let mut txn = store.begin();
        let mut last = parent;
        for i in 0..len {
            let unit = UnitBuilder::new()
                .with_parent(last)
                .with_author(Address::new("bob"))
                .with_payload(vec![i as u8])
                .build();
            let props = chain_props(&unit, (len + i + 1) as u64, (len + i + 1) as u64);
            last = unit.hash;
            store.append(&mut txn, unit, props).unwrap();
        }
        store.faults().arm(FailPoint::AfterMutations(fail_after.min(len - 1)));
        prop_assert!(store.commit(txn).is_err());

        let after = store.stats();
        prop_assert_eq!(before.units, after.units);
        prop_assert_eq!(before.edges, after.edges);
        prop_assert_eq!(store.free_units().unwrap(), vec![parent]);
    }
}
