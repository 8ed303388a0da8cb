//! # mcse-store
//!
//! Durable, transactional storage of DAG units and their derived indices.
//!
//! This crate provides:
//! - The [`UnitStore`] trait: begin / commit / rollback plus unit, edge and
//!   main-chain-index queries
//! - [`MemoryUnitStore`]: an in-memory store with an undo log, so a failed
//!   commit leaves no partial writes behind
//! - [`JournalUnitStore`]: the same state made durable by an fsync'd
//!   JSON-lines journal that is replayed on open
//! - [`FaultInjector`]: fail points for exercising the rollback paths
//!
//! ## Example
//!
//! ```rust
//! use mcse_core::{Address, UnitBuilder, UnitProps};
//! use mcse_store::{MemoryUnitStore, UnitStore};
//!
//! let store = MemoryUnitStore::new();
//! let genesis = UnitBuilder::genesis(Address::new("w-0"));
//! let props = UnitProps::genesis(genesis.hash, genesis.authors.clone());
//!
//! let mut txn = store.begin();
//! store.append(&mut txn, genesis.clone(), props).unwrap();
//! store.commit(txn).unwrap();
//!
//! assert!(store.contains(&genesis.hash).unwrap());
//! ```

mod error;
mod journal;
mod memory;
mod state;
mod store;
mod txn;

pub use error::{Result, StoreError};
pub use journal::JournalUnitStore;
pub use memory::{FailPoint, FaultInjector, MemoryUnitStore};
pub use store::{StoreStats, UnitStore};
pub use txn::{CommitReceipt, Mutation, Txn};
