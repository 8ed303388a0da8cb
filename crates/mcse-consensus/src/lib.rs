//! # mcse-consensus
//!
//! The write path of the main-chain stability engine.
//!
//! This crate provides:
//! - [`Engine`]: validation and ingest of units, main chain maintenance,
//!   stability advances and archiving, all as a single writer
//! - [`StabilityEngine`]: the witnessed-level majority rule and the
//!   one-pass, multi-MCI advance planner
//! - [`CommitCoordinator`]: one storage transaction per operation, with
//!   the graph mirror published only after the durable commit
//! - [`LedgerReader`]: durable stability queries for consumers
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use mcse_consensus::{Engine, EngineConfig};
//! use mcse_core::{SequenceState, UnitBuilder};
//! use mcse_store::MemoryUnitStore;
//!
//! let config = EngineConfig::default();
//! let witnesses: Vec<_> = config.witnesses.iter().cloned().collect();
//! let genesis = UnitBuilder::genesis_signed_by(witnesses.clone());
//!
//! let store = Arc::new(MemoryUnitStore::new());
//! let mut engine = Engine::bootstrap(store, config, genesis.clone()).unwrap();
//!
//! let unit = UnitBuilder::new()
//!     .with_parent(genesis.hash)
//!     .with_author(witnesses[1].clone())
//!     .build();
//! let accepted = engine.submit(unit, SequenceState::Good, None).unwrap();
//! assert_eq!(accepted.props.main_chain_index, Some(1));
//! assert!(engine.ledger().is_stable(&genesis.hash).unwrap());
//! ```

mod archive;
mod coordinator;
mod engine;
mod error;
mod query;
mod stability;

pub use archive::ArchiveStep;
pub use coordinator::{CommitCoordinator, GraphReader};
pub use engine::{Engine, EngineConfig, EngineStats, Submission};
pub use error::{ArchiveError, CommitError, EngineError, Result, ValidationError};
pub use query::LedgerReader;
pub use stability::{StabilityAdvance, StabilityEngine, StabilityVerdict, StabilizedMci};
