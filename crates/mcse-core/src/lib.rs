//! # mcse-core
//!
//! Core types shared by every layer of the main-chain stability engine.
//!
//! This crate provides:
//! - Content-addressed unit hashes
//! - The immutable [`Unit`] and its builder
//! - [`UnitProps`], the stability-relevant projection of a unit
//! - The witness set and protocol constants
//! - [`ProtocolEra`], the tagged variant that selects the stability rules
//!
//! ## Example
//!
//! ```rust
//! use mcse_core::{Address, UnitBuilder};
//!
//! let genesis = UnitBuilder::genesis(Address::new("witness-0"));
//! assert!(genesis.is_genesis());
//!
//! let child = UnitBuilder::new()
//!     .with_parent(genesis.hash)
//!     .with_author(Address::new("alice"))
//!     .with_payload(b"payment".to_vec())
//!     .build();
//! assert!(child.verify());
//! assert!(child.has_parent(&genesis.hash));
//! ```

mod era;
mod hash;
mod props;
mod unit;
mod witness;

pub use era::ProtocolEra;
pub use hash::{Hash, Hasher};
pub use props::{PayoutRecord, SequenceState, UnitProps};
pub use unit::{Unit, UnitBuilder};
pub use witness::{Address, WitnessSet};

/// Number of addresses in a full witness list.
pub const COUNT_WITNESSES: usize = 12;

/// Number of distinct witnesses that constitutes a majority of a full list.
pub const MAJORITY_OF_WITNESSES: usize = 7;

/// Maximum number of parents a unit may reference.
pub const MAX_PARENTS_PER_UNIT: usize = 16;

/// Main-chain index of the genesis unit.
pub const GENESIS_MCI: u64 = 0;
