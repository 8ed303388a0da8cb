//! # mcse-node
//!
//! Async service around the main-chain stability engine.
//!
//! A [`Node`] serializes every write behind one write lock, bounded by a
//! timeout, and runs engine work on the blocking pool. Reads go to the
//! committed state directly. Archiving runs in capped batches that release
//! the write lock between batches. Stabilized MCIs are delivered to
//! registered [`PayoutCalculator`]s by a single background task, in MCI
//! order, after they are durably committed.
//!
//! ## Example
//!
//! ```rust
//! use mcse_core::{Address, SequenceState, UnitBuilder};
//! use mcse_node::{Node, NodeConfig};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let node = Node::in_memory(NodeConfig::default()).unwrap();
//!
//! let unit = UnitBuilder::new()
//!     .with_parent(node.genesis())
//!     .with_author(Address::new("witness-1"))
//!     .build();
//! let accepted = node.submit(unit, SequenceState::Good).await.unwrap();
//! assert_eq!(accepted.props.main_chain_index, Some(1));
//! assert!(node.is_stable(&node.genesis()).unwrap());
//! # });
//! ```

pub mod config;
pub mod error;
pub mod node;
pub mod payout;

pub use config::{NodeConfig, NodeConfigBuilder};
pub use error::{NodeError, Result};
pub use node::{Node, NodeEvent, StabilityTicker};
pub use payout::{PayoutCalculator, PayoutError, WitnessTally};
