//! # mcse-graph
//!
//! In-memory mirror of the unstable part of the DAG and the graph
//! algorithms that run over it.
//!
//! This crate provides:
//! - [`GraphIndex`]: the mirror of unstable unit properties plus a
//!   stable-by-MCI index, published only after a durable commit
//! - [`ChangeSet`]: the shadow structure a write operation stages its
//!   effects in before anything is committed
//! - [`StagedView`] and [`Overlay`]: read views layering staged changes
//!   over the mirror and the durable store
//! - [`MainChainSelector`]: level, best parent, witnessed level and main
//!   chain index assignment
//! - Bounded iterative traversals: [`is_included_or_equal`] and
//!   [`collect_best_children`], metered by a [`TraversalBudget`]
//!
//! ## Example
//!
//! ```rust
//! use mcse_core::{Address, UnitBuilder, UnitProps, WitnessSet};
//! use mcse_graph::{ChangeSet, GraphIndex, MainChainSelector, StagedView, TraversalBudget};
//! use mcse_store::{MemoryUnitStore, UnitStore};
//!
//! let store = MemoryUnitStore::new();
//! let witnesses = WitnessSet::numbered("w", 12);
//! let genesis = UnitBuilder::genesis_signed_by(witnesses.iter().cloned().collect());
//!
//! let mut changes = ChangeSet::new();
//! changes.insert_unit(genesis.clone(), UnitProps::genesis(genesis.hash, genesis.authors.clone()));
//! changes.set_stable_frontier(0);
//!
//! let mut txn = store.begin();
//! txn.extend(changes.to_mutations());
//! store.commit(txn).unwrap();
//!
//! let mut index = GraphIndex::new();
//! index.publish(&changes);
//!
//! let view = StagedView::new(&index, &store, None);
//! let selector = MainChainSelector::new(witnesses, 0);
//! let tip = selector.select_tip(&view).unwrap();
//! assert_eq!(tip, Some(genesis.hash));
//! # let _ = TraversalBudget::default();
//! ```

mod budget;
mod changes;
mod error;
mod index;
mod main_chain;
mod traversal;
mod view;

pub use budget::{CancelToken, Meter, TraversalBudget};
pub use changes::ChangeSet;
pub use error::{GraphError, Result, TraversalError};
pub use index::{GraphIndex, GraphStats};
pub use main_chain::{MainChainSelector, MainChainUpdate};
pub use traversal::{collect_best_children, descendants_of, is_included_or_equal};
pub use view::{Overlay, StagedView, UnitSource};
