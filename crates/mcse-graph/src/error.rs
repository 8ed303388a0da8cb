//! Error types for graph queries and traversals.

use mcse_core::Hash;
use mcse_store::StoreError;
use thiserror::Error;

/// A bounded traversal gave up before reaching an answer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TraversalError {
    #[error("Traversal cut off after visiting {visited} units")]
    Timeout { visited: usize },

    #[error("Traversal cancelled after visiting {visited} units")]
    Cancelled { visited: usize },
}

/// Errors from graph reads, traversals and main chain planning.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Unknown unit: {}", .0.short())]
    UnknownUnit(Hash),

    #[error(transparent)]
    Traversal(#[from] TraversalError),

    #[error("Graph inconsistency: {0}")]
    Inconsistent(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl GraphError {
    /// Whether retrying on a later tick may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            GraphError::Traversal(_) => true,
            GraphError::Store(err) => err.is_retryable(),
            GraphError::UnknownUnit(_) | GraphError::Inconsistent(_) => false,
        }
    }

    pub fn is_traversal_cutoff(&self) -> bool {
        matches!(self, GraphError::Traversal(_))
    }
}

pub type Result<T> = std::result::Result<T, GraphError>;
