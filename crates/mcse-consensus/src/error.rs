//! Error types for ingest, stability, commits and archiving.

use mcse_core::Hash;
use mcse_graph::GraphError;
use mcse_store::StoreError;
use thiserror::Error;

/// A submitted unit violates a DAG-structural rule. The unit is rejected
/// and nothing else is affected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Unit {} references unknown parent {}", .unit.short(), .parent.short())]
    MissingParent { unit: Hash, parent: Hash },

    #[error("Duplicate unit: {}", .0.short())]
    DuplicateUnit(Hash),

    #[error("Unit {} has {count} parents, at most {max} allowed", .unit.short())]
    TooManyParents { unit: Hash, count: usize, max: usize },

    #[error("Unit {} has no parents", .0.short())]
    NoParents(Hash),

    #[error("Parents of unit {} are not in strictly ascending order", .0.short())]
    UnsortedParents(Hash),

    #[error("Unit {} has no authors", .0.short())]
    NoAuthors(Hash),

    #[error("Hash of unit {} does not match its contents", .0.short())]
    HashMismatch(Hash),

    #[error("Store already holds genesis {}, refusing {}", .existing.short(), .offered.short())]
    UnexpectedGenesis { existing: Hash, offered: Hash },
}

/// Failure to make staged changes durable and visible.
#[derive(Error, Debug)]
pub enum CommitError {
    #[error("Storage commit failed: {0}")]
    Store(#[from] StoreError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// Storage and mirror disagree; the mirror has been rebuilt.
    #[error("Consistency violation: {0}")]
    ConsistencyViolation(String),

    #[error("Stability advance is not contiguous: expected MCI {expected}, got {found}")]
    NonContiguousAdvance { expected: u64, found: u64 },
}

impl CommitError {
    pub fn is_retryable(&self) -> bool {
        match self {
            CommitError::Store(err) => err.is_retryable(),
            CommitError::Graph(err) => err.is_retryable(),
            CommitError::ConsistencyViolation(_) => true,
            CommitError::NonContiguousAdvance { .. } => false,
        }
    }
}

/// Refusal to archive a unit.
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Unknown unit: {}", .0.short())]
    UnknownUnit(Hash),

    #[error("Unit {} is on the main chain", .0.short())]
    OnMainChain(Hash),

    #[error("Unit {} is serial and cannot be archived", .0.short())]
    SerialUnit(Hash),

    #[error("Unit {} is covered by main chain unit {}", .unit.short(), .by.short())]
    CoveredByMainChain { unit: Hash, by: Hash },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Commit(#[from] CommitError),
}

impl ArchiveError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ArchiveError::Graph(err) => err.is_retryable(),
            ArchiveError::Commit(err) => err.is_retryable(),
            _ => false,
        }
    }
}

/// Any error surfaced by the [`Engine`](crate::Engine).
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Commit(#[from] CommitError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Archive refused: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Store is empty; bootstrap a genesis unit first")]
    NotBootstrapped,
}

impl EngineError {
    /// Whether the operation may succeed on a later tick.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Validation(_) | EngineError::NotBootstrapped => false,
            EngineError::Commit(err) => err.is_retryable(),
            EngineError::Graph(err) => err.is_retryable(),
            EngineError::Store(err) => err.is_retryable(),
            EngineError::Archive(err) => err.is_retryable(),
        }
    }

    pub fn is_consistency_violation(&self) -> bool {
        matches!(
            self,
            EngineError::Commit(CommitError::ConsistencyViolation(_))
                | EngineError::Archive(ArchiveError::Commit(CommitError::ConsistencyViolation(_)))
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
