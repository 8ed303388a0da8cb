//! Error types for the storage layer.

use mcse_core::Hash;
use thiserror::Error;

/// Errors that can occur in storage operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Duplicate unit: {}", .0.short())]
    DuplicateUnit(Hash),

    #[error("Unit {} references unknown parent {}", .unit.short(), .parent.short())]
    MissingParent { unit: Hash, parent: Hash },

    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    #[error("Unknown unit: {}", .0.short())]
    UnknownUnit(Hash),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Commit deadline exceeded")]
    DeadlineExceeded,

    #[error("Injected failure: {0}")]
    InjectedFailure(String),

    #[error("Journal poisoned by an earlier failed write; reopen the store")]
    Poisoned,
}

impl StoreError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Io(_) | StoreError::DeadlineExceeded | StoreError::InjectedFailure(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
