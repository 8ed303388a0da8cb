//! Error types for the node service.

use mcse_consensus::{ArchiveError, EngineError};
use mcse_core::Hash;
use mcse_graph::GraphError;
use mcse_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Timed out after {timeout_ms}ms waiting for the write lock ({operation})")]
    WriteLockTimeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("Archiving {} exceeded its {timeout_ms}ms budget after removing {removed} units", .unit.short())]
    ArchiveBudgetExhausted {
        unit: Hash,
        removed: usize,
        timeout_ms: u64,
    },

    #[error("Node is shut down")]
    ShutDown,

    #[error("Writer task failed: {0}")]
    TaskFailed(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),
}

impl NodeError {
    /// Whether the operation may succeed if tried again later.
    pub fn is_retryable(&self) -> bool {
        match self {
            NodeError::Engine(err) => err.is_retryable(),
            NodeError::Archive(err) => err.is_retryable(),
            NodeError::Store(err) => err.is_retryable(),
            NodeError::Graph(err) => err.is_retryable(),
            NodeError::WriteLockTimeout { .. } | NodeError::ArchiveBudgetExhausted { .. } => true,
            NodeError::ShutDown
            | NodeError::TaskFailed(_)
            | NodeError::Config(_)
            | NodeError::ConfigParse(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, NodeError>;
