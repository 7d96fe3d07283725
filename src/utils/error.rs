//! Error handling for the orchestrator
//!
//! This module defines all error types used throughout the crate.

use crate::core::types::BatchState;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for the orchestrator
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// A validation failure for a single ledger line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineError {
    /// 1-based line number in the raw input
    pub line: usize,
    /// Human-readable description of the problem
    pub message: String,
}

impl std::fmt::Display for LineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

/// Main error type for the orchestrator
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Ledger validation errors, collected over the whole input
    #[error("ledger validation failed: {} invalid line(s)", .0.len())]
    Validation(Vec<LineError>),

    /// Local precondition violations surfaced before submission
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Batch execution errors (classified, carry a retryable flag)
    #[error("execution failed: {0}")]
    Execution(#[from] ExecutionError),

    /// Snapshot persistence errors; never fatal to a run
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Rejected batch state transition
    #[error("illegal batch transition {from:?} -> {to:?}")]
    IllegalTransition { from: BatchState, to: BatchState },

    /// Retry rejected because an earlier batch is unresolved
    #[error("retry of batch {batch_id} rejected: {reason}")]
    RetryRejected { batch_id: u64, reason: String },

    /// Account or token mutation attempted while a run is live
    #[error("run is active: {0}")]
    RunActive(String),

    /// Unknown batch id
    #[error("batch {0} not found")]
    BatchNotFound(u64),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Classified outcome of a failed batch execution
///
/// `retryable` drives whether the controller offers a `retry` action for the
/// affected batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind}: {message}")]
pub struct ExecutionError {
    /// Classification of the failure
    pub kind: ExecutionErrorKind,
    /// Human-readable description
    pub message: String,
    /// Whether an explicit retry of the batch may succeed
    pub retryable: bool,
}

impl ExecutionError {
    /// Build a retryable error of the given kind
    pub fn retryable(kind: ExecutionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: true,
        }
    }

    /// Build a fatal (non-retryable) error of the given kind
    pub fn fatal(kind: ExecutionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: false,
        }
    }
}

/// Failure classes for batch execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionErrorKind {
    /// The signer explicitly declined the transaction
    UserRejected,
    /// Native or token balance cannot cover the transfer plus fees
    InsufficientFunds,
    /// Token allowance for the batch contract is too low
    InsufficientAllowance,
    /// Connectivity or timeout failure talking to the node
    NetworkError,
    /// The contract call reverted on-chain
    ContractReverted,
    /// Unclassified remote failure
    Unknown,
    /// Local precondition violation; the batch was never submitted
    Precondition,
    /// Structurally invalid batch (empty or over capacity); partitioner bug
    Capacity,
}

impl std::fmt::Display for ExecutionErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            Self::UserRejected => "USER_REJECTED",
            Self::InsufficientFunds => "INSUFFICIENT_FUNDS",
            Self::InsufficientAllowance => "INSUFFICIENT_ALLOWANCE",
            Self::NetworkError => "NETWORK_ERROR",
            Self::ContractReverted => "CONTRACT_REVERTED",
            Self::Unknown => "UNKNOWN",
            Self::Precondition => "PRECONDITION",
            Self::Capacity => "CAPACITY",
        };
        f.write_str(tag)
    }
}
