//! Core data model for batch transfer runs
//!
//! Everything the controller owns or persists lives here: addresses, ledger
//! entries, batches with their closed state machine, run snapshots, and the
//! events emitted to observers.

use crate::utils::error::ExecutionError;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Token amounts in integer base units
pub type Amount = u128;

static ADDRESS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("address pattern"));

/// Invalid address input
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid address \"{0}\"")]
pub struct AddressError(pub String);

/// A checked, canonical (lowercase) 20-byte hex address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Parse and canonicalize an address string
    pub fn parse(s: &str) -> Result<Self, AddressError> {
        let trimmed = s.trim();
        if !ADDRESS_RE.is_match(trimmed) {
            return Err(AddressError(s.to_string()));
        }
        let bytes = hex::decode(&trimmed[2..]).map_err(|_| AddressError(s.to_string()))?;
        Ok(Self(format!("0x{}", hex::encode(bytes))))
    }

    /// The canonical `0x`-prefixed lowercase hex form
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if `s` already satisfies the address syntax
    pub fn is_valid(s: &str) -> bool {
        ADDRESS_RE.is_match(s.trim())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One validated (recipient, amount) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Contiguous 1-based display ordinal, assigned after validation
    pub ordinal: u32,
    /// Recipient address
    pub address: Address,
    /// Transfer amount in base units; always > 0
    pub amount: Amount,
}

/// Lifecycle states of a batch
///
/// `Stopped` and `Terminated` are sinks: the former from an explicit stop,
/// the latter from a cascading abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchState {
    Pending,
    Processing,
    Completed,
    Failed,
    Stopped,
    Terminated,
}

impl BatchState {
    /// Explicit transition table; anything not listed is illegal
    pub fn can_transition(self, to: BatchState) -> bool {
        use BatchState::*;
        matches!(
            (self, to),
            (Pending, Processing)
                | (Pending, Stopped)
                | (Pending, Terminated)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Failed, Pending)
                | (Failed, Terminated)
        )
    }

    /// True for states with no outgoing transitions except retry
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::Terminated)
    }
}

impl std::fmt::Display for BatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Stopped => "STOPPED",
            Self::Terminated => "TERMINATED",
        };
        f.write_str(tag)
    }
}

/// A bounded group of entries submitted in one remote call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    /// Monotonic sequence id assigned at partition time
    pub id: u64,
    /// Ordered entries; 1..=capacity
    pub entries: Vec<Entry>,
    /// Current lifecycle state
    pub status: BatchState,
    /// Classified error for failed or blocked batches
    pub error: Option<ExecutionError>,
    /// Transaction reference once submitted successfully
    pub tx_ref: Option<String>,
    /// Set while the predecessor batch has not completed
    pub awaiting_prior: bool,
}

impl Batch {
    /// Create a fresh pending batch
    pub fn new(id: u64, entries: Vec<Entry>, awaiting_prior: bool) -> Self {
        Self {
            id,
            entries,
            status: BatchState::Pending,
            error: None,
            tx_ref: None,
            awaiting_prior,
        }
    }

    /// Number of recipients in this batch
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Sum of entry amounts; saturates rather than wraps
    pub fn total_amount(&self) -> Amount {
        self.entries
            .iter()
            .fold(0u128, |acc, e| acc.saturating_add(e.amount))
    }
}

/// Durable, minimal record needed to resume a run after restart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    /// Acting account the run belongs to
    pub account: Address,
    /// Token being transferred
    pub token_address: Address,
    /// Display symbol of the token
    pub token_symbol: String,
    /// Token decimals; a ledger parsed after recovery must scale with the
    /// real value, not a guess
    pub token_decimals: u8,
    /// Batches already completed in this run
    pub completed_count: u64,
    /// Next sequence id to assign on a future partition
    pub next_sequence_id: u64,
    /// Ordered ids of batches still to be resumed
    pub incomplete_batch_ids: Vec<u64>,
    /// When the snapshot was written
    pub saved_at: DateTime<Utc>,
}

/// Confirmation result for a submitted batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    /// Chain transaction reference (hash)
    pub tx_reference: String,
    /// Gas consumed, when the node reports it
    pub gas_used: Option<u64>,
    /// Confirmation timestamp
    pub confirmed_at: DateTime<Utc>,
}

/// Overall state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    /// No ledger submitted
    Idle,
    /// Batches partitioned, sweep not yet (or no longer) active
    Partitioned,
    /// Sequential sweep live or halted awaiting retry
    Running,
    /// Every batch completed
    Drained,
    /// Stopped or cascade-terminated
    Aborted,
}

/// Events delivered to observers of a run
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// A batch moved between states
    BatchStatusChanged {
        batch_id: u64,
        from: BatchState,
        to: BatchState,
        error: Option<ExecutionError>,
        tx_ref: Option<String>,
    },
    /// The run as a whole changed state
    RunStateChanged { state: RunState },
    /// Incomplete batches were restored from storage
    RunRecovered { restored: usize },
}

/// Handle returned by `submit`, identifying the partitioned run
#[derive(Debug, Clone)]
pub struct RunHandle {
    /// Unique id of this run
    pub run_id: uuid::Uuid,
    /// Sequence ids of the partitioned batches, in execution order
    pub batch_ids: Vec<u64>,
    /// Total number of entries across the run
    pub entry_count: usize,
}
