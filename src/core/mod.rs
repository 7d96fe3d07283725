//! Core orchestration logic
//!
//! Parsing, partitioning, execution, and the run state machine.

pub mod controller;
pub mod executor;
pub mod parser;
pub mod partitioner;
pub mod traits;
pub mod types;

pub use controller::{BatchSummary, RunController, RunStatus, TokenContext};
pub use executor::TransferExecutor;
pub use partitioner::DEFAULT_BATCH_CAPACITY;
pub use traits::{BatchTransferService, ChainSigner, PendingTransfer, RemoteCallError, TokenService};
pub use types::{
    Address, Amount, Batch, BatchState, Entry, Receipt, RunEvent, RunHandle, RunSnapshot, RunState,
};
