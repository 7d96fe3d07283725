//! # batchsend-rs
//!
//! Batch ERC20 transfer orchestrator: validates a pasted transfer ledger,
//! slices it into contract-sized batches, and walks the batches through a
//! strict sequential state machine with crash recovery.
//!
//! ## Features
//!
//! - **Whole-input validation**: every bad ledger line is reported in one
//!   pass, nothing is submitted unless the input is clean
//! - **Deterministic partitioning**: at most 200 recipients per batch,
//!   entry order preserved
//! - **Strict sequential execution**: one batch in flight at a time, a
//!   failure halts the queue until an explicit retry
//! - **Failure classification**: wallet rejection, insufficient funds,
//!   allowance shortfall, and network faults are distinguished, and a
//!   wallet rejection terminates the rest of the run
//! - **Crash recovery**: incomplete runs are snapshotted per account and
//!   restored on reconnect
//!
//! ## Usage
//!
//! ```ignore
//! use batchsend_rs::{Orchestrator, OrchestratorConfig};
//!
//! let config = OrchestratorConfig::from_file("batchsend.yaml").await?;
//! let orchestrator = Orchestrator::new(config, signer, contract, tokens)?;
//!
//! let account = orchestrator.connect().await?;
//! orchestrator.use_token(token_address).await?;
//! let handle = orchestrator.submit("0xabc... 1.5\n0xdef... 2").await?;
//! ```
//!
//! The `signer`, `contract`, and `tokens` arguments implement the seams in
//! [`core::traits`]; the crate never binds to a concrete wallet or node.

#![warn(clippy::all)]

pub mod config;
pub mod core;
pub mod storage;
pub mod utils;

pub use config::{ChainConfig, OrchestratorConfig, StorageBackend, StorageConfig};
pub use core::controller::{BatchSummary, RunController, RunStatus, TokenContext};
pub use core::executor::TransferExecutor;
pub use core::traits::{
    BatchTransferService, ChainSigner, PendingTransfer, RemoteCallError, TokenService,
};
pub use core::types::{
    Address, Amount, Batch, BatchState, Entry, Receipt, RunEvent, RunHandle, RunState,
};
pub use storage::{FileStore, KeyValueStore, MemoryStore, PersistenceStore};
pub use utils::error::{
    ExecutionError, ExecutionErrorKind, LineError, OrchestratorError, Result,
};

use crate::core::executor::classify_remote_error;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;

/// Current version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Name of the crate
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Facade wiring configuration, storage, and the run controller together
pub struct Orchestrator {
    config: OrchestratorConfig,
    controller: RunController,
    signer: Arc<dyn ChainSigner>,
    tokens: Arc<dyn TokenService>,
}

impl Orchestrator {
    /// Build an orchestrator from a validated configuration and the three
    /// external capability implementations.
    pub fn new(
        config: OrchestratorConfig,
        signer: Arc<dyn ChainSigner>,
        contract: Arc<dyn BatchTransferService>,
        tokens: Arc<dyn TokenService>,
    ) -> Result<Self> {
        config.validate()?;
        let contract_address = config.contract_address()?;

        let backend: Arc<dyn KeyValueStore> = match &config.storage.backend {
            StorageBackend::Memory => Arc::new(MemoryStore::new()),
            StorageBackend::File { dir } => Arc::new(FileStore::new(dir.clone())),
        };
        let store = Arc::new(PersistenceStore::new(
            backend,
            config.storage.max_record_bytes,
        ));

        let executor = Arc::new(TransferExecutor::new(
            signer.clone(),
            contract,
            tokens.clone(),
            contract_address,
            config.batch_capacity,
        ));
        let controller = RunController::new(executor, store, config.batch_capacity);

        Ok(Self {
            config,
            controller,
            signer,
            tokens,
        })
    }

    /// Connect the wallet: ensure the configured chain is selected, request
    /// account access, and recover any persisted incomplete run for the
    /// selected account.
    pub async fn connect(&self) -> Result<Address> {
        self.signer
            .switch_or_add_chain(self.config.chain.chain_id)
            .await
            .map_err(|err| OrchestratorError::Execution(classify_remote_error(&err)))?;

        let accounts = self
            .signer
            .request_accounts()
            .await
            .map_err(|err| OrchestratorError::Execution(classify_remote_error(&err)))?;
        let account = accounts
            .into_iter()
            .next()
            .ok_or_else(|| OrchestratorError::Precondition("wallet returned no accounts".into()))?;

        let restored = self.controller.set_account(account.clone()).await?;
        if restored > 0 {
            info!(restored, account = %account, "recovered incomplete run");
        }
        Ok(account)
    }

    /// Select the token to transfer, reading its symbol and decimals
    pub async fn use_token(&self, token: Address) -> Result<TokenContext> {
        let decimals = self
            .tokens
            .decimals(&token)
            .await
            .map_err(|err| OrchestratorError::Execution(classify_remote_error(&err)))?;
        let symbol = self
            .tokens
            .symbol(&token)
            .await
            .map_err(|err| OrchestratorError::Execution(classify_remote_error(&err)))?;

        self.controller
            .set_token(token.clone(), symbol.clone(), decimals)
            .await?;
        Ok(TokenContext {
            address: token,
            symbol,
            decimals,
        })
    }

    /// Validate, partition, and start executing a raw transfer ledger
    pub async fn submit(&self, raw: &str) -> Result<RunHandle> {
        self.controller.submit(raw).await
    }

    /// Retry a failed batch
    pub async fn retry(&self, batch_id: u64) -> Result<()> {
        self.controller.retry(batch_id).await
    }

    /// Stop scheduling further batches
    pub async fn stop(&self) -> Result<()> {
        self.controller.stop().await
    }

    /// Clear the entire run, including persisted state
    pub async fn reset(&self) -> Result<()> {
        self.controller.reset().await
    }

    /// End the session and delete stored state for the account
    pub async fn disconnect(&self) -> Result<()> {
        self.controller.disconnect().await
    }

    /// Resume the sweep over a recovered or halted queue
    pub fn resume(&self) {
        self.controller.resume();
    }

    /// Current observable run status
    pub async fn status(&self) -> RunStatus {
        self.controller.status().await
    }

    /// Subscribe to run events
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.controller.subscribe()
    }

    /// Run events as a `Stream`
    pub fn event_stream(&self) -> BroadcastStream<RunEvent> {
        self.controller.event_stream()
    }

    /// Explorer link for a transaction reference
    pub fn explorer_tx_url(&self, tx_reference: &str) -> String {
        self.config.explorer_tx_url(tx_reference)
    }

    /// The active configuration
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Direct access to the run controller
    pub fn controller(&self) -> &RunController {
        &self.controller
    }
}
