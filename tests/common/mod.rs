//! Shared test infrastructure
//!
//! `TestChain` is a scripted stand-in for the wallet, the batch-transfer
//! contract, and the token: balances and fees are plain fields, failures are
//! queued per submission, and every call is recorded so tests can assert on
//! ordering and single-flight behavior.

#![allow(dead_code)]

use async_trait::async_trait;
use batchsend_rs::{
    Address, Amount, BatchTransferService, ChainSigner, FileStore, KeyValueStore, Orchestrator,
    OrchestratorConfig, PendingTransfer, Receipt, RemoteCallError, RunStatus, TokenService,
};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Deterministic test address
pub fn addr(i: u32) -> Address {
    Address::parse(&format!("0x{i:040x}")).unwrap()
}

/// The account `TestChain` exposes through the wallet seam
pub fn account() -> Address {
    addr(0xaa)
}

/// The token tests transfer
pub fn token() -> Address {
    addr(0xff00)
}

/// A ledger of `n` lines, one unit each, addresses `0x..1` upward
pub fn ledger(n: usize) -> String {
    (0..n)
        .map(|i| format!("{} 1", addr(i as u32 + 1)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Scripted wallet + contract + token fake
pub struct TestChain {
    pub fee_per_address: Amount,
    pub native_balance: RwLock<Amount>,
    pub token_balance: RwLock<Amount>,
    pub allowance: RwLock<Amount>,
    pub decimals: u8,
    pub symbol: String,
    /// Per-call delay inside `batch_transfer`, to widen race windows
    pub submit_delay: Duration,
    /// Outcome queue for `batch_transfer`: `Some(err)` fails that call,
    /// `None` (or an empty queue) succeeds
    failures: Mutex<VecDeque<Option<RemoteCallError>>>,
    /// Recipient counts of successful submissions, in order
    submitted: Mutex<Vec<usize>>,
    /// Flattened base-unit amounts across successful submissions
    submitted_amounts: Mutex<Vec<Amount>>,
    attempts: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    approvals: Mutex<Vec<Amount>>,
}

impl TestChain {
    pub fn new() -> Self {
        Self {
            fee_per_address: 1_000,
            native_balance: RwLock::new(1_000_000_000_000_000_000),
            token_balance: RwLock::new(Amount::MAX / 2),
            allowance: RwLock::new(Amount::MAX / 2),
            decimals: 18,
            symbol: "TKN".to_string(),
            submit_delay: Duration::from_millis(2),
            failures: Mutex::new(VecDeque::new()),
            submitted: Mutex::new(Vec::new()),
            submitted_amounts: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            approvals: Mutex::new(Vec::new()),
        }
    }

    pub fn with_submit_delay(mut self, delay: Duration) -> Self {
        self.submit_delay = delay;
        self
    }

    pub fn with_decimals(mut self, decimals: u8) -> Self {
        self.decimals = decimals;
        self
    }

    /// Queue outcomes for the next `batch_transfer` calls
    pub fn script(&self, outcomes: impl IntoIterator<Item = Option<RemoteCallError>>) {
        self.failures.lock().extend(outcomes);
    }

    pub fn network_error() -> RemoteCallError {
        RemoteCallError::message("connection timeout while broadcasting")
    }

    pub fn user_rejection() -> RemoteCallError {
        RemoteCallError::coded(4001, "User denied transaction signature")
    }

    /// Recipient counts of successful submissions so far
    pub fn submitted(&self) -> Vec<usize> {
        self.submitted.lock().clone()
    }

    /// Base-unit amounts of successful submissions, flattened in order
    pub fn submitted_amounts(&self) -> Vec<Amount> {
        self.submitted_amounts.lock().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Highest number of concurrently in-flight submissions observed
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn approvals(&self) -> Vec<Amount> {
        self.approvals.lock().clone()
    }
}

impl Default for TestChain {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainSigner for TestChain {
    async fn request_accounts(&self) -> Result<Vec<Address>, RemoteCallError> {
        Ok(vec![account()])
    }

    fn current_account(&self) -> Option<Address> {
        Some(account())
    }

    async fn native_balance_of(&self, _address: &Address) -> Result<Amount, RemoteCallError> {
        Ok(*self.native_balance.read())
    }

    async fn switch_or_add_chain(&self, _chain_id: u64) -> Result<(), RemoteCallError> {
        Ok(())
    }
}

#[async_trait]
impl BatchTransferService for TestChain {
    async fn fee_per_address(&self) -> Result<Amount, RemoteCallError> {
        Ok(self.fee_per_address)
    }

    async fn batch_transfer(
        &self,
        _token: &Address,
        recipients: &[Address],
        amounts: &[Amount],
        _value: Amount,
    ) -> Result<PendingTransfer, RemoteCallError> {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let concurrent = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(concurrent, Ordering::SeqCst);

        tokio::time::sleep(self.submit_delay).await;
        let outcome = self.failures.lock().pop_front().flatten();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match outcome {
            Some(err) => Err(err),
            None => {
                self.submitted.lock().push(recipients.len());
                self.submitted_amounts.lock().extend_from_slice(amounts);
                Ok(PendingTransfer {
                    tx_reference: format!("0xtx{n:04}"),
                })
            }
        }
    }

    async fn await_confirmation(&self, tx: &PendingTransfer) -> Result<Receipt, RemoteCallError> {
        Ok(Receipt {
            tx_reference: tx.tx_reference.clone(),
            gas_used: Some(21_000),
            confirmed_at: Utc::now(),
        })
    }
}

#[async_trait]
impl TokenService for TestChain {
    async fn balance_of(&self, _token: &Address, _owner: &Address) -> Result<Amount, RemoteCallError> {
        Ok(*self.token_balance.read())
    }

    async fn allowance(
        &self,
        _token: &Address,
        _owner: &Address,
        _spender: &Address,
    ) -> Result<Amount, RemoteCallError> {
        Ok(*self.allowance.read())
    }

    async fn approve(
        &self,
        _token: &Address,
        _spender: &Address,
        amount: Amount,
    ) -> Result<PendingTransfer, RemoteCallError> {
        self.approvals.lock().push(amount);
        *self.allowance.write() = amount;
        Ok(PendingTransfer {
            tx_reference: "0xapprove".to_string(),
        })
    }

    async fn decimals(&self, _token: &Address) -> Result<u8, RemoteCallError> {
        Ok(self.decimals)
    }

    async fn symbol(&self, _token: &Address) -> Result<String, RemoteCallError> {
        Ok(self.symbol.clone())
    }
}

/// Build an orchestrator around one `TestChain`
pub fn orchestrator(chain: Arc<TestChain>, config: OrchestratorConfig) -> Orchestrator {
    batchsend_rs::utils::logging::init_logging("warn");
    Orchestrator::new(config, chain.clone(), chain.clone(), chain).unwrap()
}

/// Connected, token-selected orchestrator with in-memory storage
pub async fn connected_orchestrator(chain: Arc<TestChain>) -> Orchestrator {
    let orch = orchestrator(chain, OrchestratorConfig::default());
    orch.connect().await.unwrap();
    orch.use_token(token()).await.unwrap();
    orch
}

/// Poll the file backend until `batch_id` is stored as failed.
///
/// Snapshot writes happen after the in-memory transition becomes visible;
/// tests that reopen storage must wait for the write itself.
pub async fn wait_for_stored_failure(dir: &Path, batch_id: u64) {
    let backend = FileStore::new(dir);
    let key = format!("batch_transfer_{}_batch_{batch_id}", account());
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(raw) = backend.get(&key).await.unwrap() {
            if raw.contains("FAILED") {
                return;
            }
        }
        if tokio::time::Instant::now() > deadline {
            panic!("failure for batch {batch_id} was never persisted");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Poll `status` until `pred` holds, panicking after five seconds
pub async fn wait_for<F>(orch: &Orchestrator, mut pred: F) -> RunStatus
where
    F: FnMut(&RunStatus) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let status = orch.status().await;
        if pred(&status) {
            return status;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for condition; last status: {status:?}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
