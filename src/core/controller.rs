//! Run orchestration state machine
//!
//! The controller owns the ordered batch queue and drives it strictly left
//! to right: one batch in `Processing` at any instant, the next batch only
//! after its predecessor's `Completed` transition is observed in memory.
//! Snapshot persistence is best-effort and off the ordering critical path;
//! a failed write degrades the run to in-memory-only, never aborts it.

use crate::core::executor::TransferExecutor;
use crate::core::partitioner;
use crate::core::parser;
use crate::core::types::{
    Address, Batch, BatchState, RunEvent, RunHandle, RunSnapshot, RunState,
};
use crate::storage::PersistenceStore;
use crate::utils::error::{ExecutionError, ExecutionErrorKind, OrchestratorError, Result};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, broadcast};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Token the current run transfers
#[derive(Debug, Clone)]
pub struct TokenContext {
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
}

/// Observable per-batch summary
#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub id: u64,
    pub status: BatchState,
    pub entry_count: usize,
    pub error: Option<ExecutionError>,
    pub tx_ref: Option<String>,
}

/// Observable run status
#[derive(Debug, Clone)]
pub struct RunStatus {
    pub run_state: RunState,
    pub completed_count: u64,
    pub total_batches: usize,
    pub batches: Vec<BatchSummary>,
}

struct RunInner {
    run_state: RunState,
    batches: Vec<Batch>,
    account: Option<Address>,
    token: Option<TokenContext>,
    completed_count: u64,
    next_sequence_id: u64,
    halt_requested: bool,
}

impl RunInner {
    fn new() -> Self {
        Self {
            run_state: RunState::Idle,
            batches: Vec::new(),
            account: None,
            token: None,
            completed_count: 0,
            next_sequence_id: 1,
            halt_requested: false,
        }
    }

    fn clear_run(&mut self) {
        self.batches.clear();
        self.completed_count = 0;
        self.next_sequence_id = 1;
        self.halt_requested = true;
    }
}

enum Step {
    Execute(Batch, Address, TokenContext),
    Drained,
    Halt,
}

/// Orchestrates a batch transfer run
#[derive(Clone)]
pub struct RunController {
    executor: Arc<TransferExecutor>,
    store: Arc<PersistenceStore>,
    inner: Arc<RwLock<RunInner>>,
    // Held for the whole duration of a sweep; guarantees single-flight even
    // when submit and retry race.
    sweep_lock: Arc<Mutex<()>>,
    events: broadcast::Sender<RunEvent>,
    capacity: usize,
}

impl RunController {
    pub fn new(executor: Arc<TransferExecutor>, store: Arc<PersistenceStore>, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            executor,
            store,
            inner: Arc::new(RwLock::new(RunInner::new())),
            sweep_lock: Arc::new(Mutex::new(())),
            events,
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to run events
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.events.subscribe()
    }

    /// Run events as a `Stream`
    pub fn event_stream(&self) -> BroadcastStream<RunEvent> {
        BroadcastStream::new(self.events.subscribe())
    }

    /// Attach the acting account, recovering any persisted incomplete run.
    ///
    /// Switching accounts drops the previous account's stored state so runs
    /// are never mixed. Returns the number of restored batches. Rejected
    /// while a run is live.
    pub async fn set_account(&self, account: Address) -> Result<usize> {
        let previous = {
            let mut inner = self.inner.write().await;
            if inner.run_state == RunState::Running {
                return Err(OrchestratorError::RunActive(
                    "cannot switch accounts while a run is in progress".into(),
                ));
            }
            let previous = inner.account.replace(account.clone());
            inner.clear_run();
            Self::set_run_state(&self.events, &mut inner, RunState::Idle);
            previous
        };

        if let Some(prev) = previous.filter(|p| *p != account) {
            if let Err(err) = self.store.clear(&prev).await {
                warn!(%err, account = %prev, "failed to clear stored state for previous account");
            }
        }

        self.recover(&account).await
    }

    /// Configure the token the next run will transfer. Rejected while a run
    /// is live.
    pub async fn set_token(&self, address: Address, symbol: String, decimals: u8) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.run_state == RunState::Running {
            return Err(OrchestratorError::RunActive(
                "cannot change token while a run is in progress".into(),
            ));
        }
        inner.token = Some(TokenContext {
            address,
            symbol,
            decimals,
        });
        Ok(())
    }

    /// Validate, partition, and start executing a raw transfer ledger.
    ///
    /// All validation errors are collected and returned in one pass; nothing
    /// is submitted unless the whole ledger is clean. On success the sweep
    /// runs in the background; observe progress via `subscribe`/`status`.
    pub async fn submit(&self, raw: &str) -> Result<RunHandle> {
        let (account, token) = {
            let inner = self.inner.read().await;
            if Self::run_is_live(&inner) {
                return Err(OrchestratorError::RunActive("a run is already in progress".into()));
            }
            let account = inner
                .account
                .clone()
                .ok_or_else(|| OrchestratorError::Precondition("no account connected".into()))?;
            let token = inner
                .token
                .clone()
                .ok_or_else(|| OrchestratorError::Precondition("no token configured".into()))?;
            (account, token)
        };

        let outcome = parser::parse(raw, token.decimals);
        if !outcome.errors.is_empty() {
            return Err(OrchestratorError::Validation(outcome.errors));
        }
        if outcome.entries.is_empty() {
            return Err(OrchestratorError::Precondition(
                "ledger contains no transfer entries".into(),
            ));
        }

        self.executor
            .ensure_token_preconditions(&token.address, &account, outcome.total_amount)
            .await?;

        let entry_count = outcome.entries.len();
        let batch_ids = {
            let mut inner = self.inner.write().await;
            if Self::run_is_live(&inner) {
                return Err(OrchestratorError::RunActive("a run is already in progress".into()));
            }
            let start = inner.next_sequence_id;
            let batches = partitioner::partition(outcome.entries, self.capacity, start);
            let ids: Vec<u64> = batches.iter().map(|b| b.id).collect();
            inner.next_sequence_id = start + batches.len() as u64;
            inner.batches = batches;
            inner.completed_count = 0;
            inner.halt_requested = false;
            Self::set_run_state(&self.events, &mut inner, RunState::Partitioned);
            ids
        };

        info!(batches = batch_ids.len(), entries = entry_count, "run partitioned");
        self.persist().await;
        self.spawn_sweep();

        Ok(RunHandle {
            run_id: Uuid::new_v4(),
            batch_ids,
            entry_count,
        })
    }

    /// Retry a failed batch.
    ///
    /// Precondition: every batch with a smaller id is `Completed`; otherwise
    /// the retry is rejected. On acceptance only the target batch returns to
    /// `Pending` and the sequential sweep resumes from it.
    pub async fn retry(&self, batch_id: u64) -> Result<()> {
        {
            let mut inner = self.inner.write().await;
            let batch = inner
                .batches
                .iter()
                .find(|b| b.id == batch_id)
                .ok_or(OrchestratorError::BatchNotFound(batch_id))?;
            if batch.status != BatchState::Failed {
                return Err(OrchestratorError::RetryRejected {
                    batch_id,
                    reason: format!("batch is {}, only failed batches can be retried", batch.status),
                });
            }
            if batch.error.as_ref().is_some_and(|e| !e.retryable) {
                return Err(OrchestratorError::RetryRejected {
                    batch_id,
                    reason: "the failure is not retryable".into(),
                });
            }
            if inner
                .batches
                .iter()
                .any(|b| b.id < batch_id && b.status != BatchState::Completed)
            {
                return Err(OrchestratorError::RetryRejected {
                    batch_id,
                    reason: "precursor incomplete".into(),
                });
            }

            self.apply_transition(&mut inner, batch_id, BatchState::Pending, None, None)?;
            inner.halt_requested = false;
            Self::set_run_state(&self.events, &mut inner, RunState::Running);
        }

        info!(batch_id, "retry accepted, resuming sweep");
        self.persist().await;
        self.spawn_sweep();
        Ok(())
    }

    /// Stop the run: not-yet-started batches become `Stopped` and nothing
    /// further is scheduled. A call already in flight is not cancelled.
    /// Idempotent.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut inner = self.inner.write().await;
            inner.halt_requested = true;
            let pending: Vec<u64> = inner
                .batches
                .iter()
                .filter(|b| b.status == BatchState::Pending)
                .map(|b| b.id)
                .collect();
            for id in pending {
                let _ = self.apply_transition(&mut inner, id, BatchState::Stopped, None, None);
            }
            if inner.run_state != RunState::Idle {
                Self::set_run_state(&self.events, &mut inner, RunState::Aborted);
            }
        }
        self.persist().await;
        Ok(())
    }

    /// Clear the entire run (queue and stored snapshot) unconditionally
    pub async fn reset(&self) -> Result<()> {
        let account = {
            let mut inner = self.inner.write().await;
            inner.clear_run();
            Self::set_run_state(&self.events, &mut inner, RunState::Idle);
            inner.account.clone()
        };
        if let Some(account) = account {
            if let Err(err) = self.store.clear(&account).await {
                warn!(%err, "failed to clear stored run state");
            }
        }
        Ok(())
    }

    /// End the session: clear stored state for the acting account and drop
    /// all in-memory run state.
    pub async fn disconnect(&self) -> Result<()> {
        let account = {
            let mut inner = self.inner.write().await;
            inner.clear_run();
            inner.token = None;
            Self::set_run_state(&self.events, &mut inner, RunState::Idle);
            inner.account.take()
        };
        if let Some(account) = account {
            if let Err(err) = self.store.clear(&account).await {
                warn!(%err, "failed to clear stored state on disconnect");
            }
        }
        Ok(())
    }

    /// Resume the sweep over a recovered or halted queue
    pub fn resume(&self) {
        self.spawn_sweep();
    }

    /// Current observable run status
    pub async fn status(&self) -> RunStatus {
        let inner = self.inner.read().await;
        RunStatus {
            run_state: inner.run_state,
            completed_count: inner.completed_count,
            total_batches: inner.batches.len(),
            batches: inner
                .batches
                .iter()
                .map(|b| BatchSummary {
                    id: b.id,
                    status: b.status,
                    entry_count: b.entry_count(),
                    error: b.error.clone(),
                    tx_ref: b.tx_ref.clone(),
                })
                .collect(),
        }
    }

    /// Drive the sequential sweep until the queue drains or halts.
    ///
    /// Normally spawned internally by `submit`/`retry`; public so embedders
    /// can await completion directly.
    pub async fn drive(&self) {
        let _permit = self.sweep_lock.lock().await;

        {
            let mut inner = self.inner.write().await;
            if inner.batches.is_empty() || inner.halt_requested {
                return;
            }
            Self::set_run_state(&self.events, &mut inner, RunState::Running);
        }

        loop {
            let step = {
                let mut inner = self.inner.write().await;
                if inner.halt_requested || inner.batches.is_empty() {
                    Step::Halt
                } else {
                    match Self::next_eligible(&inner.batches) {
                        Some(idx) => {
                            let id = inner.batches[idx].id;
                            match self.apply_transition(&mut inner, id, BatchState::Processing, None, None) {
                                Ok(()) => {
                                    inner.batches[idx].awaiting_prior = false;
                                    let batch = inner.batches[idx].clone();
                                    match (inner.account.clone(), inner.token.clone()) {
                                        (Some(account), Some(token)) => {
                                            Step::Execute(batch, account, token)
                                        }
                                        _ => Step::Halt,
                                    }
                                }
                                Err(err) => {
                                    error!(batch_id = id, %err, "cannot schedule batch");
                                    Step::Halt
                                }
                            }
                        }
                        None if inner.batches.iter().all(|b| b.status == BatchState::Completed) => {
                            Self::set_run_state(&self.events, &mut inner, RunState::Drained);
                            Step::Drained
                        }
                        // A failed, stopped, or terminated batch blocks the
                        // rest of the queue; the sweep halts here.
                        None => Step::Halt,
                    }
                }
            };

            let (batch, account, token) = match step {
                Step::Execute(batch, account, token) => (batch, account, token),
                Step::Drained => {
                    info!("run drained");
                    self.persist().await;
                    return;
                }
                Step::Halt => return,
            };

            let result = self.executor.execute(&batch, &token.address, &account).await;
            let halted = {
                let mut inner = self.inner.write().await;
                match result {
                    Ok(receipt) => {
                        if self
                            .apply_transition(
                                &mut inner,
                                batch.id,
                                BatchState::Completed,
                                None,
                                Some(receipt.tx_reference.clone()),
                            )
                            .is_ok()
                        {
                            inner.completed_count += 1;
                            if let Some(next) =
                                inner.batches.iter_mut().find(|b| b.id == batch.id + 1)
                            {
                                next.awaiting_prior = false;
                            }
                        }
                        false
                    }
                    Err(err) if err.kind == ExecutionErrorKind::UserRejected => {
                        warn!(batch_id = batch.id, "signer declined; terminating remaining batches");
                        let _ = self.apply_transition(
                            &mut inner,
                            batch.id,
                            BatchState::Failed,
                            Some(err),
                            None,
                        );
                        self.cascade_terminate(&mut inner);
                        Self::set_run_state(&self.events, &mut inner, RunState::Aborted);
                        inner.halt_requested = true;
                        true
                    }
                    Err(err) => {
                        error!(batch_id = batch.id, %err, "batch failed; halting sweep");
                        let _ = self.apply_transition(
                            &mut inner,
                            batch.id,
                            BatchState::Failed,
                            Some(err),
                            None,
                        );
                        true
                    }
                }
            };

            self.persist().await;
            if halted {
                return;
            }
        }
    }

    fn spawn_sweep(&self) {
        let ctrl = self.clone();
        tokio::spawn(async move {
            ctrl.drive().await;
        });
    }

    /// A run owns the queue from partition until it drains, aborts, or is
    /// reset. The sweep task flips `Partitioned` to `Running` asynchronously,
    /// so the partitioned-with-batches window counts as live too; otherwise a
    /// second submit could replace a queue whose handle was already returned.
    fn run_is_live(inner: &RunInner) -> bool {
        inner.run_state == RunState::Running
            || (inner.run_state == RunState::Partitioned && !inner.batches.is_empty())
    }

    /// Index of the next schedulable batch: the first non-completed batch,
    /// but only if it is `Pending` (its predecessors are then all complete).
    fn next_eligible(batches: &[Batch]) -> Option<usize> {
        for (idx, batch) in batches.iter().enumerate() {
            match batch.status {
                BatchState::Completed => continue,
                BatchState::Pending => return Some(idx),
                _ => return None,
            }
        }
        None
    }

    /// Mark every incomplete batch `Terminated` (cascading abort)
    fn cascade_terminate(&self, inner: &mut RunInner) {
        let ids: Vec<u64> = inner
            .batches
            .iter()
            .filter(|b| matches!(b.status, BatchState::Pending | BatchState::Failed))
            .map(|b| b.id)
            .collect();
        for id in ids {
            let _ = self.apply_transition(inner, id, BatchState::Terminated, None, None);
        }
    }

    fn apply_transition(
        &self,
        inner: &mut RunInner,
        batch_id: u64,
        to: BatchState,
        error: Option<ExecutionError>,
        tx_ref: Option<String>,
    ) -> Result<()> {
        let batch = inner
            .batches
            .iter_mut()
            .find(|b| b.id == batch_id)
            .ok_or(OrchestratorError::BatchNotFound(batch_id))?;
        let from = batch.status;
        if !from.can_transition(to) {
            return Err(OrchestratorError::IllegalTransition { from, to });
        }
        batch.status = to;
        // A retry wipes the previous failure; otherwise the last recorded
        // error survives terminal transitions.
        if error.is_some() || to == BatchState::Pending {
            batch.error = error.clone();
        }
        if tx_ref.is_some() {
            batch.tx_ref = tx_ref.clone();
        }
        debug!(batch_id, %from, %to, "batch transition");
        let _ = self.events.send(RunEvent::BatchStatusChanged {
            batch_id,
            from,
            to,
            error,
            tx_ref,
        });
        Ok(())
    }

    fn set_run_state(
        events: &broadcast::Sender<RunEvent>,
        inner: &mut RunInner,
        state: RunState,
    ) {
        if inner.run_state != state {
            debug!(from = ?inner.run_state, to = ?state, "run transition");
            inner.run_state = state;
            let _ = events.send(RunEvent::RunStateChanged { state });
        }
    }

    /// Best-effort snapshot write; failures degrade to in-memory operation
    async fn persist(&self) {
        let payload = {
            let inner = self.inner.read().await;
            let (Some(account), Some(token)) = (inner.account.clone(), inner.token.clone()) else {
                return;
            };
            if inner.batches.is_empty() {
                return;
            }
            let incomplete: Vec<Batch> = inner
                .batches
                .iter()
                .filter(|b| b.status != BatchState::Completed)
                .cloned()
                .collect();
            let snapshot = RunSnapshot {
                account,
                token_address: token.address,
                token_symbol: token.symbol,
                token_decimals: token.decimals,
                completed_count: inner.completed_count,
                next_sequence_id: inner.next_sequence_id,
                incomplete_batch_ids: incomplete.iter().map(|b| b.id).collect(),
                saved_at: Utc::now(),
            };
            (snapshot, incomplete)
        };
        if let Err(err) = self.store.save(&payload.0, &payload.1).await {
            warn!(%err, "snapshot persistence failed; continuing in-memory only");
        }
    }

    /// Load and reconcile persisted state for `account`
    async fn recover(&self, account: &Address) -> Result<usize> {
        let loaded = match self.store.load(account).await {
            Ok(loaded) => loaded,
            Err(err) => {
                warn!(%err, "recovery failed; starting clean");
                None
            }
        };
        let Some((snapshot, mut batches)) = loaded else {
            return Ok(0);
        };

        // A batch persisted as Processing died mid-submission; its outcome
        // is unknowable client-side, so it must be explicitly retried.
        for batch in &mut batches {
            if batch.status == BatchState::Processing {
                batch.status = BatchState::Failed;
                batch.error = Some(ExecutionError::retryable(
                    ExecutionErrorKind::Unknown,
                    "interrupted before confirmation was observed",
                ));
            }
        }

        let restored = batches.len();
        {
            let mut inner = self.inner.write().await;
            inner.token = Some(TokenContext {
                address: snapshot.token_address.clone(),
                symbol: snapshot.token_symbol.clone(),
                decimals: snapshot.token_decimals,
            });
            inner.completed_count = snapshot.completed_count;
            inner.next_sequence_id = snapshot.next_sequence_id;
            inner.batches = batches;
            inner.halt_requested = false;
            if restored > 0 {
                Self::set_run_state(&self.events, &mut inner, RunState::Partitioned);
            }
        }

        if restored > 0 {
            info!(restored, account = %account, "restored incomplete batches");
            let _ = self.events.send(RunEvent::RunRecovered { restored });
        }
        Ok(restored)
    }
}
