//! Batch execution against the remote transfer contract
//!
//! One batch at a time: check local preconditions, query the per-recipient
//! fee, verify the native balance covers it, submit the value-bearing call,
//! and wait for confirmation. Remote failures are classified into the closed
//! error taxonomy by inspecting the raw payload.

use crate::core::traits::{BatchTransferService, ChainSigner, RemoteCallError, TokenService};
use crate::core::types::{Address, Amount, Batch, Receipt};
use crate::utils::error::{ExecutionError, ExecutionErrorKind};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Classify a raw remote failure payload.
///
/// Keyword matching mirrors what wallets and nodes actually report: provider
/// code 4001 or "user rejected"/"user denied" for an explicit decline,
/// "insufficient funds" for fee shortfall, "allowance" for ERC20 approvals,
/// connectivity vocabulary for network trouble, and "revert" for an on-chain
/// failure. Everything else is `Unknown` but still retryable; only
/// structurally invalid requests are fatal and those never reach submission.
pub fn classify_remote_error(err: &RemoteCallError) -> ExecutionError {
    let msg = err.message.to_lowercase();

    if err.code == Some(4001) || msg.contains("user rejected") || msg.contains("user denied") {
        return ExecutionError::retryable(
            ExecutionErrorKind::UserRejected,
            "the signer declined the transaction",
        );
    }
    if msg.contains("insufficient funds") {
        return ExecutionError::retryable(
            ExecutionErrorKind::InsufficientFunds,
            "native balance cannot cover the transaction fee",
        );
    }
    if msg.contains("allowance") {
        return ExecutionError::retryable(
            ExecutionErrorKind::InsufficientAllowance,
            "token allowance for the batch contract is too low",
        );
    }
    if msg.contains("network")
        || msg.contains("timeout")
        || msg.contains("connection")
        || msg.contains("disconnected")
    {
        return ExecutionError::retryable(
            ExecutionErrorKind::NetworkError,
            format!("network failure: {}", err.message),
        );
    }
    if msg.contains("revert") {
        return ExecutionError::retryable(
            ExecutionErrorKind::ContractReverted,
            format!("contract call reverted: {}", err.message),
        );
    }

    ExecutionError::retryable(ExecutionErrorKind::Unknown, err.message.clone())
}

/// Executes single batches against the remote batch-transfer contract
pub struct TransferExecutor {
    signer: Arc<dyn ChainSigner>,
    service: Arc<dyn BatchTransferService>,
    tokens: Arc<dyn TokenService>,
    /// Address of the batch-transfer contract (the allowance spender)
    contract_address: Address,
    capacity: usize,
}

impl TransferExecutor {
    pub fn new(
        signer: Arc<dyn ChainSigner>,
        service: Arc<dyn BatchTransferService>,
        tokens: Arc<dyn TokenService>,
        contract_address: Address,
        capacity: usize,
    ) -> Self {
        Self {
            signer,
            service,
            tokens,
            contract_address,
            capacity: capacity.max(1),
        }
    }

    /// Execute one batch: preconditions, fee, submission, confirmation.
    ///
    /// Local precondition failures are returned without any remote call.
    pub async fn execute(
        &self,
        batch: &Batch,
        token: &Address,
        account: &Address,
    ) -> Result<Receipt, ExecutionError> {
        self.check_local_preconditions(batch)?;

        let fee = self
            .service
            .fee_per_address()
            .await
            .map_err(|e| classify_remote_error(&e))?;
        let total_fee = fee.checked_mul(batch.entry_count() as u128).ok_or_else(|| {
            ExecutionError::fatal(ExecutionErrorKind::Unknown, "total fee overflows 128 bits")
        })?;

        let native = self
            .signer
            .native_balance_of(account)
            .await
            .map_err(|e| classify_remote_error(&e))?;
        if native < total_fee {
            return Err(ExecutionError::retryable(
                ExecutionErrorKind::InsufficientFunds,
                format!(
                    "native balance {native} cannot cover the batch fee {total_fee} \
                     ({} recipients)",
                    batch.entry_count()
                ),
            ));
        }

        let recipients: Vec<Address> = batch.entries.iter().map(|e| e.address.clone()).collect();
        let amounts: Vec<Amount> = batch.entries.iter().map(|e| e.amount).collect();

        debug!(
            batch_id = batch.id,
            recipients = recipients.len(),
            total_fee,
            "submitting batch transfer"
        );
        let pending = self
            .service
            .batch_transfer(token, &recipients, &amounts, total_fee)
            .await
            .map_err(|e| classify_remote_error(&e))?;

        info!(batch_id = batch.id, tx = %pending.tx_reference, "batch accepted, awaiting confirmation");
        let receipt = self
            .service
            .await_confirmation(&pending)
            .await
            .map_err(|e| classify_remote_error(&e))?;

        info!(batch_id = batch.id, tx = %receipt.tx_reference, "batch confirmed");
        Ok(receipt)
    }

    /// Verify token balance and allowance cover `run_total`, approving the
    /// batch contract for the shortfall case.
    ///
    /// Called once per submitted run, before partition execution begins.
    pub async fn ensure_token_preconditions(
        &self,
        token: &Address,
        account: &Address,
        run_total: Amount,
    ) -> Result<(), ExecutionError> {
        let balance = self
            .tokens
            .balance_of(token, account)
            .await
            .map_err(|e| classify_remote_error(&e))?;
        if balance < run_total {
            return Err(ExecutionError::retryable(
                ExecutionErrorKind::InsufficientFunds,
                format!("token balance {balance} is below the run total {run_total}"),
            ));
        }

        let allowance = self
            .tokens
            .allowance(token, account, &self.contract_address)
            .await
            .map_err(|e| classify_remote_error(&e))?;
        if allowance < run_total {
            warn!(%token, allowance, run_total, "allowance short, requesting approval");
            self.tokens
                .approve(token, &self.contract_address, run_total)
                .await
                .map_err(|e| classify_remote_error(&e))?;
        }

        Ok(())
    }

    fn check_local_preconditions(&self, batch: &Batch) -> Result<(), ExecutionError> {
        if batch.entries.is_empty() {
            return Err(ExecutionError::fatal(
                ExecutionErrorKind::Capacity,
                "batch has no entries",
            ));
        }
        if batch.entry_count() > self.capacity {
            return Err(ExecutionError::fatal(
                ExecutionErrorKind::Capacity,
                format!(
                    "batch of {} entries exceeds capacity {}",
                    batch.entry_count(),
                    self.capacity
                ),
            ));
        }
        for entry in &batch.entries {
            if !Address::is_valid(entry.address.as_str()) {
                return Err(ExecutionError::fatal(
                    ExecutionErrorKind::Precondition,
                    format!("malformed address {}", entry.address),
                ));
            }
            if entry.amount == 0 {
                return Err(ExecutionError::fatal(
                    ExecutionErrorKind::Precondition,
                    format!("entry {} has a zero amount", entry.ordinal),
                ));
            }
        }
        Ok(())
    }
}
