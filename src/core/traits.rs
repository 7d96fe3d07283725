//! External collaborator seams
//!
//! The orchestrator core depends only on these narrow capabilities, never on
//! a concrete wallet, node, or contract binding. Implementations live with
//! the embedding application; tests script them.

use crate::core::types::{Address, Amount, Receipt};
use async_trait::async_trait;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

/// Raw failure payload from a remote call, before classification
///
/// Carries whatever the node/wallet reported; the executor inspects `code`
/// and `message` to classify the failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RemoteCallError {
    /// Provider error code when one was reported (e.g. 4001 for rejection)
    pub code: Option<i64>,
    /// Raw error message
    pub message: String,
}

impl RemoteCallError {
    /// Build an error from a bare message
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    /// Build an error carrying a provider code
    pub fn coded(code: i64, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }
}

/// A transaction accepted by the network but not yet confirmed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransfer {
    /// Chain transaction reference (hash)
    pub tx_reference: String,
}

/// Wallet / signer capability
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChainSigner: Send + Sync {
    /// Request account access from the wallet
    async fn request_accounts(&self) -> Result<Vec<Address>, RemoteCallError>;

    /// The currently selected account, if any
    fn current_account(&self) -> Option<Address>;

    /// Native currency balance of an address
    async fn native_balance_of(&self, address: &Address) -> Result<Amount, RemoteCallError>;

    /// Switch the wallet to the configured chain, adding it if unknown
    async fn switch_or_add_chain(&self, chain_id: u64) -> Result<(), RemoteCallError>;
}

/// The remote batch-transfer contract
///
/// Capacity is limited to 200 recipients per call; the contract enforces
/// this on-chain and the executor enforces it client-side.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BatchTransferService: Send + Sync {
    /// Per-recipient fee in native currency base units
    async fn fee_per_address(&self) -> Result<Amount, RemoteCallError>;

    /// Submit a batch transfer carrying `value` native currency as fee.
    ///
    /// Resolves once the network has accepted the transaction.
    async fn batch_transfer(
        &self,
        token: &Address,
        recipients: &[Address],
        amounts: &[Amount],
        value: Amount,
    ) -> Result<PendingTransfer, RemoteCallError>;

    /// Wait for the transaction to be confirmed
    async fn await_confirmation(&self, tx: &PendingTransfer) -> Result<Receipt, RemoteCallError>;
}

/// ERC20 token capability
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TokenService: Send + Sync {
    /// Token balance of `owner`
    async fn balance_of(&self, token: &Address, owner: &Address) -> Result<Amount, RemoteCallError>;

    /// Remaining allowance granted by `owner` to `spender`
    async fn allowance(
        &self,
        token: &Address,
        owner: &Address,
        spender: &Address,
    ) -> Result<Amount, RemoteCallError>;

    /// Approve `spender` for `amount`; resolves on confirmation
    async fn approve(
        &self,
        token: &Address,
        spender: &Address,
        amount: Amount,
    ) -> Result<PendingTransfer, RemoteCallError>;

    /// Token decimals
    async fn decimals(&self, token: &Address) -> Result<u8, RemoteCallError>;

    /// Token display symbol
    async fn symbol(&self, token: &Address) -> Result<String, RemoteCallError>;
}
