//! Orchestrator configuration
//!
//! Loaded from YAML or built in code; every section has working defaults for
//! the DFC Chain deployment so an empty file is a valid configuration.
//! Validation collects every problem before reporting.

use crate::core::types::Address;
use crate::utils::error::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default batch-transfer contract deployment
pub const DEFAULT_CONTRACT_ADDRESS: &str = "0x1E511E790Dc2CbDd6DA739b20e8a441Ccef1d9f8";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Maximum recipients per batch (contract enforces 200)
    pub batch_capacity: usize,
    /// Deployed batch-transfer contract
    pub contract_address: String,
    pub chain: ChainConfig,
    pub storage: StorageConfig,
    /// Seconds to wait for a submitted transaction to confirm
    pub confirmation_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub chain_name: String,
    pub explorer_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Largest serialized batch record written in full; larger records are
    /// reduced to status-only form
    pub max_record_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageBackend {
    Memory,
    File { dir: PathBuf },
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            batch_capacity: crate::core::partitioner::DEFAULT_BATCH_CAPACITY,
            contract_address: DEFAULT_CONTRACT_ADDRESS.to_string(),
            chain: ChainConfig::default(),
            storage: StorageConfig::default(),
            confirmation_timeout_secs: 300,
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_id: 920,
            chain_name: "DFC Chain".to_string(),
            explorer_url: "https://dfscan.dfcscan.io".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            max_record_bytes: 64 * 1024,
        }
    }
}

impl Default for StorageBackend {
    fn default() -> Self {
        Self::Memory
    }
}

impl OrchestratorConfig {
    /// Load and validate a YAML configuration file
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path.as_ref()).await?;
        let config: Self = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every field, reporting all problems at once
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.batch_capacity == 0 || self.batch_capacity > 200 {
            problems.push(format!(
                "batch_capacity must be between 1 and 200, got {}",
                self.batch_capacity
            ));
        }
        if Address::parse(&self.contract_address).is_err() {
            problems.push(format!(
                "contract_address \"{}\" is not a valid address",
                self.contract_address
            ));
        }
        if self.chain.chain_id == 0 {
            problems.push("chain.chain_id must be non-zero".to_string());
        }
        if self.chain.explorer_url.is_empty() {
            problems.push("chain.explorer_url must not be empty".to_string());
        }
        if self.storage.max_record_bytes == 0 {
            problems.push("storage.max_record_bytes must be non-zero".to_string());
        }
        if self.confirmation_timeout_secs == 0 {
            problems.push("confirmation_timeout_secs must be non-zero".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(OrchestratorError::Config(problems.join("; ")))
        }
    }

    /// The validated contract address
    pub fn contract_address(&self) -> Result<Address> {
        Address::parse(&self.contract_address)
            .map_err(|err| OrchestratorError::Config(err.to_string()))
    }

    /// Explorer link for a transaction reference
    pub fn explorer_tx_url(&self, tx_reference: &str) -> String {
        format!("{}/tx/{}", self.chain.explorer_url.trim_end_matches('/'), tx_reference)
    }
}
