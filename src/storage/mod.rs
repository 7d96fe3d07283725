//! Run snapshot persistence
//!
//! Incomplete runs survive process restarts through a per-account snapshot
//! plus one record per incomplete batch. Keys embed the account identity so
//! switching accounts never reads another account's run. Completed batches
//! are garbage-collected on every save; a batch record too large for the
//! backend degrades to a reduced record that preserves status for display
//! but cannot be re-executed.

pub mod kv;

use crate::core::types::{Address, Batch, BatchState, RunSnapshot};
use crate::utils::error::{ExecutionError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

pub use kv::{FileStore, KeyValueStore, MemoryStore};

const KEY_PREFIX: &str = "batch_transfer";

/// Status-only fallback written when a full batch record does not fit.
///
/// Distinguished from a full [`Batch`] record by shape alone: it carries
/// `entry_count` and no `entries`, so a record is parsed as a `Batch` first
/// and as this second. An untagged enum cannot do that job here because
/// serde's untagged buffering does not survive `u128` amounts.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ReducedBatchRecord {
    id: u64,
    status: BatchState,
    #[serde(default)]
    error: Option<ExecutionError>,
    #[serde(default)]
    tx_ref: Option<String>,
    entry_count: usize,
}

/// Account-scoped snapshot store layered over a [`KeyValueStore`]
pub struct PersistenceStore {
    backend: Arc<dyn KeyValueStore>,
    max_record_bytes: usize,
}

impl PersistenceStore {
    pub fn new(backend: Arc<dyn KeyValueStore>, max_record_bytes: usize) -> Self {
        Self {
            backend,
            max_record_bytes,
        }
    }

    fn summary_key(account: &Address) -> String {
        format!("{KEY_PREFIX}_{account}")
    }

    fn batch_key(account: &Address, batch_id: u64) -> String {
        format!("{KEY_PREFIX}_{account}_batch_{batch_id}")
    }

    /// Persist the run snapshot and every incomplete batch.
    ///
    /// Detail records for batches no longer incomplete are deleted. A record
    /// that exceeds the size limit, or that the backend rejects, is rewritten
    /// in reduced form.
    pub async fn save(&self, snapshot: &RunSnapshot, incomplete: &[Batch]) -> Result<()> {
        let account = &snapshot.account;
        let summary = serde_json::to_string(snapshot)?;
        self.backend.put(&Self::summary_key(account), &summary).await?;

        for batch in incomplete {
            let key = Self::batch_key(account, batch.id);
            let full = serde_json::to_string(batch)?;

            let wrote_full = if full.len() <= self.max_record_bytes {
                match self.backend.put(&key, &full).await {
                    Ok(()) => true,
                    Err(err) => {
                        debug!(batch_id = batch.id, %err, "full record rejected, reducing");
                        false
                    }
                }
            } else {
                false
            };

            if !wrote_full {
                warn!(
                    batch_id = batch.id,
                    bytes = full.len(),
                    "batch record too large, storing status only"
                );
                let reduced = serde_json::to_string(&ReducedBatchRecord {
                    id: batch.id,
                    status: batch.status,
                    error: batch.error.clone(),
                    tx_ref: batch.tx_ref.clone(),
                    entry_count: batch.entry_count(),
                })?;
                self.backend.put(&key, &reduced).await?;
            }
        }

        self.purge_completed(account, incomplete).await
    }

    /// Drop detail records for batches no longer in the incomplete set
    pub async fn purge_completed(&self, account: &Address, incomplete: &[Batch]) -> Result<()> {
        let detail_prefix = format!("{}_batch_", Self::summary_key(account));
        for key in self.backend.keys_with_prefix(&detail_prefix).await? {
            let id: Option<u64> = key.strip_prefix(&detail_prefix).and_then(|s| s.parse().ok());
            if id.is_some_and(|id| !incomplete.iter().any(|b| b.id == id)) {
                self.backend.delete(&key).await?;
            }
        }
        Ok(())
    }

    /// Load the persisted run for `account`.
    ///
    /// Returns `None` when nothing is stored. Reduced records are skipped
    /// (their entries are gone, so they cannot be re-executed). A record
    /// that fails to parse means the stored state is unusable; everything
    /// for the account is cleared and the load reports a clean slate.
    pub async fn load(&self, account: &Address) -> Result<Option<(RunSnapshot, Vec<Batch>)>> {
        let Some(raw) = self.backend.get(&Self::summary_key(account)).await? else {
            return Ok(None);
        };

        let snapshot: RunSnapshot = match serde_json::from_str(&raw) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(%err, account = %account, "stored snapshot unreadable, clearing");
                self.clear(account).await?;
                return Ok(None);
            }
        };

        let mut batches = Vec::new();
        for &id in &snapshot.incomplete_batch_ids {
            let Some(raw) = self.backend.get(&Self::batch_key(account, id)).await? else {
                warn!(batch_id = id, "batch record missing, skipping");
                continue;
            };
            match serde_json::from_str::<Batch>(&raw) {
                Ok(batch) => batches.push(batch),
                Err(_) => match serde_json::from_str::<ReducedBatchRecord>(&raw) {
                    Ok(record) => {
                        warn!(
                            batch_id = record.id,
                            entry_count = record.entry_count,
                            "reduced record cannot be re-executed, skipping"
                        );
                    }
                    Err(err) => {
                        warn!(batch_id = id, %err, "stored batch unreadable, clearing account state");
                        self.clear(account).await?;
                        return Ok(None);
                    }
                },
            }
        }

        batches.sort_by_key(|b| b.id);
        Ok(Some((snapshot, batches)))
    }

    /// Delete everything stored for `account`
    pub async fn clear(&self, account: &Address) -> Result<()> {
        for key in self
            .backend
            .keys_with_prefix(&Self::summary_key(account))
            .await?
        {
            self.backend.delete(&key).await?;
        }
        Ok(())
    }
}
