//! Key-value storage backends
//!
//! The persistence layer speaks a minimal string-keyed interface so the
//! orchestrator can run against an in-memory map in tests and a directory of
//! JSON files in deployments.

use crate::utils::error::{OrchestratorError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Minimal string-keyed store
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write `value` under `key`. Backends with bounded capacity return
    /// `OrchestratorError::Persistence` when the write does not fit.
    async fn put(&self, key: &str, value: &str) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

/// In-memory backend, optionally with a total-bytes quota
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that rejects writes once total stored bytes would exceed
    /// `quota_bytes`. Mirrors browser-local storage quota behavior.
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    fn used_bytes(entries: &HashMap<String, String>, excluding: &str) -> usize {
        entries
            .iter()
            .filter(|(k, _)| k.as_str() != excluding)
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.write();
        if let Some(quota) = self.quota_bytes {
            let used = Self::used_bytes(&entries, key);
            if used + key.len() + value.len() > quota {
                return Err(OrchestratorError::Persistence(format!(
                    "write of {} bytes exceeds storage quota",
                    value.len()
                )));
            }
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .entries
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// File-backed store: one `<key>.json` file per key under a directory
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys are account/batch identifiers (hex and underscores), safe as
        // file names.
        self.dir.join(format!("{key}.json"))
    }

    fn key_for(path: &Path) -> Option<String> {
        let name = path.file_name()?.to_str()?;
        name.strip_suffix(".json").map(str::to_string)
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.path_for(key), value).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(keys),
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = dir.next_entry().await? {
            if let Some(key) = Self::key_for(&entry.path()) {
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}
