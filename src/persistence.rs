//! Persistence Adapter: loads and saves configuration and usage snapshots.
//!
//! The wire format for usage snapshots keys each record as
//! `"<model>_<key>"`. That string is ambiguous to split back apart (model
//! names and keys may both contain underscores), so no code here ever
//! parses it — callers always reconstruct the expected key from the live
//! configuration and look it up, never the reverse.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::PersistError;

/// One `(timestamp_seconds, tokens)` entry in a cell's 24h history, as stored on disk.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UsageRecordWire {
    /// Unix timestamp in seconds.
    pub timestamp: i64,
    /// Tokens recorded at that instant.
    pub cost_token: u64,
}

/// On-disk representation of a single `UsageCell`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageCellWire {
    /// Lifetime token total, never decremented.
    pub total_tokens: u64,
    /// Tokens recorded since the last reset.
    pub today_usage: u64,
    /// 24h sliding-window history.
    pub past_24hrs_usage_data: Vec<UsageRecordWire>,
    /// Soft-disabled flag.
    pub probably_exceeded: bool,
    /// Hard-disabled flag.
    pub exceeded: bool,
}

/// Full usage snapshot file: `"<model>_<key>" -> UsageCellWire`.
pub type UsageSnapshotWire = HashMap<String, UsageCellWire>;

/// Build the wire-format key for a `(model, key)` pair.
///
/// This is the only place that constructs `"<model>_<key>"`; nothing ever
/// splits it back apart.
pub fn wire_key(model: &str, key: &str) -> String {
    format!("{model}_{key}")
}

/// Loads and saves configuration and usage snapshots.
///
/// Implemented by [`FilePersistence`] for production use; engine tests use
/// an in-memory double that implements the same trait.
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    /// Read the raw configuration file contents, if present.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError::Io`] for any failure other than "file not found".
    async fn load_config(&self) -> Result<Option<String>, PersistError>;

    /// Write the raw configuration file contents.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError::Io`] if the write fails.
    async fn save_config(&self, contents: &str) -> Result<(), PersistError>;

    /// Load the usage snapshot, if present.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError::Io`] on read failure or [`PersistError::Decode`]
    /// if the stored JSON does not match [`UsageSnapshotWire`].
    async fn load_usage(&self) -> Result<Option<UsageSnapshotWire>, PersistError>;

    /// Persist the usage snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`PersistError::Io`] if the write fails.
    async fn save_usage(&self, snapshot: &UsageSnapshotWire) -> Result<(), PersistError>;
}

/// Flat-file [`PersistenceAdapter`] backed by two JSON files on disk.
pub struct FilePersistence {
    config_path: PathBuf,
    usage_path: PathBuf,
}

impl FilePersistence {
    /// Build a file-backed adapter rooted at the given config/usage-snapshot paths.
    pub fn new(config_path: PathBuf, usage_path: PathBuf) -> Self {
        Self {
            config_path,
            usage_path,
        }
    }

    async fn read_optional(path: &Path) -> Result<Option<String>, PersistError> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(PersistError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    async fn write(path: &Path, contents: &str) -> Result<(), PersistError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|source| PersistError::Io {
                        path: parent.to_path_buf(),
                        source,
                    })?;
            }
        }
        tokio::fs::write(path, contents)
            .await
            .map_err(|source| PersistError::Io {
                path: path.to_path_buf(),
                source,
            })
    }
}

#[async_trait]
impl PersistenceAdapter for FilePersistence {
    async fn load_config(&self) -> Result<Option<String>, PersistError> {
        Self::read_optional(&self.config_path).await
    }

    async fn save_config(&self, contents: &str) -> Result<(), PersistError> {
        Self::write(&self.config_path, contents).await
    }

    async fn load_usage(&self) -> Result<Option<UsageSnapshotWire>, PersistError> {
        let Some(contents) = Self::read_optional(&self.usage_path).await? else {
            return Ok(None);
        };
        let snapshot = serde_json::from_str(&contents).map_err(|source| PersistError::Decode {
            path: self.usage_path.clone(),
            source,
        })?;
        Ok(Some(snapshot))
    }

    async fn save_usage(&self, snapshot: &UsageSnapshotWire) -> Result<(), PersistError> {
        let serialized = serde_json::to_string_pretty(snapshot).map_err(|source| {
            PersistError::Decode {
                path: self.usage_path.clone(),
                source,
            }
        })?;
        Self::write(&self.usage_path, &serialized).await
    }
}

/// In-memory [`PersistenceAdapter`] double used by engine tests.
#[derive(Default)]
pub struct MemoryPersistence {
    config: tokio::sync::Mutex<Option<String>>,
    usage: tokio::sync::Mutex<Option<UsageSnapshotWire>>,
}

impl MemoryPersistence {
    /// Build an empty in-memory adapter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the adapter with a pre-existing usage snapshot, as if loaded from disk.
    pub fn with_usage(snapshot: UsageSnapshotWire) -> Self {
        Self {
            config: tokio::sync::Mutex::new(None),
            usage: tokio::sync::Mutex::new(Some(snapshot)),
        }
    }
}

#[async_trait]
impl PersistenceAdapter for MemoryPersistence {
    async fn load_config(&self) -> Result<Option<String>, PersistError> {
        Ok(self.config.lock().await.clone())
    }

    async fn save_config(&self, contents: &str) -> Result<(), PersistError> {
        *self.config.lock().await = Some(contents.to_owned());
        Ok(())
    }

    async fn load_usage(&self) -> Result<Option<UsageSnapshotWire>, PersistError> {
        Ok(self.usage.lock().await.clone())
    }

    async fn save_usage(&self, snapshot: &UsageSnapshotWire) -> Result<(), PersistError> {
        *self.usage.lock().await = Some(snapshot.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_key_joins_model_and_key() {
        assert_eq!(wire_key("gpt", "sk-abc"), "gpt_sk-abc");
    }

    #[tokio::test]
    async fn file_persistence_round_trips_usage() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FilePersistence::new(
            dir.path().join("config.json"),
            dir.path().join("usage.json"),
        );
        assert!(adapter.load_usage().await.unwrap().is_none());

        let mut snapshot = UsageSnapshotWire::new();
        snapshot.insert(
            wire_key("gpt", "k1"),
            UsageCellWire {
                total_tokens: 42,
                today_usage: 10,
                past_24hrs_usage_data: vec![UsageRecordWire {
                    timestamp: 1_700_000_000,
                    cost_token: 10,
                }],
                probably_exceeded: false,
                exceeded: false,
            },
        );
        adapter.save_usage(&snapshot).await.unwrap();

        let loaded = adapter.load_usage().await.unwrap().unwrap();
        assert_eq!(loaded.get("gpt_k1").unwrap().total_tokens, 42);
    }

    #[tokio::test]
    async fn memory_persistence_seeds_usage() {
        let mut snapshot = UsageSnapshotWire::new();
        snapshot.insert(
            wire_key("gpt", "k1"),
            UsageCellWire {
                total_tokens: 1,
                today_usage: 1,
                past_24hrs_usage_data: vec![],
                probably_exceeded: false,
                exceeded: false,
            },
        );
        let adapter = MemoryPersistence::with_usage(snapshot);
        let loaded = adapter.load_usage().await.unwrap().unwrap();
        assert_eq!(loaded.len(), 1);
    }
}
