//! State Store
//!
//! Durable map of the last validated balance per tracked label, used for
//! crash recovery: after a restart the next poll cycle diffs against this
//! file instead of treating every address as a cold start.
//!
//! Flushes write a temp file next to the target, fsync it, then rename it
//! over the old file, so readers only ever see a complete document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::balance::{Confidence, ValidatedBalance};

/// Default state file name
pub const DEFAULT_STATE_FILE: &str = "tracker_state.json";

/// Current on-disk format version
pub const STATE_FORMAT_VERSION: u32 = 1;

#[derive(Error, Debug, Clone)]
pub enum PersistError {
    #[error("Failed to serialize state: {0}")]
    SerializationError(String),

    #[error("Failed to write state file: {0}")]
    WriteError(String),

    #[error("Failed to read state file: {0}")]
    ReadError(String),

    #[error("State file is corrupted: {0}")]
    CorruptedFile(String),

    #[error("Failed to create directory: {0}")]
    DirectoryError(String),
}

/// One persisted balance. Fields past `observed_at` are optional on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredBalance {
    pub balance: u64,
    pub observed_at: DateTime<Utc>,
    #[serde(default)]
    pub confidence: Confidence,
    #[serde(default = "default_confirmations")]
    pub confirmations: u32,
}

fn default_confirmations() -> u32 {
    1
}

/// Whole state document as written to disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub balances: BTreeMap<String, StoredBalance>,
}

fn default_version() -> u32 {
    STATE_FORMAT_VERSION
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            version: STATE_FORMAT_VERSION,
            updated_at: None,
            balances: BTreeMap::new(),
        }
    }
}

impl PersistedState {
    /// Parse a state file; missing or empty file is an empty state
    pub fn load(path: &Path) -> Result<Option<Self>, PersistError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(path)
            .map_err(|e| PersistError::ReadError(e.to_string()))?;

        if content.trim().is_empty() {
            return Ok(None);
        }

        let state: Self = serde_json::from_str(&content)
            .map_err(|e| PersistError::CorruptedFile(e.to_string()))?;

        Ok(Some(state))
    }
}

/// Single-writer store of validated balances
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    entries: BTreeMap<String, StoredBalance>,
    updated_at: Option<DateTime<Utc>>,
}

impl StateStore {
    /// Empty store that will flush to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: BTreeMap::new(),
            updated_at: None,
        }
    }

    /// Load the last flushed state, or an empty store on cold start
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, PersistError> {
        let path = path.into();
        let mut store = Self::new(path.clone());

        if let Some(state) = PersistedState::load(&path)? {
            if state.version > STATE_FORMAT_VERSION {
                tracing::warn!(
                    "State file {} has newer format version {} (supported: {})",
                    path.display(),
                    state.version,
                    STATE_FORMAT_VERSION
                );
            }
            tracing::info!(
                "State loaded: {} balances from {}",
                state.balances.len(),
                path.display()
            );
            store.entries = state.balances;
            store.updated_at = state.updated_at;
        } else {
            tracing::info!("No state at {} - cold start", path.display());
        }

        Ok(store)
    }

    /// Consistent read of the last flushed file for concurrent readers
    pub fn read_snapshot(path: &Path) -> Result<PersistedState, PersistError> {
        Ok(PersistedState::load(path)?.unwrap_or_default())
    }

    pub fn get(&self, label: &str) -> Option<ValidatedBalance> {
        self.entries.get(label).map(|s| ValidatedBalance {
            label: label.to_string(),
            balance: s.balance,
            confidence: s.confidence,
            confirmations: s.confirmations,
            observed_at: s.observed_at,
        })
    }

    pub fn set(&mut self, value: &ValidatedBalance) {
        self.entries.insert(
            value.label.clone(),
            StoredBalance {
                balance: value.balance,
                observed_at: value.observed_at,
                confidence: value.confidence,
                confirmations: value.confirmations,
            },
        );
    }

    /// All stored balances in label order
    pub fn all(&self) -> Vec<ValidatedBalance> {
        self.entries
            .keys()
            .filter_map(|label| self.get(label))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically replace the state file with the in-memory map
    pub fn flush(&mut self) -> Result<(), PersistError> {
        let now = Utc::now();
        let doc = PersistedState {
            version: STATE_FORMAT_VERSION,
            updated_at: Some(now),
            balances: self.entries.clone(),
        };
        let content = serde_json::to_string_pretty(&doc)
            .map_err(|e| PersistError::SerializationError(e.to_string()))?;

        write_atomic(&self.path, content.as_bytes())?;
        self.updated_at = Some(now);

        tracing::debug!("State flushed: {} balances to {}", self.entries.len(), self.path.display());
        Ok(())
    }

    /// Set every update and flush; on failure the in-memory map is restored
    pub fn apply_and_flush(&mut self, updates: &[ValidatedBalance]) -> Result<(), PersistError> {
        let previous = self.entries.clone();
        for update in updates {
            self.set(update);
        }

        if let Err(e) = self.flush() {
            self.entries = previous;
            return Err(e);
        }
        Ok(())
    }

    /// Default state path for a data directory
    pub fn default_path(data_dir: &Path) -> PathBuf {
        data_dir.join(DEFAULT_STATE_FILE)
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PersistError> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .map_err(|e| PersistError::DirectoryError(e.to_string()))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| DEFAULT_STATE_FILE.to_string());
    let tmp_path = parent.join(format!(".{}.tmp", file_name));

    let result = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)?;
        // Persist the rename itself
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
        Ok(())
    })();

    result.map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        PersistError::WriteError(format!("{}: {}", path.display(), e))
    })
}
