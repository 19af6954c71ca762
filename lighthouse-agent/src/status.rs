//! Status ledger shared by all instance workers
//!
//! One record per instance, overwritten on every cycle outcome. The map lives behind
//! a `parking_lot::Mutex` that is never held across an await; persistence to
//! `status.json` happens after the lock is released and is best-effort.

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceStatus {
    /// Unix seconds of the last recorded outcome
    pub last_contact: i64,
    pub last_error: String,
    pub healthy: bool,
}

pub type StatusMap = HashMap<String, InstanceStatus>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StatusFile {
    #[serde(default)]
    instances: StatusMap,
}

#[derive(Clone)]
pub struct StatusLedger {
    inner: Arc<LedgerInner>,
}

struct LedgerInner {
    records: Mutex<StatusMap>,
    path: Option<PathBuf>,
    // Serializes file writers so the newest snapshot is always written last
    persist: tokio::sync::Mutex<()>,
}

impl StatusLedger {
    /// Ledger without persistence
    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self::with_records(None, StatusMap::new())
    }

    /// Ledger persisted to `path`, seeded with whatever that file already holds
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = Self::read_file(&path);
        debug!("Status ledger opened at {} ({} records)", path.display(), records.len());
        Self::with_records(Some(path), records)
    }

    fn with_records(path: Option<PathBuf>, records: StatusMap) -> Self {
        Self {
            inner: Arc::new(LedgerInner {
                records: Mutex::new(records),
                path,
                persist: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Overwrite the record of `name` with the current time and the given outcome
    pub async fn update<E: Display>(&self, name: &str, error: Option<E>) {
        let status = InstanceStatus {
            last_contact: Utc::now().timestamp(),
            healthy: error.is_none(),
            last_error: error.map(|e| e.to_string()).unwrap_or_default(),
        };

        self.inner.records.lock().insert(name.to_string(), status);
        self.persist().await;
    }

    /// Coherent copy of every record
    pub fn snapshot(&self) -> StatusMap {
        self.inner.records.lock().clone()
    }

    #[cfg(test)]
    pub fn get(&self, name: &str) -> Option<InstanceStatus> {
        self.inner.records.lock().get(name).cloned()
    }

    async fn persist(&self) {
        let Some(path) = &self.inner.path else {
            return;
        };

        let _writer = self.inner.persist.lock().await;
        let file = StatusFile { instances: self.snapshot() };

        let content = match serde_json::to_string_pretty(&file) {
            Ok(content) => content,
            Err(e) => {
                warn!("Failed to encode status ledger: {}", e);
                return;
            }
        };

        if let Err(e) = write_atomic(path, content.as_bytes()).await {
            debug!("Failed to persist status to {}: {}", path.display(), e);
        }
    }

    /// Read a persisted status file; missing or corrupt files read as empty
    pub fn read_file(path: &Path) -> StatusMap {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|content| serde_json::from_str::<StatusFile>(&content).ok())
            .map(|file| file.instances)
            .unwrap_or_default()
    }
}

async fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, content).await?;
    tokio::fs::rename(&tmp, path).await
}
