// src/pipeline/offline.rs
//! Durable offline persistence
//!
//! One fixed storage key holds a JSON array of undelivered report items:
//! read-and-clear on startup (and on the online transition), append on
//! archival, overwrite on teardown. `persist` is synchronous because the
//! teardown path cannot await.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

use super::ReportItem;
use crate::utils::{Result, SdkError};

/// Key/value persistence medium for the offline queue.
#[async_trait]
pub trait OfflineStore: Send + Sync {
    /// Read the persisted backlog and clear the stored copy.
    async fn load_and_clear(&self) -> Result<Vec<ReportItem>>;

    /// Append archived items to the stored backlog.
    async fn append(&self, items: &[ReportItem]) -> Result<()>;

    /// Overwrite the stored backlog. Synchronous: runs on page teardown.
    fn persist(&self, items: &[ReportItem]) -> Result<()>;
}

/// File-backed store: `<dir>/<key>.json`.
pub struct FileOfflineStore {
    path: PathBuf,
}

impl FileOfflineStore {
    pub fn new(dir: impl AsRef<Path>, key: &str) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .map_err(|e| SdkError::Storage(format!("create {}: {e}", dir.display())))?;
        Ok(Self {
            path: dir.join(format!("{key}.json")),
        })
    }

    fn read_items(&self) -> Result<Vec<ReportItem>> {
        match std::fs::read(&self.path) {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(SdkError::Storage(format!(
                "read {}: {e}",
                self.path.display()
            ))),
        }
    }

    fn write_items(&self, items: &[ReportItem]) -> Result<()> {
        let raw = serde_json::to_vec(items)?;
        std::fs::write(&self.path, raw)
            .map_err(|e| SdkError::Storage(format!("write {}: {e}", self.path.display())))
    }
}

#[async_trait]
impl OfflineStore for FileOfflineStore {
    async fn load_and_clear(&self) -> Result<Vec<ReportItem>> {
        let items = self.read_items()?;
        if !items.is_empty() {
            info!(count = items.len(), "restoring offline backlog");
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(SdkError::Storage(format!(
                    "clear {}: {e}",
                    self.path.display()
                )))
            }
        }
        Ok(items)
    }

    async fn append(&self, items: &[ReportItem]) -> Result<()> {
        let mut stored = self.read_items()?;
        stored.extend_from_slice(items);
        debug!(appended = items.len(), total = stored.len(), "archived items");
        self.write_items(&stored)
    }

    fn persist(&self, items: &[ReportItem]) -> Result<()> {
        self.write_items(items)
    }
}

/// In-memory store for tests and ephemeral embedders.
#[derive(Default)]
pub struct MemoryOfflineStore {
    items: Mutex<Vec<ReportItem>>,
}

impl MemoryOfflineStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Current stored backlog, without clearing it.
    pub fn stored(&self) -> Vec<ReportItem> {
        self.items.lock().clone()
    }
}

#[async_trait]
impl OfflineStore for MemoryOfflineStore {
    async fn load_and_clear(&self) -> Result<Vec<ReportItem>> {
        Ok(std::mem::take(&mut *self.items.lock()))
    }

    async fn append(&self, items: &[ReportItem]) -> Result<()> {
        self.items.lock().extend_from_slice(items);
        Ok(())
    }

    fn persist(&self, items: &[ReportItem]) -> Result<()> {
        *self.items.lock() = items.to_vec();
        Ok(())
    }
}
