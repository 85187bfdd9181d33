//! Breakpoint persistence
//!
//! A breakpoint is the resume metadata of an unfinished download: how many bytes
//! of the temp file are valid, the total size and the etag the server reported.
//! The engine saves one at connect, on every delivered progress notification, and
//! when a transfer stops early (retry, pause, error). It loads it when a task
//! starts and removes it when the download completes.
//!
//! ## Submodules
//!
//! - [`sqlite`] - SQLite-backed store for breakpoints that survive restarts

use crate::error::Result;
use crate::task::DownloadTask;
use crate::types::TaskId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::warn;

pub mod sqlite;

pub use sqlite::SqliteBreakpointStore;

/// Resume metadata for one task
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakpoint {
    /// Task the breakpoint belongs to
    pub id: TaskId,
    /// URL the partial data came from
    pub url: String,
    /// Configured path (file or directory)
    pub path: PathBuf,
    /// Resolved filename, needed to find the temp file of a directory task
    pub filename: Option<String>,
    /// ETag reported at the last connect
    pub etag: Option<String>,
    /// Valid bytes in the temp file
    pub so_far_bytes: u64,
    /// Total size (0 = unknown)
    pub total_bytes: u64,
    /// Whether the server accepted range requests
    pub resumable: bool,
    /// When the breakpoint was last written
    pub updated_at: DateTime<Utc>,
}

/// Storage for breakpoints
///
/// Implementations must be cheap to call from the transfer loop; the engine calls
/// [`save`](BreakpointStore::save) once per delivered progress notification.
#[async_trait]
pub trait BreakpointStore: Send + Sync {
    /// Load the breakpoint for a task, if any
    async fn load(&self, id: TaskId) -> Result<Option<Breakpoint>>;

    /// Insert or replace a breakpoint
    async fn save(&self, breakpoint: &Breakpoint) -> Result<()>;

    /// Delete a breakpoint; deleting a missing one is not an error
    async fn remove(&self, id: TaskId) -> Result<()>;

    /// Name of this store (for logging)
    fn name(&self) -> &'static str;
}

impl Breakpoint {
    /// Snapshot a task's current transfer state
    pub fn capture(task: &DownloadTask) -> Self {
        let state = task.transfer_state();
        Self {
            id: task.id(),
            url: task.url(),
            path: task.path().unwrap_or_default(),
            filename: task.filename(),
            etag: state.etag,
            so_far_bytes: state.so_far,
            total_bytes: state.total,
            resumable: state.resumable,
            updated_at: Utc::now(),
        }
    }
}

/// Save the task's breakpoint, logging instead of failing
///
/// Losing a breakpoint only costs a later resume, so the transfer goes on.
pub(crate) async fn persist(task: &DownloadTask, store: &dyn BreakpointStore) {
    let breakpoint = Breakpoint::capture(task);
    if let Err(e) = store.save(&breakpoint).await {
        warn!(
            task_id = %breakpoint.id,
            store = store.name(),
            error = %e,
            "failed to save breakpoint"
        );
    }
}

/// Process-local breakpoint store
///
/// Breakpoints survive pause and reuse within the process, not restarts.
#[derive(Debug, Default)]
pub struct MemoryBreakpointStore {
    entries: Mutex<HashMap<TaskId, Breakpoint>>,
}

impl MemoryBreakpointStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored breakpoints
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether the store is empty
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl BreakpointStore for MemoryBreakpointStore {
    async fn load(&self, id: TaskId) -> Result<Option<Breakpoint>> {
        Ok(self.entries.lock().await.get(&id).cloned())
    }

    async fn save(&self, breakpoint: &Breakpoint) -> Result<()> {
        self.entries
            .lock()
            .await
            .insert(breakpoint.id, breakpoint.clone());
        Ok(())
    }

    async fn remove(&self, id: TaskId) -> Result<()> {
        self.entries.lock().await.remove(&id);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
