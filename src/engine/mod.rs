//! Download engine
//!
//! The [`DownloadEngine`] owns the collaborators every task shares (transport,
//! breakpoint store, callback dispatchers, concurrency limit) and drives started
//! tasks through their lifecycle on tokio workers.
//!
//! Methods are organized by concern:
//! - [`control`] - start, pause, launch failures
//! - [`lifecycle`] - graceful shutdown
//! - [`worker`] - the per-task transfer loop
//! - [`registry`] - the active-task registry

mod control;
mod lifecycle;
mod registry;
mod worker;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::config::Config;
use crate::dispatch::{Dispatcher, SerialDispatcher};
use crate::error::Result;
use crate::store::{BreakpointStore, MemoryBreakpointStore, SqliteBreakpointStore};
use crate::task::{DeliveryContext, DownloadTask};
use crate::transport::{HttpTransport, Transport};
use crate::types::{Event, TaskId};
use registry::ActiveRegistry;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio::sync::{Semaphore, broadcast};

/// Capacity of the engine-wide event channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Drives download tasks
///
/// Cheap to clone; clones share all state.
///
/// # Example
///
/// ```no_run
/// use http_dl::{Config, DownloadEngine};
///
/// # async fn example() -> http_dl::Result<()> {
/// let engine = DownloadEngine::new(Config::default()).await?;
///
/// let task = engine.create_task("https://example.com/file.iso");
/// task.set_path("/tmp/downloads", true)?;
/// engine.start(&task).await?;
///
/// let status = task.wait_over().await;
/// println!("finished with {status}");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DownloadEngine {
    /// Engine configuration
    pub(crate) config: Arc<Config>,
    /// Fetches bytes for tasks
    pub(crate) transport: Arc<dyn Transport>,
    /// Resume metadata persistence
    pub(crate) store: Arc<dyn BreakpointStore>,
    /// Tasks with a live worker, keyed by id
    pub(crate) registry: Arc<ActiveRegistry>,
    /// Limits concurrently transferring tasks (respects max_concurrent_downloads)
    pub(crate) concurrent_limit: Arc<Semaphore>,
    /// Runs DownloadListener callbacks
    pub(crate) callbacks: Arc<dyn Dispatcher>,
    /// Runs FinishListener callbacks
    pub(crate) finish: Arc<dyn Dispatcher>,
    /// Broadcast of every delivered notification
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Cleared during shutdown
    pub(crate) accepting_new: Arc<AtomicBool>,
}

impl DownloadEngine {
    /// Create an engine with the default HTTP transport
    ///
    /// Breakpoints go to SQLite when `config.persistence.database_path` is set and
    /// stay in memory otherwise. Listener callbacks run on two serial dispatchers,
    /// each on its own thread.
    pub async fn new(config: Config) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(&config.http)?);

        let store: Arc<dyn BreakpointStore> = match &config.persistence.database_path {
            Some(path) => Arc::new(SqliteBreakpointStore::new(path).await?),
            None => Arc::new(MemoryBreakpointStore::new()),
        };

        let callbacks = Arc::new(SerialDispatcher::spawn("callbacks")?);
        let finish = Arc::new(SerialDispatcher::spawn("finish-listeners")?);

        let engine = Self::with_components(config, transport, store, callbacks, finish);
        tracing::info!(
            transport = engine.transport.name(),
            store = engine.store.name(),
            max_concurrent = engine.config.download.max_concurrent_downloads,
            "download engine ready"
        );
        Ok(engine)
    }

    /// Create an engine from explicit collaborators
    pub fn with_components(
        config: Config,
        transport: Arc<dyn Transport>,
        store: Arc<dyn BreakpointStore>,
        callbacks: Arc<dyn Dispatcher>,
        finish: Arc<dyn Dispatcher>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let permits = config.download.max_concurrent_downloads.max(1);

        Self {
            config: Arc::new(config),
            transport,
            store,
            registry: Arc::new(ActiveRegistry::default()),
            concurrent_limit: Arc::new(Semaphore::new(permits)),
            callbacks,
            finish,
            event_tx,
            accepting_new: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Create a task with the engine's task defaults
    pub fn create_task(&self, url: impl Into<String>) -> DownloadTask {
        DownloadTask::with_defaults(
            url,
            &self.config.defaults,
            &self.config.download.temp_suffix,
        )
    }

    /// Subscribe to every notification delivered by tasks this engine starts
    ///
    /// Progress events are throttled exactly like listener callbacks.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Engine configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Breakpoint store in use
    pub fn store(&self) -> &Arc<dyn BreakpointStore> {
        &self.store
    }

    /// Whether a worker is currently driving the task with this id
    pub fn is_running(&self, id: TaskId) -> bool {
        self.registry.contains(id)
    }

    /// The running task with this id
    pub fn get(&self, id: TaskId) -> Option<DownloadTask> {
        self.registry.get(id)
    }

    /// Number of tasks with a live worker
    pub fn active_count(&self) -> usize {
        self.registry.len()
    }

    pub(crate) fn delivery_context(&self) -> DeliveryContext {
        DeliveryContext {
            callbacks: self.callbacks.clone(),
            finish: self.finish.clone(),
            events: self.event_tx.clone(),
        }
    }

    /// Delete a breakpoint, logging failures
    pub(crate) async fn forget_breakpoint(&self, id: TaskId) {
        if let Err(e) = self.store.remove(id).await {
            tracing::warn!(task_id = %id, error = %e, "failed to remove breakpoint");
        }
    }
}
