//! Task queues
//!
//! A [`TaskQueue`] groups tasks under one listener and starts them together,
//! either one after another ([`start_serial`](TaskQueue::start_serial)) or all
//! at once ([`start_parallel`](TaskQueue::start_parallel)). Tasks join with
//! [`DownloadTask::ready`] and leave when they reach a terminal state or are
//! [`remove`](TaskQueue::remove)d.
//!
//! # Example
//!
//! ```no_run
//! use http_dl::{Config, DownloadEngine, DownloadTask, Event, TaskQueue};
//! use std::sync::Arc;
//!
//! # async fn example() -> http_dl::Result<()> {
//! let engine = DownloadEngine::new(Config::default()).await?;
//! let queue = TaskQueue::new();
//!
//! for url in ["https://example.com/a.bin", "https://example.com/b.bin"] {
//!     let task = engine.create_task(url);
//!     task.set_path("/tmp/downloads", true)?;
//!     task.ready(&queue)?;
//! }
//!
//! let listener = Arc::new(|task: &DownloadTask, event: &Event| {
//!     println!("{}: {:?}", task.id(), event.status());
//! });
//! queue.start_serial(&engine, listener).await?;
//! # Ok(())
//! # }
//! ```

use crate::engine::DownloadEngine;
use crate::error::{Error, Result};
use crate::listener::DownloadListener;
use crate::task::DownloadTask;
use crate::types::QueueHandle;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A group of tasks started together under one listener
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    handle: QueueHandle,
    tasks: Mutex<Vec<DownloadTask>>,
    /// Cancelled by `pause()`; replaced on every start
    run: Mutex<CancellationToken>,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    /// Create an empty queue with a fresh handle
    pub fn new() -> Self {
        Self {
            inner: Arc::new(QueueInner {
                handle: QueueHandle::next(),
                tasks: Mutex::new(Vec::new()),
                run: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    /// This queue's attach key
    pub fn handle(&self) -> QueueHandle {
        self.inner.handle
    }

    pub(crate) fn push(&self, task: DownloadTask) {
        let mut tasks = self.inner.tasks.lock();
        if !tasks.iter().any(|t| t.same_task(&task)) {
            tasks.push(task);
        }
    }

    /// Tasks still attached to this queue, in the order they were readied
    pub fn tasks(&self) -> Vec<DownloadTask> {
        let handle = self.inner.handle;
        let mut tasks = self.inner.tasks.lock();
        tasks.retain(|t| t.attach_key() == Some(handle));
        tasks.clone()
    }

    /// Number of attached tasks
    pub fn len(&self) -> usize {
        self.tasks().len()
    }

    /// Whether no task is attached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Detach a task that has not started yet
    ///
    /// Returns `false` if the task is not attached to this queue.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyInUse`] if the task is already running; pause it instead.
    pub fn remove(&self, task: &DownloadTask) -> Result<bool> {
        if task.attach_key() != Some(self.inner.handle) {
            return Ok(false);
        }
        if task.is_running() {
            return Err(Error::AlreadyInUse {
                id: task.id(),
                operation: "remove".to_string(),
            });
        }

        task.detach();
        self.inner.tasks.lock().retain(|t| !t.same_task(task));
        debug!(task_id = %task.id(), queue = %self.inner.handle, "task detached from queue");
        Ok(true)
    }

    /// Start the attached tasks one at a time
    ///
    /// Each task starts only after the previous one reached a terminal state.
    /// Runs in the background; the returned handle resolves when the run ends,
    /// either because every task was processed or the queue was paused.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfiguration`] if the queue is empty.
    pub async fn start_serial(
        &self,
        engine: &DownloadEngine,
        listener: Arc<dyn DownloadListener>,
    ) -> Result<JoinHandle<()>> {
        let tasks = self.prepare_run(listener)?;
        let run = self.new_run();
        let engine = engine.clone();
        let handle = self.inner.handle;

        info!(queue = %handle, tasks = tasks.len(), "starting serial queue");
        Ok(tokio::spawn(async move {
            for task in tasks {
                if run.is_cancelled() {
                    debug!(queue = %handle, "serial queue paused, not starting remaining tasks");
                    break;
                }
                if task.attach_key() != Some(handle) {
                    continue;
                }

                match engine.start(&task).await {
                    Ok(_) => {
                        task.wait_over().await;
                    }
                    Err(e @ Error::AlreadyInUse { .. }) => {
                        warn!(task_id = %task.id(), error = %e, "queued task already in use, skipping");
                    }
                    Err(e) => engine.fail_launch(&task, e),
                }
            }
            debug!(queue = %handle, "serial queue finished");
        }))
    }

    /// Start every attached task at once
    ///
    /// Concurrency is still bounded by the engine's `max_concurrent_downloads`.
    /// Returns how many tasks were started; launch failures are delivered to
    /// the tasks as `Error`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfiguration`] if the queue is empty.
    pub async fn start_parallel(
        &self,
        engine: &DownloadEngine,
        listener: Arc<dyn DownloadListener>,
    ) -> Result<usize> {
        let tasks = self.prepare_run(listener)?;
        self.new_run();

        info!(queue = %self.inner.handle, tasks = tasks.len(), "starting parallel queue");
        let mut started = 0;
        for task in tasks {
            match engine.start(&task).await {
                Ok(_) => started += 1,
                Err(e @ Error::AlreadyInUse { .. }) => {
                    warn!(task_id = %task.id(), error = %e, "queued task already in use, skipping");
                }
                Err(e) => engine.fail_launch(&task, e),
            }
        }
        Ok(started)
    }

    /// Pause every running task of this queue and stop a serial run
    ///
    /// Returns how many tasks were paused.
    pub fn pause(&self) -> usize {
        self.inner.run.lock().cancel();
        let paused = self.tasks().iter().filter(|task| task.pause()).count();
        info!(queue = %self.inner.handle, paused, "queue paused");
        paused
    }

    fn prepare_run(&self, listener: Arc<dyn DownloadListener>) -> Result<Vec<DownloadTask>> {
        let tasks = self.tasks();
        if tasks.is_empty() {
            return Err(Error::invalid_config("queue", "queue has no attached tasks"));
        }
        for task in &tasks {
            task.install_listener(listener.clone());
        }
        Ok(tasks)
    }

    fn new_run(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.inner.run.lock() = token.clone();
        token
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("handle", &self.inner.handle)
            .field("tasks", &self.inner.tasks.lock().len())
            .finish()
    }
}
