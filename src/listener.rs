//! Observer traits and the finish-listener registry
//!
//! A task has at most one [`DownloadListener`], which sees every delivered
//! notification, and any number of [`FinishListener`]s, which only hear about the
//! terminal state. The two channels are independent: finish listeners fire even
//! when the primary listener is absent, and run on their own dispatcher.

use crate::task::DownloadTask;
use crate::types::Event;
use parking_lot::Mutex;
use std::sync::Arc;

/// Receives task lifecycle notifications
///
/// Override the methods you care about; the rest default to no-ops. Payloads are
/// the values captured when the transition happened, so they stay consistent
/// even when the callback runs later on a dispatcher.
///
/// Closures of the form `Fn(&DownloadTask, &Event)` implement this trait through
/// [`on_event`](DownloadListener::on_event).
#[allow(unused_variables)]
pub trait DownloadListener: Send + Sync {
    /// The task was accepted and is waiting to connect
    fn pending(&self, task: &DownloadTask, so_far_bytes: u64, total_bytes: u64) {}

    /// The transport connected
    fn connected(
        &self,
        task: &DownloadTask,
        etag: Option<&str>,
        is_resuming: bool,
        so_far_bytes: u64,
        total_bytes: u64,
    ) {
    }

    /// Bytes arrived (throttled)
    fn progress(&self, task: &DownloadTask, so_far_bytes: u64, total_bytes: u64) {}

    /// A retryable failure happened and the task is about to reconnect
    fn retry(&self, task: &DownloadTask, error: &str, retrying_times: u32, so_far_bytes: u64) {}

    /// The download finished
    fn completed(&self, task: &DownloadTask) {}

    /// The task was paused
    fn paused(&self, task: &DownloadTask, so_far_bytes: u64, total_bytes: u64) {}

    /// The task failed; the full cause is in [`DownloadTask::error_cause`]
    fn error(&self, task: &DownloadTask, error: &str) {}

    /// The target already existed, nothing was downloaded
    fn warn(&self, task: &DownloadTask) {}

    /// Entry point used by the engine; routes the event to the methods above
    fn on_event(&self, task: &DownloadTask, event: &Event) {
        match event {
            Event::Pending {
                so_far_bytes,
                total_bytes,
                ..
            } => self.pending(task, *so_far_bytes, *total_bytes),
            Event::Connected {
                etag,
                is_resuming,
                so_far_bytes,
                total_bytes,
                ..
            } => self.connected(
                task,
                etag.as_deref(),
                *is_resuming,
                *so_far_bytes,
                *total_bytes,
            ),
            Event::Progress {
                so_far_bytes,
                total_bytes,
                ..
            } => self.progress(task, *so_far_bytes, *total_bytes),
            Event::Retry {
                error,
                retrying_times,
                so_far_bytes,
                ..
            } => self.retry(task, error, *retrying_times, *so_far_bytes),
            Event::Completed { .. } => self.completed(task),
            Event::Paused {
                so_far_bytes,
                total_bytes,
                ..
            } => self.paused(task, *so_far_bytes, *total_bytes),
            Event::Error { error, .. } => self.error(task, error),
            Event::Warn { .. } => self.warn(task),
        }
    }
}

impl<F> DownloadListener for F
where
    F: Fn(&DownloadTask, &Event) + Send + Sync,
{
    fn on_event(&self, task: &DownloadTask, event: &Event) {
        self(task, event)
    }
}

/// Hears about a task reaching a terminal state
pub trait FinishListener: Send + Sync {
    /// Called once per use cycle, after `Completed`, `Warn`, `Error` or `Paused`
    fn over(&self, task: &DownloadTask);
}

impl<F> FinishListener for F
where
    F: Fn(&DownloadTask) + Send + Sync,
{
    fn over(&self, task: &DownloadTask) {
        self(task)
    }
}

/// Ordered set of finish listeners attached to one task
#[derive(Default)]
pub struct FinishListenerRegistry {
    listeners: Mutex<Vec<Arc<dyn FinishListener>>>,
}

impl FinishListenerRegistry {
    /// Register a listener; the same `Arc` is only registered once
    pub fn add(&self, listener: Arc<dyn FinishListener>) {
        let mut listeners = self.listeners.lock();
        if !listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            listeners.push(listener);
        }
    }

    /// Remove a listener by identity; returns whether it was registered
    pub fn remove(&self, listener: &Arc<dyn FinishListener>) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    /// Listeners in registration order
    pub fn snapshot(&self) -> Vec<Arc<dyn FinishListener>> {
        self.listeners.lock().clone()
    }

    /// Number of registered listeners
    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Whether no listener is registered
    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }
}

impl std::fmt::Debug for FinishListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinishListenerRegistry")
            .field("len", &self.len())
            .finish()
    }
}
