//! Task control: start, pause, launch failures.

use crate::error::{Error, Result};
use crate::task::{DownloadTask, TransferState};
use crate::types::TaskId;
use std::sync::atomic::Ordering;
use tokio_util::sync::CancellationToken;

use super::{DownloadEngine, worker};

impl DownloadEngine {
    /// Start a task
    ///
    /// Validates the task, marks it in use, restores its breakpoint, moves it to
    /// `Pending` and spawns its worker. The task waits for a free slot if
    /// `max_concurrent_downloads` transfers are already running.
    ///
    /// # Errors
    ///
    /// - [`Error::ShuttingDown`] after [`shutdown`](Self::shutdown)
    /// - [`Error::AlreadyInUse`] if the task (or another task with the same id) is
    ///   running, or the task was used and not [`reuse`](DownloadTask::reuse)d
    /// - [`Error::InvalidConfiguration`] / [`Error::InvalidPath`] for an unusable
    ///   URL or path
    pub async fn start(&self, task: &DownloadTask) -> Result<TaskId> {
        if !self.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        task.claim("start")?;
        let id = task.id();

        let cancel = CancellationToken::new();
        if let Err(e) = self.registry.insert(task) {
            task.release_claim();
            return Err(e);
        }

        task.set_temp_suffix(&self.config.download.temp_suffix);
        task.install(self.delivery_context(), cancel.clone());
        task.set_running(true);
        task.mark_added_to_list();

        self.restore_breakpoint(task).await;

        if !task.to_pending() {
            // Only an illegal state could get here; undo the registration
            self.registry.remove(id, task);
            task.set_added_to_list(false);
            task.set_running(false);
            return Err(Error::AlreadyInUse {
                id,
                operation: "start".to_string(),
            });
        }

        tracing::info!(task_id = %id, url = %task.url(), "download started");
        tokio::spawn(worker::run(self.clone(), task.clone(), cancel));
        Ok(id)
    }

    /// Pause the running task with this id
    ///
    /// Returns `false` if no such task is running or it is already over.
    pub fn pause(&self, id: TaskId) -> bool {
        match self.registry.get(id) {
            Some(task) => task.pause(),
            None => false,
        }
    }

    /// Pause every running task; returns how many were paused
    pub fn pause_all(&self) -> usize {
        let paused = self
            .registry
            .tasks()
            .iter()
            .filter(|task| task.pause())
            .count();
        tracing::info!(paused, "paused all running tasks");
        paused
    }

    /// Deliver a failed launch as the task's terminal `Error`
    ///
    /// Used by queue runners, which cannot return the start error to a caller.
    pub(crate) fn fail_launch(&self, task: &DownloadTask, error: Error) {
        tracing::warn!(task_id = %task.id(), error = %error, "failed to start queued task");
        task.install(self.delivery_context(), CancellationToken::new());
        task.to_error(error);
    }

    /// Seed a starting task with the resume state of its previous attempt
    ///
    /// The breakpoint (or, without one, the counters kept by `reuse()`) is only
    /// trusted if the temp file still holds at least that many bytes.
    async fn restore_breakpoint(&self, task: &DownloadTask) {
        let id = task.id();

        if task.is_force_re_download() {
            self.forget_breakpoint(id).await;
            task.reset_transfer();
            if let Ok(temp) = task.temp_file_path() {
                let _ = tokio::fs::remove_file(&temp).await;
            }
            return;
        }

        let loaded = match self.store.load(id).await {
            Ok(breakpoint) => breakpoint,
            Err(e) => {
                tracing::warn!(task_id = %id, error = %e, "failed to load breakpoint");
                None
            }
        };

        let candidate = match loaded {
            Some(bp) if bp.url == task.url() => Some((
                TransferState {
                    so_far: bp.so_far_bytes,
                    total: bp.total_bytes,
                    etag: bp.etag,
                    resumable: bp.resumable,
                    retrying_times: 0,
                },
                bp.filename,
            )),
            Some(_) => {
                self.forget_breakpoint(id).await;
                None
            }
            None => {
                let state = task.transfer_state();
                (state.so_far > 0).then_some((state, None))
            }
        };

        let Some((state, filename)) = candidate else {
            task.reset_transfer();
            return;
        };

        task.restore(&state, filename);
        let on_disk = match task.temp_file_path() {
            Ok(temp) => tokio::fs::metadata(&temp).await.map(|m| m.len()).ok(),
            Err(_) => None,
        };

        match on_disk {
            Some(len) if len >= state.so_far => {
                tracing::debug!(
                    task_id = %id,
                    so_far_bytes = state.so_far,
                    total_bytes = state.total,
                    "restored breakpoint"
                );
            }
            _ => {
                tracing::debug!(task_id = %id, "temp file missing or short, starting over");
                task.reset_transfer();
            }
        }
    }
}
