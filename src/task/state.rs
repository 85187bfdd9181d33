//! Runtime state and status transitions
//!
//! Every transition goes through [`DownloadTask::transition`], which checks it
//! against [`Status::can_transition_to`], applies it, and hands the resulting
//! notification to the task's listener and the engine's event channel while the
//! per-task delivery lock is held. Holding that lock across both steps keeps
//! notifications in production order and guarantees nothing is delivered after a
//! terminal notification.

use super::{DownloadTask, TaskSettings};
use crate::dispatch::Dispatcher;
use crate::error::{Error, Result, TransportError, TransportErrorKind};
use crate::identity;
use crate::progress::{ProgressThrottle, SpeedMonitor};
use crate::status::Status;
use crate::transport::ConnectInfo;
use crate::types::{Event, TaskId};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Status and worker liveness, published for [`DownloadTask::wait_over`]
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Phase {
    pub status: Status,
    pub running: bool,
}

/// Mutable per-use-cycle state
pub(crate) struct TaskRuntime {
    pub status: Status,
    pub so_far: u64,
    pub total: u64,
    pub etag: Option<String>,
    pub is_resuming: bool,
    /// Server confirmed range requests at the last connect
    pub resumable: bool,
    pub retrying_times: u32,
    pub error: Option<Arc<Error>>,
    pub is_reused_old_file: bool,
    pub throttle: ProgressThrottle,
    pub speed: SpeedMonitor,
}

impl TaskRuntime {
    pub(crate) fn new(settings: &TaskSettings) -> Self {
        Self {
            status: Status::Idle,
            so_far: 0,
            total: 0,
            etag: None,
            is_resuming: false,
            resumable: false,
            retrying_times: 0,
            error: None,
            is_reused_old_file: false,
            throttle: ProgressThrottle::new(
                settings.callback_progress_count,
                settings.callback_progress_min_interval_ms,
            ),
            speed: SpeedMonitor::new(settings.min_interval_update_speed_ms),
        }
    }
}

/// Where a task's notifications go; installed by the engine at start
#[derive(Clone)]
pub(crate) struct DeliveryContext {
    pub callbacks: Arc<dyn Dispatcher>,
    pub finish: Arc<dyn Dispatcher>,
    pub events: broadcast::Sender<Event>,
}

/// Transfer bookkeeping the engine needs between attempts
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct TransferState {
    pub so_far: u64,
    pub total: u64,
    pub etag: Option<String>,
    pub resumable: bool,
    pub retrying_times: u32,
}

impl DownloadTask {
    /// Mark the task as in use for an engine start
    ///
    /// A task readied for a queue is already in use and may still be started
    /// once; anything else that is in use is rejected.
    pub(crate) fn claim(&self, operation: &str) -> Result<()> {
        let settings = self.shared.settings.lock();
        let id = settings.id();
        let status = self.shared.runtime.lock().status;

        let readied = self.shared.using.load(Ordering::SeqCst) && settings.attach_key.is_some();
        if self.is_running()
            || status != Status::Idle
            || (self.shared.using.load(Ordering::SeqCst) && !readied)
        {
            return Err(Error::AlreadyInUse {
                id,
                operation: operation.to_string(),
            });
        }

        super::validate(&settings)?;

        // Knobs may have changed since the runtime was built
        let mut runtime = self.shared.runtime.lock();
        runtime.throttle = ProgressThrottle::new(
            settings.callback_progress_count,
            settings.callback_progress_min_interval_ms,
        );
        runtime.speed = SpeedMonitor::new(settings.min_interval_update_speed_ms);

        self.shared.using.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Undo [`claim`](Self::claim) when a start is rejected before the task ran
    pub(crate) fn release_claim(&self) {
        if self.status() == Status::Idle && !self.is_attached() {
            self.shared.using.store(false, Ordering::SeqCst);
        }
    }

    /// Set the listener of a readied task; queues do this while the task is
    /// already in use
    pub(crate) fn install_listener(&self, listener: Arc<dyn crate::listener::DownloadListener>) {
        self.shared.settings.lock().listener = Some(listener);
    }

    /// Leave the queue; a task that never started becomes configurable again
    pub(crate) fn detach(&self) {
        let mut settings = self.shared.settings.lock();
        settings.attach_key = None;
        if !self.is_running() && self.shared.runtime.lock().status == Status::Idle {
            self.shared.using.store(false, Ordering::SeqCst);
        }
    }

    pub(crate) fn install(&self, context: DeliveryContext, cancel: CancellationToken) {
        *self.shared.context.lock() = Some(context);
        *self.shared.cancel.lock() = Some(cancel);
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.shared.running.store(running, Ordering::SeqCst);
        self.shared.phase.send_modify(|p| p.running = running);
    }

    pub(crate) fn set_added_to_list(&self, added: bool) {
        self.shared.added_to_list.store(added, Ordering::SeqCst);
    }

    pub(crate) fn transfer_state(&self) -> TransferState {
        let runtime = self.shared.runtime.lock();
        TransferState {
            so_far: runtime.so_far,
            total: runtime.total,
            etag: runtime.etag.clone(),
            resumable: runtime.resumable,
            retrying_times: runtime.retrying_times,
        }
    }

    /// Seed the counters from a breakpoint before the first `Pending`
    pub(crate) fn restore(&self, state: &TransferState, filename: Option<String>) {
        if let Some(name) = filename {
            let mut settings = self.shared.settings.lock();
            if let Some(resolved) = settings.resolved.as_mut()
                && resolved.filename.is_none()
            {
                resolved.filename = Some(name);
            }
        }

        let mut runtime = self.shared.runtime.lock();
        runtime.so_far = state.so_far;
        runtime.total = state.total;
        runtime.etag = state.etag.clone();
        runtime.resumable = state.resumable;
    }

    /// Drop the resume baseline; the next attempt downloads from byte zero
    pub(crate) fn reset_transfer(&self) {
        let mut runtime = self.shared.runtime.lock();
        runtime.so_far = 0;
        runtime.etag = None;
        runtime.resumable = false;
        runtime.is_resuming = false;
    }

    pub(crate) fn auto_retry_budget(&self) -> (u32, u32) {
        let retry_ceiling = self.shared.settings.lock().auto_retry_times;
        (self.shared.runtime.lock().retrying_times, retry_ceiling)
    }

    // ---------------------------------------------------------------------
    // Transitions
    // ---------------------------------------------------------------------

    pub(crate) fn to_pending(&self) -> bool {
        self.transition(Status::Pending, |rt| {
            rt.is_resuming = false;
        })
    }

    /// Record connect metadata and move to `Connected`
    ///
    /// Resolves a deferred filename before the notification fires and returns the
    /// temp file the transport writes to. When the server ignored the range
    /// request the baseline drops to zero.
    pub(crate) fn to_connected(&self, info: &ConnectInfo, now: Instant) -> Result<PathBuf> {
        let _delivery = self.shared.delivery.lock();

        let temp_path = {
            let mut settings = self.shared.settings.lock();
            if let Some(resolved) = settings.resolved.as_ref()
                && resolved.filename.is_none()
            {
                let name = identity::resolve_filename(&settings.url, info.filename_hint.as_deref());
                debug!(task_id = %settings.id(), filename = %name, "resolved filename");
                if let Some(resolved) = settings.resolved.as_mut() {
                    resolved.filename = Some(name);
                }
            }
            settings.temp_file_path()?
        };

        {
            let runtime = self.shared.runtime.lock();
            if runtime.status.is_over() {
                return Err(Error::UserCancelled);
            }
            if info.partial
                && let Some(total) = info.total_bytes
                && runtime.so_far > total
            {
                return Err(Error::Transport(TransportError::new(
                    TransportErrorKind::Corrupted,
                    format!(
                        "{} bytes on disk but the resource is only {} bytes",
                        runtime.so_far, total
                    ),
                )));
            }
        }

        let applied = self.transition(Status::Connected, |rt| {
            if !info.partial {
                rt.so_far = 0;
            }
            rt.is_resuming = info.partial && rt.so_far > 0;
            rt.total = info.total_bytes.unwrap_or(0);
            rt.etag = info.etag.clone();
            rt.resumable = info.resumable;
            let (total, so_far) = (rt.total, rt.so_far);
            rt.throttle.reset(total, so_far);
            rt.speed.start(now);
        });

        if applied {
            Ok(temp_path)
        } else {
            Err(Error::UserCancelled)
        }
    }

    /// Account for `delta` new bytes
    ///
    /// Returns whether a progress notification was delivered. Fails with
    /// [`Error::UserCancelled`] once the task is over, and with an invalid
    /// response error if the server sends more than it announced.
    pub(crate) fn on_progress(&self, delta: u64, now: Instant) -> Result<bool> {
        let _delivery = self.shared.delivery.lock();
        let id = self.id();

        let event = {
            let mut rt = self.shared.runtime.lock();
            match rt.status {
                Status::Connected | Status::Progress => {}
                status if status.is_over() => return Err(Error::UserCancelled),
                status => {
                    warn!(task_id = %id, status = %status, "progress outside of a transfer ignored");
                    return Ok(false);
                }
            }

            let so_far = rt.so_far.saturating_add(delta);
            if rt.total > 0 && so_far > rt.total {
                return Err(Error::Transport(TransportError::new(
                    TransportErrorKind::InvalidResponse,
                    format!("received {} bytes, expected {}", so_far, rt.total),
                )));
            }

            rt.so_far = so_far;
            rt.speed.record(delta, now);
            if rt.status != Status::Progress {
                rt.status = Status::Progress;
                self.shared.phase.send_modify(|p| p.status = Status::Progress);
            }

            if !rt.throttle.should_notify(so_far, now) {
                return Ok(false);
            }

            Event::Progress {
                id,
                so_far_bytes: so_far,
                total_bytes: rt.total,
                speed_bps: rt.speed.speed_bps(),
            }
        };

        self.publish(event);
        Ok(true)
    }

    /// The transport finished its segment; internal, never delivered
    pub(crate) fn to_block_complete(&self) -> bool {
        self.transition(Status::BlockComplete, |_| {})
    }

    /// Commit a verified segment and move to `Completed`
    ///
    /// `commit` runs under the delivery lock while the task sits in
    /// `BlockComplete`, so a concurrent pause either lands first and nothing is
    /// committed, or finds the task already over.
    pub(crate) fn commit_segment<F>(&self, commit: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        let _delivery = self.shared.delivery.lock();
        if self.status() != Status::BlockComplete {
            return Err(Error::UserCancelled);
        }
        commit()?;
        self.to_completed();
        Ok(())
    }

    pub(crate) fn to_completed(&self) -> bool {
        self.transition(Status::Completed, |rt| {
            rt.total = rt.total.max(rt.so_far);
            rt.so_far = rt.total;
            rt.is_resuming = false;
        })
    }

    pub(crate) fn to_retry(&self, error: Error, attempt: u32) -> bool {
        let error = Arc::new(error);
        self.transition(Status::Retry, move |rt| {
            rt.retrying_times = attempt;
            rt.error = Some(error);
        })
    }

    pub(crate) fn to_error(&self, error: Error) -> bool {
        let error = Arc::new(error);
        self.transition(Status::Error, move |rt| {
            rt.error = Some(error);
        })
    }

    /// The target already exists; report it instead of downloading
    pub(crate) fn to_warn(&self, existing_len: u64) -> bool {
        self.transition(Status::Warn, |rt| {
            rt.so_far = existing_len;
            rt.total = existing_len;
            rt.is_reused_old_file = true;
        })
    }

    /// Apply a legal transition and deliver its notification
    ///
    /// Returns `false` (and changes nothing) if the transition is illegal from
    /// the current status.
    pub(crate) fn transition<F>(&self, next: Status, update: F) -> bool
    where
        F: FnOnce(&mut TaskRuntime),
    {
        let _delivery = self.shared.delivery.lock();
        let id = self.id();

        let event = {
            let mut rt = self.shared.runtime.lock();
            let current = rt.status;
            if !current.can_transition_to(next) {
                if current.is_over() {
                    debug!(task_id = %id, from = %current, to = %next, "task already over, transition dropped");
                } else {
                    warn!(task_id = %id, from = %current, to = %next, "illegal status transition rejected");
                }
                return false;
            }

            update(&mut rt);
            rt.status = next;
            if next.is_over() {
                rt.speed.finish(Instant::now());
            }
            event_for(id, next, &rt)
        };

        self.shared.phase.send_modify(|p| p.status = next);
        debug!(task_id = %id, status = %next, "status changed");

        if let Some(event) = event {
            self.publish(event);
        }
        if next.is_over() {
            self.finish();
        }
        true
    }

    /// Hand an event to the listener and the engine's subscribers
    fn publish(&self, event: Event) {
        let Some(context) = self.shared.context.lock().clone() else {
            return;
        };

        let (listener, sync) = {
            let settings = self.shared.settings.lock();
            (settings.listener.clone(), settings.sync_callback)
        };

        if let Some(listener) = listener {
            let task = self.clone();
            let delivered = event.clone();
            let job = move || listener.on_event(&task, &delivered);
            if sync {
                job();
            } else {
                context.callbacks.submit(Box::new(job));
            }
        }

        // No subscribers is not an error
        let _ = context.events.send(event);
    }

    /// Terminal bookkeeping: detach from the queue and notify finish listeners
    fn finish(&self) {
        self.shared.settings.lock().attach_key = None;

        let listeners = self.shared.finish_listeners.snapshot();
        if listeners.is_empty() {
            return;
        }
        let Some(context) = self.shared.context.lock().clone() else {
            return;
        };

        let task = self.clone();
        context.finish.submit(Box::new(move || {
            for listener in listeners {
                listener.over(&task);
            }
        }));
    }
}

fn event_for(id: TaskId, status: Status, rt: &TaskRuntime) -> Option<Event> {
    let error_message = || {
        rt.error
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_default()
    };

    match status {
        Status::Idle | Status::BlockComplete => None,
        Status::Pending => Some(Event::Pending {
            id,
            so_far_bytes: rt.so_far,
            total_bytes: rt.total,
        }),
        Status::Connected => Some(Event::Connected {
            id,
            etag: rt.etag.clone(),
            is_resuming: rt.is_resuming,
            so_far_bytes: rt.so_far,
            total_bytes: rt.total,
        }),
        Status::Progress => Some(Event::Progress {
            id,
            so_far_bytes: rt.so_far,
            total_bytes: rt.total,
            speed_bps: rt.speed.speed_bps(),
        }),
        Status::Retry => Some(Event::Retry {
            id,
            error: error_message(),
            retrying_times: rt.retrying_times,
            so_far_bytes: rt.so_far,
        }),
        Status::Completed => Some(Event::Completed {
            id,
            total_bytes: rt.total,
            is_reused_old_file: rt.is_reused_old_file,
        }),
        Status::Paused => Some(Event::Paused {
            id,
            so_far_bytes: rt.so_far,
            total_bytes: rt.total,
        }),
        Status::Error => Some(Event::Error {
            id,
            error: error_message(),
        }),
        Status::Warn => Some(Event::Warn {
            id,
            total_bytes: rt.total,
        }),
    }
}
