//! Download task descriptor
//!
//! A [`DownloadTask`] is a cheap, cloneable handle to one download: its
//! configuration (URL, target path, headers, knobs) and its runtime state
//! (status, byte counters, etag, retry counter). Configuration is frozen while the
//! task is in use; [`DownloadTask::reuse`] unfreezes it for a new use cycle.
//!
//! Tasks are driven by a [`DownloadEngine`](crate::DownloadEngine), either
//! directly or through a [`TaskQueue`].
//!
//! # Example
//!
//! ```
//! use http_dl::{DownloadTask, Status};
//!
//! let task = DownloadTask::new("https://example.com/file.iso");
//! task.set_path("/tmp/file.iso", false)?
//!     .set_auto_retry_times(3)?
//!     .add_header("Authorization", "Bearer token")?;
//!
//! assert_eq!(task.status(), Status::Idle);
//! assert!(!task.is_using());
//! # Ok::<(), http_dl::Error>(())
//! ```

mod headers;
mod state;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use headers::HeaderList;
pub(crate) use state::{DeliveryContext, TransferState};

use crate::config::TaskDefaults;
use crate::error::{Error, Result};
use crate::identity::{self, ResolvedPath};
use crate::listener::{DownloadListener, FinishListener, FinishListenerRegistry};
use crate::queue::TaskQueue;
use crate::status::Status;
use crate::types::{QueueHandle, TaskId};
use parking_lot::{Mutex, ReentrantMutex};
use state::{Phase, TaskRuntime};
use std::any::Any;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Arbitrary data attached to a task by the caller
pub type Tag = Arc<dyn Any + Send + Sync>;

/// Totals at or above this many bytes are "large" and overflow the `i32` accessors
pub const LARGE_FILE_THRESHOLD: u64 = 1 << 31;

/// Handle to a download task
///
/// Clones share the same underlying task.
#[derive(Clone)]
pub struct DownloadTask {
    pub(crate) shared: Arc<TaskShared>,
}

pub(crate) struct TaskShared {
    settings: Mutex<TaskSettings>,
    runtime: Mutex<TaskRuntime>,
    /// Held across a transition and the submission of its notification
    delivery: ReentrantMutex<()>,
    using: AtomicBool,
    running: AtomicBool,
    added_to_list: AtomicBool,
    phase: watch::Sender<Phase>,
    finish_listeners: FinishListenerRegistry,
    context: Mutex<Option<DeliveryContext>>,
    cancel: Mutex<Option<CancellationToken>>,
}

pub(crate) struct TaskSettings {
    url: String,
    path: Option<PathBuf>,
    path_as_directory: bool,
    resolved: Option<ResolvedPath>,
    headers: HeaderList,
    force_re_download: bool,
    sync_callback: bool,
    callback_progress_count: i32,
    callback_progress_min_interval_ms: u32,
    min_interval_update_speed_ms: i32,
    auto_retry_times: u32,
    temp_suffix: String,
    tag: Option<Tag>,
    keyed_tags: HashMap<String, Tag>,
    listener: Option<Arc<dyn DownloadListener>>,
    attach_key: Option<QueueHandle>,
}

impl TaskSettings {
    fn id(&self) -> TaskId {
        let path = self
            .path
            .as_deref()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        identity::generate_id(&self.url, &path, self.path_as_directory)
    }

    fn target_file_path(&self) -> Result<PathBuf> {
        let resolved = self
            .resolved
            .as_ref()
            .ok_or_else(|| Error::InvalidPath("path is not set".to_string()))?;
        resolved
            .target_file()
            .ok_or_else(|| Error::InvalidPath("filename is not resolved yet".to_string()))
    }

    fn temp_file_path(&self) -> Result<PathBuf> {
        let mut path = self.target_file_path()?.into_os_string();
        path.push(&self.temp_suffix);
        Ok(PathBuf::from(path))
    }
}

impl DownloadTask {
    /// Create a task for `url` with the built-in defaults
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_defaults(url, &TaskDefaults::default(), ".temp")
    }

    /// Create a task with explicit knob defaults and temp-file suffix
    pub(crate) fn with_defaults(
        url: impl Into<String>,
        defaults: &TaskDefaults,
        temp_suffix: &str,
    ) -> Self {
        let settings = TaskSettings {
            url: url.into(),
            path: None,
            path_as_directory: false,
            resolved: None,
            headers: HeaderList::new(),
            force_re_download: false,
            sync_callback: defaults.sync_callback,
            callback_progress_count: defaults.callback_progress_count,
            callback_progress_min_interval_ms: defaults.callback_progress_min_interval_ms,
            min_interval_update_speed_ms: defaults.min_interval_update_speed_ms,
            auto_retry_times: defaults.auto_retry_times,
            temp_suffix: temp_suffix.to_string(),
            tag: None,
            keyed_tags: HashMap::new(),
            listener: None,
            attach_key: None,
        };
        let runtime = TaskRuntime::new(&settings);
        let (phase, _) = watch::channel(Phase::default());

        Self {
            shared: Arc::new(TaskShared {
                settings: Mutex::new(settings),
                runtime: Mutex::new(runtime),
                delivery: ReentrantMutex::new(()),
                using: AtomicBool::new(false),
                running: AtomicBool::new(false),
                added_to_list: AtomicBool::new(false),
                phase,
                finish_listeners: FinishListenerRegistry::default(),
                context: Mutex::new(None),
                cancel: Mutex::new(None),
            }),
        }
    }

    pub(crate) fn set_temp_suffix(&self, suffix: &str) {
        self.shared.settings.lock().temp_suffix = suffix.to_string();
    }

    /// Apply a configuration change, refusing while the task is in use
    fn configure<F>(&self, operation: &str, f: F) -> Result<&Self>
    where
        F: FnOnce(&mut TaskSettings) -> Result<()>,
    {
        let mut settings = self.shared.settings.lock();
        if self.shared.using.load(Ordering::SeqCst) {
            return Err(Error::AlreadyInUse {
                id: settings.id(),
                operation: operation.to_string(),
            });
        }
        f(&mut settings)?;
        Ok(self)
    }

    // ---------------------------------------------------------------------
    // Configuration
    // ---------------------------------------------------------------------

    /// Change the source URL
    pub fn set_url(&self, url: impl Into<String>) -> Result<&Self> {
        let url = url.into();
        self.configure("set_url", move |s| {
            s.url = url;
            Ok(())
        })
    }

    /// Set where the download is written
    ///
    /// With `as_directory = true`, `path` is a directory and the filename is
    /// resolved when the server answers (`Content-Disposition`, else a hash of
    /// the URL).
    pub fn set_path(&self, path: impl AsRef<Path>, as_directory: bool) -> Result<&Self> {
        let path = path.as_ref();
        let resolved = identity::resolve_path(path, as_directory)?;
        self.configure("set_path", move |s| {
            s.path = Some(path.to_path_buf());
            s.path_as_directory = as_directory;
            s.resolved = Some(resolved);
            Ok(())
        })
    }

    /// Append a request header
    pub fn add_header(&self, name: &str, value: &str) -> Result<&Self> {
        self.configure("add_header", |s| s.headers.add(name, value))
    }

    /// Append a request header given as a `Name: value` line
    pub fn add_header_line(&self, line: &str) -> Result<&Self> {
        self.configure("add_header", |s| s.headers.add_line(line))
    }

    /// Remove every header with this name
    pub fn remove_all_headers(&self, name: &str) -> Result<&Self> {
        self.configure("remove_all_headers", |s| {
            s.headers.remove_all(name);
            Ok(())
        })
    }

    /// Ignore any existing target file and breakpoint
    pub fn set_force_re_download(&self, force: bool) -> Result<&Self> {
        self.configure("set_force_re_download", |s| {
            s.force_re_download = force;
            Ok(())
        })
    }

    /// Invoke the listener on the transfer thread instead of the engine's
    /// callback dispatcher
    pub fn set_sync_callback(&self, sync: bool) -> Result<&Self> {
        self.configure("set_sync_callback", |s| {
            s.sync_callback = sync;
            Ok(())
        })
    }

    /// Maximum progress notifications per transfer; `<= 0` disables them
    pub fn set_callback_progress_count(&self, count: i32) -> Result<&Self> {
        self.configure("set_callback_progress_count", |s| {
            s.callback_progress_count = count;
            Ok(())
        })
    }

    /// Minimum milliseconds between progress notifications; `0` disables the gate
    pub fn set_callback_progress_min_interval(&self, millis: u32) -> Result<&Self> {
        self.configure("set_callback_progress_min_interval", |s| {
            s.callback_progress_min_interval_ms = millis;
            Ok(())
        })
    }

    /// Minimum milliseconds between speed samples; `<= 0` disables sampling
    pub fn set_min_interval_update_speed(&self, millis: i32) -> Result<&Self> {
        self.configure("set_min_interval_update_speed", |s| {
            s.min_interval_update_speed_ms = millis;
            Ok(())
        })
    }

    /// How many times a retryable failure reconnects before giving up
    pub fn set_auto_retry_times(&self, times: u32) -> Result<&Self> {
        self.configure("set_auto_retry_times", |s| {
            s.auto_retry_times = times;
            Ok(())
        })
    }

    /// Attach arbitrary data
    pub fn set_tag(&self, tag: Tag) -> Result<&Self> {
        self.configure("set_tag", |s| {
            s.tag = Some(tag);
            Ok(())
        })
    }

    /// Attach arbitrary data under a key
    pub fn set_keyed_tag(&self, key: impl Into<String>, tag: Tag) -> Result<&Self> {
        let key = key.into();
        self.configure("set_tag", |s| {
            s.keyed_tags.insert(key, tag);
            Ok(())
        })
    }

    /// Set the primary listener
    pub fn set_listener(&self, listener: Arc<dyn DownloadListener>) -> Result<&Self> {
        self.configure("set_listener", |s| {
            s.listener = Some(listener);
            Ok(())
        })
    }

    /// Register a finish listener; allowed at any time
    pub fn add_finish_listener(&self, listener: Arc<dyn FinishListener>) -> &Self {
        self.shared.finish_listeners.add(listener);
        self
    }

    /// Unregister a finish listener by identity
    pub fn remove_finish_listener(&self, listener: &Arc<dyn FinishListener>) -> bool {
        self.shared.finish_listeners.remove(listener)
    }

    // ---------------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------------

    /// Stable id derived from the URL and target path
    pub fn id(&self) -> TaskId {
        self.shared.settings.lock().id()
    }

    /// Source URL
    pub fn url(&self) -> String {
        self.shared.settings.lock().url.clone()
    }

    /// Configured path (file or directory)
    pub fn path(&self) -> Option<PathBuf> {
        self.shared.settings.lock().path.clone()
    }

    /// Whether [`path`](Self::path) is a directory
    pub fn is_path_as_directory(&self) -> bool {
        self.shared.settings.lock().path_as_directory
    }

    /// Filename, once resolved
    pub fn filename(&self) -> Option<String> {
        self.shared
            .settings
            .lock()
            .resolved
            .as_ref()
            .and_then(|r| r.filename.clone())
    }

    /// Full path of the finished file
    ///
    /// # Errors
    ///
    /// [`Error::InvalidPath`] if no path was set, or the filename of a directory
    /// task is not resolved yet.
    pub fn target_file_path(&self) -> Result<PathBuf> {
        self.shared.settings.lock().target_file_path()
    }

    /// Path of the in-progress file (target path plus the temp suffix)
    pub fn temp_file_path(&self) -> Result<PathBuf> {
        self.shared.settings.lock().temp_file_path()
    }

    /// Request headers set by the caller
    pub fn headers(&self) -> HeaderList {
        self.shared.settings.lock().headers.clone()
    }

    /// Whether an existing target file and breakpoint are ignored
    pub fn is_force_re_download(&self) -> bool {
        self.shared.settings.lock().force_re_download
    }

    /// Whether the listener runs on the transfer thread
    pub fn is_sync_callback(&self) -> bool {
        self.shared.settings.lock().sync_callback
    }

    /// Progress notification budget
    pub fn callback_progress_count(&self) -> i32 {
        self.shared.settings.lock().callback_progress_count
    }

    /// Progress notification interval in milliseconds
    pub fn callback_progress_min_interval_ms(&self) -> u32 {
        self.shared.settings.lock().callback_progress_min_interval_ms
    }

    /// Speed sampling interval in milliseconds
    pub fn min_interval_update_speed_ms(&self) -> i32 {
        self.shared.settings.lock().min_interval_update_speed_ms
    }

    /// Retry ceiling
    pub fn auto_retry_times(&self) -> u32 {
        self.shared.settings.lock().auto_retry_times
    }

    /// Data attached with [`set_tag`](Self::set_tag)
    pub fn tag(&self) -> Option<Tag> {
        self.shared.settings.lock().tag.clone()
    }

    /// Data attached with [`set_keyed_tag`](Self::set_keyed_tag)
    pub fn keyed_tag(&self, key: &str) -> Option<Tag> {
        self.shared.settings.lock().keyed_tags.get(key).cloned()
    }

    /// The primary listener
    pub fn listener(&self) -> Option<Arc<dyn DownloadListener>> {
        self.shared.settings.lock().listener.clone()
    }

    /// Current status
    pub fn status(&self) -> Status {
        self.shared.runtime.lock().status
    }

    /// Bytes written so far
    pub fn large_file_so_far_bytes(&self) -> u64 {
        self.shared.runtime.lock().so_far
    }

    /// Total size (0 until known)
    pub fn large_file_total_bytes(&self) -> u64 {
        self.shared.runtime.lock().total
    }

    /// Bytes written so far, or `None` if the value does not fit an `i32`
    pub fn small_file_so_far_bytes(&self) -> Option<i32> {
        i32::try_from(self.large_file_so_far_bytes()).ok()
    }

    /// Total size, or `None` if the value does not fit an `i32`
    pub fn small_file_total_bytes(&self) -> Option<i32> {
        i32::try_from(self.large_file_total_bytes()).ok()
    }

    /// Whether the total size needs the `large_file_*` accessors
    pub fn is_large_file(&self) -> bool {
        self.large_file_total_bytes() >= LARGE_FILE_THRESHOLD
    }

    /// Download speed in bytes per second
    ///
    /// While running this is the latest sample; once the task is over it is the
    /// average over the whole connected period.
    pub fn speed_bps(&self) -> u64 {
        self.shared.runtime.lock().speed.speed_bps()
    }

    /// ETag reported at connect
    pub fn etag(&self) -> Option<String> {
        self.shared.runtime.lock().etag.clone()
    }

    /// Whether the current transfer continues from a breakpoint
    pub fn is_resuming(&self) -> bool {
        self.shared.runtime.lock().is_resuming
    }

    /// Retries used in this use cycle
    pub fn retrying_times(&self) -> u32 {
        self.shared.runtime.lock().retrying_times
    }

    /// The most recent failure
    pub fn error_cause(&self) -> Option<Arc<Error>> {
        self.shared.runtime.lock().error.clone()
    }

    /// Whether an existing target file satisfied the task
    pub fn is_reused_old_file(&self) -> bool {
        self.shared.runtime.lock().is_reused_old_file
    }

    /// Whether the task has been started or readied and not reused since
    pub fn is_using(&self) -> bool {
        self.shared.using.load(Ordering::SeqCst)
    }

    /// Whether an engine worker is currently driving the task
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Queue this task is attached to
    pub fn attach_key(&self) -> Option<QueueHandle> {
        self.shared.settings.lock().attach_key
    }

    /// Whether the task belongs to a queue
    pub fn is_attached(&self) -> bool {
        self.attach_key().is_some()
    }

    /// Whether the task was added to an engine's active list
    pub fn is_marked_added_to_list(&self) -> bool {
        self.shared.added_to_list.load(Ordering::SeqCst)
    }

    /// Mark the task as added to an active list (idempotent)
    pub fn mark_added_to_list(&self) {
        self.shared.added_to_list.store(true, Ordering::SeqCst);
    }

    /// Whether two handles point at the same task object
    pub fn same_task(&self, other: &DownloadTask) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Validate the task and attach it to `queue` for a later batch start
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyInUse`] if the task is in use,
    /// [`Error::InvalidConfiguration`] or [`Error::InvalidPath`] if it cannot be
    /// started.
    pub fn ready(&self, queue: &TaskQueue) -> Result<TaskId> {
        let id = {
            let mut settings = self.shared.settings.lock();
            let id = settings.id();
            if self.shared.using.load(Ordering::SeqCst) {
                return Err(Error::AlreadyInUse {
                    id,
                    operation: "ready".to_string(),
                });
            }
            validate(&settings)?;
            settings.attach_key = Some(queue.handle());
            self.shared.using.store(true, Ordering::SeqCst);
            id
        };

        queue.push(self.clone());
        tracing::debug!(task_id = %id, queue = %queue.handle(), "task attached to queue");
        Ok(id)
    }

    /// Pause the task
    ///
    /// Returns `false` if the task was never started or is already over.
    /// Otherwise the task moves to `Paused`, its worker is cancelled and the
    /// partial data is kept for a later start.
    pub fn pause(&self) -> bool {
        let _delivery = self.shared.delivery.lock();
        if !self.status().is_active() {
            return false;
        }
        if !self.transition(Status::Paused, |_| {}) {
            return false;
        }
        if let Some(token) = self.shared.cancel.lock().as_ref() {
            token.cancel();
        }
        tracing::info!(task_id = %self.id(), "task paused");
        true
    }

    /// Reset the task for a new use cycle
    ///
    /// Status goes back to `Idle`. A paused or failed task keeps its byte
    /// counters and etag so the next start resumes; anything else starts over.
    /// Id-determining fields are kept.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyInUse`] while a worker is driving the task.
    pub fn reuse(&self) -> Result<()> {
        let _delivery = self.shared.delivery.lock();
        let mut settings = self.shared.settings.lock();
        let mut runtime = self.shared.runtime.lock();

        if self.is_running() || runtime.status.is_active() {
            return Err(Error::AlreadyInUse {
                id: settings.id(),
                operation: "reuse".to_string(),
            });
        }

        let keep_progress = matches!(runtime.status, Status::Paused | Status::Error);
        let mut fresh = TaskRuntime::new(&settings);
        if keep_progress {
            fresh.so_far = runtime.so_far;
            fresh.total = runtime.total;
            fresh.etag = runtime.etag.take();
            fresh.resumable = runtime.resumable;
        }
        *runtime = fresh;

        settings.attach_key = None;
        self.shared.using.store(false, Ordering::SeqCst);
        self.shared.added_to_list.store(false, Ordering::SeqCst);
        *self.shared.cancel.lock() = None;
        self.shared.phase.send_modify(|p| p.status = Status::Idle);
        Ok(())
    }

    /// Wait until the task reaches a terminal state and its worker has exited
    ///
    /// Waits forever on a task that is never started.
    pub async fn wait_over(&self) -> Status {
        let mut rx = self.shared.phase.subscribe();
        match rx.wait_for(|p| p.status.is_over() && !p.running).await {
            Ok(phase) => phase.status,
            Err(_) => self.status(),
        }
    }
}

/// Check that a task has everything it needs to start
pub(crate) fn validate(settings: &TaskSettings) -> Result<()> {
    if settings.url.trim().is_empty() {
        return Err(Error::invalid_config("url", "url must not be empty"));
    }
    url::Url::parse(&settings.url)
        .map_err(|e| Error::invalid_config("url", format!("invalid url {}: {}", settings.url, e)))?;
    if settings.resolved.is_none() {
        return Err(Error::InvalidPath("path is not set".to_string()));
    }
    Ok(())
}

impl std::fmt::Debug for DownloadTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let settings = self.shared.settings.lock();
        let runtime = self.shared.runtime.lock();
        f.debug_struct("DownloadTask")
            .field("id", &settings.id())
            .field("url", &settings.url)
            .field("path", &settings.path)
            .field("status", &runtime.status)
            .field("so_far_bytes", &runtime.so_far)
            .field("total_bytes", &runtime.total)
            .finish()
    }
}
