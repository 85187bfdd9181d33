//! Core types for http-dl

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::status::Status;

/// Unique identifier for a download task
///
/// Derived deterministically from the task's URL and target path
/// (see [`generate_id`](crate::identity::generate_id)), so two task objects that
/// point the same URL at the same path share an id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl TaskId {
    /// Get the inner u64 value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for TaskId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Identity of a [`TaskQueue`](crate::queue::TaskQueue)
///
/// Stored on a task as its attach key while the task belongs to the queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueHandle(pub u64);

static NEXT_QUEUE_HANDLE: AtomicU64 = AtomicU64::new(1);

impl QueueHandle {
    /// Allocate a process-unique handle
    pub fn next() -> Self {
        Self(NEXT_QUEUE_HANDLE.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for QueueHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "queue-{}", self.0)
    }
}

/// Notification emitted for a task status transition
///
/// Each variant carries the task fields that are valid at that point of the
/// lifecycle. Delivered to the task's [`DownloadListener`](crate::DownloadListener)
/// and broadcast to engine subscribers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Accepted by the engine, not yet connected
    Pending {
        /// Task ID
        id: TaskId,
        /// Bytes already on disk
        so_far_bytes: u64,
        /// Total bytes if known from a breakpoint (0 = unknown)
        total_bytes: u64,
    },

    /// Transport established
    Connected {
        /// Task ID
        id: TaskId,
        /// ETag reported by the server
        #[serde(skip_serializing_if = "Option::is_none")]
        etag: Option<String>,
        /// Whether the transfer continues from a breakpoint
        is_resuming: bool,
        /// Bytes already on disk
        so_far_bytes: u64,
        /// Total size of the resource (0 = unknown)
        total_bytes: u64,
    },

    /// Bytes transferred
    Progress {
        /// Task ID
        id: TaskId,
        /// Bytes written so far
        so_far_bytes: u64,
        /// Total size of the resource (0 = unknown)
        total_bytes: u64,
        /// Current speed in bytes per second
        speed_bps: u64,
    },

    /// A retryable failure occurred; the task will reconnect
    Retry {
        /// Task ID
        id: TaskId,
        /// Error message
        error: String,
        /// Attempt counter after this retry (1-based)
        retrying_times: u32,
        /// Bytes on disk the next attempt resumes from
        so_far_bytes: u64,
    },

    /// All bytes written and the file moved into place
    Completed {
        /// Task ID
        id: TaskId,
        /// Final size
        total_bytes: u64,
        /// Whether an existing file was reused instead of downloading
        is_reused_old_file: bool,
    },

    /// Stopped by the user; partial data kept for a later start
    Paused {
        /// Task ID
        id: TaskId,
        /// Bytes on disk
        so_far_bytes: u64,
        /// Total size of the resource (0 = unknown)
        total_bytes: u64,
    },

    /// Terminal failure
    Error {
        /// Task ID
        id: TaskId,
        /// Error message
        error: String,
    },

    /// Target already fully downloaded; nothing to do
    Warn {
        /// Task ID
        id: TaskId,
        /// Size of the existing file
        total_bytes: u64,
    },
}

impl Event {
    /// The task this event belongs to
    pub fn id(&self) -> TaskId {
        match self {
            Event::Pending { id, .. }
            | Event::Connected { id, .. }
            | Event::Progress { id, .. }
            | Event::Retry { id, .. }
            | Event::Completed { id, .. }
            | Event::Paused { id, .. }
            | Event::Error { id, .. }
            | Event::Warn { id, .. } => *id,
        }
    }

    /// The status transition that produced this event
    pub fn status(&self) -> Status {
        match self {
            Event::Pending { .. } => Status::Pending,
            Event::Connected { .. } => Status::Connected,
            Event::Progress { .. } => Status::Progress,
            Event::Retry { .. } => Status::Retry,
            Event::Completed { .. } => Status::Completed,
            Event::Paused { .. } => Status::Paused,
            Event::Error { .. } => Status::Error,
            Event::Warn { .. } => Status::Warn,
        }
    }
}
