//! Task status lifecycle and legal transitions
//!
//! ```text
//! Idle ──start──▶ Pending ──▶ Connected ──▶ Progress* ──▶ BlockComplete ──▶ Completed
//!                   ▲  │            │            │              │
//!                   │  └──▶ Warn    └────────────┴──────┬───────┘
//!                   │                                   ▼
//!                   └─────────────── Retry ◀──── (retryable failure)
//!
//! any non-terminal active state ──▶ Paused | Error
//! ```
//!
//! `Completed`, `Warn`, `Error` and `Paused` are terminal. The only way out of a
//! terminal state is [`DownloadTask::reuse`](crate::DownloadTask::reuse), which
//! puts the task back to `Idle` for a new use cycle.

use serde::{Deserialize, Serialize};

/// Download task status
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Not started (pre-use default)
    #[default]
    Idle,
    /// Accepted by the engine, not yet connected
    Pending,
    /// Transport established; etag, total size and resume capability known
    Connected,
    /// Bytes are flowing
    Progress,
    /// The current transport segment finished
    BlockComplete,
    /// Retryable failure; about to reconnect
    Retry,
    /// All bytes written and verified
    Completed,
    /// Stopped by the user
    Paused,
    /// Failed permanently or ran out of retries
    Error,
    /// Target already fully downloaded
    Warn,
}

impl Status {
    /// Whether this status is terminal (`Completed`, `Warn`, `Error`, `Paused`)
    pub fn is_over(&self) -> bool {
        matches!(
            self,
            Status::Completed | Status::Warn | Status::Error | Status::Paused
        )
    }

    /// Whether a transport may currently be attached to the task
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Status::Pending
                | Status::Connected
                | Status::Progress
                | Status::BlockComplete
                | Status::Retry
        )
    }

    /// Whether moving from `self` to `next` is a legal transition
    ///
    /// `Progress → Progress` is the only self-transition. Nothing leaves a
    /// terminal state.
    pub fn can_transition_to(&self, next: Status) -> bool {
        use Status::*;

        match (self, next) {
            (Idle, Pending | Error) => true,
            (Pending, Connected | Warn | Retry | Paused | Error) => true,
            (Connected | Progress, Progress | BlockComplete | Retry | Paused | Error) => true,
            (BlockComplete, Completed | Retry | Paused | Error) => true,
            (Retry, Pending | Paused | Error) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Status::Idle => "idle",
            Status::Pending => "pending",
            Status::Connected => "connected",
            Status::Progress => "progress",
            Status::BlockComplete => "block_complete",
            Status::Retry => "retry",
            Status::Completed => "completed",
            Status::Paused => "paused",
            Status::Error => "error",
            Status::Warn => "warn",
        };
        f.write_str(name)
    }
}
