//! Retry and breakpoint-resume policy
//!
//! Decides whether a failed attempt is retried, how long to wait before the next
//! attempt, and which conditional headers the next attempt carries.
//!
//! # Example
//!
//! ```
//! use http_dl::config::RetryConfig;
//! use http_dl::error::{Error, TransportError};
//! use http_dl::retry::{RetryDecision, RetryPolicy};
//!
//! let config = RetryConfig::default();
//! let policy = RetryPolicy::new(&config);
//! let err = Error::Transport(TransportError::status(503));
//!
//! // First failure with a budget of two retries: try again
//! assert!(matches!(policy.decide(&err, 0, 2), RetryDecision::Retry { attempt: 1, .. }));
//! // Budget exhausted: give up
//! assert_eq!(policy.decide(&err, 2, 2), RetryDecision::GiveUp);
//! ```

use crate::config::RetryConfig;
use crate::error::{Error, TransportError, TransportErrorKind};
use rand::Rng;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, connection resets, 5xx) should return `true`.
/// Permanent failures (malformed URL, permission denied, corrupt partial data)
/// should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for TransportError {
    fn is_retryable(&self) -> bool {
        match self.kind {
            TransportErrorKind::Timeout
            | TransportErrorKind::Connect
            | TransportErrorKind::Network
            | TransportErrorKind::InvalidResponse => true,
            // The next attempt starts over without the stale conditional headers
            TransportErrorKind::PreconditionFailed => true,
            TransportErrorKind::Status(code) => code >= 500 || code == 408 || code == 429,
            TransportErrorKind::Corrupted => false,
        }
    }
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Transport(e) => e.is_retryable(),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::UnexpectedEof
            ),
            // Bad URL or path will fail the same way every time
            Error::InvalidConfiguration { .. } | Error::InvalidPath(_) => false,
            Error::AlreadyInUse { .. } => false,
            // A pause is not a failure and must never be retried
            Error::UserCancelled => false,
            Error::Storage(_) | Error::Database(_) => false,
            Error::ShuttingDown => false,
        }
    }
}

/// Outcome of [`RetryPolicy::decide`]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RetryDecision {
    /// Reconnect after `delay`; `attempt` is the new `retrying_times`
    Retry {
        /// Attempt counter after this retry (1-based)
        attempt: u32,
        /// How long to wait before reconnecting
        delay: Duration,
    },
    /// Surface the error as the terminal state
    GiveUp,
}

/// Retry decision maker backed by a [`RetryConfig`]
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy<'a> {
    config: &'a RetryConfig,
}

impl<'a> RetryPolicy<'a> {
    /// Create a policy over the given backoff configuration
    pub fn new(config: &'a RetryConfig) -> Self {
        Self { config }
    }

    /// Decide what happens after a failed attempt
    ///
    /// Retries only if the error is retryable and `retrying_times < auto_retry_times`,
    /// so the counter can never exceed the configured ceiling.
    pub fn decide<E: IsRetryable>(
        &self,
        error: &E,
        retrying_times: u32,
        auto_retry_times: u32,
    ) -> RetryDecision {
        if !error.is_retryable() || retrying_times >= auto_retry_times {
            return RetryDecision::GiveUp;
        }

        let attempt = retrying_times + 1;
        RetryDecision::Retry {
            attempt,
            delay: self.delay_for(attempt),
        }
    }

    /// Backoff delay before the given (1-based) retry attempt
    ///
    /// `initial_delay * backoff_multiplier^(attempt - 1)`, capped at `max_delay`,
    /// with optional jitter applied after the cap.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if self.config.initial_delay.is_zero() {
            return Duration::ZERO;
        }

        let exponent = attempt.saturating_sub(1) as i32;
        let secs = self.config.initial_delay.as_secs_f64()
            * self.config.backoff_multiplier.powi(exponent);
        let delay = Duration::try_from_secs_f64(secs)
            .unwrap_or(self.config.max_delay)
            .min(self.config.max_delay);

        if self.config.jitter {
            add_jitter(delay)
        } else {
            delay
        }
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay.
/// This means the actual delay will be between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::from_secs_f64(jittered_secs)
}

/// Conditional request parameters for the next attempt
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResumeParams {
    /// Byte offset to request with `Range: bytes={offset}-`
    pub offset: Option<u64>,
    /// Recorded ETag to send as `If-Match`
    pub etag: Option<String>,
}

impl ResumeParams {
    /// Compute resume parameters from a task's recorded transfer state
    ///
    /// A range is only requested when the server confirmed the resource as
    /// resumable, the caller did not force a fresh download, and there is data on
    /// disk to continue from. The etag is sent whenever one was recorded so the
    /// server can reject a changed resource.
    pub fn compute(
        so_far_bytes: u64,
        etag: Option<&str>,
        resumable: bool,
        force_re_download: bool,
    ) -> Self {
        if force_re_download {
            return Self::default();
        }

        let offset = (resumable && so_far_bytes > 0).then_some(so_far_bytes);
        Self {
            offset,
            etag: etag.map(str::to_string),
        }
    }

    /// Whether the next attempt asks the server to continue a partial transfer
    pub fn is_resume(&self) -> bool {
        self.offset.is_some()
    }
}
