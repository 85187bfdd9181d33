//! Progress notification throttling and speed sampling
//!
//! Two gates decide whether a `progress` transition is delivered to observers:
//!
//! - **Count gate**: the expected total is split into `callback_progress_count`
//!   equal byte buckets (`step = ceil(total / count)`); a notification is allowed
//!   when the transfer enters a new bucket. A count of zero or less suppresses
//!   progress notifications entirely.
//! - **Time gate**: at most one notification per `min_interval`.
//!
//! Both gates must pass. The progress that reaches `so_far == total` always
//! passes the time gate, so the last delivered progress of a completed transfer
//! reports the full size.
//!
//! Throttling is pure bookkeeping: callers pass the current [`Instant`] in, which
//! keeps these types deterministic under test.

use crate::config::MIN_CALLBACK_PROGRESS_INTERVAL_MS;
use std::time::{Duration, Instant};

/// Decides which progress updates become notifications
#[derive(Clone, Debug)]
pub struct ProgressThrottle {
    count: i32,
    min_interval: Option<Duration>,
    total: u64,
    step: Option<u64>,
    last_bucket: u64,
    last_notified_bytes: Option<u64>,
    last_notified_at: Option<Instant>,
}

impl ProgressThrottle {
    /// Create a throttle
    ///
    /// `min_interval_ms = 0` disables the time gate; values below
    /// [`MIN_CALLBACK_PROGRESS_INTERVAL_MS`] are raised to it.
    pub fn new(count: i32, min_interval_ms: u32) -> Self {
        let min_interval = match min_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(
                ms.max(MIN_CALLBACK_PROGRESS_INTERVAL_MS) as u64,
            )),
        };

        Self {
            count,
            min_interval,
            total: 0,
            step: None,
            last_bucket: 0,
            last_notified_bytes: None,
            last_notified_at: None,
        }
    }

    /// Whether every progress notification is suppressed
    pub fn is_suppressed(&self) -> bool {
        self.count <= 0
    }

    /// The effective time gate, if any
    pub fn min_interval(&self) -> Option<Duration> {
        self.min_interval
    }

    /// Re-arm the throttle for a new connection
    ///
    /// `so_far` is the resume baseline: buckets already behind it do not fire again.
    pub fn reset(&mut self, total: u64, so_far: u64) {
        self.total = total;
        self.step = if total > 0 && self.count > 0 {
            Some(total.div_ceil(self.count as u64))
        } else {
            None
        };
        self.last_bucket = self.bucket_of(so_far);
        self.last_notified_bytes = None;
        self.last_notified_at = None;
    }

    /// Record a progress update and decide whether to notify
    pub fn should_notify(&mut self, so_far: u64, now: Instant) -> bool {
        if self.is_suppressed() {
            return false;
        }

        let is_final = self.total > 0 && so_far >= self.total;
        let bucket = self.bucket_of(so_far);

        let count_gate = match self.step {
            Some(_) => {
                bucket > self.last_bucket
                    || (is_final && self.last_notified_bytes != Some(so_far))
            }
            // Unknown total (chunked response): only the time gate applies
            None => true,
        };
        if !count_gate {
            return false;
        }

        if !is_final
            && let (Some(interval), Some(last)) = (self.min_interval, self.last_notified_at)
            && now.saturating_duration_since(last) < interval
        {
            return false;
        }

        self.last_bucket = bucket;
        self.last_notified_bytes = Some(so_far);
        self.last_notified_at = Some(now);
        true
    }

    fn bucket_of(&self, so_far: u64) -> u64 {
        match self.step {
            Some(step) => so_far / step,
            None => 0,
        }
    }
}

/// Download speed sampling
///
/// While bytes flow, the speed is recomputed from the bytes and time elapsed since
/// the previous sample, no more often than the sampling interval. When the task
/// ends, [`SpeedMonitor::finish`] replaces it with the average over the whole
/// connected period.
#[derive(Clone, Debug)]
pub struct SpeedMonitor {
    sample_interval: Option<Duration>,
    started_at: Option<Instant>,
    transferred: u64,
    last_sample: Option<(Instant, u64)>,
    speed_bps: u64,
}

impl SpeedMonitor {
    /// Create a monitor; `sample_interval_ms <= 0` disables in-flight sampling
    pub fn new(sample_interval_ms: i32) -> Self {
        let sample_interval =
            (sample_interval_ms > 0).then(|| Duration::from_millis(sample_interval_ms as u64));
        Self {
            sample_interval,
            started_at: None,
            transferred: 0,
            last_sample: None,
            speed_bps: 0,
        }
    }

    /// Mark the start of the measured period (first `connected` of a use cycle)
    pub fn start(&mut self, now: Instant) {
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
        self.last_sample = Some((now, self.transferred));
    }

    /// Account for `delta` new bytes and resample if the interval elapsed
    pub fn record(&mut self, delta: u64, now: Instant) {
        self.transferred = self.transferred.saturating_add(delta);

        let Some(interval) = self.sample_interval else {
            return;
        };
        let Some((at, bytes)) = self.last_sample else {
            self.last_sample = Some((now, self.transferred));
            return;
        };

        let elapsed = now.saturating_duration_since(at);
        if elapsed >= interval {
            self.speed_bps = rate(self.transferred - bytes, elapsed);
            self.last_sample = Some((now, self.transferred));
        }
    }

    /// Freeze the speed at the lifetime average
    pub fn finish(&mut self, now: Instant) {
        if let Some(started) = self.started_at {
            self.speed_bps = rate(self.transferred, now.saturating_duration_since(started));
        }
        self.last_sample = None;
    }

    /// Current speed in bytes per second
    pub fn speed_bps(&self) -> u64 {
        self.speed_bps
    }

    /// Bytes transferred during the measured period
    pub fn transferred(&self) -> u64 {
        self.transferred
    }
}

fn rate(bytes: u64, elapsed: Duration) -> u64 {
    let nanos = elapsed.as_nanos();
    if nanos == 0 {
        return 0;
    }
    let bps = bytes as u128 * 1_000_000_000 / nanos;
    u64::try_from(bps).unwrap_or(u64::MAX)
}
