//! Configuration types for http-dl

use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Main configuration for [`DownloadEngine`](crate::DownloadEngine)
///
/// Every field has a sensible default, so `Config::default()` gives a working
/// engine with an in-memory breakpoint store.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Download behavior (concurrency, temp files)
    #[serde(default)]
    pub download: DownloadConfig,

    /// Retry backoff between automatic retries
    #[serde(default)]
    pub retry: RetryConfig,

    /// Settings for the built-in HTTP transport
    #[serde(default)]
    pub http: HttpConfig,

    /// Breakpoint persistence
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Defaults applied to tasks created through the engine
    #[serde(default)]
    pub defaults: TaskDefaults,
}

/// Download behavior configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Maximum transports running at the same time (default: 3)
    ///
    /// Tasks started beyond this limit stay `Pending` until a slot frees up.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,

    /// Suffix appended to the target path for the in-progress file (default: ".temp")
    #[serde(default = "default_temp_suffix")]
    pub temp_suffix: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: default_max_concurrent(),
            temp_suffix: default_temp_suffix(),
        }
    }
}

/// Retry backoff configuration
///
/// How many times a task retries is a per-task setting
/// ([`DownloadTask::set_auto_retry_times`](crate::DownloadTask::set_auto_retry_times));
/// this only controls how long the engine waits between attempts.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Delay before the first retry (default: 0 = reconnect immediately)
    #[serde(default, with = "millis_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "millis_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
        }
    }
}

/// Built-in HTTP transport configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// TCP/TLS connect timeout (default: 15 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Overall request timeout, body included (None = no limit)
    #[serde(default, with = "optional_duration_serde")]
    pub request_timeout: Option<Duration>,

    /// User-Agent header sent when the task does not set one
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            request_timeout: None,
            user_agent: default_user_agent(),
        }
    }
}

/// Breakpoint persistence configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite database for breakpoints (None = keep breakpoints in memory only)
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

/// Defaults for task knobs, applied by
/// [`DownloadEngine::create_task`](crate::DownloadEngine::create_task)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskDefaults {
    /// Maximum progress notifications per transfer (default: 100, <= 0 disables)
    #[serde(default = "default_callback_progress_count")]
    pub callback_progress_count: i32,

    /// Minimum milliseconds between progress notifications (default: 10)
    #[serde(default = "default_callback_progress_min_interval_ms")]
    pub callback_progress_min_interval_ms: u32,

    /// Minimum milliseconds between speed samples (default: 5, <= 0 disables)
    #[serde(default = "default_min_interval_update_speed_ms")]
    pub min_interval_update_speed_ms: i32,

    /// Automatic retries on transient failures (default: 0)
    #[serde(default)]
    pub auto_retry_times: u32,

    /// Invoke listeners on the transport thread (default: false)
    #[serde(default)]
    pub sync_callback: bool,
}

impl Default for TaskDefaults {
    fn default() -> Self {
        Self {
            callback_progress_count: default_callback_progress_count(),
            callback_progress_min_interval_ms: default_callback_progress_min_interval_ms(),
            min_interval_update_speed_ms: default_min_interval_update_speed_ms(),
            auto_retry_times: 0,
            sync_callback: false,
        }
    }
}

/// Default progress notification budget per transfer
pub const DEFAULT_CALLBACK_PROGRESS_COUNT: i32 = 100;

/// Default minimum interval between progress notifications
pub const DEFAULT_CALLBACK_PROGRESS_MIN_INTERVAL_MS: u32 = 10;

/// Lowest honored progress interval; smaller non-zero values are raised to this
pub const MIN_CALLBACK_PROGRESS_INTERVAL_MS: u32 = 5;

/// Default speed sampling interval
pub const DEFAULT_MIN_INTERVAL_UPDATE_SPEED_MS: i32 = 5;

fn default_max_concurrent() -> usize {
    3
}

fn default_temp_suffix() -> String {
    ".temp".to_string()
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_user_agent() -> String {
    format!("http-dl/{}", env!("CARGO_PKG_VERSION"))
}

fn default_callback_progress_count() -> i32 {
    DEFAULT_CALLBACK_PROGRESS_COUNT
}

fn default_callback_progress_min_interval_ms() -> u32 {
    DEFAULT_CALLBACK_PROGRESS_MIN_INTERVAL_MS
}

fn default_min_interval_update_speed_ms() -> i32 {
    DEFAULT_MIN_INTERVAL_UPDATE_SPEED_MS
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Optional Duration serialization helper (whole seconds)
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}

// Duration serialization helper (milliseconds)
mod millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
