//! # http-dl
//!
//! Resumable, queue-aware HTTP download tasks.
//!
//! ## Design Philosophy
//!
//! http-dl is designed to be:
//! - **Resumable** - Partial downloads survive pauses, retries and restarts
//! - **Sensible defaults** - Works out of the box with zero configuration
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Listeners and a broadcast channel, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use http_dl::{Config, DownloadEngine, DownloadTask, Event};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = DownloadEngine::new(Config::default()).await?;
//!
//!     let task = engine.create_task("https://example.com/file.iso");
//!     task.set_path("/tmp/downloads", true)?
//!         .set_auto_retry_times(3)?
//!         .set_listener(Arc::new(|task: &DownloadTask, event: &Event| {
//!             println!("{}: {:?}", task.id(), event);
//!         }))?;
//!
//!     engine.start(&task).await?;
//!     let status = task.wait_over().await;
//!     println!("finished with {status}");
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Callback execution contexts
pub mod dispatch;
/// Download engine (decomposed into focused submodules)
pub mod engine;
/// Error types
pub mod error;
/// Task ids and path resolution
pub mod identity;
/// Observer traits
pub mod listener;
/// Progress throttling and speed sampling
pub mod progress;
/// Task queues
pub mod queue;
/// Retry logic with exponential backoff
pub mod retry;
/// Task status lifecycle
pub mod status;
/// Breakpoint persistence
pub mod store;
/// Download task descriptor
pub mod task;
/// Transport abstraction and the HTTP implementation
pub mod transport;
/// Core types
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use dispatch::{Dispatcher, ImmediateDispatcher, SerialDispatcher};
pub use engine::DownloadEngine;
pub use error::{Error, Result, TransportError, TransportErrorKind};
pub use listener::{DownloadListener, FinishListener};
pub use queue::TaskQueue;
pub use status::Status;
pub use store::{Breakpoint, BreakpointStore, MemoryBreakpointStore, SqliteBreakpointStore};
pub use task::{DownloadTask, HeaderList, Tag};
pub use transport::{ConnectInfo, HttpTransport, Transport, TransportRequest, TransportSink};
pub use types::{Event, QueueHandle, TaskId};

/// Run until a termination signal arrives, then shut the engine down
///
/// Listens for Ctrl+C everywhere and for SIGTERM on Unix. Running tasks are
/// paused, so their breakpoints are saved for the next run.
///
/// # Example
///
/// ```no_run
/// use http_dl::{Config, DownloadEngine, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let engine = DownloadEngine::new(Config::default()).await?;
///
///     // Start tasks here, then park until the process is asked to stop
///     run_with_shutdown(engine).await;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(engine: DownloadEngine) {
    shutdown_on(engine, wait_for_signal()).await
}

/// Shut the engine down once `signal` resolves
///
/// [`run_with_shutdown`] with a caller-chosen trigger, such as a channel from
/// the host application's own lifecycle.
pub async fn shutdown_on<F>(engine: DownloadEngine, signal: F)
where
    F: std::future::Future<Output = ()>,
{
    signal.await;
    tracing::info!(
        active_count = engine.active_count(),
        "stop requested, pausing downloads"
    );
    engine.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            // Restricted environments may refuse the handler
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable, waiting for Ctrl+C only");
                std::future::pending::<()>().await
            }
        }
    };

    tokio::select! {
        _ = terminate => tracing::info!(signal = "SIGTERM", "termination signal received"),
        _ = interrupt() => tracing::info!(signal = "SIGINT", "termination signal received"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    interrupt().await;
    tracing::info!(signal = "Ctrl+C", "termination signal received");
}

async fn interrupt() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Ctrl+C handler unavailable");
        std::future::pending::<()>().await
    }
}
