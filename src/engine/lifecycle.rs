//! Graceful shutdown.

use std::sync::atomic::Ordering;
use std::time::Duration;

use super::DownloadEngine;

/// How long shutdown waits for workers to persist their breakpoints and exit
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

impl DownloadEngine {
    /// Gracefully shut down the engine
    ///
    /// 1. Stops accepting new tasks
    /// 2. Pauses every running task (each worker saves its breakpoint)
    /// 3. Waits for the workers to exit, up to 30 seconds
    ///
    /// Paused tasks can be resumed by a later engine sharing the same
    /// breakpoint store.
    pub async fn shutdown(&self) {
        tracing::info!("Initiating graceful shutdown");

        self.accepting_new.store(false, Ordering::SeqCst);
        self.pause_all();

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.wait_for_workers()).await {
            Ok(()) => tracing::info!("All workers stopped"),
            Err(_) => tracing::warn!(
                active_count = self.registry.len(),
                "Timeout waiting for workers, proceeding with shutdown"
            ),
        }

        self.concurrent_limit.close();
        tracing::info!("Shutdown complete");
    }

    async fn wait_for_workers(&self) {
        loop {
            let active_count = self.registry.len();
            if active_count == 0 {
                return;
            }
            tracing::debug!(active_count, "Waiting for workers to stop");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}
