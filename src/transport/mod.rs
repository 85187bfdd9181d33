//! Transport abstraction
//!
//! A [`Transport`] performs one fetch attempt for a task. The engine tells it
//! where to start (resume offset, conditional headers) and the transport reports
//! back through a [`TransportSink`]: once when the connection is established and
//! once per chunk written. Returning `Ok(())` means the segment completed;
//! returning an error hands the failure to the retry policy.
//!
//! ## Submodules
//!
//! - [`http`] - default `reqwest` implementation

use crate::error::Result;
use crate::store::{self, BreakpointStore};
use crate::task::{DownloadTask, HeaderList};
use crate::types::TaskId;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

pub mod http;

pub use http::HttpTransport;

/// What the engine asks a transport to fetch
#[derive(Clone, Debug)]
pub struct TransportRequest {
    /// Task being fetched
    pub id: TaskId,
    /// Source URL
    pub url: String,
    /// Request headers, resume headers already merged in
    pub headers: HeaderList,
    /// Offset the engine asked to resume from (`Range: bytes={offset}-`)
    pub resume_offset: Option<u64>,
}

/// Metadata a transport learned when the connection was established
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectInfo {
    /// ETag of the resource
    pub etag: Option<String>,
    /// Full size of the resource, not just of the response body
    pub total_bytes: Option<u64>,
    /// Whether the server accepts range requests
    pub resumable: bool,
    /// Whether the response continues from the requested resume offset
    ///
    /// `false` means the body starts at byte zero and any partial data must be
    /// discarded.
    pub partial: bool,
    /// Filename suggested by the server (e.g., from `Content-Disposition`)
    pub filename_hint: Option<String>,
}

/// Channel from a transport back into the task's state machine
pub struct TransportSink {
    task: DownloadTask,
    store: Arc<dyn BreakpointStore>,
}

impl TransportSink {
    pub(crate) fn new(task: DownloadTask, store: Arc<dyn BreakpointStore>) -> Self {
        Self { task, store }
    }

    /// Report the connection and get the file to write into
    ///
    /// When `info.partial` is true, the file already holds the first
    /// `resume_offset` bytes and the body must be appended at that offset.
    /// Otherwise the file must be truncated.
    ///
    /// # Errors
    ///
    /// [`Error::UserCancelled`](crate::Error::UserCancelled) if the task was
    /// paused meanwhile; stop without further reports.
    pub async fn connected(&self, info: ConnectInfo) -> Result<PathBuf> {
        let path = self.task.to_connected(&info, Instant::now())?;
        store::persist(&self.task, self.store.as_ref()).await;
        Ok(path)
    }

    /// Report `delta` bytes written to the file
    ///
    /// # Errors
    ///
    /// [`Error::UserCancelled`](crate::Error::UserCancelled) once the task is
    /// over, or an invalid-response transport error if more bytes arrive than
    /// the server announced.
    pub async fn progress(&self, delta: u64) -> Result<()> {
        if self.task.on_progress(delta, Instant::now())? {
            store::persist(&self.task, self.store.as_ref()).await;
        }
        Ok(())
    }

    /// The task this sink reports for
    pub fn task(&self) -> &DownloadTask {
        &self.task
    }
}

/// Fetches bytes for a task
#[async_trait]
pub trait Transport: Send + Sync {
    /// Run one attempt
    ///
    /// Must call [`TransportSink::connected`] before any
    /// [`TransportSink::progress`], stop promptly when `cancel` fires (returning
    /// [`Error::UserCancelled`](crate::Error::UserCancelled)), and return `Ok(())`
    /// only after every byte of the segment has been written.
    async fn fetch(
        &self,
        request: &TransportRequest,
        sink: &TransportSink,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Name of this transport (for logging)
    fn name(&self) -> &'static str;
}
