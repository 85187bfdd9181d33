//! Shared test helpers: a scripted in-process transport, a recording listener and
//! an engine wired to both.

use crate::config::Config;
use crate::dispatch::{Dispatcher, ImmediateDispatcher};
use crate::engine::DownloadEngine;
use crate::error::{Error, Result, TransportError, TransportErrorKind};
use crate::listener::DownloadListener;
use crate::status::Status;
use crate::store::MemoryBreakpointStore;
use crate::task::DownloadTask;
use crate::transport::{ConnectInfo, Transport, TransportRequest, TransportSink};
use crate::types::Event;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::SeekFrom;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

/// What one fetch attempt of the [`MockTransport`] does
#[derive(Clone, Debug)]
pub(crate) enum Outcome {
    /// Serve the rest of the content
    Complete,
    /// Fail before connecting
    Fail(TransportError),
    /// Connect, write this many bytes, then fail
    FailAfter(u64, TransportError),
    /// Connect, write this many bytes, then hang until cancelled
    Stall(u64),
}

/// In-process transport serving a fixed body
///
/// Attempts follow the script; once it runs out every attempt completes. Range
/// requests are honored when `accept_ranges` is set, and an `If-Match` that does
/// not match the current etag fails with a precondition error.
pub(crate) struct MockTransport {
    content: Vec<u8>,
    etag: Mutex<Option<String>>,
    accept_ranges: bool,
    chunk_size: usize,
    script: Mutex<VecDeque<Outcome>>,
    requests: Mutex<Vec<TransportRequest>>,
}

impl MockTransport {
    pub(crate) fn new(content: Vec<u8>) -> Self {
        Self {
            content,
            etag: Mutex::new(Some("\"v1\"".to_string())),
            accept_ranges: true,
            chunk_size: 100,
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_script(self, outcomes: impl IntoIterator<Item = Outcome>) -> Self {
        self.script.lock().extend(outcomes);
        self
    }

    pub(crate) fn without_ranges(mut self) -> Self {
        self.accept_ranges = false;
        self
    }

    pub(crate) fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Pretend the resource changed on the server
    pub(crate) fn set_etag(&self, etag: &str) {
        *self.etag.lock() = Some(etag.to_string());
    }

    pub(crate) fn push_outcome(&self, outcome: Outcome) {
        self.script.lock().push_back(outcome);
    }

    pub(crate) fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().clone()
    }

    pub(crate) fn content(&self) -> &[u8] {
        &self.content
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn fetch(
        &self,
        request: &TransportRequest,
        sink: &TransportSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.requests.lock().push(request.clone());
        let outcome = self.script.lock().pop_front().unwrap_or(Outcome::Complete);

        if let Outcome::Fail(e) = &outcome {
            return Err(e.clone().into());
        }

        let etag = self.etag.lock().clone();
        if let Some(expected) = request.headers.get_all("If-Match").next()
            && etag.as_deref() != Some(expected)
        {
            return Err(TransportError::new(
                TransportErrorKind::PreconditionFailed,
                "etag changed",
            )
            .into());
        }

        let len = self.content.len() as u64;
        let start = match request.resume_offset {
            Some(offset) if self.accept_ranges && offset <= len => offset,
            _ => 0,
        };
        let info = ConnectInfo {
            etag,
            total_bytes: Some(len),
            resumable: self.accept_ranges,
            partial: start > 0,
            filename_hint: None,
        };
        let path = sink.connected(info).await?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = if start > 0 {
            let mut file = tokio::fs::OpenOptions::new().write(true).open(&path).await?;
            file.set_len(start).await?;
            file.seek(SeekFrom::Start(start)).await?;
            file
        } else {
            tokio::fs::File::create(&path).await?
        };

        let end = match &outcome {
            Outcome::FailAfter(n, _) | Outcome::Stall(n) => (start + n).min(len),
            _ => len,
        };

        let mut pos = start as usize;
        while pos < end as usize {
            if cancel.is_cancelled() {
                file.flush().await?;
                return Err(Error::UserCancelled);
            }
            let next = (pos + self.chunk_size).min(end as usize);
            file.write_all(&self.content[pos..next]).await?;
            sink.progress((next - pos) as u64).await?;
            pos = next;
            tokio::task::yield_now().await;
        }
        file.flush().await?;

        match outcome {
            Outcome::FailAfter(_, e) => Err(e.into()),
            Outcome::Stall(_) => {
                cancel.cancelled().await;
                Err(Error::UserCancelled)
            }
            _ => Ok(()),
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Listener that records every event it receives
#[derive(Default)]
pub(crate) struct RecordingListener {
    events: Mutex<Vec<Event>>,
}

impl RecordingListener {
    pub(crate) fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub(crate) fn statuses(&self) -> Vec<Status> {
        self.events.lock().iter().map(Event::status).collect()
    }
}

impl DownloadListener for RecordingListener {
    fn on_event(&self, _task: &DownloadTask, event: &Event) {
        self.events.lock().push(event.clone());
    }
}

/// Engine over a [`MockTransport`] with in-memory breakpoints and callbacks run
/// inline, so listener events are recorded by the time a transition returns.
pub(crate) struct TestEngine {
    pub engine: DownloadEngine,
    pub transport: Arc<MockTransport>,
    pub store: Arc<MemoryBreakpointStore>,
    pub dir: TempDir,
}

pub(crate) fn create_test_engine(transport: MockTransport) -> TestEngine {
    create_test_engine_with(transport, Config::default())
}

pub(crate) fn create_test_engine_with(transport: MockTransport, config: Config) -> TestEngine {
    create_test_engine_with_dispatchers(
        transport,
        config,
        Arc::new(ImmediateDispatcher),
        Arc::new(ImmediateDispatcher),
    )
}

/// Like [`create_test_engine_with`], with explicit callback contexts
pub(crate) fn create_test_engine_with_dispatchers(
    transport: MockTransport,
    config: Config,
    callbacks: Arc<dyn Dispatcher>,
    finish: Arc<dyn Dispatcher>,
) -> TestEngine {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(transport);
    let store = Arc::new(MemoryBreakpointStore::new());

    let engine = DownloadEngine::with_components(
        config,
        transport.clone(),
        store.clone(),
        callbacks,
        finish,
    );

    TestEngine {
        engine,
        transport,
        store,
        dir,
    }
}

impl TestEngine {
    /// A task writing `name` into the temp dir, with a recording listener
    pub(crate) fn task(&self, name: &str) -> (DownloadTask, Arc<RecordingListener>) {
        let task = self
            .engine
            .create_task(format!("https://example.com/{}", name));
        task.set_path(self.dir.path().join(name), false).unwrap();

        let listener = Arc::new(RecordingListener::default());
        task.set_listener(listener.clone()).unwrap();
        (task, listener)
    }
}

/// Body of `len` bytes with a recognizable pattern
pub(crate) fn sample_content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Poll until `f` holds, failing the test after a few seconds
pub(crate) async fn wait_until<F>(mut f: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..500 {
        if f() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
