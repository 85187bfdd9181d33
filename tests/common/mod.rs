//! Common test utilities for http-dl integration tests

use http_dl::{
    Config, DownloadEngine, DownloadListener, DownloadTask, Event, HttpTransport,
    ImmediateDispatcher, MemoryBreakpointStore, Status,
};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Listener that keeps every event it receives
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<Event>>,
}

#[allow(dead_code)]
impl Recorder {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<Status> {
        self.events().iter().map(Event::status).collect()
    }
}

impl DownloadListener for Recorder {
    fn on_event(&self, _task: &DownloadTask, event: &Event) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Engine over the real HTTP transport
///
/// Callbacks run inline so events are recorded before `wait_over` returns.
pub struct Harness {
    pub engine: DownloadEngine,
    pub store: Arc<MemoryBreakpointStore>,
    pub dir: TempDir,
}

pub fn harness() -> Harness {
    let config = Config::default();
    let transport = Arc::new(HttpTransport::new(&config.http).unwrap());
    let store = Arc::new(MemoryBreakpointStore::new());
    let engine = DownloadEngine::with_components(
        config,
        transport,
        store.clone(),
        Arc::new(ImmediateDispatcher),
        Arc::new(ImmediateDispatcher),
    );

    Harness {
        engine,
        store,
        dir: tempfile::tempdir().unwrap(),
    }
}

impl Harness {
    /// A task downloading `url` to `name` inside the temp dir
    pub fn task(&self, url: &str, name: &str) -> (DownloadTask, Arc<Recorder>) {
        let task = self.engine.create_task(url);
        task.set_path(self.dir.path().join(name), false).unwrap();
        let recorder = Arc::new(Recorder::default());
        task.set_listener(recorder.clone()).unwrap();
        (task, recorder)
    }
}

/// Body of `len` bytes with a recognizable pattern
pub fn body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
