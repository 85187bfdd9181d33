//! Execution contexts for observer callbacks
//!
//! Listener notifications never run under task locks on arbitrary threads: they
//! are handed to a [`Dispatcher`] as boxed jobs. The engine owns two of them, one
//! for [`DownloadListener`](crate::DownloadListener) callbacks and one for
//! [`FinishListener`](crate::FinishListener)s.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

/// A unit of callback work
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Somewhere to run callback jobs
///
/// Implementations must run jobs submitted from one thread in submission order.
pub trait Dispatcher: Send + Sync {
    /// Queue a job for execution
    fn submit(&self, job: Job);

    /// Name for logging
    fn name(&self) -> &str;
}

/// Runs every job on the submitting thread before `submit` returns
///
/// Useful for tests and for callers that already serialize their own callbacks.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImmediateDispatcher;

impl Dispatcher for ImmediateDispatcher {
    fn submit(&self, job: Job) {
        run_job(job, self.name());
    }

    fn name(&self) -> &str {
        "immediate"
    }
}

enum Message {
    Run(Job),
    Flush(oneshot::Sender<()>),
}

/// A single serial context on a dedicated OS thread
///
/// Jobs run one at a time in submission order, off the runtime's worker
/// threads, so a slow listener never holds up a transfer. A panicking job is
/// logged and does not stop the context.
#[derive(Clone, Debug)]
pub struct SerialDispatcher {
    name: String,
    tx: mpsc::UnboundedSender<Message>,
}

impl SerialDispatcher {
    /// Start the context's thread
    ///
    /// The current tokio runtime, if any, is entered on the thread so jobs may
    /// spawn tasks. The thread exits once every clone of the dispatcher has been
    /// dropped.
    ///
    /// # Errors
    ///
    /// Fails if the OS refuses to create the thread.
    pub fn spawn(name: impl Into<String>) -> std::io::Result<Self> {
        let name = name.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        let handle = Handle::try_current().ok();
        let worker_name = name.clone();
        thread::Builder::new()
            .name(format!("http-dl-{name}"))
            .spawn(move || {
                let _guard = handle.as_ref().map(Handle::enter);
                while let Some(message) = rx.blocking_recv() {
                    match message {
                        Message::Run(job) => run_job(job, &worker_name),
                        Message::Flush(done) => {
                            let _ = done.send(());
                        }
                    }
                }
                debug!(dispatcher = %worker_name, "dispatcher stopped");
            })?;

        Ok(Self { name, tx })
    }

    /// Wait until every job submitted before this call has run
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Message::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

impl Dispatcher for SerialDispatcher {
    fn submit(&self, job: Job) {
        if self.tx.send(Message::Run(job)).is_err() {
            error!(dispatcher = %self.name, "dispatcher is closed, dropping callback");
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn run_job(job: Job, dispatcher: &str) {
    if catch_unwind(AssertUnwindSafe(job)).is_err() {
        error!(dispatcher = %dispatcher, "listener callback panicked");
    }
}
