//! Per-task transfer loop.
//!
//! One worker per started task: wait for a concurrency slot, short-circuit if
//! the target already exists, then run transport attempts until the task
//! completes, fails for good, or is paused. Every exit path releases the registry
//! entry and clears the running flag last, so [`DownloadTask::wait_over`] only
//! returns once the id can be started again.

use crate::error::{Error, Result, TransportError, TransportErrorKind};
use crate::retry::{RetryDecision, RetryPolicy, ResumeParams};
use crate::store;
use crate::task::DownloadTask;
use crate::transport::{TransportRequest, TransportSink};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::DownloadEngine;

pub(crate) async fn run(engine: DownloadEngine, task: DownloadTask, cancel: CancellationToken) {
    let id = task.id();

    let permit = tokio::select! {
        permit = engine.concurrent_limit.clone().acquire_owned() => Some(permit),
        _ = cancel.cancelled() => None,
    };

    match permit {
        Some(Ok(_permit)) => drive(&engine, &task, &cancel).await,
        Some(Err(_)) => {
            task.to_error(Error::ShuttingDown);
        }
        // Paused while waiting for a slot
        None => debug!(task_id = %id, "paused before a download slot opened"),
    }

    engine.registry.remove(id, &task);
    task.set_added_to_list(false);
    task.set_running(false);
}

async fn drive(engine: &DownloadEngine, task: &DownloadTask, cancel: &CancellationToken) {
    let id = task.id();

    if !task.is_force_re_download()
        && let Ok(target) = task.target_file_path()
        && let Ok(meta) = tokio::fs::metadata(&target).await
        && meta.is_file()
    {
        info!(task_id = %id, path = %target.display(), "target already exists, nothing to download");
        engine.forget_breakpoint(id).await;
        task.to_warn(meta.len());
        return;
    }

    loop {
        let err = match attempt(engine, task, cancel).await {
            Ok(()) => return,
            Err(e) => e,
        };

        if cancel.is_cancelled() || matches!(err, Error::UserCancelled) {
            store::persist(task, engine.store.as_ref()).await;
            debug!(task_id = %id, so_far_bytes = task.large_file_so_far_bytes(), "transfer stopped by pause");
            return;
        }

        if let Some(transport_err) = err.as_transport()
            && transport_err.is_precondition_failed()
        {
            warn!(task_id = %id, error = %err, "resource changed on the server, discarding partial data");
            task.reset_transfer();
            engine.forget_breakpoint(id).await;
        }

        let (retrying_times, max_retries) = task.auto_retry_budget();
        match RetryPolicy::new(&engine.config.retry).decide(&err, retrying_times, max_retries) {
            RetryDecision::Retry { attempt, delay } => {
                warn!(
                    task_id = %id,
                    attempt,
                    max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "download failed, retrying"
                );
                if !task.to_retry(err, attempt) {
                    return;
                }
                store::persist(task, engine.store.as_ref()).await;

                if !delay.is_zero() {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return,
                    }
                }
                if !task.to_pending() {
                    return;
                }
            }
            RetryDecision::GiveUp => {
                error!(task_id = %id, retrying_times, error = %err, "download failed");
                store::persist(task, engine.store.as_ref()).await;
                task.to_error(err);
                return;
            }
        }
    }
}

/// One transport attempt followed by finalization
async fn attempt(engine: &DownloadEngine, task: &DownloadTask, cancel: &CancellationToken) -> Result<()> {
    let state = task.transfer_state();
    let resume = ResumeParams::compute(
        state.so_far,
        state.etag.as_deref(),
        state.resumable,
        task.is_force_re_download(),
    );

    let request = TransportRequest {
        id: task.id(),
        url: task.url(),
        headers: task.headers().with_resume(&resume),
        resume_offset: resume.offset,
    };
    debug!(
        task_id = %request.id,
        transport = engine.transport.name(),
        resume_offset = ?request.resume_offset,
        "connecting"
    );

    let sink = TransportSink::new(task.clone(), engine.store.clone());
    engine.transport.fetch(&request, &sink, cancel).await?;
    finalize(engine, task).await
}

/// Verify the segment and move the temp file into place
async fn finalize(engine: &DownloadEngine, task: &DownloadTask) -> Result<()> {
    let id = task.id();

    if !task.to_block_complete() {
        return Err(if task.status().is_over() {
            Error::UserCancelled
        } else {
            TransportError::new(
                TransportErrorKind::InvalidResponse,
                "transport finished without connecting",
            )
            .into()
        });
    }

    let state = task.transfer_state();
    if state.total > 0 && state.so_far != state.total {
        return Err(TransportError::new(
            TransportErrorKind::InvalidResponse,
            format!(
                "connection closed after {} of {} bytes",
                state.so_far, state.total
            ),
        )
        .into());
    }
    store::persist(task, engine.store.as_ref()).await;

    let temp = task.temp_file_path()?;
    let target = task.target_file_path()?;
    // Blocking I/O: the delivery lock cannot be held across an await
    task.commit_segment(|| {
        if target.is_file() {
            std::fs::remove_file(&target)?;
        }
        std::fs::rename(&temp, &target)?;
        Ok(())
    })?;
    engine.forget_breakpoint(id).await;

    info!(
        task_id = %id,
        path = %target.display(),
        total_bytes = state.so_far,
        speed_bps = task.speed_bps(),
        "download completed"
    );
    Ok(())
}
