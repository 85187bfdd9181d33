use super::*;
use crate::queue::TaskQueue;
use crate::transport::ConnectInfo;
use std::time::Instant;

fn configured(url: &str) -> DownloadTask {
    let task = DownloadTask::new(url);
    task.set_path("/tmp/http-dl-tests/file.bin", false).unwrap();
    task
}

#[test]
fn new_task_is_idle_and_unused() {
    let task = configured("https://example.com/file.bin");

    assert_eq!(task.status(), Status::Idle);
    assert!(!task.is_using());
    assert!(!task.is_running());
    assert!(!task.is_attached());
    assert_eq!(task.large_file_so_far_bytes(), 0);
    assert_eq!(task.large_file_total_bytes(), 0);
    assert!(task.error_cause().is_none());
    assert_eq!(task.filename().as_deref(), Some("file.bin"));
}

#[test]
fn setters_chain() {
    let task = DownloadTask::new("https://example.com/a");
    task.set_path("/tmp/a", false)
        .unwrap()
        .set_auto_retry_times(3)
        .unwrap()
        .set_callback_progress_count(10)
        .unwrap()
        .add_header("X-Trace", "1")
        .unwrap();

    assert_eq!(task.auto_retry_times(), 3);
    assert_eq!(task.callback_progress_count(), 10);
    assert!(task.headers().contains("x-trace"));
}

#[test]
fn id_depends_on_url_and_path() {
    let a = configured("https://example.com/file.bin");
    let b = configured("https://example.com/file.bin");
    let c = configured("https://example.com/other.bin");

    assert_eq!(a.id(), b.id());
    assert_ne!(a.id(), c.id());
    assert!(!a.same_task(&b));
    assert!(a.same_task(&a.clone()));
}

#[test]
fn setters_rejected_while_in_use() {
    let task = configured("https://example.com/file.bin");
    let queue = TaskQueue::new();
    task.ready(&queue).unwrap();

    let err = task.set_url("https://example.com/other").unwrap_err();
    assert!(matches!(err, Error::AlreadyInUse { ref operation, .. } if operation == "set_url"));
    assert!(task.set_auto_retry_times(1).is_err());
    assert!(task.add_header("A", "b").is_err());
    assert_eq!(task.url(), "https://example.com/file.bin");
}

#[test]
fn finish_listeners_can_change_while_in_use() {
    let task = configured("https://example.com/file.bin");
    let queue = TaskQueue::new();
    task.ready(&queue).unwrap();

    let listener: Arc<dyn FinishListener> = Arc::new(|_: &DownloadTask| {});
    task.add_finish_listener(listener.clone());
    assert!(task.remove_finish_listener(&listener));
    assert!(!task.remove_finish_listener(&listener));
}

#[test]
fn ready_attaches_to_queue() {
    let task = configured("https://example.com/file.bin");
    let queue = TaskQueue::new();

    let id = task.ready(&queue).unwrap();
    assert_eq!(id, task.id());
    assert!(task.is_using());
    assert_eq!(task.attach_key(), Some(queue.handle()));
    assert_eq!(queue.len(), 1);

    let err = task.ready(&queue).unwrap_err();
    assert!(matches!(err, Error::AlreadyInUse { .. }));
    assert_eq!(queue.len(), 1);
}

#[test]
fn ready_validates_url_and_path() {
    let queue = TaskQueue::new();

    let no_path = DownloadTask::new("https://example.com/file.bin");
    assert!(matches!(no_path.ready(&queue), Err(Error::InvalidPath(_))));

    let bad_url = DownloadTask::new("not a url");
    bad_url.set_path("/tmp/x", false).unwrap();
    assert!(matches!(
        bad_url.ready(&queue),
        Err(Error::InvalidConfiguration { .. })
    ));

    let empty_url = DownloadTask::new("");
    empty_url.set_path("/tmp/x", false).unwrap();
    assert!(empty_url.ready(&queue).is_err());

    assert!(queue.is_empty());
    assert!(!no_path.is_using());
}

#[test]
fn pause_on_idle_task_is_refused() {
    let task = configured("https://example.com/file.bin");
    assert!(!task.pause());
    assert_eq!(task.status(), Status::Idle);
}

#[test]
fn reuse_of_idle_task_is_a_no_op() {
    let task = configured("https://example.com/file.bin");
    let id = task.id();
    task.reuse().unwrap();
    assert_eq!(task.status(), Status::Idle);
    assert_eq!(task.id(), id);
}

#[test]
fn reuse_after_pause_keeps_progress_and_id() {
    let task = configured("https://example.com/file.bin");
    let id = task.id();
    let queue = TaskQueue::new();
    task.ready(&queue).unwrap();

    assert!(task.to_pending());
    let info = ConnectInfo {
        etag: Some("\"v1\"".to_string()),
        total_bytes: Some(1000),
        resumable: true,
        partial: false,
        filename_hint: None,
    };
    task.to_connected(&info, Instant::now()).unwrap();
    task.on_progress(400, Instant::now()).unwrap();
    assert!(task.pause());
    assert_eq!(task.status(), Status::Paused);
    assert!(!task.is_attached());

    task.reuse().unwrap();
    assert_eq!(task.status(), Status::Idle);
    assert_eq!(task.id(), id);
    assert_eq!(task.large_file_so_far_bytes(), 400);
    assert_eq!(task.large_file_total_bytes(), 1000);
    assert_eq!(task.etag().as_deref(), Some("\"v1\""));
    assert!(!task.is_using());
    assert!(task.set_auto_retry_times(2).is_ok());
}

#[test]
fn reuse_after_completion_starts_over() {
    let task = configured("https://example.com/file.bin");
    task.claim("start").unwrap();

    assert!(task.to_pending());
    let info = ConnectInfo {
        total_bytes: Some(10),
        ..ConnectInfo::default()
    };
    task.to_connected(&info, Instant::now()).unwrap();
    task.on_progress(10, Instant::now()).unwrap();
    assert!(task.to_block_complete());
    assert!(task.to_completed());

    task.reuse().unwrap();
    assert_eq!(task.large_file_so_far_bytes(), 0);
    assert_eq!(task.large_file_total_bytes(), 0);
    assert!(task.etag().is_none());
}

#[test]
fn reuse_refused_while_active() {
    let task = configured("https://example.com/file.bin");
    task.claim("start").unwrap();
    assert!(task.to_pending());

    assert!(matches!(task.reuse(), Err(Error::AlreadyInUse { .. })));
}

#[test]
fn claim_rejects_second_use() {
    let task = configured("https://example.com/file.bin");
    task.claim("start").unwrap();
    assert!(matches!(task.claim("start"), Err(Error::AlreadyInUse { .. })));

    task.release_claim();
    assert!(task.claim("start").is_ok());
}

#[test]
fn claim_allows_readied_task_once() {
    let task = configured("https://example.com/file.bin");
    let queue = TaskQueue::new();
    task.ready(&queue).unwrap();

    task.claim("start").unwrap();
    assert!(task.to_pending());
    assert!(matches!(task.claim("start"), Err(Error::AlreadyInUse { .. })));
}

#[test]
fn progress_beyond_total_is_rejected() {
    let task = configured("https://example.com/file.bin");
    task.claim("start").unwrap();
    task.to_pending();
    let info = ConnectInfo {
        total_bytes: Some(100),
        ..ConnectInfo::default()
    };
    task.to_connected(&info, Instant::now()).unwrap();

    task.on_progress(60, Instant::now()).unwrap();
    let err = task.on_progress(60, Instant::now()).unwrap_err();
    assert!(err.as_transport().is_some());
    assert_eq!(task.large_file_so_far_bytes(), 60);
}

#[test]
fn partial_connect_larger_than_resource_is_corrupted() {
    let task = configured("https://example.com/file.bin");
    task.claim("start").unwrap();
    task.restore(
        &TransferState {
            so_far: 500,
            total: 500,
            etag: None,
            resumable: true,
            retrying_times: 0,
        },
        None,
    );
    task.to_pending();

    let info = ConnectInfo {
        total_bytes: Some(100),
        partial: true,
        resumable: true,
        ..ConnectInfo::default()
    };
    let err = task.to_connected(&info, Instant::now()).unwrap_err();
    assert!(err.as_transport().is_some());
    assert_eq!(task.status(), Status::Pending);
}

#[test]
fn full_response_resets_baseline() {
    let task = configured("https://example.com/file.bin");
    task.claim("start").unwrap();
    task.restore(
        &TransferState {
            so_far: 300,
            total: 1000,
            etag: Some("\"old\"".to_string()),
            resumable: true,
            retrying_times: 0,
        },
        None,
    );
    task.to_pending();

    let info = ConnectInfo {
        total_bytes: Some(1000),
        partial: false,
        ..ConnectInfo::default()
    };
    task.to_connected(&info, Instant::now()).unwrap();
    assert_eq!(task.large_file_so_far_bytes(), 0);
    assert!(!task.is_resuming());
}

#[test]
fn directory_task_resolves_filename_at_connect() {
    let task = DownloadTask::new("https://example.com/download?id=7");
    task.set_path("/tmp/http-dl-tests", true).unwrap();
    assert!(task.filename().is_none());
    assert!(task.target_file_path().is_err());

    task.claim("start").unwrap();
    task.to_pending();
    let info = ConnectInfo {
        filename_hint: Some("report.pdf".to_string()),
        ..ConnectInfo::default()
    };
    let temp = task.to_connected(&info, Instant::now()).unwrap();

    assert_eq!(task.filename().as_deref(), Some("report.pdf"));
    assert_eq!(
        task.target_file_path().unwrap(),
        PathBuf::from("/tmp/http-dl-tests/report.pdf")
    );
    assert_eq!(temp, PathBuf::from("/tmp/http-dl-tests/report.pdf.temp"));
}

#[test]
fn small_file_accessors_overflow_to_none() {
    let task = configured("https://example.com/big.iso");
    task.claim("start").unwrap();
    task.to_pending();
    let info = ConnectInfo {
        total_bytes: Some(LARGE_FILE_THRESHOLD + 1),
        ..ConnectInfo::default()
    };
    task.to_connected(&info, Instant::now()).unwrap();

    assert!(task.is_large_file());
    assert_eq!(task.small_file_total_bytes(), None);
    assert_eq!(task.small_file_so_far_bytes(), Some(0));
    assert_eq!(task.large_file_total_bytes(), LARGE_FILE_THRESHOLD + 1);
}

#[test]
fn retry_records_cause_and_count() {
    let task = configured("https://example.com/file.bin");
    task.claim("start").unwrap();
    task.to_pending();

    assert!(task.to_retry(Error::Storage("disk hiccup".into()), 1));
    assert_eq!(task.status(), Status::Retry);
    assert_eq!(task.retrying_times(), 1);
    assert!(task.error_cause().unwrap().to_string().contains("disk hiccup"));

    assert!(task.to_pending());
    assert!(task.to_error(Error::Storage("gave up".into())));
    assert!(task.error_cause().unwrap().to_string().contains("gave up"));
}

#[test]
fn nothing_happens_after_terminal_state() {
    let task = configured("https://example.com/file.bin");
    task.claim("start").unwrap();
    task.to_pending();
    assert!(task.to_error(Error::Storage("boom".into())));

    assert!(!task.to_pending());
    assert!(!task.pause());
    assert!(matches!(
        task.on_progress(1, Instant::now()),
        Err(Error::UserCancelled)
    ));
    assert_eq!(task.status(), Status::Error);
}

#[test]
fn tags_are_stored() {
    let task = configured("https://example.com/file.bin");
    task.set_tag(Arc::new(42u32)).unwrap();
    task.set_keyed_tag("owner", Arc::new("alice".to_string()))
        .unwrap();

    let tag = task.tag().unwrap();
    assert_eq!(tag.downcast_ref::<u32>(), Some(&42));
    let owner = task.keyed_tag("owner").unwrap();
    assert_eq!(owner.downcast_ref::<String>().map(String::as_str), Some("alice"));
    assert!(task.keyed_tag("missing").is_none());
}

#[tokio::test]
async fn wait_over_returns_terminal_status() {
    let task = configured("https://example.com/file.bin");
    task.claim("start").unwrap();
    task.set_running(true);
    task.to_pending();

    let waiter = {
        let task = task.clone();
        tokio::spawn(async move { task.wait_over().await })
    };

    task.to_error(Error::Storage("boom".into()));
    tokio::task::yield_now().await;
    assert!(!waiter.is_finished());

    task.set_running(false);
    let status = waiter.await.unwrap();
    assert_eq!(status, Status::Error);
}

fn block_complete(url: &str) -> DownloadTask {
    let task = configured(url);
    task.claim("start").unwrap();
    assert!(task.to_pending());
    let info = ConnectInfo {
        total_bytes: Some(10),
        ..ConnectInfo::default()
    };
    task.to_connected(&info, Instant::now()).unwrap();
    task.on_progress(10, Instant::now()).unwrap();
    assert!(task.to_block_complete());
    task
}

#[test]
fn pause_on_block_complete_skips_the_commit() {
    let task = block_complete("https://example.com/file.bin");

    assert!(task.pause());
    let mut committed = false;
    let result = task.commit_segment(|| {
        committed = true;
        Ok(())
    });

    assert!(matches!(result, Err(Error::UserCancelled)));
    assert!(!committed);
    assert_eq!(task.status(), Status::Paused);
}

#[test]
fn pause_during_commit_finds_the_task_over() {
    let task = block_complete("https://example.com/file.bin");

    let mut pauser = None;
    task.commit_segment(|| {
        let other = task.clone();
        pauser = Some(std::thread::spawn(move || other.pause()));
        std::thread::sleep(std::time::Duration::from_millis(50));
        Ok(())
    })
    .unwrap();

    assert!(!pauser.unwrap().join().unwrap());
    assert_eq!(task.status(), Status::Completed);
}

#[test]
fn failed_commit_leaves_the_segment_uncommitted() {
    let task = block_complete("https://example.com/file.bin");

    let result = task.commit_segment(|| Err(Error::Io(std::io::Error::other("disk full"))));

    assert!(matches!(result, Err(Error::Io(_))));
    assert_eq!(task.status(), Status::BlockComplete);
}
