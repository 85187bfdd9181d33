use crate::engine::test_helpers::{MockTransport, Outcome, create_test_engine, sample_content};
use crate::error::{TransportError, TransportErrorKind};
use crate::status::Status;
use crate::types::Event;

fn connect_failure() -> TransportError {
    TransportError::new(TransportErrorKind::Connect, "connection refused")
}

#[tokio::test]
async fn test_retries_until_budget_is_spent() {
    let transport = MockTransport::new(sample_content(100)).with_script([
        Outcome::Fail(connect_failure()),
        Outcome::Fail(connect_failure()),
        Outcome::Fail(connect_failure()),
    ]);
    let t = create_test_engine(transport);
    let (task, listener) = t.task("file.bin");
    task.set_auto_retry_times(2).unwrap();

    t.engine.start(&task).await.unwrap();
    assert_eq!(task.wait_over().await, Status::Error);

    assert_eq!(
        listener.statuses(),
        vec![
            Status::Pending,
            Status::Retry,
            Status::Pending,
            Status::Retry,
            Status::Pending,
            Status::Error,
        ]
    );
    let retry_counters: Vec<u32> = listener
        .events()
        .iter()
        .filter_map(|e| match e {
            Event::Retry { retrying_times, .. } => Some(*retrying_times),
            _ => None,
        })
        .collect();
    assert_eq!(retry_counters, vec![1, 2]);
    assert_eq!(task.retrying_times(), 2);
    assert_eq!(t.transport.requests().len(), 3);

    let cause = task.error_cause().unwrap();
    assert_eq!(
        cause.as_transport().map(|e| e.kind),
        Some(TransportErrorKind::Connect)
    );
}

#[tokio::test]
async fn test_recovers_within_budget() {
    let transport = MockTransport::new(sample_content(300))
        .with_script([Outcome::Fail(connect_failure()), Outcome::Complete]);
    let t = create_test_engine(transport);
    let (task, listener) = t.task("file.bin");
    task.set_auto_retry_times(1).unwrap();

    t.engine.start(&task).await.unwrap();
    assert_eq!(task.wait_over().await, Status::Completed);

    let statuses = listener.statuses();
    assert_eq!(&statuses[..3], &[Status::Pending, Status::Retry, Status::Pending]);
    assert_eq!(statuses.last(), Some(&Status::Completed));
    assert_eq!(task.retrying_times(), 1);
    // The last failure stays visible after recovery until the next use cycle
    assert!(task.error_cause().is_some());
    task.reuse().unwrap();
    assert!(task.error_cause().is_none());
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let transport =
        MockTransport::new(sample_content(100)).with_script([Outcome::Fail(TransportError::status(404))]);
    let t = create_test_engine(transport);
    let (task, listener) = t.task("file.bin");
    task.set_auto_retry_times(5).unwrap();

    t.engine.start(&task).await.unwrap();
    assert_eq!(task.wait_over().await, Status::Error);

    assert_eq!(listener.statuses(), vec![Status::Pending, Status::Error]);
    assert_eq!(task.retrying_times(), 0);
    assert!(matches!(
        listener.events().last(),
        Some(Event::Error { error, .. }) if error.contains("404")
    ));
}

#[tokio::test]
async fn test_zero_budget_fails_on_first_error() {
    let transport =
        MockTransport::new(sample_content(100)).with_script([Outcome::Fail(connect_failure())]);
    let t = create_test_engine(transport);
    let (task, listener) = t.task("file.bin");

    t.engine.start(&task).await.unwrap();
    assert_eq!(task.wait_over().await, Status::Error);
    assert_eq!(listener.statuses(), vec![Status::Pending, Status::Error]);
}

#[tokio::test]
async fn test_retry_resumes_from_bytes_on_disk() {
    let network = TransportError::new(TransportErrorKind::Network, "connection reset");
    let transport = MockTransport::new(sample_content(1000))
        .with_script([Outcome::FailAfter(300, network), Outcome::Complete]);
    let t = create_test_engine(transport);
    let (task, listener) = t.task("file.bin");
    task.set_auto_retry_times(1).unwrap();

    t.engine.start(&task).await.unwrap();
    assert_eq!(task.wait_over().await, Status::Completed);

    let requests = t.transport.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].resume_offset, None);
    assert_eq!(requests[1].resume_offset, Some(300));
    assert_eq!(
        requests[1].headers.get_all("Range").collect::<Vec<_>>(),
        vec!["bytes=300-"]
    );
    assert_eq!(
        requests[1].headers.get_all("If-Match").collect::<Vec<_>>(),
        vec!["\"v1\""]
    );

    assert!(listener.events().iter().any(|e| matches!(
        e,
        Event::Retry {
            so_far_bytes: 300,
            ..
        }
    )));
    assert!(listener.events().iter().any(|e| matches!(
        e,
        Event::Connected {
            is_resuming: true,
            so_far_bytes: 300,
            ..
        }
    )));
    assert_eq!(
        std::fs::read(task.target_file_path().unwrap()).unwrap(),
        t.transport.content()
    );
}

#[tokio::test]
async fn test_retry_without_range_support_starts_over() {
    let network = TransportError::new(TransportErrorKind::Network, "connection reset");
    let transport = MockTransport::new(sample_content(600))
        .without_ranges()
        .with_script([Outcome::FailAfter(200, network), Outcome::Complete]);
    let t = create_test_engine(transport);
    let (task, listener) = t.task("file.bin");
    task.set_auto_retry_times(1).unwrap();

    t.engine.start(&task).await.unwrap();
    assert_eq!(task.wait_over().await, Status::Completed);

    let requests = t.transport.requests();
    assert_eq!(requests[1].resume_offset, None);
    assert!(!requests[1].headers.contains("Range"));
    assert!(listener.events().iter().any(|e| matches!(
        e,
        Event::Connected {
            is_resuming: false,
            so_far_bytes: 0,
            ..
        }
    )));
    assert_eq!(
        std::fs::read(task.target_file_path().unwrap()).unwrap(),
        t.transport.content()
    );
}

#[tokio::test]
async fn test_changed_resource_discards_partial_data() {
    let transport = MockTransport::new(sample_content(1000)).with_script([Outcome::Stall(400)]);
    let t = create_test_engine(transport);
    let (task, listener) = t.task("file.bin");
    task.set_auto_retry_times(1).unwrap();

    t.engine.start(&task).await.unwrap();
    crate::engine::test_helpers::wait_until(|| task.large_file_so_far_bytes() == 400).await;
    assert!(task.pause());
    task.wait_over().await;

    t.transport.set_etag("\"v2\"");
    task.reuse().unwrap();
    t.engine.start(&task).await.unwrap();
    assert_eq!(task.wait_over().await, Status::Completed);

    let requests = t.transport.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[1].resume_offset, Some(400));
    assert_eq!(requests[2].resume_offset, None);
    assert!(!requests[2].headers.contains("If-Match"));

    let after_pause: Vec<Status> = listener
        .statuses()
        .into_iter()
        .skip_while(|s| *s != Status::Paused)
        .skip(1)
        .collect();
    assert_eq!(&after_pause[..3], &[Status::Pending, Status::Retry, Status::Pending]);
    assert!(listener.events().iter().any(|e| matches!(
        e,
        Event::Connected {
            is_resuming: false,
            so_far_bytes: 0,
            ..
        }
    )));
    assert_eq!(task.etag().as_deref(), Some("\"v2\""));
    assert_eq!(
        std::fs::read(task.target_file_path().unwrap()).unwrap(),
        t.transport.content()
    );
}
