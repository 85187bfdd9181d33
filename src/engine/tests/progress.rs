use crate::engine::test_helpers::{
    MockTransport, RecordingListener, create_test_engine, sample_content,
};
use crate::identity;
use crate::status::Status;
use crate::types::Event;
use std::sync::Arc;

fn progress_marks(events: &[Event]) -> Vec<u64> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Progress { so_far_bytes, .. } => Some(*so_far_bytes),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_single_progress_notification_reports_full_size() {
    let t = create_test_engine(MockTransport::new(sample_content(1000)));
    let (task, listener) = t.task("file.bin");
    task.set_callback_progress_count(1).unwrap();

    t.engine.start(&task).await.unwrap();
    assert_eq!(task.wait_over().await, Status::Completed);

    assert_eq!(
        listener.statuses(),
        vec![
            Status::Pending,
            Status::Connected,
            Status::Progress,
            Status::Completed,
        ]
    );
    assert_eq!(progress_marks(&listener.events()), vec![1000]);
    assert!(matches!(
        listener.events().last(),
        Some(Event::Completed {
            total_bytes: 1000,
            is_reused_old_file: false,
            ..
        })
    ));
}

#[tokio::test]
async fn test_directory_task_with_single_progress_notification() {
    let t = create_test_engine(MockTransport::new(sample_content(1000)));
    let url = "https://example.com/download?id=7";
    let task = t.engine.create_task(url);
    task.set_path(t.dir.path(), true).unwrap();
    task.set_callback_progress_count(1).unwrap();
    let listener = Arc::new(RecordingListener::default());
    task.set_listener(listener.clone()).unwrap();
    assert!(task.filename().is_none());

    t.engine.start(&task).await.unwrap();
    assert_eq!(task.wait_over().await, Status::Completed);

    assert_eq!(
        listener.statuses(),
        vec![
            Status::Pending,
            Status::Connected,
            Status::Progress,
            Status::Completed,
        ]
    );
    assert_eq!(progress_marks(&listener.events()), vec![1000]);

    let name = identity::generate_filename(url);
    assert_eq!(task.filename().as_deref(), Some(name.as_str()));
    assert_eq!(task.target_file_path().unwrap(), t.dir.path().join(&name));
    assert_eq!(std::fs::read(t.dir.path().join(&name)).unwrap(), sample_content(1000));
}

#[tokio::test]
async fn test_progress_count_splits_total_into_buckets() {
    let t = create_test_engine(MockTransport::new(sample_content(1000)).with_chunk_size(100));
    let (task, listener) = t.task("file.bin");
    task.set_callback_progress_count(5).unwrap();
    task.set_callback_progress_min_interval(0).unwrap();

    t.engine.start(&task).await.unwrap();
    task.wait_over().await;

    assert_eq!(
        progress_marks(&listener.events()),
        vec![200, 400, 600, 800, 1000]
    );
}

#[tokio::test]
async fn test_non_positive_count_suppresses_progress() {
    for count in [0, -1] {
        let t = create_test_engine(MockTransport::new(sample_content(1000)));
        let (task, listener) = t.task("file.bin");
        task.set_callback_progress_count(count).unwrap();

        t.engine.start(&task).await.unwrap();
        assert_eq!(task.wait_over().await, Status::Completed);

        assert_eq!(
            listener.statuses(),
            vec![Status::Pending, Status::Connected, Status::Completed],
            "count {}",
            count
        );
        // Bytes are still counted even though nobody is told
        assert_eq!(task.large_file_so_far_bytes(), 1000);
    }
}

#[tokio::test]
async fn test_sync_callback_delivers_the_same_sequence() {
    let t = create_test_engine(MockTransport::new(sample_content(500)));
    let (task, listener) = t.task("file.bin");
    task.set_sync_callback(true).unwrap();
    task.set_callback_progress_count(1).unwrap();

    t.engine.start(&task).await.unwrap();
    task.wait_over().await;

    assert_eq!(
        listener.statuses(),
        vec![
            Status::Pending,
            Status::Connected,
            Status::Progress,
            Status::Completed,
        ]
    );
}

#[tokio::test]
async fn test_resumed_transfer_does_not_repeat_earlier_buckets() {
    use crate::engine::test_helpers::{Outcome, wait_until};

    let transport = MockTransport::new(sample_content(1000))
        .with_chunk_size(100)
        .with_script([Outcome::Stall(500)]);
    let t = create_test_engine(transport);
    let (task, listener) = t.task("file.bin");
    task.set_callback_progress_count(10).unwrap();
    task.set_callback_progress_min_interval(0).unwrap();

    t.engine.start(&task).await.unwrap();
    wait_until(|| task.large_file_so_far_bytes() == 500).await;
    task.pause();
    task.wait_over().await;
    assert_eq!(
        progress_marks(&listener.events()),
        vec![100, 200, 300, 400, 500]
    );

    task.reuse().unwrap();
    t.engine.start(&task).await.unwrap();
    task.wait_over().await;

    assert_eq!(
        progress_marks(&listener.events()),
        vec![100, 200, 300, 400, 500, 600, 700, 800, 900, 1000]
    );
}
