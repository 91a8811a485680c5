//! Job lifecycle integration tests.
//!
//! Tests that verify a job from first generation request to sink cleanup.

use std::sync::Arc;
use taskforce::testing::{RecordingSink, SequenceGenerator, task_fn};
use taskforce::{EngineConfig, Event, EventBus, ItemOutcome, Job, JobExecutor, WorkItem};

use crate::common::{RecordingHandler, context, doubler};

#[tokio::test]
async fn test_two_items_doubled_with_limit_two() {
    let sink = RecordingSink::new();
    let job = Job::builder("doubling", SequenceGenerator::new(vec![10u32, 20]))
        .task(doubler())
        .sink(sink.clone());

    let report = JobExecutor::new()
        .execute_with_context(&context(2), &job)
        .await
        .unwrap();

    assert_eq!(sink.sorted(), vec![20, 40]);
    assert_eq!(sink.cleanup_calls(), 1);
    assert_eq!(sink.late_consumes(), 0);
    assert_eq!(report.items.consumed, 2);
    assert_eq!(report.permits_available, 2);
    assert!(report.is_clean());
}

#[tokio::test]
async fn test_execute_defaults_to_one_in_flight() {
    let sink = RecordingSink::new();
    let job = Job::builder("default_limit", SequenceGenerator::new(vec![3u32, 1, 2]))
        .task(doubler())
        .sink(sink.clone());

    let report = JobExecutor::new().execute(&job).await.unwrap();

    assert_eq!(report.max_in_flight, 1);
    assert_eq!(report.permits_available, 1);
    assert_eq!(sink.values(), vec![6, 2, 4]);
}

#[tokio::test]
async fn test_chain_applies_tasks_in_declared_order() {
    let sink = RecordingSink::new();
    let add_one = task_fn("add_one", |x: u32| async move { Ok(WorkItem::Present(x + 1)) });
    let render = task_fn("render", |x: u32| async move {
        Ok(WorkItem::Present(format!("<{}>", x)))
    });
    let job = Job::builder("ordered", SequenceGenerator::new(vec![1u32, 5]))
        .task(add_one.clone())
        .task(doubler())
        .task(render.clone())
        .sink(sink.clone());

    JobExecutor::new().execute(&job).await.unwrap();

    // (x + 1) * 2, not x * 2 + 1.
    assert_eq!(sink.values(), vec!["<4>".to_string(), "<12>".to_string()]);
    assert_eq!(add_one.calls(), 2);
    assert_eq!(render.calls(), 2);
}

#[tokio::test]
async fn test_job_without_tasks_feeds_sink_directly() {
    let sink = RecordingSink::new();
    let job = Job::builder("passthrough", SequenceGenerator::new(vec!['a', 'b', 'c']))
        .sink(sink.clone());

    let report = JobExecutor::new()
        .execute_with_context(&context(3), &job)
        .await
        .unwrap();

    assert_eq!(sink.sorted(), vec!['a', 'b', 'c']);
    assert_eq!(report.items.generated, 3);
}

#[tokio::test]
async fn test_immediate_end_of_stream() {
    let generator = SequenceGenerator::new(Vec::<u32>::new());
    let double = task_fn("double", |x: u32| async move { Ok(WorkItem::Present(x * 2)) });
    let sink = RecordingSink::new();
    let job = Job::builder("empty", generator.clone())
        .task(double.clone())
        .sink(sink.clone());

    let report = JobExecutor::new()
        .execute_with_context(&context(4), &job)
        .await
        .unwrap();

    // End-of-stream reaches neither the task nor the sink.
    assert_eq!(double.calls(), 0);
    assert!(sink.is_empty());
    assert_eq!(sink.cleanup_calls(), 1);
    assert_eq!(generator.calls(), 1);
    assert_eq!(report.items, Default::default());
    assert_eq!(report.permits_available, 4);
}

#[tokio::test]
async fn test_events_bracket_the_run() {
    let handler = RecordingHandler::new();
    let bus = Arc::new(EventBus::new());
    bus.register(handler.clone()).await;

    let job = Job::builder("observed", SequenceGenerator::new(vec![1u32, 2, 3]))
        .task(doubler())
        .sink(RecordingSink::new());

    let report = JobExecutor::new()
        .with_event_bus(bus)
        .execute_with_context(&context(2), &job)
        .await
        .unwrap();

    let events = handler.events().await;
    assert!(matches!(events.first(), Some(Event::JobStarted { .. })));
    match events.last() {
        Some(Event::JobCompleted {
            report: reported, ..
        }) => assert_eq!(reported, &report),
        other => panic!("expected JobCompleted last, got {:?}", other),
    }

    assert_eq!(handler.completed_with(ItemOutcome::Consumed).await, 3);
    assert!(handler.completed_with(ItemOutcome::EndOfStream).await >= 1);

    let dispatched = events
        .iter()
        .filter(|e| matches!(e, Event::ItemDispatched { .. }))
        .count();
    let finished = events
        .iter()
        .filter(|e| matches!(e, Event::ItemCompleted { .. } | Event::ItemFailed { .. }))
        .count();
    assert_eq!(dispatched, finished);
}

#[tokio::test]
async fn test_run_ids_are_unique_per_execution() {
    let executor = JobExecutor::new();
    let job = Job::builder("twice", SequenceGenerator::new(Vec::<u32>::new()))
        .sink(RecordingSink::new());

    let first = executor.execute(&job).await.unwrap();
    let second = executor.execute(&job).await.unwrap();

    assert_eq!(first.job_id, second.job_id);
    assert_ne!(first.run_id, second.run_id);
}

#[tokio::test]
async fn test_config_drives_limit_and_pool_size() {
    let config = EngineConfig::from_yaml("max_in_flight: 3\ntask_workers: 2\n").unwrap();
    let sink = RecordingSink::new();
    let job = Job::builder("configured", SequenceGenerator::new((0..20u32).collect()))
        .with_default_workers(config.task_workers)
        .task(doubler())
        .sink(sink.clone());

    let report = JobExecutor::new()
        .execute_with_context(&config.execution_context().unwrap(), &job)
        .await
        .unwrap();

    assert_eq!(report.max_in_flight, 3);
    assert_eq!(report.permits_available, 3);
    assert_eq!(sink.sorted(), (0..20u32).map(|x| x * 2).collect::<Vec<_>>());
}
