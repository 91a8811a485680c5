//! Concurrency integration tests.
//!
//! Tests that verify the in-flight bound, pool reuse and the absence of lost
//! or duplicated items under load.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::ThreadId;
use std::time::Duration;
use taskforce::execution::{GENERATOR_POOL, SINK_POOL};
use taskforce::testing::{
    CountingPoolFactory, InFlightGauge, RecordingSink, SequenceGenerator, task_fn,
};
use taskforce::{Generator, Job, JobExecutor, Sink, TaskDescriptor, TaskError, WorkItem};
use tokio::sync::Barrier;

use crate::common::{context, doubler, slow_identity};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_in_flight_never_exceeds_limit() {
    let gauge = InFlightGauge::new();
    let sink = RecordingSink::tracked(gauge.clone());
    let job = Job::builder(
        "bounded",
        SequenceGenerator::tracked((0..40u32).collect(), gauge.clone()),
    )
    .with_default_workers(8)
    .task(slow_identity("slow", Duration::from_millis(5)))
    .sink(sink.clone());

    let report = JobExecutor::new()
        .execute_with_context(&context(4), &job)
        .await
        .unwrap();

    assert!(gauge.peak() <= 4, "peak in flight was {}", gauge.peak());
    assert!(gauge.peak() > 1, "items never overlapped");
    assert_eq!(gauge.current(), 0);
    assert_eq!(sink.len(), 40);
    assert_eq!(report.permits_available, 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sequential_limit_keeps_one_in_flight() {
    let gauge = InFlightGauge::new();
    let job = Job::builder(
        "sequential",
        SequenceGenerator::tracked((0..10u32).collect(), gauge.clone()),
    )
    .task(slow_identity("slow", Duration::from_millis(1)))
    .sink(RecordingSink::tracked(gauge.clone()));

    JobExecutor::new().execute(&job).await.unwrap();

    assert_eq!(gauge.peak(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_item_lost_or_duplicated() {
    let sink = RecordingSink::new();
    let job = Job::builder("bulk", SequenceGenerator::new((0..500u32).collect()))
        .with_default_workers(4)
        .task(doubler())
        .task(slow_identity("jitter", Duration::from_micros(50)))
        .sink(sink.clone());

    let report = JobExecutor::new()
        .execute_with_context(&context(16), &job)
        .await
        .unwrap();

    let expected: Vec<u32> = (0..500u32).map(|x| x * 2).collect();
    assert_eq!(sink.sorted(), expected);
    assert_eq!(report.items.generated, 500);
    assert_eq!(report.items.consumed, 500);
    assert_eq!(sink.cleanup_calls(), 1);
    assert_eq!(sink.late_consumes(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_generator_stops_at_end_of_stream_under_load() {
    let generator = SequenceGenerator::new((0..25u32).collect());
    let job = Job::builder("stop", generator.clone())
        .task(slow_identity("slow", Duration::from_millis(2)))
        .sink(RecordingSink::new());

    JobExecutor::new()
        .execute_with_context(&context(8), &job)
        .await
        .unwrap();

    // 25 items and exactly one end-of-stream call.
    assert_eq!(generator.calls(), 26);
}

#[tokio::test]
async fn test_each_task_pool_created_once_per_run() {
    let factory = Arc::new(CountingPoolFactory::new());
    let double = doubler();
    let job = Job::builder("reuse", SequenceGenerator::new((0..30u32).collect()))
        .task(double.clone())
        .task(slow_identity("relay", Duration::from_micros(10)))
        // The same task again shares the first stage's pool.
        .task(double)
        .sink(RecordingSink::new());

    JobExecutor::new()
        .with_pool_factory(factory.clone())
        .execute_with_context(&context(6), &job)
        .await
        .unwrap();

    assert_eq!(factory.created("double"), 1);
    assert_eq!(factory.created("relay"), 1);
    assert_eq!(factory.created(GENERATOR_POOL), 1);
    assert_eq!(factory.created(SINK_POOL), 1);
    assert_eq!(factory.total(), 4);
}

#[tokio::test]
async fn test_pools_are_per_run() {
    let factory = Arc::new(CountingPoolFactory::new());
    let executor = JobExecutor::new().with_pool_factory(factory.clone());
    let job = Job::builder("repeat", SequenceGenerator::new(vec![1u32]))
        .task(doubler())
        .sink(RecordingSink::new());

    executor.execute(&job).await.unwrap();
    executor.execute(&job).await.unwrap();

    assert_eq!(factory.created("double"), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_multi_worker_task_pool_runs_items_in_parallel() {
    // Both items must be inside the task at once to pass the barrier.
    let barrier = Arc::new(Barrier::new(2));
    let meet = {
        let barrier = Arc::clone(&barrier);
        task_fn("meet", move |x: u32| {
            let barrier = Arc::clone(&barrier);
            async move {
                barrier.wait().await;
                Ok(WorkItem::Present(x))
            }
        })
    };
    let sink = RecordingSink::new();
    let job = Job::builder("parallel", SequenceGenerator::new(vec![1u32, 2]))
        .task_descriptor(TaskDescriptor::new(meet).with_workers(2))
        .sink(sink.clone());

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        JobExecutor::new().execute_with_context(&context(2), &job),
    )
    .await
    .expect("two workers and two permits should meet at the barrier")
    .unwrap();

    assert_eq!(sink.sorted(), vec![1, 2]);
    assert!(report.is_clean());
}

/// Sink that counts calls overlapping another consume call.
#[derive(Default)]
struct OverlapSink {
    active: AtomicUsize,
    overlaps: AtomicUsize,
    consumed: AtomicUsize,
}

#[async_trait]
impl Sink for OverlapSink {
    type Item = u32;

    async fn consume(&self, _item: u32) -> Result<(), TaskError> {
        if self.active.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.consumed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sink_consumption_is_serialized() {
    let sink = Arc::new(OverlapSink::default());
    let job = Job::builder("serial_sink", SequenceGenerator::new((0..20u32).collect()))
        .with_default_workers(4)
        .task(doubler())
        .sink(sink.clone());

    JobExecutor::new()
        .execute_with_context(&context(8), &job)
        .await
        .unwrap();

    assert_eq!(sink.consumed.load(Ordering::SeqCst), 20);
    assert_eq!(sink.overlaps.load(Ordering::SeqCst), 0);
}

/// Thread ids observed by each kind of stage.
#[derive(Default)]
struct StageThreads {
    generator: std::sync::Mutex<Vec<ThreadId>>,
    task: std::sync::Mutex<Vec<ThreadId>>,
    sink: std::sync::Mutex<Vec<ThreadId>>,
}

impl StageThreads {
    fn record(list: &std::sync::Mutex<Vec<ThreadId>>) {
        list.lock().unwrap().push(std::thread::current().id());
    }
}

struct ThreadTaggingGenerator {
    threads: Arc<StageThreads>,
    remaining: AtomicUsize,
}

#[async_trait]
impl Generator for ThreadTaggingGenerator {
    type Item = u32;

    async fn generate(&self) -> Result<WorkItem<u32>, TaskError> {
        StageThreads::record(&self.threads.generator);
        match self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        {
            Ok(n) => Ok(WorkItem::Present(n as u32)),
            Err(_) => Ok(WorkItem::Empty),
        }
    }
}

struct ThreadTaggingSink {
    threads: Arc<StageThreads>,
}

#[async_trait]
impl Sink for ThreadTaggingSink {
    type Item = u32;

    async fn consume(&self, _item: u32) -> Result<(), TaskError> {
        StageThreads::record(&self.threads.sink);
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), TaskError> {
        StageThreads::record(&self.threads.sink);
        Ok(())
    }
}

// The default single-threaded test runtime: the driver has one thread and
// every stage must still run somewhere else.
#[tokio::test]
async fn test_stages_never_run_on_the_driving_thread() {
    let driver = std::thread::current().id();
    let threads = Arc::new(StageThreads::default());
    let tag = {
        let threads = Arc::clone(&threads);
        task_fn("tag", move |x: u32| {
            StageThreads::record(&threads.task);
            async move { Ok(WorkItem::Present(x)) }
        })
    };
    let job = Job::builder(
        "off_thread",
        Arc::new(ThreadTaggingGenerator {
            threads: Arc::clone(&threads),
            remaining: AtomicUsize::new(3),
        }),
    )
    .task(tag)
    .sink(Arc::new(ThreadTaggingSink {
        threads: Arc::clone(&threads),
    }));

    JobExecutor::new()
        .execute_with_context(&context(2), &job)
        .await
        .unwrap();

    let generator = threads.generator.lock().unwrap().clone();
    let task = threads.task.lock().unwrap().clone();
    let sink = threads.sink.lock().unwrap().clone();
    // Three items and one end-of-stream call.
    assert_eq!(generator.len(), 4);
    assert_eq!(task.len(), 3);
    // Three consumes plus cleanup.
    assert_eq!(sink.len(), 4);
    for id in generator.iter().chain(&task).chain(&sink) {
        assert_ne!(*id, driver, "a stage ran on the driving thread");
    }
}

/// Blocks its worker thread until released from outside the engine.
struct GatedSink {
    gate: std::sync::Mutex<std::sync::mpsc::Receiver<()>>,
    consumed: AtomicUsize,
}

#[async_trait]
impl Sink for GatedSink {
    type Item = u32;

    async fn consume(&self, _item: u32) -> Result<(), TaskError> {
        // A blocking call, not an await.
        let _ = self.gate.lock().unwrap().recv();
        self.consumed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn test_blocking_sink_does_not_stall_dispatch() {
    let (open_tx, open_rx) = std::sync::mpsc::channel();
    let generator = SequenceGenerator::new(vec![1u32, 2, 3]);
    let sink = Arc::new(GatedSink {
        gate: std::sync::Mutex::new(open_rx),
        consumed: AtomicUsize::new(0),
    });
    let job = Job::builder("gated", generator.clone()).sink(sink.clone());

    let executor = JobExecutor::new();
    let ctx = context(3);
    let run = executor.execute_with_context(&ctx, &job);
    let release = async {
        // With the sink blocked, the driver must still issue every
        // generation request the limit allows.
        while generator.calls() < 3 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        for _ in 0..3 {
            open_tx.send(()).unwrap();
        }
    };

    let (report, ()) = tokio::time::timeout(Duration::from_secs(5), async {
        tokio::join!(run, release)
    })
    .await
    .expect("a blocking sink stalled the driving thread");

    assert_eq!(report.unwrap().items.consumed, 3);
    assert_eq!(sink.consumed.load(Ordering::SeqCst), 3);
}
