//! Testing utilities for users of the taskforce library.
//!
//! This module provides ready-made stages and instrumentation for testing
//! jobs:
//!
//! - [`SequenceGenerator`]: yields a fixed list of items, then end-of-stream
//! - [`RecordingSink`]: records every consumed item and cleanup call
//! - [`FnTask`] / [`task_fn`]: a task built from an async closure
//! - [`FailingTask`]: a pass-through task that fails its first N calls
//! - [`CountingPoolFactory`]: counts pool creations, optionally failing some
//! - [`InFlightGauge`]: tracks items generated but not yet consumed

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::core::item::WorkItem;
use crate::core::task::{Generator, Sink, Task, TaskError};
use crate::execution::{EngineError, PoolFactory, TokioPoolFactory, WorkerPool};

/// Counts items that are in flight: generated but not yet consumed.
///
/// Share one gauge between a [`SequenceGenerator::tracked`] and a
/// [`RecordingSink::tracked`] to observe the engine's concurrency bound.
#[derive(Debug, Default)]
pub struct InFlightGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlightGauge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record an item entering flight.
    pub fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    /// Record an item leaving flight.
    pub fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    /// Items currently in flight.
    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    /// Highest number of items ever in flight at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// A generator yielding a fixed list of items, then `Empty` forever.
///
/// # Example
///
/// ```
/// use taskforce::testing::SequenceGenerator;
///
/// let generator = SequenceGenerator::new(vec![10, 20]);
/// assert_eq!(generator.remaining(), 2);
/// ```
pub struct SequenceGenerator<T> {
    items: Mutex<VecDeque<T>>,
    calls: AtomicUsize,
    gauge: Option<Arc<InFlightGauge>>,
}

impl<T: Send + 'static> SequenceGenerator<T> {
    /// Create a generator yielding `items` in order.
    pub fn new(items: Vec<T>) -> Arc<Self> {
        Arc::new(Self {
            items: Mutex::new(items.into()),
            calls: AtomicUsize::new(0),
            gauge: None,
        })
    }

    /// Create a generator that enters `gauge` for every item it yields.
    pub fn tracked(items: Vec<T>, gauge: Arc<InFlightGauge>) -> Arc<Self> {
        Arc::new(Self {
            items: Mutex::new(items.into()),
            calls: AtomicUsize::new(0),
            gauge: Some(gauge),
        })
    }

    /// Number of times `generate` has been called, end-of-stream included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of items not yet yielded.
    pub fn remaining(&self) -> usize {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl<T: Send + 'static> Generator for SequenceGenerator<T> {
    type Item = T;

    async fn generate(&self) -> Result<WorkItem<T>, TaskError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();

        if next.is_some()
            && let Some(gauge) = &self.gauge
        {
            gauge.enter();
        }
        Ok(next.into())
    }
}

type FailPredicate<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// A sink that records what it consumes.
///
/// Consumption after cleanup is counted separately so tests can assert that
/// cleanup came last.
pub struct RecordingSink<T> {
    values: Mutex<Vec<T>>,
    cleanup_calls: AtomicUsize,
    cleaned_up: AtomicBool,
    late_consumes: AtomicUsize,
    fail_when: Option<FailPredicate<T>>,
    gauge: Option<Arc<InFlightGauge>>,
}

impl<T: Send + 'static> RecordingSink<T> {
    fn build(fail_when: Option<FailPredicate<T>>, gauge: Option<Arc<InFlightGauge>>) -> Arc<Self> {
        Arc::new(Self {
            values: Mutex::new(Vec::new()),
            cleanup_calls: AtomicUsize::new(0),
            cleaned_up: AtomicBool::new(false),
            late_consumes: AtomicUsize::new(0),
            fail_when,
            gauge,
        })
    }

    /// Create a sink accepting every item.
    pub fn new() -> Arc<Self> {
        Self::build(None, None)
    }

    /// Create a sink rejecting items matching `predicate`.
    ///
    /// Rejected items are not recorded.
    pub fn failing_when(predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Arc<Self> {
        Self::build(Some(Box::new(predicate)), None)
    }

    /// Create a sink that leaves `gauge` for every item it consumes.
    pub fn tracked(gauge: Arc<InFlightGauge>) -> Arc<Self> {
        Self::build(None, Some(gauge))
    }

    /// Number of times `cleanup` has been called.
    pub fn cleanup_calls(&self) -> usize {
        self.cleanup_calls.load(Ordering::SeqCst)
    }

    /// Number of items consumed after cleanup ran.
    pub fn late_consumes(&self) -> usize {
        self.late_consumes.load(Ordering::SeqCst)
    }

    /// Number of items recorded.
    pub fn len(&self) -> usize {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone + Send + 'static> RecordingSink<T> {
    /// Recorded items in consumption order.
    pub fn values(&self) -> Vec<T> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl<T: Clone + Ord + Send + 'static> RecordingSink<T> {
    /// Recorded items, sorted.
    pub fn sorted(&self) -> Vec<T> {
        let mut values = self.values();
        values.sort();
        values
    }
}

#[async_trait]
impl<T: Send + 'static> Sink for RecordingSink<T> {
    type Item = T;

    async fn consume(&self, item: T) -> Result<(), TaskError> {
        if let Some(gauge) = &self.gauge {
            gauge.leave();
        }
        if self.cleaned_up.load(Ordering::SeqCst) {
            self.late_consumes.fetch_add(1, Ordering::SeqCst);
        }
        if let Some(predicate) = &self.fail_when
            && predicate(&item)
        {
            return Err(TaskError::failed("item rejected by sink"));
        }

        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(item);
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), TaskError> {
        self.cleanup_calls.fetch_add(1, Ordering::SeqCst);
        self.cleaned_up.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// A task backed by an async closure.
pub struct FnTask<I, O, F> {
    name: String,
    f: F,
    calls: AtomicUsize,
    _types: PhantomData<fn(I) -> O>,
}

impl<I, O, F> FnTask<I, O, F> {
    /// Number of times the task has executed.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Build a task named `name` from an async closure.
///
/// # Example
///
/// ```
/// use taskforce::WorkItem;
/// use taskforce::testing::task_fn;
///
/// let double = task_fn("double", |x: u32| async move { Ok(WorkItem::Present(x * 2)) });
/// assert_eq!(double.calls(), 0);
/// ```
pub fn task_fn<I, O, F, Fut>(name: impl Into<String>, f: F) -> Arc<FnTask<I, O, F>>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<WorkItem<O>, TaskError>> + Send + 'static,
{
    Arc::new(FnTask {
        name: name.into(),
        f,
        calls: AtomicUsize::new(0),
        _types: PhantomData,
    })
}

#[async_trait]
impl<I, O, F, Fut> Task for FnTask<I, O, F>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<WorkItem<O>, TaskError>> + Send + 'static,
{
    type Input = I;
    type Output = O;

    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, input: I) -> Result<WorkItem<O>, TaskError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.f)(input).await
    }
}

/// A pass-through task that fails its first `fail_count` calls.
///
/// The failure counting is protected by a mutex, so concurrent executions
/// fail exactly `fail_count` times in total.
pub struct FailingTask<T> {
    name: String,
    state: Mutex<FailingState>,
    _payload: PhantomData<fn(T) -> T>,
}

struct FailingState {
    remaining: u32,
    calls: u32,
}

impl<T> FailingTask<T> {
    /// Create a task that fails `fail_count` times then passes items through.
    pub fn new(name: impl Into<String>, fail_count: u32) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            state: Mutex::new(FailingState {
                remaining: fail_count,
                calls: 0,
            }),
            _payload: PhantomData,
        })
    }

    /// Get the number of failures remaining.
    pub fn remaining_failures(&self) -> u32 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remaining
    }

    /// Get the number of times this task has been called.
    pub fn calls(&self) -> u32 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .calls
    }
}

#[async_trait]
impl<T: Send + 'static> Task for FailingTask<T> {
    type Input = T;
    type Output = T;

    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, input: T) -> Result<WorkItem<T>, TaskError> {
        let should_fail = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.calls += 1;
            if state.remaining > 0 {
                state.remaining -= 1;
                true
            } else {
                false
            }
        };

        if should_fail {
            return Err(TaskError::ExecutionFailed(format!(
                "{} failed intentionally",
                self.name
            )));
        }
        Ok(WorkItem::Present(input))
    }
}

/// A pool factory that counts creations per pool name.
///
/// Pools are created by [`TokioPoolFactory`] unless the name was registered
/// with [`failing_on`](Self::failing_on).
#[derive(Debug, Default)]
pub struct CountingPoolFactory {
    inner: TokioPoolFactory,
    created: Mutex<HashMap<String, usize>>,
    failing: HashSet<String>,
}

impl CountingPoolFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse to create pools named `name`.
    pub fn failing_on(mut self, name: impl Into<String>) -> Self {
        self.failing.insert(name.into());
        self
    }

    /// Number of pools successfully created under `name`.
    pub fn created(&self, name: &str) -> usize {
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    /// Number of pools successfully created in total.
    pub fn total(&self) -> usize {
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .sum()
    }
}

impl PoolFactory for CountingPoolFactory {
    fn create(&self, name: &str, workers: usize) -> Result<WorkerPool, EngineError> {
        if self.failing.contains(name) {
            return Err(EngineError::PoolCreation {
                pool: name.to_string(),
                reason: "creation refused by test factory".to_string(),
            });
        }

        let pool = self.inner.create(name, workers)?;
        *self
            .created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_string())
            .or_insert(0) += 1;
        Ok(pool)
    }
}
