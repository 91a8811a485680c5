//! Job definition: one generator, an ordered chain of tasks, one sink.
//!
//! Jobs are assembled with [`JobBuilder`], which tracks the payload type
//! between stages so that each task's input matches the previous stage's
//! output and the sink accepts what the last task produces. Internally the
//! stages are stored type-erased so the engine can build each item's pipeline
//! from the descriptor list without knowing its length or types.

use async_trait::async_trait;
use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

use super::item::WorkItem;
use super::task::{Generator, Sink, Task, TaskError};
use super::types::{JobId, TaskKey};

/// Type-erased payload passed between stages.
pub(crate) type Payload = Box<dyn Any + Send>;

/// Binds a task to the worker pool that executes it.
///
/// Descriptors wrapping the same `Arc` share one pool for the whole run.
pub struct TaskDescriptor<I, O> {
    task: Arc<dyn Task<Input = I, Output = O>>,
    workers: Option<usize>,
}

impl<I, O> TaskDescriptor<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Create a descriptor whose pool size falls back to the job default.
    pub fn new(task: Arc<dyn Task<Input = I, Output = O>>) -> Self {
        Self {
            task,
            workers: None,
        }
    }

    /// Set the number of workers in this task's pool.
    ///
    /// A pool of zero workers cannot be created; the job fails at startup.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Get the task name.
    pub fn name(&self) -> &str {
        self.task.name()
    }

    /// Get the explicitly configured pool size, if any.
    pub fn workers(&self) -> Option<usize> {
        self.workers
    }

    /// Pool cache key for this descriptor's task.
    pub fn key(&self) -> TaskKey {
        TaskKey::of(&self.task)
    }
}

impl<I, O> Clone for TaskDescriptor<I, O> {
    fn clone(&self) -> Self {
        Self {
            task: Arc::clone(&self.task),
            workers: self.workers,
        }
    }
}

impl<I, O> std::fmt::Debug for TaskDescriptor<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDescriptor")
            .field("name", &self.task.name())
            .field("workers", &self.workers)
            .finish()
    }
}

#[async_trait]
pub(crate) trait ErasedGenerator: Send + Sync {
    async fn generate(&self) -> Result<WorkItem<Payload>, TaskError>;
}

#[async_trait]
pub(crate) trait ErasedTask: Send + Sync {
    async fn execute(&self, input: Payload) -> Result<WorkItem<Payload>, TaskError>;
}

#[async_trait]
pub(crate) trait ErasedSink: Send + Sync {
    async fn consume(&self, item: Payload) -> Result<(), TaskError>;

    async fn cleanup(&self) -> Result<(), TaskError>;
}

struct GeneratorAdapter<G>(Arc<G>);

#[async_trait]
impl<G: Generator> ErasedGenerator for GeneratorAdapter<G> {
    async fn generate(&self) -> Result<WorkItem<Payload>, TaskError> {
        let item = self.0.generate().await?;
        Ok(item.map(|value| Box::new(value) as Payload))
    }
}

struct TaskAdapter<I, O> {
    task: Arc<dyn Task<Input = I, Output = O>>,
}

#[async_trait]
impl<I, O> ErasedTask for TaskAdapter<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    async fn execute(&self, input: Payload) -> Result<WorkItem<Payload>, TaskError> {
        let input = input.downcast::<I>().map_err(|_| {
            TaskError::InvalidInput(format!(
                "task '{}' received a payload of the wrong type",
                self.task.name()
            ))
        })?;
        let output = self.task.execute(*input).await?;
        Ok(output.map(|value| Box::new(value) as Payload))
    }
}

struct SinkAdapter<S>(Arc<S>);

#[async_trait]
impl<S: Sink> ErasedSink for SinkAdapter<S> {
    async fn consume(&self, item: Payload) -> Result<(), TaskError> {
        let item = item.downcast::<S::Item>().map_err(|_| {
            TaskError::InvalidInput("sink received a payload of the wrong type".to_string())
        })?;
        self.0.consume(*item).await
    }

    async fn cleanup(&self) -> Result<(), TaskError> {
        self.0.cleanup().await
    }
}

/// A task descriptor with its types erased, as stored in a [`Job`].
#[derive(Clone)]
pub(crate) struct StageDescriptor {
    pub(crate) name: String,
    pub(crate) key: TaskKey,
    pub(crate) workers: usize,
    pub(crate) task: Arc<dyn ErasedTask>,
}

/// A runnable job.
///
/// Cloning is cheap: stages are shared behind `Arc`s. A job is immutable for
/// the duration of an `execute` call and may be executed more than once.
#[derive(Clone)]
pub struct Job {
    id: JobId,
    generator: Arc<dyn ErasedGenerator>,
    stages: Arc<[StageDescriptor]>,
    sink: Arc<dyn ErasedSink>,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("tasks", &self.task_names())
            .finish()
    }
}

impl Job {
    /// Start building a job around `generator`.
    pub fn builder<G: Generator>(id: impl Into<JobId>, generator: Arc<G>) -> JobBuilder<G::Item> {
        JobBuilder {
            id: id.into(),
            generator: Arc::new(GeneratorAdapter(generator)),
            stages: Vec::new(),
            default_workers: 1,
            _payload: PhantomData,
        }
    }

    /// Get the job ID.
    pub fn id(&self) -> &JobId {
        &self.id
    }

    /// Names of the tasks in declared order.
    pub fn task_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    /// Number of task stages between generator and sink.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// True when items go straight from generator to sink.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub(crate) fn generator(&self) -> &Arc<dyn ErasedGenerator> {
        &self.generator
    }

    pub(crate) fn stages(&self) -> &Arc<[StageDescriptor]> {
        &self.stages
    }

    pub(crate) fn sink(&self) -> &Arc<dyn ErasedSink> {
        &self.sink
    }
}

/// Builder for [`Job`]. `T` is the payload type produced by the last stage
/// added so far.
pub struct JobBuilder<T> {
    id: JobId,
    generator: Arc<dyn ErasedGenerator>,
    stages: Vec<StageDescriptor>,
    default_workers: usize,
    _payload: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> JobBuilder<T> {
    /// Pool size for tasks added afterwards without an explicit size.
    pub fn with_default_workers(mut self, workers: usize) -> Self {
        self.default_workers = workers;
        self
    }

    /// Append a task consuming the current payload type.
    pub fn task<K>(self, task: Arc<K>) -> JobBuilder<K::Output>
    where
        K: Task<Input = T>,
    {
        self.task_descriptor(TaskDescriptor::new(task))
    }

    /// Append a prepared descriptor.
    pub fn task_descriptor<O: Send + 'static>(
        mut self,
        descriptor: TaskDescriptor<T, O>,
    ) -> JobBuilder<O> {
        let workers = descriptor.workers.unwrap_or(self.default_workers);
        self.stages.push(StageDescriptor {
            name: descriptor.name().to_string(),
            key: descriptor.key(),
            workers,
            task: Arc::new(TaskAdapter {
                task: descriptor.task,
            }),
        });
        JobBuilder {
            id: self.id,
            generator: self.generator,
            stages: self.stages,
            default_workers: self.default_workers,
            _payload: PhantomData,
        }
    }

    /// Terminate the chain with `sink` and produce the job.
    pub fn sink<S>(self, sink: Arc<S>) -> Job
    where
        S: Sink<Item = T>,
    {
        Job {
            id: self.id,
            generator: self.generator,
            stages: self.stages.into(),
            sink: Arc::new(SinkAdapter(sink)),
        }
    }
}
