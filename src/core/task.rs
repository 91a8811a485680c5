//! Stage traits and error types.
//!
//! A job is assembled from three kinds of stage:
//!
//! - [`Generator`]: produces work items until it signals end-of-stream
//! - [`Task`]: transforms one item into the next stage's input
//! - [`Sink`]: consumes finished items and is cleaned up once at job end
//!
//! Implement these traits to plug business logic into the engine.

use async_trait::async_trait;
use thiserror::Error;

use super::item::WorkItem;

/// Errors a stage can report for a single item.
///
/// The engine never retries: the error is logged, the item is abandoned and
/// its concurrency slot is returned.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Stage execution failed with a message.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// The stage rejected its input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Generic error wrapper.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl TaskError {
    /// Shorthand for [`TaskError::ExecutionFailed`].
    pub fn failed(message: impl Into<String>) -> Self {
        TaskError::ExecutionFailed(message.into())
    }
}

/// Source of work items for a job.
///
/// The engine calls `generate` from a single dedicated worker, one call at a
/// time, so implementations need interior mutability but no extra locking
/// discipline. Once `generate` returns [`WorkItem::Empty`] it is never called
/// again for that run.
///
/// # Example
///
/// ```ignore
/// use std::sync::atomic::{AtomicU64, Ordering};
/// use taskforce::{Generator, TaskError, WorkItem};
///
/// struct Countdown {
///     remaining: AtomicU64,
/// }
///
/// #[async_trait::async_trait]
/// impl Generator for Countdown {
///     type Item = u64;
///
///     async fn generate(&self) -> Result<WorkItem<u64>, TaskError> {
///         let n = self.remaining.load(Ordering::SeqCst);
///         if n == 0 {
///             return Ok(WorkItem::Empty);
///         }
///         self.remaining.store(n - 1, Ordering::SeqCst);
///         Ok(WorkItem::Present(n))
///     }
/// }
/// ```
#[async_trait]
pub trait Generator: Send + Sync + 'static {
    /// Type of the produced payloads.
    type Item: Send + 'static;

    /// Produce the next item, or [`WorkItem::Empty`] at end-of-stream.
    async fn generate(&self) -> Result<WorkItem<Self::Item>, TaskError>;
}

/// A transform applied to each item at one pipeline stage.
///
/// With more than one worker on the task's pool, or with several items in
/// flight, `execute` may run concurrently for different items.
#[async_trait]
pub trait Task: Send + Sync + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    /// Returns the name of this task, used for logging and pool naming.
    fn name(&self) -> &str;

    /// Transform one payload.
    ///
    /// Returning [`WorkItem::Empty`] drops the item: downstream tasks and the
    /// sink never see it.
    async fn execute(&self, input: Self::Input) -> Result<WorkItem<Self::Output>, TaskError>;
}

/// Terminal consumer of a job's items.
#[async_trait]
pub trait Sink: Send + Sync + 'static {
    type Item: Send + 'static;

    /// Consume one finished item. Calls are serialized on the sink's worker.
    async fn consume(&self, item: Self::Item) -> Result<(), TaskError>;

    /// Called exactly once after every in-flight item has drained.
    ///
    /// Default implementation does nothing.
    async fn cleanup(&self) -> Result<(), TaskError> {
        Ok(())
    }
}
