//! Execution error types.
//!
//! Two levels of failure exist:
//!
//! - [`EngineError`]: the job cannot start (or its resources are gone). Fatal,
//!   returned from `execute`.
//! - [`PipelineError`]: one item failed somewhere between generator and sink.
//!   Contained: logged, counted in the report, its slot released.

use thiserror::Error;

use crate::core::context::ContextError;
use crate::core::task::TaskError;

/// Fatal errors returned from job execution.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A worker pool could not be created.
    #[error("failed to create worker pool '{pool}': {reason}")]
    PoolCreation { pool: String, reason: String },

    /// The pool cache was used after it released its pools.
    #[error("pool cache already released")]
    CacheReleased,

    /// The execution context was invalid.
    #[error("invalid execution context: {0}")]
    InvalidContext(#[from] ContextError),

    /// The concurrency permits were closed while the job was running.
    #[error("concurrency permits closed unexpectedly")]
    PermitsClosed,
}

/// Errors from dispatching work onto a worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkerError {
    /// The pool has been shut down and accepts no more work.
    #[error("worker pool '{pool}' is shut down")]
    Closed { pool: String },

    /// The stage panicked while running on the pool.
    #[error("stage panicked on worker pool '{pool}'")]
    Panicked { pool: String },
}

/// Failure of a single item's pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The generator failed.
    #[error("generation failed: {0}")]
    Generation(#[source] TaskError),

    /// A task failed; downstream stages were skipped.
    #[error("task '{task}' failed: {source}")]
    Task {
        task: String,
        #[source]
        source: TaskError,
    },

    /// The sink failed to consume the item.
    #[error("sink failed: {0}")]
    Sink(#[source] TaskError),

    /// The stage could not run on its worker.
    #[error(transparent)]
    Worker(#[from] WorkerError),

    /// A task pool could not be obtained.
    #[error(transparent)]
    Pool(#[from] EngineError),
}

impl PipelineError {
    /// Short label of the stage kind that failed, used in logs.
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Generation(_) => "generator",
            PipelineError::Task { .. } => "task",
            PipelineError::Sink(_) => "sink",
            PipelineError::Worker(_) => "worker",
            PipelineError::Pool(_) => "pool",
        }
    }
}
