//! taskforce - a bounded-concurrency job execution engine.
//!
//! A job is a generator, an ordered chain of tasks and a sink. The engine
//! pulls items from the generator, threads each one through the tasks on
//! per-task worker pools and hands the result to the sink, keeping at most
//! `max_in_flight` items between generation and consumption.
//!
//! ```no_run
//! use taskforce::testing::{RecordingSink, SequenceGenerator, task_fn};
//! use taskforce::{ExecutionContext, Job, JobExecutor, WorkItem};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let sink = RecordingSink::new();
//! let job = Job::builder("doubling", SequenceGenerator::new(vec![10u32, 20]))
//!     .task(task_fn("double", |x: u32| async move { Ok(WorkItem::Present(x * 2)) }))
//!     .sink(sink.clone());
//!
//! let report = JobExecutor::new()
//!     .execute_with_context(&ExecutionContext::new(2)?, &job)
//!     .await?;
//! assert_eq!(sink.sorted(), vec![20, 40]);
//! assert!(report.is_clean());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod events;
pub mod execution;
pub mod testing;

pub use config::{ConfigError, EngineConfig};
pub use crate::core::context::{ContextError, ExecutionContext};
pub use crate::core::item::WorkItem;
pub use crate::core::job::{Job, JobBuilder, TaskDescriptor};
pub use crate::core::task::{Generator, Sink, Task, TaskError};
pub use crate::core::types::{ItemSeq, JobId, RunId, TaskKey};
pub use events::{Event, EventBus, EventHandler};
pub use execution::{
    EngineError, ExecutionReport, ItemCounts, ItemOutcome, JobExecutor, PipelineError,
    PoolCache, PoolFactory, TokioPoolFactory, WorkerError, WorkerPool,
};
