//! Job execution engine.
//!
//! This module provides the execution infrastructure for running jobs:
//! dedicated worker pools, the per-task pool cache, the per-item pipeline
//! and the bounded-concurrency driver tying them together.

mod cache;
mod error;
mod executor;
mod pipeline;
mod pool;

pub use cache::PoolCache;
pub use error::{EngineError, PipelineError, WorkerError};
pub use executor::{ExecutionReport, GENERATOR_POOL, JobExecutor, SINK_POOL};
pub use pipeline::{ItemCounts, ItemOutcome};
pub use pool::{PoolFactory, TokioPoolFactory, WorkerPool};
