//! Job execution engine.
//!
//! The `JobExecutor` runs one job to completion:
//! - allocates a serial worker for the generator and one for the sink, plus
//!   one cached pool per distinct task
//! - issues generation requests while permits are available and the stream
//!   has not ended, spawning one pipeline per request
//! - drains every in-flight pipeline once the generator signals end-of-stream
//! - cleans up the sink and releases all pools

use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{Instrument, debug, debug_span, error, info, info_span};

use crate::core::context::ExecutionContext;
use crate::core::job::Job;
use crate::core::types::{ItemSeq, JobId, RunId};
use crate::events::{Event, EventBus};

use super::cache::PoolCache;
use super::error::EngineError;
use super::pipeline::{self, ItemCounts, RunShared, RunStats};
use super::pool::{PoolFactory, TokioPoolFactory, WorkerPool};

/// Name of the generator's dedicated pool.
pub const GENERATOR_POOL: &str = "generator";
/// Name of the sink's dedicated pool.
pub const SINK_POOL: &str = "sink";

/// Summary of one job run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionReport {
    pub job_id: JobId,
    pub run_id: RunId,
    /// Concurrency limit the run used.
    pub max_in_flight: usize,
    /// Per-item counters.
    pub items: ItemCounts,
    /// Whether `Sink::cleanup` ran and succeeded.
    pub cleanup_succeeded: bool,
    /// Permits available once every pipeline drained; equals `max_in_flight`
    /// when every acquired permit was released.
    pub permits_available: usize,
    /// Wall-clock duration of the run.
    pub duration: Duration,
}

impl ExecutionReport {
    /// True when no item failed and cleanup succeeded.
    pub fn is_clean(&self) -> bool {
        self.items.failures() == 0 && self.cleanup_succeeded
    }
}

/// Pools owned by one run.
struct RunResources {
    generator: Arc<WorkerPool>,
    sink: Arc<WorkerPool>,
    cache: Arc<PoolCache>,
}

impl RunResources {
    async fn release(&self) {
        self.generator.shutdown().await;
        self.sink.shutdown().await;
        self.cache.release_all().await;
    }
}

/// Executor for running jobs with bounded concurrency.
pub struct JobExecutor {
    factory: Arc<dyn PoolFactory>,
    event_bus: Option<Arc<EventBus>>,
}

impl JobExecutor {
    /// Create an executor using tokio worker pools and no event bus.
    pub fn new() -> Self {
        Self {
            factory: Arc::new(TokioPoolFactory),
            event_bus: None,
        }
    }

    /// Use `factory` for every pool the executor creates.
    pub fn with_pool_factory(mut self, factory: Arc<dyn PoolFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Emit lifecycle events to `event_bus`.
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Execute a job one item at a time.
    pub async fn execute(&self, job: &Job) -> Result<ExecutionReport, EngineError> {
        self.execute_with_context(&ExecutionContext::default(), job)
            .await
    }

    /// Execute a job with the caller's concurrency limit.
    ///
    /// Returns once the generator has signalled end-of-stream, every in-flight
    /// item has finished and the sink has been cleaned up. Per-item failures are
    /// logged and counted in the report; only setup failures return `Err`.
    pub async fn execute_with_context(
        &self,
        context: &ExecutionContext,
        job: &Job,
    ) -> Result<ExecutionReport, EngineError> {
        let run_id = RunId::new();
        let span = info_span!(
            "job_execution",
            job = %job.id(),
            run = %run_id,
            max_in_flight = context.max_in_flight(),
        );
        self.run(context, job, run_id).instrument(span).await
    }

    async fn run(
        &self,
        context: &ExecutionContext,
        job: &Job,
        run_id: RunId,
    ) -> Result<ExecutionReport, EngineError> {
        let start_time = Instant::now();
        let capacity = context.max_in_flight();

        let resources = self.allocate(job).await?;
        info!(tasks = job.len(), pools = resources.cache.len(), "job started");
        if let Some(bus) = &self.event_bus {
            bus.emit(Event::job_started(job.id().clone(), run_id)).await;
        }

        let shared = Arc::new(RunShared {
            run: run_id,
            job: job.clone(),
            generator_pool: Arc::clone(&resources.generator),
            sink_pool: Arc::clone(&resources.sink),
            cache: Arc::clone(&resources.cache),
            more_work: Arc::new(AtomicBool::new(true)),
            stats: RunStats::default(),
            events: self.event_bus.clone(),
        });
        let semaphore = Arc::new(Semaphore::new(capacity));

        let drained = match dispatch(&shared, &semaphore).await {
            Ok(dispatched) => {
                debug!(dispatched = dispatched, "generation finished, draining");
                drain(&semaphore, capacity).await
            }
            Err(e) => Err(e),
        };

        let cleanup_succeeded = cleanup(&shared).await;
        resources.release().await;

        let permits_available = drained?;
        let report = ExecutionReport {
            job_id: job.id().clone(),
            run_id,
            max_in_flight: capacity,
            items: shared.stats.snapshot(),
            cleanup_succeeded,
            permits_available,
            duration: start_time.elapsed(),
        };

        info!(
            generated = report.items.generated,
            consumed = report.items.consumed,
            failed = report.items.failures(),
            duration_ms = %report.duration.as_millis(),
            "job completed"
        );
        if let Some(bus) = &self.event_bus {
            bus.emit(Event::job_completed(job.id().clone(), run_id, report.clone()))
                .await;
        }

        Ok(report)
    }

    /// Create the generator and sink workers and warm the task pool cache.
    ///
    /// On failure everything created so far is shut down before returning.
    async fn allocate(&self, job: &Job) -> Result<RunResources, EngineError> {
        let generator = Arc::new(self.factory.create(GENERATOR_POOL, 1)?);
        let sink = match self.factory.create(SINK_POOL, 1) {
            Ok(pool) => Arc::new(pool),
            Err(e) => {
                generator.shutdown().await;
                return Err(e);
            }
        };
        let resources = RunResources {
            generator,
            sink,
            cache: Arc::new(PoolCache::new(Arc::clone(&self.factory))),
        };

        for stage in job.stages().iter() {
            if let Err(e) = resources
                .cache
                .get_or_create(stage.key, &stage.name, stage.workers)
            {
                error!(task = %stage.name, error = %e, "failed to allocate task pool");
                resources.release().await;
                return Err(e);
            }
        }

        Ok(resources)
    }
}

impl Default for JobExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Issue generation requests until the stream ends. Returns how many
/// pipelines were spawned.
async fn dispatch(shared: &Arc<RunShared>, semaphore: &Arc<Semaphore>) -> Result<u64, EngineError> {
    let mut seq = ItemSeq::new(0);
    loop {
        let permit = Arc::clone(semaphore)
            .acquire_owned()
            .await
            .map_err(|_| EngineError::PermitsClosed)?;

        // Checked after acquiring: while we waited, an earlier pipeline may
        // have seen end-of-stream.
        if !shared.has_more_work() {
            drop(permit);
            return Ok(seq.get());
        }

        let span = debug_span!("pipeline_item", seq = %seq);
        tokio::spawn(pipeline::run_item(Arc::clone(shared), seq, permit).instrument(span));
        seq = seq.next();
    }
}

/// Wait until every permit is back. Returns the permits available afterwards.
async fn drain(semaphore: &Semaphore, capacity: usize) -> Result<usize, EngineError> {
    let all = semaphore
        .acquire_many(capacity as u32)
        .await
        .map_err(|_| EngineError::PermitsClosed)?;
    drop(all);
    Ok(semaphore.available_permits())
}

/// Run the sink's cleanup once on the sink worker.
async fn cleanup(shared: &RunShared) -> bool {
    let sink = Arc::clone(shared.job.sink());
    match shared.sink_pool.run(async move { sink.cleanup().await }).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            error!(error = %e, "sink cleanup failed");
            false
        }
        Err(e) => {
            error!(error = %e, "sink cleanup could not run");
            false
        }
    }
}
