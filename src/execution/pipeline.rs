//! Per-item pipeline: generate → task × N → consume.
//!
//! Each generation request the engine issues becomes one pipeline, spawned on
//! its own tokio task. The pipeline owns the concurrency permit acquired for
//! it and gives it back when it ends, on every path.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, error};

use crate::core::item::WorkItem;
use crate::core::job::Job;
use crate::core::task::TaskError;
use crate::core::types::{ItemSeq, RunId};
use crate::events::{Event, EventBus};

use super::cache::PoolCache;
use super::error::PipelineError;
use super::pool::WorkerPool;

/// How a pipeline that did not fail ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemOutcome {
    /// The sink consumed the item.
    Consumed,
    /// A task returned `Empty`; the item was dropped before the sink.
    Discarded,
    /// The generator signalled end-of-stream (or had already done so).
    EndOfStream,
}

/// Per-run item counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemCounts {
    /// Items the generator produced (excluding end-of-stream).
    pub generated: u64,
    /// Items the sink consumed successfully.
    pub consumed: u64,
    /// Items a task dropped by returning `Empty`.
    pub discarded: u64,
    pub generation_failures: u64,
    pub task_failures: u64,
    pub sink_failures: u64,
    /// Stages that panicked or could not be dispatched to their pool.
    pub worker_failures: u64,
}

impl ItemCounts {
    /// Total number of failed pipelines.
    pub fn failures(&self) -> u64 {
        self.generation_failures + self.task_failures + self.sink_failures + self.worker_failures
    }
}

#[derive(Debug, Default)]
pub(crate) struct RunStats {
    generated: AtomicU64,
    consumed: AtomicU64,
    discarded: AtomicU64,
    generation_failures: AtomicU64,
    task_failures: AtomicU64,
    sink_failures: AtomicU64,
    worker_failures: AtomicU64,
}

impl RunStats {
    fn record(&self, result: &Result<ItemOutcome, PipelineError>) {
        let counter = match result {
            Ok(ItemOutcome::Consumed) => &self.consumed,
            Ok(ItemOutcome::Discarded) => &self.discarded,
            Ok(ItemOutcome::EndOfStream) => return,
            Err(PipelineError::Generation(_)) => &self.generation_failures,
            Err(PipelineError::Task { .. }) => &self.task_failures,
            Err(PipelineError::Sink(_)) => &self.sink_failures,
            Err(PipelineError::Worker(_)) | Err(PipelineError::Pool(_)) => &self.worker_failures,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn snapshot(&self) -> ItemCounts {
        ItemCounts {
            generated: self.generated.load(Ordering::SeqCst),
            consumed: self.consumed.load(Ordering::SeqCst),
            discarded: self.discarded.load(Ordering::SeqCst),
            generation_failures: self.generation_failures.load(Ordering::SeqCst),
            task_failures: self.task_failures.load(Ordering::SeqCst),
            sink_failures: self.sink_failures.load(Ordering::SeqCst),
            worker_failures: self.worker_failures.load(Ordering::SeqCst),
        }
    }
}

/// State shared by the driving loop and every pipeline of one run.
pub(crate) struct RunShared {
    pub(crate) run: RunId,
    pub(crate) job: Job,
    pub(crate) generator_pool: Arc<WorkerPool>,
    pub(crate) sink_pool: Arc<WorkerPool>,
    pub(crate) cache: Arc<PoolCache>,
    /// Cleared by the generation step only; read by the driving loop.
    pub(crate) more_work: Arc<AtomicBool>,
    pub(crate) stats: RunStats,
    pub(crate) events: Option<Arc<EventBus>>,
}

impl RunShared {
    pub(crate) fn has_more_work(&self) -> bool {
        self.more_work.load(Ordering::Acquire)
    }
}

/// Run one item's pipeline to completion, then release its permit.
pub(crate) async fn run_item(shared: Arc<RunShared>, seq: ItemSeq, permit: OwnedSemaphorePermit) {
    let start = Instant::now();
    if let Some(bus) = &shared.events {
        bus.emit(Event::item_dispatched(shared.run, seq)).await;
    }

    let result = drive(&shared, seq).await;
    shared.stats.record(&result);

    match &result {
        Ok(outcome) => debug!(seq = %seq, outcome = ?outcome, "item finished"),
        Err(e) => error!(seq = %seq, stage = e.stage(), error = %e, "item failed"),
    }

    if let Some(bus) = &shared.events {
        let event = match result {
            Ok(outcome) => Event::item_completed(shared.run, seq, outcome, start.elapsed()),
            Err(e) => Event::item_failed(shared.run, seq, e.stage(), e.to_string()),
        };
        bus.emit(event).await;
    }

    drop(permit);
}

async fn drive(shared: &RunShared, seq: ItemSeq) -> Result<ItemOutcome, PipelineError> {
    let generator = Arc::clone(shared.job.generator());
    let more_work = Arc::clone(&shared.more_work);
    let generated = shared
        .generator_pool
        .run(async move {
            // Requests queued before end-of-stream was seen must not call the
            // generator again.
            if !more_work.load(Ordering::Acquire) {
                return Ok::<_, TaskError>(WorkItem::Empty);
            }
            let item = generator.generate().await?;
            if item.is_empty() {
                more_work.store(false, Ordering::Release);
            }
            Ok(item)
        })
        .await?
        .map_err(PipelineError::Generation)?;

    if generated.is_empty() {
        debug!(seq = %seq, "generator reached end of stream");
        return Ok(ItemOutcome::EndOfStream);
    }
    shared.stats.generated.fetch_add(1, Ordering::SeqCst);

    let mut item = generated;
    for stage in shared.job.stages().iter() {
        // Empty is forwarded unchanged; tasks never see it.
        let WorkItem::Present(payload) = item else {
            break;
        };
        let pool = shared
            .cache
            .get_or_create(stage.key, &stage.name, stage.workers)?;
        let task = Arc::clone(&stage.task);
        item = pool
            .run(async move { task.execute(payload).await })
            .await?
            .map_err(|source| PipelineError::Task {
                task: stage.name.clone(),
                source,
            })?;
    }

    let WorkItem::Present(payload) = item else {
        debug!(seq = %seq, "item dropped by a task");
        return Ok(ItemOutcome::Discarded);
    };

    let sink = Arc::clone(shared.job.sink());
    shared
        .sink_pool
        .run(async move { sink.consume(payload).await })
        .await?
        .map_err(PipelineError::Sink)?;

    Ok(ItemOutcome::Consumed)
}
