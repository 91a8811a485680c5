//! Lifecycle events and event handling.
//!
//! This module provides event emission for job and item lifecycle events,
//! enabling observability into a running job without touching its stages.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::core::types::{ItemSeq, JobId, RunId};
use crate::execution::{ExecutionReport, ItemOutcome};

/// Lifecycle events emitted during execution.
#[derive(Debug, Clone)]
pub enum Event {
    /// A job run has allocated its pools and is about to generate.
    JobStarted {
        job_id: JobId,
        run_id: RunId,
        timestamp: Instant,
    },

    /// A permit was acquired and a pipeline spawned for a generation request.
    ItemDispatched {
        run_id: RunId,
        seq: ItemSeq,
        timestamp: Instant,
    },

    /// An item's pipeline finished without error.
    ///
    /// Emitted before the item's permit is released.
    ItemCompleted {
        run_id: RunId,
        seq: ItemSeq,
        outcome: ItemOutcome,
        duration: Duration,
        timestamp: Instant,
    },

    /// An item's pipeline failed at some stage.
    ///
    /// Emitted before the item's permit is released.
    ItemFailed {
        run_id: RunId,
        seq: ItemSeq,
        /// Which kind of stage failed (`generator`, `task`, `sink`, ...).
        stage: &'static str,
        error: String,
        timestamp: Instant,
    },

    /// The job drained, cleaned up and released its pools.
    JobCompleted {
        job_id: JobId,
        run_id: RunId,
        report: ExecutionReport,
        timestamp: Instant,
    },
}

impl Event {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> Instant {
        match self {
            Event::JobStarted { timestamp, .. } => *timestamp,
            Event::ItemDispatched { timestamp, .. } => *timestamp,
            Event::ItemCompleted { timestamp, .. } => *timestamp,
            Event::ItemFailed { timestamp, .. } => *timestamp,
            Event::JobCompleted { timestamp, .. } => *timestamp,
        }
    }

    /// Create a JobStarted event.
    pub fn job_started(job_id: JobId, run_id: RunId) -> Self {
        Event::JobStarted {
            job_id,
            run_id,
            timestamp: Instant::now(),
        }
    }

    /// Create an ItemDispatched event.
    pub fn item_dispatched(run_id: RunId, seq: ItemSeq) -> Self {
        Event::ItemDispatched {
            run_id,
            seq,
            timestamp: Instant::now(),
        }
    }

    /// Create an ItemCompleted event.
    pub fn item_completed(
        run_id: RunId,
        seq: ItemSeq,
        outcome: ItemOutcome,
        duration: Duration,
    ) -> Self {
        Event::ItemCompleted {
            run_id,
            seq,
            outcome,
            duration,
            timestamp: Instant::now(),
        }
    }

    /// Create an ItemFailed event.
    pub fn item_failed(run_id: RunId, seq: ItemSeq, stage: &'static str, error: String) -> Self {
        Event::ItemFailed {
            run_id,
            seq,
            stage,
            error,
            timestamp: Instant::now(),
        }
    }

    /// Create a JobCompleted event.
    pub fn job_completed(job_id: JobId, run_id: RunId, report: ExecutionReport) -> Self {
        Event::JobCompleted {
            job_id,
            run_id,
            report,
            timestamp: Instant::now(),
        }
    }
}

/// Handler for receiving lifecycle events.
///
/// Handlers are awaited inline by whoever emits, so a slow handler slows the
/// pipeline that emitted the event.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    async fn handle(&self, event: &Event);
}

/// Event bus for distributing events to registered handlers.
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register an event handler.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.push(handler);
    }

    /// Emit an event to all registered handlers.
    pub async fn emit(&self, event: Event) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            handler.handle(&event).await;
        }
    }

    /// Get the number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
