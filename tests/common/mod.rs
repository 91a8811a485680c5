//! Common test utilities shared across integration tests.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use taskforce::testing::task_fn;
use taskforce::{Event, EventHandler, ExecutionContext, ItemOutcome, Task, WorkItem};
use tokio::sync::Mutex;

/// Recording event handler for verifying events.
pub struct RecordingHandler {
    events: Mutex<Vec<Event>>,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    pub async fn events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }

    pub async fn completed_with(&self, expected: ItemOutcome) -> usize {
        self.events
            .lock()
            .await
            .iter()
            .filter(|e| matches!(e, Event::ItemCompleted { outcome, .. } if *outcome == expected))
            .count()
    }

    pub async fn failed_in(&self, expected: &str) -> usize {
        self.events
            .lock()
            .await
            .iter()
            .filter(|e| matches!(e, Event::ItemFailed { stage, .. } if *stage == expected))
            .count()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: &Event) {
        self.events.lock().await.push(event.clone());
    }
}

/// Build a context allowing `n` items in flight.
pub fn context(n: usize) -> ExecutionContext {
    ExecutionContext::new(n).unwrap()
}

/// A task doubling its input.
pub fn doubler() -> Arc<impl Task<Input = u32, Output = u32>> {
    task_fn("double", |x: u32| async move { Ok(WorkItem::Present(x * 2)) })
}

/// A task that sleeps for `delay` and then passes its input through.
pub fn slow_identity(
    name: &str,
    delay: Duration,
) -> Arc<impl Task<Input = u32, Output = u32>> {
    task_fn(name, move |x: u32| async move {
        tokio::time::sleep(delay).await;
        Ok(WorkItem::Present(x))
    })
}
