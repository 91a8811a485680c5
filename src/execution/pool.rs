//! Dedicated worker pools for pipeline stages.
//!
//! A [`WorkerPool`] is a FIFO queue of stage invocations served by a fixed
//! number of worker threads. Each worker is an OS thread driving its own
//! current-thread tokio runtime, so stages never run on the thread that
//! dispatches them and a blocking stage only stalls its own worker. With one
//! worker the pool is a serial queue: the generator and the sink each get one
//! so generation stays sequential and consumption/cleanup stay serialized.
//! Task pools may have more.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::{mpsc, oneshot};
use tracing::{Instrument, Span, debug, debug_span, warn};

use super::error::{EngineError, WorkerError};

type Work = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Work>>>;

/// A running worker thread and the signal it sends once its loop has ended.
struct Worker {
    thread: thread::JoinHandle<()>,
    exited: oneshot::Receiver<()>,
}

/// A named pool of worker threads executing submitted stage invocations.
pub struct WorkerPool {
    name: String,
    workers: usize,
    sender: Mutex<Option<mpsc::UnboundedSender<Work>>>,
    threads: Mutex<Vec<Worker>>,
}

impl WorkerPool {
    /// Start a pool with `workers` worker threads.
    ///
    /// Does not need an ambient tokio runtime: every worker brings its own.
    pub fn spawn(name: impl Into<String>, workers: usize) -> Result<Self, EngineError> {
        let name = name.into();
        if workers == 0 {
            return Err(EngineError::PoolCreation {
                pool: name,
                reason: "a pool needs at least one worker".to_string(),
            });
        }

        let (sender, receiver) = mpsc::unbounded_channel::<Work>();
        let receiver: SharedReceiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let mut threads = Vec::with_capacity(workers);
        for index in 0..workers {
            match start_worker(&name, index, Arc::clone(&receiver)) {
                Ok(worker) => threads.push(worker),
                Err(reason) => {
                    // Workers already started exit once the sender is gone.
                    drop(sender);
                    return Err(EngineError::PoolCreation { pool: name, reason });
                }
            }
        }

        debug!(pool = %name, workers = workers, "worker pool started");

        Ok(Self {
            name,
            workers,
            sender: Mutex::new(Some(sender)),
            threads: Mutex::new(threads),
        })
    }

    /// Get the pool name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the number of workers serving this pool.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Whether the pool has been shut down.
    pub fn is_closed(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Run `work` on one of the pool's workers and wait for its output.
    ///
    /// Work is started in submission order and runs inside the caller's
    /// current span. A panic inside `work` is contained and reported as
    /// [`WorkerError::Panicked`]; the worker keeps serving.
    pub async fn run<F, T>(&self, work: F) -> Result<T, WorkerError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let span = Span::current();
        self.submit(Box::pin(
            async move {
                let _ = tx.send(work.await);
            }
            .instrument(span),
        ))?;

        rx.await.map_err(|_| WorkerError::Panicked {
            pool: self.name.clone(),
        })
    }

    fn submit(&self, work: Work) -> Result<(), WorkerError> {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let closed = || WorkerError::Closed {
            pool: self.name.clone(),
        };
        match sender.as_ref() {
            Some(sender) => sender.send(work).map_err(|_| closed()),
            None => Err(closed()),
        }
    }

    /// Stop accepting work, let queued work finish and join every worker.
    ///
    /// Calling this more than once is harmless.
    pub async fn shutdown(&self) {
        drop(
            self.sender
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );

        let threads = std::mem::take(&mut *self.threads.lock().unwrap_or_else(PoisonError::into_inner));
        if threads.is_empty() {
            return;
        }

        for worker in threads {
            // The exit signal is the thread's last statement, so the join
            // below does not wait on a running loop.
            let _ = worker.exited.await;
            if worker.thread.join().is_err() {
                warn!(pool = %self.name, "worker exited abnormally");
            }
        }

        debug!(pool = %self.name, "worker pool stopped");
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("workers", &self.workers)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn start_worker(pool: &str, index: usize, receiver: SharedReceiver) -> Result<Worker, String> {
    let runtime = Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("failed to build worker runtime: {}", e))?;
    let (exit_tx, exited) = oneshot::channel();
    let span = debug_span!("worker", pool = %pool, index = index);
    let name = pool.to_string();

    let thread = thread::Builder::new()
        .name(format!("{}-worker-{}", pool, index))
        .spawn(move || {
            run_worker(runtime, name, receiver, span);
            let _ = exit_tx.send(());
        })
        .map_err(|e| format!("failed to spawn worker thread: {}", e))?;

    Ok(Worker { thread, exited })
}

fn run_worker(runtime: Runtime, pool: String, receiver: SharedReceiver, span: Span) {
    runtime.block_on(worker_loop(pool, receiver).instrument(span));
    drop(runtime);
}

async fn worker_loop(pool: String, receiver: SharedReceiver) {
    loop {
        let work = receiver.lock().await.recv().await;
        let Some(work) = work else {
            break;
        };

        // Each invocation gets its own task so a panic cannot kill the worker.
        if let Err(e) = tokio::spawn(work).await
            && e.is_panic()
        {
            warn!(pool = %pool, "stage panicked");
        }
    }
}

/// Creates worker pools for the engine.
///
/// The engine obtains every pool it uses (generator, sink and each task)
/// through its factory.
pub trait PoolFactory: Send + Sync {
    fn create(&self, name: &str, workers: usize) -> Result<WorkerPool, EngineError>;
}

/// Default factory spawning thread-backed pools.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioPoolFactory;

impl PoolFactory for TokioPoolFactory {
    fn create(&self, name: &str, workers: usize) -> Result<WorkerPool, EngineError> {
        WorkerPool::spawn(name, workers)
    }
}
