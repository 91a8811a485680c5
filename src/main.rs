//! tf - run and validate taskforce jobs.
//!
//! Usage:
//!   tf run [--count N] [--max-in-flight M] [--config FILE]   Run the built-in counting job
//!   tf validate <FILE>                                     Validate an engine config file

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use taskforce::{
    EngineConfig, Event, EventBus, EventHandler, Generator, Job, JobExecutor, Sink, Task,
    TaskDescriptor, TaskError, WorkItem,
};
use tracing::{error, info, warn};

/// tf - bounded-concurrency job runner
#[derive(Parser)]
#[command(name = "tf")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the built-in counting job: square 1..=N, keep even squares, sum them
    Run {
        /// Number of items to generate
        #[arg(short = 'n', long, default_value = "100")]
        count: u64,

        /// Maximum items in flight (overrides the config file)
        #[arg(short = 'm', long)]
        max_in_flight: Option<usize>,

        /// Path to an engine config file
        #[arg(short = 'c', long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// Validate an engine config file without running
    Validate {
        /// Path to the engine config file
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

/// Yields 1..=limit, then end-of-stream.
struct Counter {
    next: AtomicU64,
    limit: u64,
}

#[async_trait]
impl Generator for Counter {
    type Item = u64;

    async fn generate(&self) -> Result<WorkItem<u64>, TaskError> {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        if n > self.limit {
            return Ok(WorkItem::Empty);
        }
        Ok(WorkItem::Present(n))
    }
}

struct Square;

#[async_trait]
impl Task for Square {
    type Input = u64;
    type Output = u64;

    fn name(&self) -> &str {
        "square"
    }

    async fn execute(&self, input: u64) -> Result<WorkItem<u64>, TaskError> {
        input
            .checked_mul(input)
            .map(WorkItem::Present)
            .ok_or_else(|| TaskError::InvalidInput(format!("{} squared overflows", input)))
    }
}

struct KeepEven;

#[async_trait]
impl Task for KeepEven {
    type Input = u64;
    type Output = u64;

    fn name(&self) -> &str {
        "keep_even"
    }

    async fn execute(&self, input: u64) -> Result<WorkItem<u64>, TaskError> {
        if input % 2 == 0 {
            Ok(WorkItem::Present(input))
        } else {
            Ok(WorkItem::Empty)
        }
    }
}

/// Sums consumed items and logs the total on cleanup.
#[derive(Default)]
struct Summer {
    total: AtomicU64,
    count: AtomicU64,
}

#[async_trait]
impl Sink for Summer {
    type Item = u64;

    async fn consume(&self, item: u64) -> Result<(), TaskError> {
        self.total.fetch_add(item, Ordering::SeqCst);
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), TaskError> {
        info!(
            "Sink consumed {} items, total {}",
            self.count.load(Ordering::SeqCst),
            self.total.load(Ordering::SeqCst)
        );
        Ok(())
    }
}

/// Simple logging event handler that prints job events.
struct LoggingHandler;

#[async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &Event) {
        match event {
            Event::JobStarted { job_id, run_id, .. } => {
                info!("Job '{}' started (run: {})", job_id, run_id);
            }
            Event::ItemFailed {
                seq, stage, error, ..
            } => {
                warn!("  Item {} failed in {}: {}", seq, stage, error);
            }
            Event::JobCompleted {
                job_id,
                run_id,
                report,
                ..
            } => {
                if report.is_clean() {
                    info!(
                        "Job '{}' completed in {:?} (run: {})",
                        job_id, report.duration, run_id
                    );
                } else {
                    error!(
                        "Job '{}' completed with {} failed items in {:?} (run: {})",
                        job_id,
                        report.items.failures(),
                        report.duration,
                        run_id
                    );
                }
            }
            _ => {}
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            count,
            max_in_flight,
            config,
        } => {
            run_counting_job(count, max_in_flight, config).await?;
        }
        Commands::Validate { file } => {
            validate_config(file)?;
        }
    }

    Ok(())
}

async fn run_counting_job(
    count: u64,
    max_in_flight: Option<usize>,
    config_path: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match config_path {
        Some(path) => EngineConfig::from_file(&path)?,
        None => EngineConfig::default(),
    };
    if let Some(max) = max_in_flight {
        config.max_in_flight = max;
        config.validate()?;
    }
    let context = config.execution_context()?;

    let event_bus = Arc::new(EventBus::new());
    event_bus.register(Arc::new(LoggingHandler)).await;

    let job = Job::builder(
        "counting",
        Arc::new(Counter {
            next: AtomicU64::new(1),
            limit: count,
        }),
    )
    .with_default_workers(config.task_workers)
    .task(Arc::new(Square))
    .task_descriptor(TaskDescriptor::new(Arc::new(KeepEven)).with_workers(1))
    .sink(Arc::new(Summer::default()));

    info!(
        "Running '{}' over {} items with up to {} in flight",
        job.id(),
        count,
        context.max_in_flight()
    );

    let report = JobExecutor::new()
        .with_event_bus(event_bus)
        .execute_with_context(&context, &job)
        .await?;

    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.is_clean() {
        return Err(format!("{} items failed", report.items.failures()).into());
    }
    Ok(())
}

fn validate_config(path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    info!("Validating engine config {:?}", path);

    match EngineConfig::from_file(&path) {
        Ok(config) => {
            println!(
                "✓ {}: max_in_flight={}, task_workers={}",
                path.display(),
                config.max_in_flight,
                config.task_workers
            );
            Ok(())
        }
        Err(e) => {
            println!("✗ {}: {}", path.display(), e);
            Err(e.into())
        }
    }
}
