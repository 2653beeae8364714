//! Per-queue worker pool: bounded-concurrency execution of a registered
//! processor over claimed jobs.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::job::JobRecord;
use crate::store::DurableJobStore;

/// Error produced by a job processor. Contained entirely within the
/// pool's retry machinery; it never propagates past the pool.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct JobProcessingError(pub String);

impl JobProcessingError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// The business-logic callback a pool runs for its queue. Implementations
/// are opaque to the core: it routes and logs, nothing more.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(&self, job: &JobRecord) -> Result<(), JobProcessingError>;
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    pub concurrency: usize,
    /// Sleep between claim attempts when the queue is empty or paused.
    /// Polling with a fixed interval rather than busy-spinning.
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Bounded-concurrency executor bound to one queue.
pub struct WorkerPool {
    queue: String,
    store: Arc<dyn DurableJobStore>,
    processor: Arc<dyn JobProcessor>,
    config: WorkerConfig,
    running: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
}

impl WorkerPool {
    pub fn new(
        queue: impl Into<String>,
        store: Arc<dyn DurableJobStore>,
        processor: Arc<dyn JobProcessor>,
        config: WorkerConfig,
        running: Arc<AtomicBool>,
        paused: Arc<AtomicBool>,
        active: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            queue: queue.into(),
            store,
            processor,
            config,
            running,
            paused,
            active,
        }
    }

    /// Spawn the claim loop onto the runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        info!(
            queue = %self.queue,
            concurrency = self.config.concurrency,
            "Worker pool started"
        );

        while self.running.load(Ordering::SeqCst) {
            if self.paused.load(Ordering::SeqCst) {
                tokio::time::sleep(self.config.poll_interval).await;
                continue;
            }
            if semaphore.available_permits() == 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
                continue;
            }

            match self.store.claim(&self.queue).await {
                Ok(Some(job)) => {
                    let permit = semaphore
                        .clone()
                        .acquire_owned()
                        .await
                        .expect("worker semaphore closed unexpectedly");
                    self.active.fetch_add(1, Ordering::SeqCst);
                    let store = self.store.clone();
                    let processor = self.processor.clone();
                    let active = self.active.clone();

                    tokio::spawn(async move {
                        run_one(store, processor, job).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        drop(permit);
                    });
                }
                Ok(None) => {
                    tokio::time::sleep(self.config.poll_interval).await;
                }
                Err(e) => {
                    error!(queue = %self.queue, error = %e, "Claim failed, backing off");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }

        info!(queue = %self.queue, "Worker pool stopped");
    }
}

/// Execute one claimed job in isolation. Panics and errors both become a
/// retry (attempts remaining) or a terminal failure, never pool death.
async fn run_one(store: Arc<dyn DurableJobStore>, processor: Arc<dyn JobProcessor>, job: JobRecord) {
    let started = std::time::Instant::now();
    let outcome = std::panic::AssertUnwindSafe(processor.process(&job))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| Err(JobProcessingError::new("processor panicked")));
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(()) => {
            if let Err(e) = store.complete(&job.queue, &job.id).await {
                error!(queue = %job.queue, job_id = %job.id, error = %e, "Failed to record completion");
                return;
            }
            info!(
                queue = %job.queue,
                job_id = %job.id,
                elapsed_ms,
                "Job completed"
            );
        }
        Err(err) => {
            if job.attempts < job.max_attempts {
                let delay = job.backoff.delay(job.attempts);
                let retry_at = Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
                warn!(
                    queue = %job.queue,
                    job_id = %job.id,
                    attempt = job.attempts,
                    max_attempts = job.max_attempts,
                    delay_secs = delay.as_secs(),
                    elapsed_ms,
                    error = %err,
                    "Job failed, scheduling retry with backoff"
                );
                if let Err(e) = store
                    .fail(&job.queue, &job.id, &err.0, Some(retry_at))
                    .await
                {
                    error!(queue = %job.queue, job_id = %job.id, error = %e, "Failed to record retry");
                }
            } else {
                error!(
                    queue = %job.queue,
                    job_id = %job.id,
                    attempts = job.attempts,
                    elapsed_ms,
                    error = %err,
                    "Job failed permanently"
                );
                if let Err(e) = store.fail(&job.queue, &job.id, &err.0, None).await {
                    error!(queue = %job.queue, job_id = %job.id, error = %e, "Failed to record terminal failure");
                }
            }
        }
    }
}
