//! Queue manager: owns the fixed set of named queues, the submission
//! API, worker-pool registration, statistics, and the drain sequence.
//!
//! All registries are explicit instance state built once at startup and
//! injected where needed; there are no ambient module-level singletons.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::QueueConfig;
use crate::drain::{DrainReport, DrainState};
use crate::job::{BackoffStrategy, JobHandle, JobOptions, JobRecord};
use crate::store::{DurableJobStore, QueueError, QueueStats, RecurringJob};
use crate::worker::{JobProcessor, WorkerConfig, WorkerPool};

/// Defaults applied to jobs submitted to a queue.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub concurrency: usize,
    pub max_attempts: u32,
    pub backoff: BackoffStrategy,
}

struct QueueEntry {
    settings: QueueSettings,
    paused: Arc<AtomicBool>,
    /// In-process gauge of jobs this queue's pool is executing right now.
    /// Drain fallback when the store cannot be read; the pool maintains it.
    active: Arc<AtomicUsize>,
}

pub struct QueueManager {
    store: Arc<dyn DurableJobStore>,
    /// Queue name -> settings and pause flag. Populated once at startup,
    /// read thereafter.
    queues: HashMap<String, QueueEntry>,
    pools: Mutex<HashMap<String, JoinHandle<()>>>,
    running: Arc<AtomicBool>,
    drain_state: Arc<DrainState>,
    poll_interval: Duration,
    drain_poll_interval: Duration,
}

impl QueueManager {
    /// Build the manager over a fixed list of queue names. Queues cannot
    /// be added later; submission to an unknown name is an error.
    pub fn new(store: Arc<dyn DurableJobStore>, config: &QueueConfig, queue_names: &[&str]) -> Self {
        let queues = queue_names
            .iter()
            .map(|name| {
                (
                    name.to_string(),
                    QueueEntry {
                        settings: QueueSettings {
                            concurrency: config.concurrency_for(name),
                            max_attempts: config.max_attempts,
                            backoff: config.default_backoff(),
                        },
                        paused: Arc::new(AtomicBool::new(false)),
                        active: Arc::new(AtomicUsize::new(0)),
                    },
                )
            })
            .collect();
        Self {
            store,
            queues,
            pools: Mutex::new(HashMap::new()),
            running: Arc::new(AtomicBool::new(true)),
            drain_state: Arc::new(DrainState::new()),
            poll_interval: config.poll_interval,
            drain_poll_interval: config.drain_poll_interval,
        }
    }

    fn entry(&self, queue: &str) -> Result<&QueueEntry, QueueError> {
        self.queues
            .get(queue)
            .ok_or_else(|| QueueError::QueueNotFound(queue.to_string()))
    }

    /// Registered queue names, sorted.
    pub fn queue_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.queues.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn settings(&self, queue: &str) -> Result<&QueueSettings, QueueError> {
        Ok(&self.entry(queue)?.settings)
    }

    /// Submit a job. Idempotent when `opts.job_id` is set. Rejected with
    /// [`QueueError::Draining`] once shutdown has begun.
    pub async fn submit(
        &self,
        queue: &str,
        payload: serde_json::Value,
        opts: JobOptions,
    ) -> Result<JobHandle, QueueError> {
        let entry = self.entry(queue)?;
        if !self.drain_state.is_accepting_jobs() {
            return Err(QueueError::Draining);
        }
        let record = JobRecord::from_options(
            queue,
            payload,
            opts,
            entry.settings.max_attempts,
            entry.settings.backoff,
        );
        let handle = JobHandle {
            id: record.id.clone(),
            queue: record.queue.clone(),
        };
        let priority = record.priority;
        let inserted = self.store.push(record).await?;
        if inserted {
            info!(queue = %queue, job_id = %handle.id, priority, "Job submitted");
        } else {
            info!(queue = %queue, job_id = %handle.id, "Duplicate submission ignored");
        }
        Ok(handle)
    }

    /// Declare a recurring job. The id is deterministic
    /// (`recurring-{name}`) so restarts upsert instead of duplicating.
    /// Not gated on draining: definitions outlive a process.
    pub async fn schedule_recurring(
        &self,
        queue: &str,
        name: &str,
        payload: serde_json::Value,
        priority: i32,
        cron: &str,
    ) -> Result<JobHandle, QueueError> {
        self.entry(queue)?;
        let def = RecurringJob::new(queue, name, payload, priority, cron);
        let handle = JobHandle {
            id: def.id.clone(),
            queue: def.queue.clone(),
        };
        self.store.upsert_recurring(def).await?;
        info!(queue = %queue, recurring = %handle.id, cron = %cron, "Recurring job registered");
        Ok(handle)
    }

    /// Register the worker pool for a queue. At most one pool per queue.
    pub fn register_worker(
        &self,
        queue: &str,
        concurrency: usize,
        processor: Arc<dyn JobProcessor>,
    ) -> Result<(), QueueError> {
        let entry = self.entry(queue)?;
        let mut pools = self.pools.lock().expect("pool registry lock poisoned");
        if pools.contains_key(queue) {
            return Err(QueueError::WorkerAlreadyRegistered(queue.to_string()));
        }
        let pool = WorkerPool::new(
            queue,
            self.store.clone(),
            processor,
            WorkerConfig {
                concurrency,
                poll_interval: self.poll_interval,
            },
            self.running.clone(),
            entry.paused.clone(),
            entry.active.clone(),
        );
        pools.insert(queue.to_string(), pool.spawn());
        Ok(())
    }

    pub async fn stats(&self, queue: &str) -> Result<QueueStats, QueueError> {
        self.entry(queue)?;
        let counts = self.store.counts(queue).await?;
        Ok(QueueStats {
            queue: queue.to_string(),
            counts,
        })
    }

    pub async fn all_stats(&self) -> Result<Vec<QueueStats>, QueueError> {
        let mut stats = Vec::with_capacity(self.queues.len());
        for name in self.queue_names() {
            stats.push(self.stats(name).await?);
        }
        Ok(stats)
    }

    pub async fn retry_failed(&self, queue: &str) -> Result<usize, QueueError> {
        self.entry(queue)?;
        let requeued = self.store.retry_failed(queue).await?;
        if requeued > 0 {
            info!(queue = %queue, requeued, "Re-queued failed jobs");
        }
        Ok(requeued)
    }

    pub async fn failed_jobs(&self, queue: &str) -> Result<Vec<JobRecord>, QueueError> {
        self.entry(queue)?;
        self.store.list_failed(queue).await
    }

    /// Stop the queue's pool from claiming. In-flight jobs finish.
    pub fn pause(&self, queue: &str) -> Result<(), QueueError> {
        self.entry(queue)?.paused.store(true, Ordering::SeqCst);
        info!(queue = %queue, "Queue paused");
        Ok(())
    }

    pub fn resume(&self, queue: &str) -> Result<(), QueueError> {
        self.entry(queue)?.paused.store(false, Ordering::SeqCst);
        info!(queue = %queue, "Queue resumed");
        Ok(())
    }

    pub async fn purge(&self, queue: &str) -> Result<usize, QueueError> {
        self.entry(queue)?;
        let dropped = self.store.purge(queue).await?;
        info!(queue = %queue, dropped, "Queue purged");
        Ok(dropped)
    }

    /// Whether caller-initiated submissions are still accepted.
    pub fn is_accepting_jobs(&self) -> bool {
        self.drain_state.is_accepting_jobs()
    }

    /// Graceful drain: close the submission gate, pause every queue, and
    /// wait up to `timeout` for active jobs to finish. A timeout is
    /// reported, not raised: shutdown proceeds regardless.
    pub async fn drain(&self, timeout: Duration) -> DrainReport {
        self.drain_state.begin_draining();
        for entry in self.queues.values() {
            entry.paused.store(true, Ordering::SeqCst);
        }
        info!(timeout_secs = timeout.as_secs_f64(), "Draining queues");

        let started = std::time::Instant::now();
        let remaining = loop {
            let mut remaining = Vec::new();
            for name in self.queue_names() {
                // The store is authoritative: a job is Active there from
                // the moment it is claimed, before the pool's in-process
                // gauge catches up.
                let active = match self.store.counts(name).await {
                    Ok(counts) => counts.active,
                    Err(e) => {
                        warn!(queue = %name, error = %e, "Counts unreadable during drain, using in-process gauge");
                        self.queues[name].active.load(Ordering::SeqCst)
                    }
                };
                if active > 0 {
                    remaining.push((name.to_string(), active));
                }
            }
            if remaining.is_empty() {
                break remaining;
            }
            if started.elapsed() >= timeout {
                break remaining;
            }
            let wait = self
                .drain_poll_interval
                .min(timeout.saturating_sub(started.elapsed()));
            tokio::time::sleep(wait).await;
        };

        let elapsed = started.elapsed();
        let timed_out = !remaining.is_empty();
        if timed_out {
            for (queue, active) in &remaining {
                warn!(
                    queue = %queue,
                    active,
                    "Drain timed out with jobs still active; they will be interrupted by process exit"
                );
            }
        } else {
            info!(elapsed_ms = elapsed.as_millis() as u64, "All queues drained");
        }
        self.drain_state.finish();
        DrainReport {
            elapsed,
            timed_out,
            remaining,
        }
    }

    /// Stop all worker pools and wait for their loops to exit. Call after
    /// [`QueueManager::drain`].
    pub async fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handles: Vec<(String, JoinHandle<()>)> = {
            let mut pools = self.pools.lock().expect("pool registry lock poisoned");
            pools.drain().collect()
        };
        for (queue, handle) in handles {
            if handle.await.is_err() {
                warn!(queue = %queue, "Worker pool task panicked during shutdown");
            }
        }
    }
}
