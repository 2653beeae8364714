//! The durable job store abstraction.
//!
//! Any persistent, atomically-claimable priority structure satisfies this
//! contract: a relational table claimed with `SELECT ... FOR UPDATE SKIP
//! LOCKED`, a dedicated broker, or [`crate::MemoryStore`] for tests. The
//! store is the single source of truth for job state; no two concurrent
//! `claim` calls may ever return the same job.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::JobRecord;

/// Errors surfaced synchronously from queue operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue not found: {0}")]
    QueueNotFound(String),
    #[error("queue manager is draining, submission rejected")]
    Draining,
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid cron expression {pattern:?}: {reason}")]
    InvalidCron { pattern: String, reason: String },
    #[error("worker already registered for queue {0}")]
    WorkerAlreadyRegistered(String),
}

/// A recurring job definition. The store re-materializes a concrete
/// [`JobRecord`] instance at each tick of the cron pattern; the
/// application declares intent once and never polls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringJob {
    /// Deterministic id (`recurring-{name}`) so repeated registrations
    /// across restarts upsert instead of duplicating.
    pub id: String,
    pub queue: String,
    pub name: String,
    pub payload: serde_json::Value,
    pub priority: i32,
    /// Cron pattern with seconds field, e.g. `"0 0 3 * * *"`.
    pub cron: String,
    pub next_run: Option<DateTime<Utc>>,
}

impl RecurringJob {
    pub fn new(
        queue: impl Into<String>,
        name: impl Into<String>,
        payload: serde_json::Value,
        priority: i32,
        cron: impl Into<String>,
    ) -> Self {
        let name = name.into();
        Self {
            id: format!("recurring-{name}"),
            queue: queue.into(),
            name,
            payload,
            priority,
            cron: cron.into(),
            next_run: None,
        }
    }
}

/// Per-queue job counts, derived at read time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub delayed: usize,
}

impl QueueCounts {
    pub fn total(&self) -> usize {
        self.waiting + self.active + self.completed + self.failed + self.delayed
    }
}

/// Counts coupled with the queue they describe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    pub queue: String,
    #[serde(flatten)]
    pub counts: QueueCounts,
}

/// Persistent, atomic job storage keyed by queue name.
#[async_trait]
pub trait DurableJobStore: Send + Sync {
    /// Insert a job. Idempotent on id: returns `false` (and changes
    /// nothing) when a job with the same id already exists in the queue.
    async fn push(&self, record: JobRecord) -> Result<bool, QueueError>;

    /// Atomically claim the highest-priority eligible job: not delayed
    /// past `run_at`, not active or terminal, attempts below the cap,
    /// FIFO within equal priority. Marks it active and increments its
    /// attempt count. Due recurring definitions are materialized here.
    async fn claim(&self, queue: &str) -> Result<Option<JobRecord>, QueueError>;

    /// Active → Completed. Retention beyond the completed window is pruned.
    async fn complete(&self, queue: &str, id: &str) -> Result<(), QueueError>;

    /// Record a failed execution. With `retry_at` the job goes back to
    /// Delayed and becomes eligible at that time; without, it is terminal
    /// Failed and retained for manual retry.
    async fn fail(
        &self,
        queue: &str,
        id: &str,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), QueueError>;

    async fn counts(&self, queue: &str) -> Result<QueueCounts, QueueError>;

    /// Terminal failed jobs, oldest first.
    async fn list_failed(&self, queue: &str) -> Result<Vec<JobRecord>, QueueError>;

    /// Move every terminal failed job back to Waiting with a fresh
    /// attempt budget. Returns how many were re-queued.
    async fn retry_failed(&self, queue: &str) -> Result<usize, QueueError>;

    /// Drop pending (waiting and delayed) jobs. Active and retained
    /// terminal jobs are untouched. Returns how many were dropped.
    async fn purge(&self, queue: &str) -> Result<usize, QueueError>;

    /// Insert or replace a recurring definition by id.
    async fn upsert_recurring(&self, def: RecurringJob) -> Result<(), QueueError>;

    async fn list_recurring(&self) -> Result<Vec<RecurringJob>, QueueError>;
}
