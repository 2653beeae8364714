//! Job records, lifecycle states, submission options, and retry backoff.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Lifecycle state of a job.
///
/// Transitions are monotonic: `Waiting`/`Delayed` → `Active` →
/// `Completed`, or `Active` → `Delayed` (retry backoff) → `Active` → …
/// → `Failed` once attempts are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    /// Eligible, waiting for a worker to claim it.
    Waiting,
    /// Not yet eligible: scheduled ahead or backing off after a failure.
    Delayed,
    /// Claimed by exactly one worker.
    Active,
    /// Finished successfully, retained for observability.
    Completed,
    /// Exhausted all attempts, retained for manual retry.
    Failed,
}

/// Retry backoff strategy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum BackoffStrategy {
    Constant { secs: u64 },
    Exponential { initial_secs: u64, multiplier: f64 },
}

/// Upper bound on any computed backoff delay.
pub const MAX_BACKOFF_SECS: u64 = 3600;

impl BackoffStrategy {
    /// Delay before the next attempt. `prior_attempts` counts failed
    /// executions so far, so the first retry waits the base delay.
    pub fn delay(&self, prior_attempts: u32) -> Duration {
        let secs = match self {
            Self::Constant { secs } => *secs,
            Self::Exponential {
                initial_secs,
                multiplier,
            } => {
                let exp = prior_attempts.saturating_sub(1).min(16);
                (*initial_secs as f64 * multiplier.powi(exp as i32)) as u64
            }
        };
        Duration::from_secs(secs.min(MAX_BACKOFF_SECS))
    }
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Exponential {
            initial_secs: 5,
            multiplier: 2.0,
        }
    }
}

/// Options accepted at submission time. Unset fields fall back to the
/// queue's configured defaults.
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    /// Higher is served first. Ties break FIFO.
    pub priority: i32,
    /// Earliest-eligibility delay from now.
    pub delay: Option<Duration>,
    /// Explicit id for idempotent submission. Re-submitting an identical
    /// id within a queue is a no-op.
    pub job_id: Option<String>,
    pub max_attempts: Option<u32>,
    pub backoff: Option<BackoffStrategy>,
}

impl JobOptions {
    pub fn with_priority(priority: i32) -> Self {
        Self {
            priority,
            ..Default::default()
        }
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn job_id(mut self, id: impl Into<String>) -> Self {
        self.job_id = Some(id.into());
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = Some(backoff);
        self
    }
}

/// A persisted job entry. The payload is opaque to the queue core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub queue: String,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub state: JobState,
    /// Executions started so far (incremented on claim).
    pub attempts: u32,
    pub max_attempts: u32,
    pub backoff: BackoffStrategy,
    /// Earliest time a worker may claim this job.
    pub run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Store-assigned insertion counter, FIFO tiebreak within a priority.
    pub seq: u64,
    pub last_error: Option<String>,
}

impl JobRecord {
    /// Build a record from submission options, applying the given queue
    /// defaults for anything the caller left unset.
    pub fn from_options(
        queue: impl Into<String>,
        payload: serde_json::Value,
        opts: JobOptions,
        default_max_attempts: u32,
        default_backoff: BackoffStrategy,
    ) -> Self {
        let now = Utc::now();
        let (state, run_at) = match opts.delay {
            Some(d) if !d.is_zero() => (
                JobState::Delayed,
                now + chrono::Duration::from_std(d).unwrap_or_default(),
            ),
            _ => (JobState::Waiting, now),
        };
        Self {
            id: opts.job_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            queue: queue.into(),
            payload,
            priority: opts.priority,
            state,
            attempts: 0,
            max_attempts: opts.max_attempts.unwrap_or(default_max_attempts),
            backoff: opts.backoff.unwrap_or(default_backoff),
            run_at,
            created_at: now,
            seq: 0,
            last_error: None,
        }
    }

    /// Whether a worker may claim this job right now.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        matches!(self.state, JobState::Waiting | JobState::Delayed)
            && self.run_at <= now
            && self.attempts < self.max_attempts
    }
}

/// Handle returned from submission: enough to correlate logs and stats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub id: String,
    pub queue: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_backoff_starts_at_five_seconds() {
        let backoff = BackoffStrategy::default();
        assert_eq!(backoff.delay(1).as_secs(), 5);
        assert_eq!(backoff.delay(2).as_secs(), 10);
        assert_eq!(backoff.delay(3).as_secs(), 20);
    }

    #[test]
    fn backoff_is_capped() {
        let backoff = BackoffStrategy::Exponential {
            initial_secs: 5,
            multiplier: 2.0,
        };
        assert_eq!(backoff.delay(30).as_secs(), MAX_BACKOFF_SECS);
    }

    #[test]
    fn constant_backoff_ignores_attempts() {
        let backoff = BackoffStrategy::Constant { secs: 7 };
        assert_eq!(backoff.delay(1).as_secs(), 7);
        assert_eq!(backoff.delay(9).as_secs(), 7);
    }

    #[test]
    fn record_defaults_apply_when_options_unset() {
        let record = JobRecord::from_options(
            "send-email",
            json!({"to": "a@b.c"}),
            JobOptions::default(),
            3,
            BackoffStrategy::default(),
        );
        assert_eq!(record.state, JobState::Waiting);
        assert_eq!(record.max_attempts, 3);
        assert_eq!(record.attempts, 0);
        assert_eq!(record.priority, 0);
        assert!(record.last_error.is_none());
    }

    #[test]
    fn delayed_submission_starts_delayed() {
        let record = JobRecord::from_options(
            "send-email",
            json!({}),
            JobOptions::default().delay(Duration::from_secs(60)),
            3,
            BackoffStrategy::default(),
        );
        assert_eq!(record.state, JobState::Delayed);
        assert!(!record.is_eligible(Utc::now()));
    }

    #[test]
    fn explicit_job_id_is_kept() {
        let record = JobRecord::from_options(
            "sync-transactions",
            json!({}),
            JobOptions::with_priority(80).job_id("sync-conn1-1700000000"),
            3,
            BackoffStrategy::default(),
        );
        assert_eq!(record.id, "sync-conn1-1700000000");
        assert_eq!(record.priority, 80);
    }

    #[test]
    fn exhausted_attempts_make_job_ineligible() {
        let mut record = JobRecord::from_options(
            "esg-update",
            json!({}),
            JobOptions::default(),
            2,
            BackoffStrategy::default(),
        );
        record.attempts = 2;
        assert!(!record.is_eligible(Utc::now()));
    }
}
