//! In-memory job store.
//!
//! Reference implementation of [`DurableJobStore`] used by tests and the
//! demo. All state lives behind a single async mutex, which trivially
//! gives the atomic-claim guarantee. Claim selection is a linear scan
//! over waiting jobs; a production store would push ordering into its
//! backing engine instead.

use std::collections::{HashMap, VecDeque};
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::job::{JobRecord, JobState};
use crate::store::{DurableJobStore, QueueCounts, QueueError, RecurringJob};

/// Jobs retained after completion, per queue.
pub const DEFAULT_COMPLETED_RETENTION: usize = 100;
/// Jobs retained after terminal failure, per queue.
pub const DEFAULT_FAILED_RETENTION: usize = 50;

#[derive(Default)]
struct QueueState {
    jobs: HashMap<String, JobRecord>,
    /// Completion order, oldest first, for retention pruning.
    completed_order: VecDeque<String>,
    /// Terminal-failure order, oldest first.
    failed_order: VecDeque<String>,
}

#[derive(Default)]
struct Inner {
    queues: HashMap<String, QueueState>,
    recurring: Vec<RecurringJob>,
    seq: u64,
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
    completed_retention: usize,
    failed_retention: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_COMPLETED_RETENTION, DEFAULT_FAILED_RETENTION)
    }

    pub fn with_retention(completed: usize, failed: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            completed_retention: completed,
            failed_retention: failed,
        }
    }

    /// Materialize one instance for every recurring definition whose tick
    /// has passed, then advance its `next_run`. Missed ticks collapse
    /// into a single instance rather than a backlog burst.
    fn materialize_due(inner: &mut Inner, now: DateTime<Utc>) {
        let Inner {
            queues,
            recurring,
            seq,
        } = inner;
        for def in recurring.iter_mut() {
            let Some(due) = def.next_run else { continue };
            if due > now {
                continue;
            }
            let schedule = match cron::Schedule::from_str(&def.cron) {
                Ok(s) => s,
                Err(e) => {
                    warn!(recurring = %def.id, error = %e, "Skipping recurring job with unparseable cron");
                    def.next_run = None;
                    continue;
                }
            };
            def.next_run = schedule.after(&now).next();

            let mut record = JobRecord::from_options(
                def.queue.clone(),
                def.payload.clone(),
                crate::job::JobOptions::with_priority(def.priority)
                    .job_id(format!("{}-{}", def.id, due.timestamp())),
                3,
                crate::job::BackoffStrategy::default(),
            );
            *seq += 1;
            record.seq = *seq;
            let queue = queues.entry(record.queue.clone()).or_default();
            // The timestamped id de-duplicates re-materialization of the
            // same tick across claim calls.
            if !queue.jobs.contains_key(&record.id) {
                debug!(recurring = %def.id, job_id = %record.id, "Materialized recurring job");
                queue.jobs.insert(record.id.clone(), record);
            }
        }
    }

    /// Flip delayed jobs whose eligibility time has passed back to waiting.
    fn promote_due(state: &mut QueueState, now: DateTime<Utc>) {
        for job in state.jobs.values_mut() {
            if job.state == JobState::Delayed && job.run_at <= now {
                job.state = JobState::Waiting;
            }
        }
    }
}

#[async_trait]
impl DurableJobStore for MemoryStore {
    async fn push(&self, mut record: JobRecord) -> Result<bool, QueueError> {
        let mut inner = self.inner.lock().await;
        inner.seq += 1;
        record.seq = inner.seq;
        let state = inner.queues.entry(record.queue.clone()).or_default();
        if state.jobs.contains_key(&record.id) {
            debug!(queue = %record.queue, job_id = %record.id, "Duplicate job id, submission is a no-op");
            return Ok(false);
        }
        state.jobs.insert(record.id.clone(), record);
        Ok(true)
    }

    async fn claim(&self, queue: &str) -> Result<Option<JobRecord>, QueueError> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        Self::materialize_due(&mut inner, now);

        let Some(state) = inner.queues.get_mut(queue) else {
            return Ok(None);
        };
        Self::promote_due(state, now);

        // Highest priority first, FIFO (lowest seq) within a priority.
        let next = state
            .jobs
            .values()
            .filter(|j| j.is_eligible(now))
            .map(|j| (j.priority, std::cmp::Reverse(j.seq), j.id.clone()))
            .max()
            .map(|(_, _, id)| id);

        let Some(id) = next else {
            return Ok(None);
        };
        let job = state
            .jobs
            .get_mut(&id)
            .expect("selected job vanished under the lock");
        job.state = JobState::Active;
        job.attempts += 1;
        Ok(Some(job.clone()))
    }

    async fn complete(&self, queue: &str, id: &str) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        let Some(state) = inner.queues.get_mut(queue) else {
            return Ok(());
        };
        if let Some(job) = state.jobs.get_mut(id) {
            job.state = JobState::Completed;
            state.completed_order.push_back(id.to_string());
            while state.completed_order.len() > self.completed_retention {
                if let Some(old) = state.completed_order.pop_front() {
                    state.jobs.remove(&old);
                }
            }
        }
        Ok(())
    }

    async fn fail(
        &self,
        queue: &str,
        id: &str,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        let Some(state) = inner.queues.get_mut(queue) else {
            return Ok(());
        };
        let Some(job) = state.jobs.get_mut(id) else {
            return Ok(());
        };
        job.last_error = Some(error.to_string());
        match retry_at {
            Some(at) => {
                job.state = JobState::Delayed;
                job.run_at = at;
            }
            None => {
                job.state = JobState::Failed;
                state.failed_order.push_back(id.to_string());
                while state.failed_order.len() > self.failed_retention {
                    if let Some(old) = state.failed_order.pop_front() {
                        state.jobs.remove(&old);
                    }
                }
            }
        }
        Ok(())
    }

    async fn counts(&self, queue: &str) -> Result<QueueCounts, QueueError> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        Self::materialize_due(&mut inner, now);
        let mut counts = QueueCounts::default();
        let Some(state) = inner.queues.get_mut(queue) else {
            return Ok(counts);
        };
        Self::promote_due(state, now);
        for job in state.jobs.values() {
            match job.state {
                JobState::Waiting => counts.waiting += 1,
                JobState::Delayed => counts.delayed += 1,
                JobState::Active => counts.active += 1,
                JobState::Completed => counts.completed += 1,
                JobState::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    async fn list_failed(&self, queue: &str) -> Result<Vec<JobRecord>, QueueError> {
        let inner = self.inner.lock().await;
        let Some(state) = inner.queues.get(queue) else {
            return Ok(Vec::new());
        };
        let mut failed: Vec<JobRecord> = state
            .jobs
            .values()
            .filter(|j| j.state == JobState::Failed)
            .cloned()
            .collect();
        failed.sort_by_key(|j| j.seq);
        Ok(failed)
    }

    async fn retry_failed(&self, queue: &str) -> Result<usize, QueueError> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        let Some(state) = inner.queues.get_mut(queue) else {
            return Ok(0);
        };
        let mut requeued = 0;
        for job in state.jobs.values_mut() {
            if job.state == JobState::Failed {
                job.state = JobState::Waiting;
                job.attempts = 0;
                job.run_at = now;
                requeued += 1;
            }
        }
        state.failed_order.clear();
        Ok(requeued)
    }

    async fn purge(&self, queue: &str) -> Result<usize, QueueError> {
        let mut inner = self.inner.lock().await;
        let Some(state) = inner.queues.get_mut(queue) else {
            return Ok(0);
        };
        let before = state.jobs.len();
        state
            .jobs
            .retain(|_, j| !matches!(j.state, JobState::Waiting | JobState::Delayed));
        Ok(before - state.jobs.len())
    }

    async fn upsert_recurring(&self, mut def: RecurringJob) -> Result<(), QueueError> {
        let schedule =
            cron::Schedule::from_str(&def.cron).map_err(|e| QueueError::InvalidCron {
                pattern: def.cron.clone(),
                reason: e.to_string(),
            })?;
        def.next_run = schedule.after(&Utc::now()).next();

        let mut inner = self.inner.lock().await;
        match inner.recurring.iter_mut().find(|r| r.id == def.id) {
            Some(existing) => *existing = def,
            None => inner.recurring.push(def),
        }
        Ok(())
    }

    async fn list_recurring(&self) -> Result<Vec<RecurringJob>, QueueError> {
        Ok(self.inner.lock().await.recurring.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{BackoffStrategy, JobOptions};
    use serde_json::json;
    use std::time::Duration;

    fn record(queue: &str, opts: JobOptions) -> JobRecord {
        JobRecord::from_options(queue, json!({}), opts, 3, BackoffStrategy::default())
    }

    #[tokio::test]
    async fn claim_orders_by_priority_then_fifo() {
        let store = MemoryStore::new();
        store
            .push(record("q", JobOptions::with_priority(10).job_id("a")))
            .await
            .unwrap();
        store
            .push(record("q", JobOptions::with_priority(90).job_id("b")))
            .await
            .unwrap();
        store
            .push(record("q", JobOptions::with_priority(90).job_id("c")))
            .await
            .unwrap();

        let order: Vec<String> = [
            store.claim("q").await.unwrap().unwrap().id,
            store.claim("q").await.unwrap().unwrap().id,
            store.claim("q").await.unwrap().unwrap().id,
        ]
        .into();
        assert_eq!(order, vec!["b", "c", "a"]);
        assert!(store.claim("q").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_id_is_a_no_op() {
        let store = MemoryStore::new();
        assert!(store
            .push(record("q", JobOptions::default().job_id("once")))
            .await
            .unwrap());
        assert!(!store
            .push(record("q", JobOptions::with_priority(50).job_id("once")))
            .await
            .unwrap());
        let counts = store.counts("q").await.unwrap();
        assert_eq!(counts.total(), 1);
        // The original record wins.
        assert_eq!(store.claim("q").await.unwrap().unwrap().priority, 0);
    }

    #[tokio::test]
    async fn delayed_job_is_invisible_until_due() {
        let store = MemoryStore::new();
        store
            .push(record(
                "q",
                JobOptions::default().delay(Duration::from_millis(150)),
            ))
            .await
            .unwrap();

        assert!(store.claim("q").await.unwrap().is_none());
        assert_eq!(store.counts("q").await.unwrap().delayed, 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(store.claim("q").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn fail_with_retry_at_delays_and_preserves_error() {
        let store = MemoryStore::new();
        store
            .push(record("q", JobOptions::default().job_id("j")))
            .await
            .unwrap();
        let job = store.claim("q").await.unwrap().unwrap();
        assert_eq!(job.attempts, 1);

        let retry_at = Utc::now() + chrono::Duration::milliseconds(100);
        store
            .fail("q", "j", "provider timeout", Some(retry_at))
            .await
            .unwrap();
        assert!(store.claim("q").await.unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(150)).await;
        let again = store.claim("q").await.unwrap().unwrap();
        assert_eq!(again.attempts, 2);
        assert_eq!(again.last_error.as_deref(), Some("provider timeout"));
    }

    #[tokio::test]
    async fn terminal_failure_is_retained_and_retryable() {
        let store = MemoryStore::new();
        store
            .push(record("q", JobOptions::default().job_id("j")))
            .await
            .unwrap();
        store.claim("q").await.unwrap().unwrap();
        store.fail("q", "j", "boom", None).await.unwrap();

        assert_eq!(store.counts("q").await.unwrap().failed, 1);
        let failed = store.list_failed("q").await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].last_error.as_deref(), Some("boom"));

        assert_eq!(store.retry_failed("q").await.unwrap(), 1);
        let counts = store.counts("q").await.unwrap();
        assert_eq!(counts.failed, 0);
        assert_eq!(counts.waiting, 1);
        assert_eq!(store.claim("q").await.unwrap().unwrap().attempts, 1);
    }

    #[tokio::test]
    async fn completed_retention_prunes_oldest() {
        let store = MemoryStore::with_retention(2, 2);
        for i in 0..4 {
            let id = format!("j{i}");
            store
                .push(record("q", JobOptions::default().job_id(&id)))
                .await
                .unwrap();
            store.claim("q").await.unwrap().unwrap();
            store.complete("q", &id).await.unwrap();
        }
        let counts = store.counts("q").await.unwrap();
        assert_eq!(counts.completed, 2);
        assert_eq!(counts.total(), 2);
    }

    #[tokio::test]
    async fn purge_drops_pending_but_not_active_or_terminal() {
        let store = MemoryStore::new();
        store
            .push(record("q", JobOptions::default().job_id("active")))
            .await
            .unwrap();
        store.claim("q").await.unwrap().unwrap();
        store
            .push(record("q", JobOptions::default().job_id("waiting")))
            .await
            .unwrap();
        store
            .push(record(
                "q",
                JobOptions::default()
                    .job_id("delayed")
                    .delay(Duration::from_secs(60)),
            ))
            .await
            .unwrap();

        assert_eq!(store.purge("q").await.unwrap(), 2);
        let counts = store.counts("q").await.unwrap();
        assert_eq!(counts.active, 1);
        assert_eq!(counts.waiting + counts.delayed, 0);
    }

    #[tokio::test]
    async fn queues_are_isolated() {
        let store = MemoryStore::new();
        store.push(record("a", JobOptions::default())).await.unwrap();
        store.push(record("a", JobOptions::default())).await.unwrap();
        assert_eq!(store.counts("a").await.unwrap().waiting, 2);
        assert_eq!(store.counts("b").await.unwrap().total(), 0);
        assert!(store.claim("b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recurring_definition_materializes_on_tick() {
        let store = MemoryStore::new();
        let def = RecurringJob::new("q", "sweep", json!({"scope": "all"}), 70, "* * * * * *");
        store.upsert_recurring(def.clone()).await.unwrap();
        // Upserting again must not duplicate the definition.
        store.upsert_recurring(def).await.unwrap();
        assert_eq!(store.list_recurring().await.unwrap().len(), 1);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        let job = store.claim("q").await.unwrap().expect("tick materialized");
        assert!(job.id.starts_with("recurring-sweep-"));
        assert_eq!(job.priority, 70);
        assert_eq!(job.payload["scope"], "all");
    }

    #[tokio::test]
    async fn invalid_cron_is_rejected_at_registration() {
        let store = MemoryStore::new();
        let def = RecurringJob::new("q", "bad", json!({}), 0, "not a cron");
        let err = store.upsert_recurring(def).await.unwrap_err();
        assert!(matches!(err, QueueError::InvalidCron { .. }));
    }
}
