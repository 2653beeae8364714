//! Job orchestrator: translates domain triggers into queue submissions
//! and aggregates operational statistics.
//!
//! Trigger calls return as soon as the submission lands; nobody waits for
//! job completion here.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde_json::json;
use tracing::{info, warn};

use tally_queue::{JobHandle, JobOptions, JobProcessor, JobRecord, QueueError, QueueManager};

use crate::payload::{priority, queues, EmailPriority, JobPayload, Provider};
use crate::stats::JobStatisticsReport;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("connection lookup failed: {0}")]
    Directory(String),
    #[error("payload serialization failed: {0}")]
    Payload(#[from] serde_json::Error),
}

/// One provider link a user holds.
#[derive(Debug, Clone)]
pub struct ProviderConnection {
    pub id: String,
    pub user_id: String,
    pub provider: Provider,
}

/// Lookup of a user's active provider connections. Owned by the domain
/// layer; injected so the orchestrator never touches domain persistence.
#[async_trait]
pub trait ConnectionDirectory: Send + Sync {
    async fn active_connections(
        &self,
        user_id: &str,
    ) -> Result<Vec<ProviderConnection>, OrchestratorError>;
}

/// Queue name -> processor, assembled at wiring time.
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: HashMap<String, Arc<dyn JobProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, queue: impl Into<String>, processor: Arc<dyn JobProcessor>) -> Self {
        self.processors.insert(queue.into(), processor);
        self
    }
}

/// The recurring schedule this backend runs, cron patterns with seconds.
const RECURRING_JOBS: [RecurringSpec; 4] = [
    RecurringSpec {
        queue: queues::CATEGORIZE_TRANSACTIONS,
        name: "categorization-sweep",
        priority: priority::BACKGROUND,
        cron: "0 0 3 * * *",
    },
    RecurringSpec {
        queue: queues::SYNC_TRANSACTIONS,
        name: "crypto-portfolio-sync",
        priority: priority::BACKGROUND,
        cron: "0 0 * * * *",
    },
    RecurringSpec {
        queue: queues::VALUATION_SNAPSHOT,
        name: "valuation-snapshot",
        priority: priority::VALUATION_SNAPSHOT,
        cron: "0 30 0 * * *",
    },
    RecurringSpec {
        queue: queues::ESG_UPDATE,
        name: "esg-refresh",
        priority: priority::ESG_REFRESH,
        cron: "0 0 4 * * Sun",
    },
];

struct RecurringSpec {
    queue: &'static str,
    name: &'static str,
    priority: i32,
    cron: &'static str,
}

pub struct JobOrchestrator {
    manager: Arc<QueueManager>,
    directory: Arc<dyn ConnectionDirectory>,
}

impl JobOrchestrator {
    pub fn new(manager: Arc<QueueManager>, directory: Arc<dyn ConnectionDirectory>) -> Self {
        Self { manager, directory }
    }

    pub fn manager(&self) -> &Arc<QueueManager> {
        &self.manager
    }

    /// Register one worker pool per known job type and declare the
    /// recurring schedule. Recurring registration failures (store down at
    /// boot) are logged and tolerated: the process starts in degraded
    /// mode with no periodic jobs until the store recovers.
    pub async fn start(&self, registry: ProcessorRegistry) -> Result<(), OrchestratorError> {
        for (queue, processor) in registry.processors {
            let concurrency = self.manager.settings(&queue)?.concurrency;
            self.manager
                .register_worker(&queue, concurrency, processor)?;
        }
        self.register_recurring_jobs().await;
        Ok(())
    }

    /// Declare the fixed recurring set. Idempotent across restarts.
    /// Called from [`JobOrchestrator::start`]; public for re-registration
    /// after a store outage at boot.
    pub async fn register_recurring_jobs(&self) {
        for spec in &RECURRING_JOBS {
            let result = self
                .manager
                .schedule_recurring(
                    spec.queue,
                    spec.name,
                    json!({ "scope": "all" }),
                    spec.priority,
                    spec.cron,
                )
                .await;
            if let Err(e) = result {
                warn!(
                    queue = %spec.queue,
                    recurring = %spec.name,
                    error = %e,
                    "Could not register recurring job; continuing without it"
                );
            }
        }
    }

    /// Submit one sync job per active provider connection of the user,
    /// optionally restricted to a single provider.
    pub async fn trigger_user_sync(
        &self,
        user_id: &str,
        provider: Option<Provider>,
    ) -> Result<Vec<JobHandle>, OrchestratorError> {
        let connections = self.directory.active_connections(user_id).await?;
        let mut handles = Vec::new();
        for conn in connections
            .into_iter()
            .filter(|c| provider.map_or(true, |p| p == c.provider))
        {
            let payload = JobPayload::SyncTransactions {
                provider: conn.provider,
                user_id: conn.user_id.clone(),
                connection_id: conn.id.clone(),
                full_sync: false,
            };
            let handle = self
                .submit(
                    payload,
                    priority::USER_SYNC,
                    format!("sync-{}-{}", conn.id, Utc::now().timestamp()),
                )
                .await?;
            handles.push(handle);
        }
        info!(user_id = %user_id, jobs = handles.len(), "User sync triggered");
        Ok(handles)
    }

    pub async fn trigger_space_categorization(
        &self,
        space_id: &str,
    ) -> Result<JobHandle, OrchestratorError> {
        let payload = JobPayload::CategorizeTransactions {
            space_id: space_id.to_string(),
            transaction_ids: None,
        };
        self.submit(
            payload,
            priority::CATEGORIZATION,
            format!("categorize-{}-{}", space_id, Utc::now().timestamp()),
        )
        .await
    }

    pub async fn trigger_bulk_categorization(
        &self,
        space_ids: &[String],
    ) -> Result<Vec<JobHandle>, OrchestratorError> {
        let mut handles = Vec::with_capacity(space_ids.len());
        for space_id in space_ids {
            handles.push(self.trigger_space_categorization(space_id).await?);
        }
        Ok(handles)
    }

    /// Forced refreshes jump the queue at priority 90; routine ones run
    /// at background ESG priority.
    pub async fn trigger_esg_refresh(
        &self,
        symbols: Vec<String>,
        force: bool,
    ) -> Result<JobHandle, OrchestratorError> {
        let job_priority = if force {
            priority::FORCED_REFRESH
        } else {
            priority::ESG_REFRESH
        };
        let payload = JobPayload::EsgUpdate {
            symbols,
            force_refresh: force,
        };
        self.submit(
            payload,
            job_priority,
            format!("esg-{}", Utc::now().timestamp()),
        )
        .await
    }

    pub async fn trigger_valuation_snapshot(
        &self,
        space_id: &str,
        date: Option<NaiveDate>,
    ) -> Result<JobHandle, OrchestratorError> {
        let day = date.unwrap_or_else(|| Utc::now().date_naive());
        let payload = JobPayload::ValuationSnapshot {
            space_id: space_id.to_string(),
            date,
        };
        self.submit(
            payload,
            priority::VALUATION_SNAPSHOT,
            format!("snapshot-{space_id}-{day}"),
        )
        .await
    }

    pub async fn trigger_bulk_valuation_snapshots(
        &self,
        space_ids: &[String],
        date: Option<NaiveDate>,
    ) -> Result<Vec<JobHandle>, OrchestratorError> {
        let mut handles = Vec::with_capacity(space_ids.len());
        for space_id in space_ids {
            handles.push(self.trigger_valuation_snapshot(space_id, date).await?);
        }
        Ok(handles)
    }

    pub async fn enqueue_email(
        &self,
        to: &str,
        template: &str,
        data: serde_json::Value,
        email_priority: EmailPriority,
    ) -> Result<JobHandle, OrchestratorError> {
        let payload = JobPayload::SendEmail {
            to: to.to_string(),
            template: template.to_string(),
            data,
            priority: email_priority,
        };
        let handle = self
            .manager
            .submit(
                payload.queue(),
                payload.to_value()?,
                JobOptions::with_priority(email_priority.job_priority()),
            )
            .await?;
        Ok(handle)
    }

    /// Per-queue stats plus rolled-up totals and success rate.
    pub async fn job_statistics(&self) -> Result<JobStatisticsReport, OrchestratorError> {
        let queues = self.manager.all_stats().await?;
        Ok(JobStatisticsReport::from_queue_stats(queues))
    }

    /// Failed jobs in one queue, or across all queues.
    pub async fn failed_jobs(
        &self,
        queue: Option<&str>,
    ) -> Result<Vec<JobRecord>, OrchestratorError> {
        match queue {
            Some(name) => Ok(self.manager.failed_jobs(name).await?),
            None => {
                let mut all = Vec::new();
                for name in self.manager.queue_names() {
                    all.extend(self.manager.failed_jobs(name).await?);
                }
                Ok(all)
            }
        }
    }

    /// Retry every queue that currently holds failed jobs; queues with
    /// zero failures are not touched at all.
    pub async fn retry_all_failed_jobs(&self) -> Result<usize, OrchestratorError> {
        let stats = self.manager.all_stats().await?;
        let mut requeued = 0;
        for queue_stats in stats.iter().filter(|s| s.counts.failed > 0) {
            requeued += self.manager.retry_failed(&queue_stats.queue).await?;
        }
        Ok(requeued)
    }

    async fn submit(
        &self,
        payload: JobPayload,
        job_priority: i32,
        job_id: String,
    ) -> Result<JobHandle, OrchestratorError> {
        let handle = self
            .manager
            .submit(
                payload.queue(),
                payload.to_value()?,
                JobOptions::with_priority(job_priority).job_id(job_id),
            )
            .await?;
        Ok(handle)
    }
}
