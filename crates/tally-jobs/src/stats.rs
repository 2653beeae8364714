//! Aggregated operational statistics across all queues.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tally_queue::QueueStats;

/// Rolled-up totals across every queue.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub total_jobs: usize,
    pub active_jobs: usize,
    pub failed_jobs: usize,
    /// `(total - failed) / total * 100`, two decimals; `"100"` when no
    /// job has ever run (not an error state).
    pub success_rate: String,
}

/// The operational view handed to HTTP/CLI layers.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatisticsReport {
    pub queues: Vec<QueueStats>,
    pub summary: JobSummary,
    pub timestamp: DateTime<Utc>,
}

impl JobStatisticsReport {
    pub fn from_queue_stats(queues: Vec<QueueStats>) -> Self {
        let total_jobs: usize = queues.iter().map(|q| q.counts.total()).sum();
        let active_jobs: usize = queues.iter().map(|q| q.counts.active).sum();
        let failed_jobs: usize = queues.iter().map(|q| q.counts.failed).sum();
        Self {
            summary: JobSummary {
                total_jobs,
                active_jobs,
                failed_jobs,
                success_rate: success_rate(total_jobs, failed_jobs),
            },
            queues,
            timestamp: Utc::now(),
        }
    }
}

/// Success rate as a percentage string with two decimals.
pub fn success_rate(total: usize, failed: usize) -> String {
    if total == 0 {
        return "100".to_string();
    }
    let rate = (total - failed) as f64 / total as f64 * 100.0;
    format!("{rate:.2}")
}
