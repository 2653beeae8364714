//! # tally-jobs
//!
//! Domain job orchestration for the tally finance backend. Sits above
//! [`tally_queue`]: translates domain triggers (API calls, cron ticks)
//! into queue submissions, owns the recurring schedule, and aggregates
//! per-queue statistics into the operational view.

pub mod orchestrator;
pub mod payload;
pub mod stats;

pub use orchestrator::{
    ConnectionDirectory, JobOrchestrator, OrchestratorError, ProcessorRegistry, ProviderConnection,
};
pub use payload::{priority, queues, EmailPriority, JobPayload, Provider};
pub use stats::{JobStatisticsReport, JobSummary};
