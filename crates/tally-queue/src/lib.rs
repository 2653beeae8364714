//! # tally-queue
//!
//! Named, durable, priority-ordered background job queues for the tally
//! finance backend.
//!
//! Features:
//! - Opaque-payload jobs with priority, delay, and idempotent ids
//! - Pluggable durable store ([`DurableJobStore`]; [`MemoryStore`] for
//!   tests and the demo)
//! - Per-queue worker pools with bounded concurrency
//! - Retry with exponential backoff, bounded retention of finished jobs
//! - Store-materialized recurring (cron) jobs
//! - Graceful, bounded-time shutdown drain

pub mod config;
pub mod drain;
pub mod job;
pub mod manager;
pub mod memory;
pub mod store;
pub mod worker;

pub use config::QueueConfig;
pub use drain::{DrainPhase, DrainReport, DrainState};
pub use job::{BackoffStrategy, JobHandle, JobOptions, JobRecord, JobState};
pub use manager::{QueueManager, QueueSettings};
pub use memory::MemoryStore;
pub use store::{DurableJobStore, QueueCounts, QueueError, QueueStats, RecurringJob};
pub use worker::{JobProcessingError, JobProcessor, WorkerConfig, WorkerPool};
