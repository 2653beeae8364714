//! End-to-end demo: in-memory store, queue manager, worker pools, and
//! the job orchestrator.
//!
//! Run with `cargo run -p tally-jobs --example demo`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use tally_jobs::{
    queues, ConnectionDirectory, EmailPriority, JobOrchestrator, OrchestratorError,
    ProcessorRegistry, Provider, ProviderConnection,
};
use tally_queue::{
    JobProcessingError, JobProcessor, JobRecord, MemoryStore, QueueConfig, QueueManager,
};

/// Stands in for the real domain processors: logs the payload it got.
struct LoggingProcessor;

#[async_trait]
impl JobProcessor for LoggingProcessor {
    async fn process(&self, job: &JobRecord) -> Result<(), JobProcessingError> {
        info!(queue = %job.queue, job_id = %job.id, payload = %job.payload, "Processing");
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(())
    }
}

/// Two hard-coded provider connections for one demo user.
struct StaticDirectory;

#[async_trait]
impl ConnectionDirectory for StaticDirectory {
    async fn active_connections(
        &self,
        user_id: &str,
    ) -> Result<Vec<ProviderConnection>, OrchestratorError> {
        Ok(vec![
            ProviderConnection {
                id: "conn-belvo-1".into(),
                user_id: user_id.into(),
                provider: Provider::Belvo,
            },
            ProviderConnection {
                id: "conn-exchange-1".into(),
                user_id: user_id.into(),
                provider: Provider::Exchange,
            },
        ])
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = QueueConfig::from_env();
    let store = Arc::new(MemoryStore::new());
    let manager = Arc::new(QueueManager::new(store, &config, &queues::ALL));
    let orchestrator = JobOrchestrator::new(manager.clone(), Arc::new(StaticDirectory));

    let mut registry = ProcessorRegistry::new();
    for queue in queues::ALL {
        registry = registry.register(queue, Arc::new(LoggingProcessor));
    }
    orchestrator.start(registry).await?;

    orchestrator.trigger_user_sync("demo-user", None).await?;
    orchestrator.trigger_space_categorization("demo-space").await?;
    orchestrator
        .trigger_esg_refresh(vec!["AAPL".into(), "VWCE".into()], false)
        .await?;
    orchestrator
        .enqueue_email(
            "demo@example.com",
            "weekly-summary",
            json!({ "name": "Demo" }),
            EmailPriority::Low,
        )
        .await?;

    tokio::time::sleep(Duration::from_secs(1)).await;

    let report = orchestrator.job_statistics().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    let drain = manager.drain(Duration::from_secs(10)).await;
    info!(fully_drained = drain.fully_drained(), "Shutting down");
    manager.shutdown().await;
    Ok(())
}
