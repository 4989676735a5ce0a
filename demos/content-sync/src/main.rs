//! Content sync subsystem demo
//!
//! Wires the three content job types into a `JobManager`, submits a batch at
//! mixed priorities and polls until every job is terminal.
//!
//! Configuration is read from `CONTENT_SYNC_*` variables (or a `.env` file),
//! e.g. `CONTENT_SYNC_MAX_CONCURRENT=2 CONTENT_SYNC_RETRY_BASE_MS=250`.

mod processors;

use conduit_jobs::config::load_dotenv;
use conduit_jobs::{JobManager, JobOptions, JobPriority, JobStatus, ManagerConfig};
use processors::{
    EmbeddingRequest, FileRef, GenerateEmbedding, IngestFile, OutcomeLog, PageRef, SyncPage,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
    load_dotenv();
    let config = ManagerConfig::from_env_prefixed("content-sync", "CONTENT_SYNC")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.environment.default_log_level())),
        )
        .init();

    tracing::info!(
        context = %config.context,
        environment = %config.environment,
        max_concurrent = config.max_concurrent,
        "Starting content sync"
    );

    let outcomes = Arc::new(OutcomeLog::default());
    let manager = JobManager::builder(config)
        .processor(GenerateEmbedding { dimensions: 8 })
        .processor(SyncPage)
        .processor(IngestFile)
        .hooks(outcomes.clone())
        .build()?;

    for page_id in ["home", "pricing", "changelog"] {
        manager
            .create_job(
                "sync_page",
                PageRef {
                    page_id: page_id.to_string(),
                },
                JobOptions::new(),
            )
            .await?;
    }

    manager
        .create_job(
            "generate_embedding",
            EmbeddingRequest {
                document_id: "doc-1".to_string(),
                text: "Quarterly roadmap and release notes".to_string(),
            },
            JobOptions::new().priority(JobPriority::High),
        )
        .await?;

    for path in ["handbook.pdf", "notes.md", "archive.zip"] {
        manager
            .create_job(
                "ingest_file",
                FileRef {
                    path: path.to_string(),
                },
                JobOptions::new()
                    .priority(JobPriority::Low)
                    .max_retries(1)
                    .metadata(serde_json::json!({ "source": "upload" })),
            )
            .await?;
    }

    // An embedding nobody needs any more
    let stale = manager
        .create_job(
            "generate_embedding",
            EmbeddingRequest {
                document_id: "doc-stale".to_string(),
                text: String::new(),
            },
            JobOptions::new().priority(JobPriority::Low),
        )
        .await?;
    if manager.cancel_job(&stale.id) {
        tracing::info!(job_id = %stale.id, "Cancelled stale embedding");
    }

    loop {
        let stats = manager.statistics();
        let open = stats.total
            - stats.count(JobStatus::Completed)
            - stats.count(JobStatus::Failed)
            - stats.count(JobStatus::Cancelled);
        if open == 0 {
            break;
        }
        tracing::debug!(
            open,
            queued = stats.queue_length,
            in_flight = stats.in_flight,
            "Waiting for jobs"
        );
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    for job in manager.get_jobs_by_status(JobStatus::Failed) {
        tracing::warn!(
            job_id = %job.id,
            job_type = %job.job_type,
            retries = job.retry_count,
            error = job.error.as_deref().unwrap_or_default(),
            "Job did not succeed"
        );
    }

    println!("{}", serde_json::to_string_pretty(&manager.statistics())?);
    tracing::info!(
        completed = outcomes.completed.load(Ordering::Relaxed),
        failed = outcomes.failed.load(Ordering::Relaxed),
        purged = manager.clear_jobs(true),
        "Content sync finished"
    );

    manager.shutdown();
    Ok(())
}
