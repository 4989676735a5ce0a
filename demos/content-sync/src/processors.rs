use async_trait::async_trait;
use conduit_jobs::{Job, JobError, JobHooks, Processor, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

// --- Embeddings ---

#[derive(Debug, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    pub document_id: String,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct Embedding {
    pub document_id: String,
    pub vector: Vec<f32>,
}

/// Stands in for a call to a managed vector index
pub struct GenerateEmbedding {
    pub dimensions: usize,
}

#[async_trait]
impl Processor for GenerateEmbedding {
    const TYPE: &'static str = "generate_embedding";
    type Params = EmbeddingRequest;
    type Output = Embedding;

    async fn process(&self, _job: &Job, params: Self::Params) -> Result<Self::Output> {
        tokio::time::sleep(Duration::from_millis(150)).await;

        if self.dimensions == 0 {
            return Err(JobError::processor("embedding dimensions must be non-zero"));
        }

        let mut vector = vec![0.0f32; self.dimensions];
        for chunk in params.text.as_bytes().chunks(self.dimensions) {
            for (slot, byte) in vector.iter_mut().zip(chunk) {
                *slot += f32::from(*byte) / 255.0;
            }
        }
        Ok(Embedding {
            document_id: params.document_id,
            vector,
        })
    }
}

// --- Page sync ---

#[derive(Debug, Serialize, Deserialize)]
pub struct PageRef {
    pub page_id: String,
}

#[derive(Debug, Serialize)]
pub struct SyncedPage {
    pub page_id: String,
    pub blocks: usize,
}

/// Stands in for the third-party content API. The first attempt of every
/// page is rate limited.
pub struct SyncPage;

#[async_trait]
impl Processor for SyncPage {
    const TYPE: &'static str = "sync_page";
    type Params = PageRef;
    type Output = SyncedPage;

    async fn process(&self, job: &Job, params: Self::Params) -> Result<Self::Output> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if job.retry_count == 0 {
            return Err(JobError::processor(format!(
                "content API rate limited page {}",
                params.page_id
            )));
        }
        Ok(SyncedPage {
            blocks: params.page_id.len() * 3,
            page_id: params.page_id,
        })
    }
}

// --- File ingest ---

#[derive(Debug, Serialize, Deserialize)]
pub struct FileRef {
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct IngestedFile {
    pub path: String,
    pub format: String,
}

pub struct IngestFile;

#[async_trait]
impl Processor for IngestFile {
    const TYPE: &'static str = "ingest_file";
    type Params = FileRef;
    type Output = IngestedFile;

    async fn process(&self, _job: &Job, params: Self::Params) -> Result<Self::Output> {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let format = params
            .path
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match format.as_str() {
            "pdf" | "md" | "txt" => Ok(IngestedFile {
                path: params.path,
                format,
            }),
            _ => Err(JobError::processor(format!(
                "unsupported file type: {}",
                params.path
            ))),
        }
    }
}

/// Counts terminal outcomes and logs them
#[derive(Default)]
pub struct OutcomeLog {
    pub completed: AtomicUsize,
    pub failed: AtomicUsize,
}

#[async_trait]
impl JobHooks for OutcomeLog {
    async fn on_job_completed(&self, job: &Job) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            job_id = %job.id,
            job_type = %job.job_type,
            duration_ms = job.duration().map(|d| d.num_milliseconds()),
            "Outcome recorded: completed"
        );
    }

    async fn on_job_failed(&self, job: &Job, error: &JobError) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            job_id = %job.id,
            job_type = %job.job_type,
            error = %error,
            "Outcome recorded: failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_jobs::{Environment, JobManager, JobOptions, JobStatus, ManagerConfig};

    async fn run_embedding(dimensions: usize, text: &str) -> Job {
        let config = ManagerConfig::new("content-sync-test", Environment::Development)
            .poll_interval(Duration::from_millis(5));
        let manager = JobManager::builder(config)
            .processor(GenerateEmbedding { dimensions })
            .build()
            .unwrap();
        let job = manager
            .create_job(
                GenerateEmbedding::TYPE,
                EmbeddingRequest {
                    document_id: "doc".to_string(),
                    text: text.to_string(),
                },
                JobOptions::new().max_retries(0),
            )
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let job = manager.get_job(&job.id).unwrap();
                if job.is_terminal() {
                    return job;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("embedding job did not finish")
    }

    #[tokio::test]
    async fn test_embedding_folds_text_into_dimensions() {
        let job = run_embedding(2, "abc").await;
        assert_eq!(job.status, JobStatus::Completed);

        let vector: Vec<f32> =
            serde_json::from_value(job.result.unwrap()["vector"].clone()).unwrap();
        let expected = [(97.0 + 99.0) / 255.0, 98.0 / 255.0];
        assert_eq!(vector.len(), 2);
        for (got, want) in vector.iter().zip(expected) {
            assert!((got - want).abs() < 1e-6);
        }
    }

    #[tokio::test]
    async fn test_zero_dimension_embedding_fails_the_job() {
        let job = run_embedding(0, "abc").await;
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().contains("dimensions must be non-zero"));
    }
}
