use crate::error::JobError;
use crate::job::Job;
use async_trait::async_trait;
use std::sync::Arc;

/// Callbacks invoked after a job reaches a terminal outcome.
///
/// Both methods default to no-ops. Return values are not consumed, so
/// implementations are for side effects only (persisting statistics,
/// notifying downstream systems).
#[async_trait]
pub trait JobHooks: Send + Sync {
    /// Called once after the job moved to `Completed`
    async fn on_job_completed(&self, _job: &Job) {}

    /// Called once after the job moved to `Failed`, with the error of the
    /// last attempt
    async fn on_job_failed(&self, _job: &Job, _error: &JobError) {}
}

/// Hooks that do nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl JobHooks for NoopHooks {}

#[async_trait]
impl<H: JobHooks + ?Sized> JobHooks for Arc<H> {
    async fn on_job_completed(&self, job: &Job) {
        (**self).on_job_completed(job).await
    }

    async fn on_job_failed(&self, job: &Job, error: &JobError) {
        (**self).on_job_failed(job, error).await
    }
}
