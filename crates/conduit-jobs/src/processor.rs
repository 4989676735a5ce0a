use crate::error::Result;
use crate::job::Job;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Performs the work behind one job type
#[async_trait]
pub trait Processor: Send + Sync + 'static {
    /// The job type tag this processor is registered under
    const TYPE: &'static str;

    /// Parameters decoded from `Job::params`
    type Params: DeserializeOwned + Send;

    /// Result payload stored in `Job::result`
    type Output: Serialize + Send;

    /// Run one attempt of the job
    async fn process(&self, job: &Job, params: Self::Params) -> Result<Self::Output>;
}

/// A type-erased processor
#[async_trait]
pub trait ProcessorHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<serde_json::Value>;
}

#[async_trait]
impl<P: Processor> ProcessorHandler for P {
    async fn handle(&self, job: &Job) -> Result<serde_json::Value> {
        let params: P::Params = serde_json::from_value(job.params.clone())?;
        let output = self.process(job, params).await?;
        Ok(serde_json::to_value(output)?)
    }
}

/// Processor backed by an async closure, see [`processor_fn`]
pub struct FnProcessor<F> {
    f: F,
}

/// Wrap an async closure as a processor.
///
/// ```ignore
/// manager
///     .register_processor("sync_page", processor_fn(|job| async move {
///         Ok(serde_json::json!({ "synced": job.params["page_id"] }))
///     }))
///     .await;
/// ```
pub fn processor_fn<F, Fut>(f: F) -> FnProcessor<F>
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
{
    FnProcessor { f }
}

#[async_trait]
impl<F, Fut> ProcessorHandler for FnProcessor<F>
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
{
    async fn handle(&self, job: &Job) -> Result<serde_json::Value> {
        (self.f)(job.clone()).await
    }
}

/// Maps job type tags to processors
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: HashMap<String, Arc<dyn ProcessorHandler>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for the same type.
    ///
    /// Returns `true` when an existing registration was overwritten.
    pub fn insert(
        &mut self,
        job_type: impl Into<String>,
        handler: impl ProcessorHandler + 'static,
    ) -> bool {
        self.processors
            .insert(job_type.into(), Arc::new(handler))
            .is_some()
    }

    /// Register a typed processor under `P::TYPE`.
    pub fn insert_processor<P: Processor>(&mut self, processor: P) -> bool {
        self.insert(P::TYPE, processor)
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn ProcessorHandler>> {
        self.processors.get(job_type).cloned()
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.processors.contains_key(job_type)
    }

    /// Registered type tags, sorted.
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<_> = self.processors.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}
