use crate::backoff::{RetryDecision, RetryPolicy};
use crate::config::{ConfigUpdate, Environment, ManagerConfig};
use crate::error::{JobError, Result};
use crate::hooks::{JobHooks, NoopHooks};
use crate::job::{Job, JobOptions, JobStatus};
use crate::processor::{Processor, ProcessorHandler, ProcessorRegistry};
use crate::queue::PriorityQueue;
use crate::stats::JobStatistics;
use chrono::Utc;
use futures_util::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

/// In-process job manager.
///
/// Accepts typed work items, orders them by priority, runs at most
/// `max_concurrent` of them at once, retries failures with exponential
/// backoff and supports cancellation of jobs that have not started.
///
/// Cloning is cheap; clones share the same jobs and dispatch loop. Create
/// one manager per independent scheduling domain.
///
/// ```ignore
/// let manager = JobManager::builder(ManagerConfig::new("content-sync", Environment::current()))
///     .processor(SyncPageProcessor::new(client))
///     .build()?;
///
/// let job = manager
///     .create_job("sync_page", json!({ "page_id": "abc" }), JobOptions::new())
///     .await?;
/// // later
/// let job = manager.get_job(&job.id);
/// ```
#[derive(Clone)]
pub struct JobManager {
    inner: Arc<Inner>,
}

struct Inner {
    context: String,
    environment: Environment,
    default_max_retries: u32,
    retry: RetryPolicy,
    state: Mutex<State>,
    processors: RwLock<ProcessorRegistry>,
    hooks: Arc<dyn JobHooks>,
}

/// Everything the dispatch loop and the execution wrapper mutate.
/// Guarded by a single mutex; never held across an await.
struct State {
    jobs: HashMap<String, Job>,
    queue: PriorityQueue,
    in_flight: HashSet<String>,
    retry_timers: HashMap<String, RetryTimer>,
    max_concurrent: usize,
    poll_interval: Duration,
    dispatcher: Option<(u64, AbortHandle)>,
    generation: u64,
    /// Set by `shutdown`; retries are parked instead of armed until the
    /// dispatch loop starts again
    stopped: bool,
}

/// Backoff of a `Retrying` job. `handle` is `None` while parked.
struct RetryTimer {
    due: Instant,
    handle: Option<AbortHandle>,
}

impl RetryTimer {
    fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Builds a [`JobManager`] with processors and hooks wired in up front
pub struct JobManagerBuilder {
    config: ManagerConfig,
    registry: ProcessorRegistry,
    hooks: Arc<dyn JobHooks>,
}

impl JobManagerBuilder {
    /// Register a typed processor under `P::TYPE`
    pub fn processor<P: Processor>(mut self, processor: P) -> Self {
        self.registry.insert_processor(processor);
        self
    }

    /// Register any handler under an explicit type tag
    pub fn handler(
        mut self,
        job_type: impl Into<String>,
        handler: impl ProcessorHandler + 'static,
    ) -> Self {
        self.registry.insert(job_type, handler);
        self
    }

    pub fn hooks(mut self, hooks: impl JobHooks + 'static) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    /// Fails with `JobError::Config` when the config does not validate.
    pub fn build(self) -> Result<JobManager> {
        let config = self.config;
        config.validate()?;
        Ok(JobManager {
            inner: Arc::new(Inner {
                context: config.context,
                environment: config.environment,
                default_max_retries: config.default_max_retries,
                retry: config.retry,
                state: Mutex::new(State {
                    jobs: HashMap::new(),
                    queue: PriorityQueue::new(),
                    in_flight: HashSet::new(),
                    retry_timers: HashMap::new(),
                    max_concurrent: config.max_concurrent,
                    poll_interval: config.poll_interval,
                    dispatcher: None,
                    generation: 0,
                    stopped: false,
                }),
                processors: RwLock::new(self.registry),
                hooks: self.hooks,
            }),
        })
    }
}

impl JobManager {
    pub fn new(config: ManagerConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: ManagerConfig) -> JobManagerBuilder {
        JobManagerBuilder {
            config,
            registry: ProcessorRegistry::new(),
            hooks: Arc::new(NoopHooks),
        }
    }

    pub fn context(&self) -> &str {
        &self.inner.context
    }

    pub fn environment(&self) -> &Environment {
        &self.inner.environment
    }

    /// Register a processor for `job_type`.
    ///
    /// Registering the same type again replaces the previous processor.
    pub async fn register_processor(
        &self,
        job_type: impl Into<String>,
        handler: impl ProcessorHandler + 'static,
    ) {
        let job_type = job_type.into();
        let mut processors = self.inner.processors.write().await;
        if processors.insert(job_type.clone(), handler) {
            tracing::debug!(
                context = %self.inner.context,
                job_type = %job_type,
                "Replaced existing processor registration"
            );
        }
    }

    /// Register a typed processor under `P::TYPE`
    pub async fn register<P: Processor>(&self, processor: P) {
        self.register_processor(P::TYPE, processor).await;
    }

    /// Create a job and admit it to the queue.
    ///
    /// Starts the dispatch loop if it is not running. Returns a snapshot of
    /// the stored job, already `Queued`.
    pub async fn create_job<T: Serialize>(
        &self,
        job_type: impl Into<String>,
        params: T,
        opts: JobOptions,
    ) -> Result<Job> {
        let params = serde_json::to_value(params)?;
        let mut job = Job::new(
            Uuid::new_v4().to_string(),
            job_type.into(),
            params,
            opts.priority,
            opts.max_retries.unwrap_or(self.inner.default_max_retries),
            opts.metadata,
        );

        {
            let mut guard = self.inner.lock_state();
            let state = &mut *guard;
            job.transition(JobStatus::Queued);
            state.queue.admit(job.id.clone(), job.priority);
            state.jobs.insert(job.id.clone(), job.clone());
            self.inner.ensure_dispatching(state);
        }

        tracing::info!(
            context = %self.inner.context,
            job_id = %job.id,
            job_type = %job.job_type,
            priority = ?job.priority,
            "Job created"
        );
        Ok(job)
    }

    pub fn get_job(&self, id: &str) -> Option<Job> {
        self.inner.lock_state().jobs.get(id).cloned()
    }

    /// All jobs, oldest first
    pub fn get_all_jobs(&self) -> Vec<Job> {
        self.collect_jobs(|_| true)
    }

    pub fn get_jobs_by_status(&self, status: JobStatus) -> Vec<Job> {
        self.collect_jobs(|job| job.status == status)
    }

    pub fn get_jobs_by_type(&self, job_type: &str) -> Vec<Job> {
        self.collect_jobs(|job| job.job_type == job_type)
    }

    fn collect_jobs(&self, filter: impl Fn(&Job) -> bool) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .inner
            .lock_state()
            .jobs
            .values()
            .filter(|job| filter(job))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    /// Cancel a job that has not been dispatched.
    ///
    /// Succeeds for `Pending`, `Queued` and `Retrying` jobs; a pending retry
    /// timer is aborted. Returns `false` for unknown, running or terminal
    /// jobs without touching them.
    pub fn cancel_job(&self, id: &str) -> bool {
        let mut guard = self.inner.lock_state();
        let state = &mut *guard;

        let Some(job) = state.jobs.get_mut(id) else {
            return false;
        };
        if !job.status.can_cancel() {
            return false;
        }

        state.queue.remove(id);
        if let Some(mut timer) = state.retry_timers.remove(id) {
            timer.abort();
        }
        job.transition(JobStatus::Cancelled);
        job.completed_at = Some(Utc::now());

        tracing::info!(
            context = %self.inner.context,
            job_id = %id,
            job_type = %job.job_type,
            "Job cancelled"
        );
        true
    }

    /// Remove jobs from the store.
    ///
    /// With `only_terminal`, removes `Completed`, `Failed` and `Cancelled`
    /// jobs. Otherwise removes every job, empties the queue and aborts
    /// pending retries; running executions finish but their outcome is
    /// discarded. Returns the number of jobs removed.
    pub fn clear_jobs(&self, only_terminal: bool) -> usize {
        let mut guard = self.inner.lock_state();
        let state = &mut *guard;

        let removed = if only_terminal {
            let before = state.jobs.len();
            state.jobs.retain(|_, job| !job.is_terminal());
            before - state.jobs.len()
        } else {
            let removed = state.jobs.len();
            state.jobs.clear();
            state.queue.clear();
            for (_, mut timer) in state.retry_timers.drain() {
                timer.abort();
            }
            removed
        };

        tracing::debug!(
            context = %self.inner.context,
            only_terminal,
            removed,
            "Cleared jobs"
        );
        removed
    }

    pub fn statistics(&self) -> JobStatistics {
        let state = self.inner.lock_state();
        JobStatistics::collect(state.jobs.values(), state.queue.len(), state.in_flight.len())
    }

    /// Adjust dispatch settings; the loop picks them up on its next scan.
    pub fn update_config(&self, update: ConfigUpdate) -> Result<()> {
        if update.poll_interval.is_some_and(|d| d.is_zero()) {
            return Err(JobError::Config("poll_interval must be non-zero".to_string()));
        }

        let mut state = self.inner.lock_state();
        if let Some(n) = update.max_concurrent {
            state.max_concurrent = n;
        }
        if let Some(interval) = update.poll_interval {
            state.poll_interval = interval;
        }
        tracing::info!(
            context = %self.inner.context,
            max_concurrent = state.max_concurrent,
            poll_interval_ms = state.poll_interval.as_millis() as u64,
            "Updated dispatch config"
        );
        Ok(())
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.lock_state().max_concurrent
    }

    pub fn poll_interval(&self) -> Duration {
        self.inner.lock_state().poll_interval
    }

    /// Queued job ids in dispatch order
    pub fn queued_ids(&self) -> Vec<String> {
        self.inner.lock_state().queue.ids()
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.lock_state().in_flight.len()
    }

    pub fn is_dispatching(&self) -> bool {
        self.inner.lock_state().dispatcher.is_some()
    }

    /// Stop the dispatch loop and park pending retries.
    ///
    /// Running executions finish normally; if they fail, their retry is
    /// parked as well. Parked jobs stay `Retrying` and keep their due time.
    /// The next `create_job` starts a new dispatch loop and re-arms them,
    /// re-admitting at once any whose backoff already elapsed.
    pub fn shutdown(&self) {
        let mut guard = self.inner.lock_state();
        let state = &mut *guard;
        state.stopped = true;
        if let Some((_, handle)) = state.dispatcher.take() {
            handle.abort();
        }
        for timer in state.retry_timers.values_mut() {
            timer.abort();
        }
        tracing::info!(
            context = %self.inner.context,
            parked = state.retry_timers.len(),
            "Job manager shut down"
        );
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the dispatch loop unless one is running. Called with the state
    /// lock held, so a loop that is about to stop cannot miss a new job.
    fn ensure_dispatching(self: &Arc<Self>, state: &mut State) {
        if state.stopped {
            state.stopped = false;
            for (id, timer) in state.retry_timers.iter_mut() {
                if timer.handle.is_none() {
                    let task = tokio::spawn(readmit_at(self.clone(), id.clone(), timer.due));
                    timer.handle = Some(task.abort_handle());
                }
            }
        }
        if state.dispatcher.is_some() {
            return;
        }
        state.generation += 1;
        let generation = state.generation;
        let handle = tokio::spawn(dispatch_loop(self.clone(), generation));
        state.dispatcher = Some((generation, handle.abort_handle()));
    }

    /// Move a popped job to `Processing` and claim an in-flight slot.
    fn begin_attempt(state: &mut State, id: &str) -> Option<Job> {
        let job = state.jobs.get_mut(id)?;
        if !job.transition(JobStatus::Processing) {
            return None;
        }
        job.started_at.get_or_insert_with(Utc::now);
        state.in_flight.insert(id.to_string());
        Some(job.clone())
    }

    async fn complete(&self, id: &str, result: serde_json::Value, elapsed_ms: u64) {
        let job = {
            let mut guard = self.lock_state();
            let state = &mut *guard;
            state.in_flight.remove(id);

            let Some(job) = state.jobs.get_mut(id) else {
                tracing::debug!(job_id = %id, "Job was purged while running, dropping result");
                return;
            };
            if !job.transition(JobStatus::Completed) {
                return;
            }
            job.result = Some(result);
            job.completed_at = Some(Utc::now());
            job.clone()
        };

        tracing::info!(
            context = %self.context,
            job_id = %job.id,
            job_type = %job.job_type,
            retry_count = job.retry_count,
            elapsed_ms,
            "Job completed"
        );
        self.hooks.on_job_completed(&job).await;
    }

    async fn fail_attempt(self: &Arc<Self>, id: &str, error: JobError, elapsed_ms: u64) {
        let job = {
            let mut guard = self.lock_state();
            let state = &mut *guard;
            state.in_flight.remove(id);

            let Some(job) = state.jobs.get_mut(id) else {
                tracing::debug!(job_id = %id, error = %error, "Job was purged while running, dropping failure");
                return;
            };
            job.error = Some(error.to_string());

            match self.retry.decide(job.retry_count, job.max_retries) {
                RetryDecision::Retry { retry_count, delay } => {
                    if !job.transition(JobStatus::Retrying) {
                        return;
                    }
                    job.retry_count = retry_count;
                    tracing::warn!(
                        context = %self.context,
                        job_id = %id,
                        job_type = %job.job_type,
                        attempt = retry_count,
                        max_retries = job.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        elapsed_ms,
                        error = %error,
                        "Job failed, scheduling retry"
                    );
                    let due = Instant::now() + delay;
                    let handle = if state.stopped {
                        None
                    } else {
                        let task = tokio::spawn(readmit_at(self.clone(), id.to_string(), due));
                        Some(task.abort_handle())
                    };
                    state
                        .retry_timers
                        .insert(id.to_string(), RetryTimer { due, handle });
                    return;
                }
                RetryDecision::Fail => {
                    if !job.transition(JobStatus::Failed) {
                        return;
                    }
                    job.completed_at = Some(Utc::now());
                    job.clone()
                }
            }
        };

        tracing::error!(
            context = %self.context,
            job_id = %job.id,
            job_type = %job.job_type,
            retry_count = job.retry_count,
            elapsed_ms,
            error = %error,
            "Job failed permanently"
        );
        self.hooks.on_job_failed(&job, &error).await;
    }

    /// Put a `Retrying` job back in the queue once its backoff elapsed.
    fn readmit(self: &Arc<Self>, id: &str) {
        let mut guard = self.lock_state();
        let state = &mut *guard;
        state.retry_timers.remove(id);

        let Some(job) = state.jobs.get_mut(id) else {
            return;
        };
        if job.status != JobStatus::Retrying || !job.transition(JobStatus::Queued) {
            return;
        }
        let priority = job.priority;
        state.queue.admit(id.to_string(), priority);
        tracing::debug!(context = %self.context, job_id = %id, "Job re-admitted after backoff");
        self.ensure_dispatching(state);
    }
}

async fn readmit_at(inner: Arc<Inner>, id: String, due: Instant) {
    tokio::time::sleep_until(due).await;
    inner.readmit(&id);
}

/// Scan the queue, start jobs up to the concurrency limit, idle, repeat.
/// Exits once the queue is empty and nothing is running.
async fn dispatch_loop(inner: Arc<Inner>, generation: u64) {
    tracing::info!(context = %inner.context, "Dispatch loop started");

    loop {
        let (batch, poll_interval) = {
            let mut guard = inner.lock_state();
            let state = &mut *guard;

            if state.queue.is_empty() && state.in_flight.is_empty() {
                if matches!(state.dispatcher, Some((g, _)) if g == generation) {
                    state.dispatcher = None;
                }
                break;
            }

            let mut batch = Vec::new();
            while state.in_flight.len() < state.max_concurrent {
                let Some(id) = state.queue.pop_front() else {
                    break;
                };
                match Inner::begin_attempt(state, &id) {
                    Some(job) => batch.push(job),
                    None => tracing::warn!(
                        context = %inner.context,
                        job_id = %id,
                        "Skipping queued id with no dispatchable job"
                    ),
                }
            }
            (batch, state.poll_interval)
        };

        for job in batch {
            let span = tracing::info_span!(
                "job",
                context = %inner.context,
                job_id = %job.id,
                job_type = %job.job_type
            );
            tokio::spawn(execute(inner.clone(), job).instrument(span));
        }

        tokio::time::sleep(poll_interval).await;
    }

    tracing::info!(context = %inner.context, "Dispatch loop idle, stopping");
}

/// Releases the in-flight slot if an execution ends without applying an
/// outcome.
struct InFlightGuard {
    inner: Arc<Inner>,
    id: String,
    armed: bool,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.armed {
            self.inner.lock_state().in_flight.remove(&self.id);
        }
    }
}

/// Run one attempt of `job` and apply the outcome.
async fn execute(inner: Arc<Inner>, job: Job) {
    let mut guard = InFlightGuard {
        inner: inner.clone(),
        id: job.id.clone(),
        armed: true,
    };
    let started = Instant::now();

    let handler = inner.processors.read().await.get(&job.job_type);
    let outcome = match handler {
        Some(handler) => AssertUnwindSafe(handler.handle(&job))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(JobError::Panicked(panic_message(panic.as_ref())))),
        None => Err(JobError::UnknownJobType(job.job_type.clone())),
    };
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(result) => inner.complete(&job.id, result, elapsed_ms).await,
        Err(error) => inner.fail_attempt(&job.id, error, elapsed_ms).await,
    }
    guard.armed = false;
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
