//! Asynchronous job manager for Conduit
//!
//! Accepts typed work items, orders them by priority, executes a bounded
//! number concurrently, retries failures with exponential backoff and
//! supports cooperative cancellation. What a job *does* is up to the
//! registered [`Processor`]; the manager only owns when and how often it runs.
//!
//! Callers observe outcomes by polling [`JobManager::get_job`]: processor
//! failures never escape as errors, they become `status` and `error` on the
//! job record.

pub mod backoff;
pub mod config;
pub mod error;
pub mod hooks;
pub mod job;
pub mod manager;
pub mod processor;
pub mod queue;
pub mod stats;

pub use backoff::{RetryDecision, RetryPolicy};
pub use config::{ConfigUpdate, Environment, ManagerConfig};
pub use error::{JobError, Result};
pub use hooks::{JobHooks, NoopHooks};
pub use job::{Job, JobOptions, JobPriority, JobStatus};
pub use manager::{JobManager, JobManagerBuilder};
pub use processor::{processor_fn, FnProcessor, Processor, ProcessorHandler, ProcessorRegistry};
pub use queue::PriorityQueue;
pub use stats::JobStatistics;
