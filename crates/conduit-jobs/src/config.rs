//! Manager configuration.
//!
//! Values come from code (builder setters), from environment variables via
//! `envy`, or from a `.env` file loaded with [`load_dotenv`].
//!
//! # Example
//!
//! ```ignore
//! use conduit_jobs::config::{load_dotenv, ManagerConfig};
//!
//! load_dotenv();
//! // Reads CONTENT_SYNC_MAX_CONCURRENT, CONTENT_SYNC_POLL_INTERVAL_MS, ...
//! let config = ManagerConfig::from_env_prefixed("content-sync", "CONTENT_SYNC")?;
//! ```

use crate::backoff::RetryPolicy;
use crate::error::{JobError, Result};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

/// Deployment profile the manager runs under.
///
/// Detected from the `CONDUIT_ENV` environment variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Custom(String),
}

impl Environment {
    /// Detect the current environment from `CONDUIT_ENV`.
    ///
    /// - `Production` for "production" or "prod"
    /// - `Development` for "development", "dev", or when unset
    /// - `Custom(name)` for anything else
    pub fn current() -> Self {
        Self::parse(std::env::var("CONDUIT_ENV").ok().as_deref())
    }

    fn parse(value: Option<&str>) -> Self {
        match value {
            Some("production") | Some("prod") => Self::Production,
            Some("development") | Some("dev") | None => Self::Development,
            Some(other) => Self::Custom(other.to_string()),
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Custom(name) => name,
        }
    }

    /// Default `tracing` level for this environment.
    pub fn default_log_level(&self) -> &'static str {
        match self {
            Self::Development => "debug",
            Self::Production | Self::Custom(_) => "info",
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::current()
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Configuration of a [`JobManager`](crate::JobManager)
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Name of the owning subsystem, attached to log events
    pub context: String,
    pub environment: Environment,
    /// Upper bound on concurrently running jobs. Zero pauses dispatch.
    pub max_concurrent: usize,
    /// Idle time between dispatch scans
    pub poll_interval: Duration,
    /// Used when a job is created without an explicit `max_retries`
    pub default_max_retries: u32,
    pub retry: RetryPolicy,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            context: "default".to_string(),
            environment: Environment::default(),
            max_concurrent: 3,
            poll_interval: Duration::from_millis(1000),
            default_max_retries: 3,
            retry: RetryPolicy::default(),
        }
    }
}

/// Optional overrides read from `<PREFIX>_*` variables
#[derive(Debug, Default, Deserialize)]
struct EnvOverrides {
    max_concurrent: Option<usize>,
    poll_interval_ms: Option<u64>,
    default_max_retries: Option<u32>,
    retry_base_ms: Option<u64>,
    retry_cap_ms: Option<u64>,
}

impl ManagerConfig {
    pub fn new(context: impl Into<String>, environment: Environment) -> Self {
        Self {
            context: context.into(),
            environment,
            ..Self::default()
        }
    }

    pub fn max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = n;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn default_max_retries(mut self, n: u32) -> Self {
        self.default_max_retries = n;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Build a config for `context` from `<PREFIX>_*` environment variables.
    ///
    /// Every variable is optional; unset ones keep their defaults.
    /// The environment profile comes from [`Environment::current`].
    pub fn from_env_prefixed(context: impl Into<String>, prefix: &str) -> Result<Self> {
        Self::from_vars_prefixed(context, Environment::current(), prefix, std::env::vars())
    }

    fn from_vars_prefixed(
        context: impl Into<String>,
        environment: Environment,
        prefix: &str,
        vars: impl Iterator<Item = (String, String)>,
    ) -> Result<Self> {
        let overrides: EnvOverrides = envy::prefixed(format!("{}_", prefix)).from_iter(vars)?;

        let mut config = Self::new(context, environment);
        if let Some(n) = overrides.max_concurrent {
            config.max_concurrent = n;
        }
        if let Some(ms) = overrides.poll_interval_ms {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(n) = overrides.default_max_retries {
            config.default_max_retries = n;
        }
        if let Some(ms) = overrides.retry_base_ms {
            config.retry.base = Duration::from_millis(ms);
        }
        if let Some(ms) = overrides.retry_cap_ms {
            config.retry.cap = Duration::from_millis(ms);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(JobError::Config("poll_interval must be non-zero".to_string()));
        }
        if self.retry.cap < self.retry.base {
            return Err(JobError::Config(format!(
                "retry cap ({:?}) is below retry base ({:?})",
                self.retry.cap, self.retry.base
            )));
        }
        Ok(())
    }
}

/// Runtime adjustment of the dispatch settings, applied on the next scan
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigUpdate {
    pub max_concurrent: Option<usize>,
    pub poll_interval: Option<Duration>,
}

impl ConfigUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = Some(n);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }
}

/// Load variables from a `.env` file in the current directory.
///
/// Missing files are ignored and existing variables are not overridden.
pub fn load_dotenv() {
    let _ = dotenvy::dotenv();
}
