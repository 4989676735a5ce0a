use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Processor error: {0}")]
    Processor(String),

    #[error("No processor registered for job type: {0}")]
    UnknownJobType(String),

    #[error("Processor panicked: {0}")]
    Panicked(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl JobError {
    /// Shorthand for a processor failure with a message.
    pub fn processor(msg: impl Into<String>) -> Self {
        Self::Processor(msg.into())
    }
}

impl From<envy::Error> for JobError {
    fn from(err: envy::Error) -> Self {
        Self::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, JobError>;
