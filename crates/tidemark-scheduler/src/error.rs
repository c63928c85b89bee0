use thiserror::Error;

/// Errors that prevent a run from starting.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("duplicate package in run: {0}")]
    Duplicate(String),

    #[error("package '{0}' depends on itself")]
    SelfDependency(String),

    #[error("dependency cycle detected: {0}")]
    CycleDetected(String),
}

pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
