//! Error types shared across tidemark collaborators.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("source control query failed: {0}")]
    Revision(String),

    #[error("ledger query failed: {0}")]
    Ledger(String),

    #[error("build failed: {0}")]
    BuildFailed(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
