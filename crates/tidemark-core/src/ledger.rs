//! Prior build outcomes recorded in the external ledger.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::Result;

/// Outcome of the last recorded build attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeKind {
    Success,
    Failed,
    InProgress,
    Unknown,
}

impl OutcomeKind {
    /// Map a ledger event name such as `tidemark.build.success` to an outcome.
    /// Only the last dotted segment is significant.
    pub fn from_event_name(name: &str) -> Self {
        let last = name.rsplit('.').next().unwrap_or(name).to_ascii_lowercase();
        match last.as_str() {
            "success" | "succeeded" => OutcomeKind::Success,
            "failed" | "failure" | "error" => OutcomeKind::Failed,
            "progress" | "inprogress" | "in-progress" | "in_progress" | "running" => {
                OutcomeKind::InProgress
            }
            _ => OutcomeKind::Unknown,
        }
    }
}

/// The most recent ledger entry for a package on a branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub outcome: OutcomeKind,
    /// Commit the attempt was made from.
    pub commit_id: Option<String>,
    /// Identifier of the external job that made the attempt.
    pub job_id: Option<String>,
    /// Error text of a failed attempt.
    pub error_text: Option<String>,
    pub recorded_at: Option<DateTime<Utc>>,
}

impl LedgerRecord {
    pub fn new(outcome: OutcomeKind) -> Self {
        Self {
            outcome,
            commit_id: None,
            job_id: None,
            error_text: None,
            recorded_at: None,
        }
    }

    #[must_use]
    pub fn at_commit(mut self, commit: impl Into<String>) -> Self {
        self.commit_id = Some(commit.into());
        self
    }

    #[must_use]
    pub fn job(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    #[must_use]
    pub fn error(mut self, text: impl Into<String>) -> Self {
        self.error_text = Some(text.into());
        self
    }
}

/// Reads prior build outcomes from the ledger.
#[async_trait]
pub trait LedgerReader: Send + Sync {
    /// Latest record per package name for `branch`.
    async fn prior_outcomes(&self, branch: &str) -> Result<HashMap<String, LedgerRecord>>;
}

/// Answers whether an external build job is still running.
#[async_trait]
pub trait JobMonitor: Send + Sync {
    async fn is_job_active(&self, job_id: &str) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_from_event_name() {
        assert_eq!(
            OutcomeKind::from_event_name("tidemark.build.success"),
            OutcomeKind::Success
        );
        assert_eq!(
            OutcomeKind::from_event_name("ci.build.failed"),
            OutcomeKind::Failed
        );
        assert_eq!(
            OutcomeKind::from_event_name("build.progress"),
            OutcomeKind::InProgress
        );
        assert_eq!(
            OutcomeKind::from_event_name("build.awaiting"),
            OutcomeKind::Unknown
        );
    }
}
