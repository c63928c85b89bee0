use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tidemark_core::{LedgerReader, LedgerRecord};
use tracing::debug;

use crate::LedgerError;
use crate::event::{LedgerEvent, latest_per_package};

/// Reads ledger events from a JSON file holding an array of events.
/// A missing file is an empty ledger.
pub struct FileLedger {
    path: PathBuf,
}

impl FileLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn events(&self) -> Result<Vec<LedgerEvent>, LedgerError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Ledger file not found, treating as empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::from_str(&content).map_err(|e| LedgerError::Parse(e.to_string()))
    }
}

#[async_trait]
impl LedgerReader for FileLedger {
    async fn prior_outcomes(
        &self,
        branch: &str,
    ) -> tidemark_core::Result<HashMap<String, LedgerRecord>> {
        let events: Vec<LedgerEvent> = self
            .events()
            .await?
            .into_iter()
            .filter(|e| e.branch.as_deref().is_none_or(|b| b == branch))
            .collect();
        Ok(latest_per_package(&events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidemark_core::OutcomeKind;

    #[tokio::test]
    async fn test_reads_events_for_branch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        std::fs::write(
            &path,
            r#"[
                {"package": "core", "event_name": "ci.build.success", "branch": "main",
                 "commit": "abc123", "created_at": "2024-05-01T10:00:00Z"},
                {"package": "core", "event_name": "ci.build.failed", "branch": "feature",
                 "commit": "def456", "created_at": "2024-05-02T10:00:00Z",
                 "error_message": "Unlocked package creation errors"}
            ]"#,
        )
        .unwrap();

        let ledger = FileLedger::new(&path);
        let main = ledger.prior_outcomes("main").await.unwrap();
        assert_eq!(main["core"].outcome, OutcomeKind::Success);
        assert_eq!(main["core"].commit_id.as_deref(), Some("abc123"));

        let feature = ledger.prior_outcomes("feature").await.unwrap();
        assert_eq!(feature["core"].outcome, OutcomeKind::Failed);
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = FileLedger::new(dir.path().join("absent.json"));
        assert!(ledger.prior_outcomes("main").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_file_is_ledger_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        std::fs::write(&path, "{not json").unwrap();

        let result = FileLedger::new(&path).prior_outcomes("main").await;
        assert!(matches!(result, Err(tidemark_core::Error::Ledger(_))));
    }
}
