//! Ledger event records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tidemark_core::{LedgerRecord, OutcomeKind};

/// One build event as stored in the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub package: String,
    /// Dotted event name; the last segment carries the outcome
    /// (`ci.build.success`, `ci.build.failed`, `ci.build.progress`).
    pub event_name: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub commit: Option<String>,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl From<&LedgerEvent> for LedgerRecord {
    fn from(event: &LedgerEvent) -> Self {
        LedgerRecord {
            outcome: OutcomeKind::from_event_name(&event.event_name),
            commit_id: event.commit.clone(),
            job_id: event.job_id.clone(),
            error_text: event.error_message.clone(),
            recorded_at: event.created_at,
        }
    }
}

/// Reduce events to the newest record per package. Undated events lose to
/// dated ones; among equals the later event wins.
pub fn latest_per_package(events: &[LedgerEvent]) -> HashMap<String, LedgerRecord> {
    let mut latest: HashMap<String, LedgerRecord> = HashMap::new();

    for event in events {
        let newer = latest
            .get(&event.package)
            .is_none_or(|current| current.recorded_at <= event.created_at);
        if newer {
            latest.insert(event.package.clone(), LedgerRecord::from(event));
        }
    }

    latest
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(package: &str, name: &str, at: Option<&str>) -> LedgerEvent {
        LedgerEvent {
            package: package.to_string(),
            event_name: name.to_string(),
            branch: Some("main".to_string()),
            commit: Some("abc123".to_string()),
            job_id: None,
            error_message: None,
            created_at: at.map(|s| s.parse().unwrap()),
        }
    }

    #[test]
    fn test_newest_event_wins() {
        let events = vec![
            event("core", "ci.build.failed", Some("2024-05-02T10:00:00Z")),
            event("core", "ci.build.success", Some("2024-05-01T10:00:00Z")),
            event("base", "ci.build.progress", None),
            event("base", "ci.build.success", None),
        ];

        let latest = latest_per_package(&events);

        assert_eq!(latest["core"].outcome, OutcomeKind::Failed);
        assert_eq!(latest["base"].outcome, OutcomeKind::Success);
    }

    #[test]
    fn test_deserialize_minimal_event() {
        let event: LedgerEvent =
            serde_json::from_str(r#"{"package": "core", "event_name": "ci.build.success"}"#)
                .unwrap();
        let record = LedgerRecord::from(&event);
        assert_eq!(record.outcome, OutcomeKind::Success);
        assert!(record.commit_id.is_none());
    }
}
