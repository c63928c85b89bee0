//! Package status transitions published to telemetry sinks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::RunId;

/// Externally visible status of a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProgressStatus {
    Queued,
    InProgress,
    Succeeded,
    Failed,
    Skipped,
}

/// One status transition of one package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    pub run_id: RunId,
    pub package: String,
    pub status: ProgressStatus,
    /// Build reason, failure reason or skip reason.
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl StatusEvent {
    pub fn new(run_id: RunId, package: impl Into<String>, status: ProgressStatus) -> Self {
        Self {
            run_id,
            package: package.into(),
            status,
            detail: None,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Fire-and-forget receiver of status events.
///
/// `publish` must not block: slow or failing deliveries are the sink's
/// problem and are only logged.
pub trait ProgressSink: Send + Sync {
    fn publish(&self, event: StatusEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn publish(&self, _event: StatusEvent) {}
}

/// Forwards every event to several sinks.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn ProgressSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl ProgressSink for FanoutSink {
    fn publish(&self, event: StatusEvent) {
        for sink in &self.sinks {
            sink.publish(event.clone());
        }
    }
}
