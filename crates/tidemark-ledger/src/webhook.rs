//! Posts package status events to an event stream webhook.

use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tidemark_config::Endpoint;
use tidemark_core::{ProgressSink, StatusEvent};
use tokio::runtime::Handle;
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};
use url::Url;

#[derive(Serialize)]
struct Envelope<'a> {
    source: &'static str,
    sourcetype: &'static str,
    event: &'a StatusEvent,
}

/// Fire-and-forget webhook delivery. Each event is posted from its own task;
/// failures are logged and never reach the run. Call [`WebhookSink::flush`]
/// before the runtime shuts down so the last events are not lost.
#[derive(Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    url: Url,
    token: Option<String>,
    deliveries: Arc<Mutex<JoinSet<()>>>,
}

impl WebhookSink {
    pub fn new(url: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            token: None,
            deliveries: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    pub fn from_endpoint(endpoint: &Endpoint) -> Self {
        let mut sink = Self::new(endpoint.url.clone());
        sink.token = endpoint.token();
        sink
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn deliveries(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.deliveries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Wait up to `limit` for in-flight deliveries. Deliveries still pending
    /// afterwards are aborted and logged. Returns how many were abandoned.
    pub async fn flush(&self, limit: Duration) -> usize {
        let mut pending = std::mem::take(&mut *self.deliveries());
        let deadline = Instant::now() + limit;

        while !pending.is_empty() {
            match timeout_at(deadline, pending.join_next()).await {
                Ok(Some(Err(e))) => warn!(error = %e, "Status event delivery task failed"),
                Ok(_) => {}
                Err(_) => {
                    let dropped = pending.len();
                    warn!(
                        undelivered = dropped,
                        timeout_secs = limit.as_secs(),
                        "Status events still undelivered at shutdown, dropping them"
                    );
                    pending.abort_all();
                    return dropped;
                }
            }
        }

        debug!("All status events delivered");
        0
    }

    fn payload(event: &StatusEvent) -> serde_json::Result<String> {
        serde_json::to_string(&Envelope {
            source: "tidemark",
            sourcetype: "ci",
            event,
        })
    }
}

impl ProgressSink for WebhookSink {
    fn publish(&self, event: StatusEvent) {
        let Ok(handle) = Handle::try_current() else {
            warn!(package = %event.package, "No async runtime, dropping status event");
            return;
        };

        let body = match Self::payload(&event) {
            Ok(body) => body,
            Err(e) => {
                warn!(package = %event.package, error = %e, "Failed to encode status event");
                return;
            }
        };

        let mut request = self
            .client
            .post(self.url.clone())
            .header("Content-Type", "application/json")
            .body(body);
        if let Some(token) = &self.token {
            request = request.header("Authorization", token.as_str());
        }

        let package = event.package;
        let mut deliveries = self.deliveries();
        while deliveries.try_join_next().is_some() {}
        deliveries.spawn_on(async move {
            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(package = %package, status = %response.status(), "Status event delivered");
                }
                Ok(response) => {
                    warn!(package = %package, status = %response.status(), "Status event rejected");
                }
                Err(e) => {
                    warn!(package = %package, error = %e, "Status event delivery failed");
                }
            }
        }, &handle);
    }
}
