//! HTTP clients for the ledger service and the job service.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use tidemark_config::Endpoint;
use tidemark_core::{JobMonitor, LedgerReader, LedgerRecord};
use tracing::debug;
use url::Url;

use crate::LedgerError;
use crate::event::{LedgerEvent, latest_per_package};

fn join(base: &Url, path: &str) -> String {
    format!("{}/{}", base.as_str().trim_end_matches('/'), path)
}

/// Reads build events from `GET <base>/events?branch=<b>&command=build`.
pub struct HttpLedger {
    client: reqwest::Client,
    base: Url,
    token: Option<String>,
}

impl HttpLedger {
    pub fn new(base: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            base,
            token: None,
        }
    }

    pub fn from_endpoint(endpoint: &Endpoint) -> Self {
        let mut ledger = Self::new(endpoint.url.clone());
        ledger.token = endpoint.token();
        ledger
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub async fn events(&self, branch: &str) -> Result<Vec<LedgerEvent>, LedgerError> {
        let url = join(
            &self.base,
            &format!("events?branch={}&command=build", urlencoding::encode(branch)),
        );
        debug!(url = %url, "Querying ledger");

        let mut request = self.client.get(&url).header("Accept", "application/json");
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request
            .send()
            .await
            .map_err(|e| LedgerError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LedgerError::Api(format!("{}: {}", status, text)));
        }

        response
            .json()
            .await
            .map_err(|e| LedgerError::Parse(e.to_string()))
    }
}

#[async_trait]
impl LedgerReader for HttpLedger {
    async fn prior_outcomes(
        &self,
        branch: &str,
    ) -> tidemark_core::Result<HashMap<String, LedgerRecord>> {
        let events = self.events(branch).await?;
        Ok(latest_per_package(&events))
    }
}

#[derive(Debug, Deserialize)]
struct JobStatus {
    status: String,
}

/// Asks `GET <base>/<job id>` whether a job is still running.
pub struct HttpJobMonitor {
    client: reqwest::Client,
    base: Url,
    token: Option<String>,
}

impl HttpJobMonitor {
    pub fn new(base: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            base,
            token: None,
        }
    }

    pub fn from_endpoint(endpoint: &Endpoint) -> Self {
        let mut monitor = Self::new(endpoint.url.clone());
        monitor.token = endpoint.token();
        monitor
    }
}

#[async_trait]
impl JobMonitor for HttpJobMonitor {
    async fn is_job_active(&self, job_id: &str) -> tidemark_core::Result<bool> {
        let url = join(&self.base, &urlencoding::encode(job_id));

        let mut request = self.client.get(&url).header("Accept", "application/json");
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request
            .send()
            .await
            .map_err(|e| LedgerError::Request(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            debug!(job_id = %job_id, "Job not found");
            return Ok(false);
        }
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LedgerError::Api(format!("{}: {}", status, text)).into());
        }

        let job: JobStatus = response
            .json()
            .await
            .map_err(|e| LedgerError::Parse(e.to_string()))?;

        Ok(job.status.eq_ignore_ascii_case("running"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidemark_core::OutcomeKind;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_ledger_queries_branch_with_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/events"))
            .and(query_param("branch", "feature/x"))
            .and(query_param("command", "build"))
            .and(header("Authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"package": "core", "event_name": "ci.build.progress", "job_id": "42",
                 "commit": "abc123", "created_at": "2024-05-02T10:00:00Z"},
                {"package": "core", "event_name": "ci.build.success",
                 "commit": "999999", "created_at": "2024-05-01T10:00:00Z"}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let base = Url::parse(&format!("{}/api", server.uri())).unwrap();
        let ledger = HttpLedger::new(base).with_token("secret");

        let records = ledger.prior_outcomes("feature/x").await.unwrap();
        assert_eq!(records["core"].outcome, OutcomeKind::InProgress);
        assert_eq!(records["core"].job_id.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn test_ledger_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let ledger = HttpLedger::new(Url::parse(&server.uri()).unwrap());
        let err = ledger.prior_outcomes("main").await.unwrap_err();
        assert!(matches!(err, tidemark_core::Error::Ledger(ref m) if m.contains("maintenance")));
    }

    #[tokio::test]
    async fn test_job_monitor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jobs/7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "running"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/jobs/8"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "success"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/jobs/9"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let monitor = HttpJobMonitor::new(Url::parse(&format!("{}/jobs", server.uri())).unwrap());
        assert!(monitor.is_job_active("7").await.unwrap());
        assert!(!monitor.is_job_active("8").await.unwrap());
        assert!(!monitor.is_job_active("9").await.unwrap());
    }
}
