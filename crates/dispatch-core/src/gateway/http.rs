use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::{
    CommandGateway, Correction, GatewayError, Health, IssueQuery, SnapshotSource,
};
use crate::model::{Issue, IssueId, Stats};

const USER_AGENT: &str = concat!("dispatch/", env!("CARGO_PKG_VERSION"));

/// Blocking REST client for the dispatch gateway.
#[derive(Clone)]
pub struct HttpGateway {
    agent: ureq::Agent,
    base_url: String,
}

impl std::fmt::Debug for HttpGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpGateway")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpGateway {
    /// Build a client rooted at `base_url` (e.g. `http://localhost:8002`).
    #[must_use]
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build();
        Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Base URL without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Fetch one issue by id.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Status`] with status 404 when the issue does not exist.
    pub fn fetch_issue(&self, issue_id: IssueId) -> Result<Issue, GatewayError> {
        let url = self.url(&format!("/api/issues/{issue_id}"));
        let response = self.agent.get(&url).call().map_err(|e| map_error(&url, e))?;
        decode_json(&url, response)
    }

    /// Fetch aggregate counts.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] on transport, status, or decode failure.
    pub fn fetch_stats(&self) -> Result<Stats, GatewayError> {
        let url = self.url("/api/stats");
        let response = self.agent.get(&url).call().map_err(|e| map_error(&url, e))?;
        decode_json(&url, response)
    }

    /// Probe the gateway's health endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] on transport, status, or decode failure.
    pub fn health(&self) -> Result<Health, GatewayError> {
        let url = self.url("/health");
        let response = self.agent.get(&url).call().map_err(|e| map_error(&url, e))?;
        decode_json(&url, response)
    }
}

impl SnapshotSource for HttpGateway {
    fn fetch_issues(&self, query: &IssueQuery) -> Result<Vec<Issue>, GatewayError> {
        let url = self.url("/api/issues");
        let mut request = self.agent.get(&url);
        for (key, value) in query.pairs() {
            request = request.query(key, &value);
        }
        let response = request.call().map_err(|e| map_error(&url, e))?;
        let issues: Vec<Issue> = decode_json(&url, response)?;
        debug!(count = issues.len(), "fetched issue snapshot");
        Ok(issues)
    }
}

impl CommandGateway for HttpGateway {
    fn trigger_classification(&self, issue_id: IssueId) -> Result<(), GatewayError> {
        let url = self.url(&format!("/api/issues/{issue_id}/classify"));
        self.agent
            .post(&url)
            .call()
            .map_err(|e| map_error(&url, e))?;
        debug!(issue_id, "classification triggered");
        Ok(())
    }

    fn submit_correction(&self, correction: &Correction) -> Result<Issue, GatewayError> {
        let url = self.url(&format!("/api/issues/{}/correct", correction.issue_id));
        let response = self
            .agent
            .post(&url)
            .send_json(correction)
            .map_err(|e| map_error(&url, e))?;
        decode_json(&url, response)
    }
}

fn map_error(url: &str, err: ureq::Error) -> GatewayError {
    match err {
        ureq::Error::Status(status, response) => {
            let body = response.into_string().unwrap_or_default();
            warn!(url, status, "gateway rejected request");
            GatewayError::Status {
                url: url.to_string(),
                status,
                body,
            }
        }
        ureq::Error::Transport(transport) => GatewayError::Transport {
            url: url.to_string(),
            message: transport.to_string(),
        },
    }
}

fn decode_json<T: DeserializeOwned>(url: &str, response: ureq::Response) -> Result<T, GatewayError> {
    response.into_json::<T>().map_err(|e| GatewayError::Decode {
        url: url.to_string(),
        message: e.to_string(),
    })
}
