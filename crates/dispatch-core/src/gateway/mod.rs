//! Command Gateway: outbound intents and snapshot reads against the REST API.
//!
//! The two commands the dashboard issues (trigger a classification and
//! submit a correction) go through [`CommandGateway`]. Bulk reads used to
//! seed the store go through [`SnapshotSource`]. Both are traits so the
//! session loop and the reconciler can be driven by in-memory fakes; the
//! production implementation is [`http::HttpGateway`].
//!
//! Nothing here retries. A failed call surfaces a [`GatewayError`] to the
//! caller, which decides whether to try again.

pub mod http;

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::model::{Issue, IssueId};

pub use http::HttpGateway;

/// Body of `POST /api/issues/{id}/correct`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correction {
    pub issue_id: IssueId,
    pub category: String,
    pub priority: String,
    pub tags: Vec<String>,
}

/// Optional filters for `GET /api/issues`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueQuery {
    pub repository: Option<String>,
    pub category: Option<String>,
    pub priority: Option<String>,
    pub limit: Option<u32>,
}

impl IssueQuery {
    /// Query-string pairs for the filters that are set.
    #[must_use]
    pub fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(repository) = &self.repository {
            pairs.push(("repository", repository.clone()));
        }
        if let Some(category) = &self.category {
            pairs.push(("category", category.clone()));
        }
        if let Some(priority) = &self.priority {
            pairs.push(("priority", priority.clone()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit", limit.to_string()));
        }
        pairs
    }
}

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
    pub service: String,
    pub version: String,
    #[serde(default)]
    pub connected_clients: u64,
}

/// Failure of a single REST call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// The request never produced an HTTP response.
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    /// The backend answered with a non-success status.
    #[error("{url} returned HTTP {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    /// The backend answered 2xx but the body did not match the expected shape.
    #[error("could not decode response from {url}: {message}")]
    Decode { url: String, message: String },
}

impl GatewayError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Transport { .. } => ErrorCode::BackendUnreachable,
            Self::Status { .. } => ErrorCode::BackendRejected,
            Self::Decode { .. } => ErrorCode::ResponseDecodeFailed,
        }
    }

    /// Optional remediation hint.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}

/// The two commands the consumer can send to the backend.
pub trait CommandGateway: Send + Sync {
    /// Ask the backend to classify an issue. The result arrives later on the
    /// realtime stream, not in this response.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] if the backend is unreachable or rejects the request.
    fn trigger_classification(&self, issue_id: IssueId) -> Result<(), GatewayError>;

    /// Submit a corrected classification and return the authoritative issue.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] if the backend is unreachable, rejects the
    /// correction, or answers with an unreadable body.
    fn submit_correction(&self, correction: &Correction) -> Result<Issue, GatewayError>;
}

/// Bulk reads that seed or refresh the store.
pub trait SnapshotSource: Send + Sync {
    /// Fetch the current issue list.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] on transport, status, or decode failure.
    fn fetch_issues(&self, query: &IssueQuery) -> Result<Vec<Issue>, GatewayError>;
}
