use serde::Serialize;

use crate::error::ErrorCode;
use crate::gateway::{Correction, GatewayError};
use crate::model::{Issue, IssueId};

/// An uncommitted local correction for exactly one issue.
///
/// Field values are raw form text: `tags_text` is the comma-separated string
/// the user typed, parsed only when the edit is submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingEdit {
    pub issue_id: IssueId,
    pub category: String,
    pub priority: String,
    pub tags_text: String,
    /// A correction for this draft is on the wire.
    pub submitting: bool,
}

impl PendingEdit {
    /// Capture the issue's current classification as a fresh draft.
    #[must_use]
    pub fn from_issue(issue: &Issue) -> Self {
        Self {
            issue_id: issue.id,
            category: issue.category.clone().unwrap_or_default(),
            priority: issue.priority.clone().unwrap_or_default(),
            tags_text: issue.tags.join(", "),
            submitting: false,
        }
    }

    /// Parsed tag list.
    #[must_use]
    pub fn tags(&self) -> Vec<String> {
        parse_tags(&self.tags_text)
    }

    /// Name of the first required field that is blank, if any.
    #[must_use]
    pub fn missing_field(&self) -> Option<&'static str> {
        if self.category.trim().is_empty() {
            Some("category")
        } else if self.priority.trim().is_empty() {
            Some("priority")
        } else {
            None
        }
    }

    /// Request body for submitting this draft.
    #[must_use]
    pub fn to_correction(&self) -> Correction {
        Correction {
            issue_id: self.issue_id,
            category: self.category.trim().to_string(),
            priority: self.priority.trim().to_string(),
            tags: self.tags(),
        }
    }
}

/// One form-field write into the pending draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditField {
    Category(String),
    Priority(String),
    Tags(String),
}

/// Split comma-separated tag text, trimming and dropping empty entries.
#[must_use]
pub fn parse_tags(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

/// Errors from edit operations that never reach the backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EditError {
    #[error("issue {0} is not in the store")]
    IssueNotFound(IssueId),

    #[error("no edit in progress")]
    NoPendingEdit,

    #[error("edit for issue {issue_id} has no {field}")]
    Incomplete {
        issue_id: IssueId,
        field: &'static str,
    },

    #[error("correction for issue {0} is already being submitted")]
    SubmitInFlight(IssueId),
}

impl EditError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::IssueNotFound(_) => ErrorCode::IssueNotFound,
            Self::NoPendingEdit => ErrorCode::NoPendingEdit,
            Self::Incomplete { .. } => ErrorCode::IncompleteEdit,
            Self::SubmitInFlight(_) => ErrorCode::SubmitInFlight,
        }
    }
}

/// Failure of a consumer command: rejected locally or by the backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Edit(#[from] EditError),

    #[error("backend call failed: {0}")]
    Gateway(#[from] GatewayError),
}

impl CommandError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Edit(err) => err.code(),
            Self::Gateway(err) => err.code(),
        }
    }
}
