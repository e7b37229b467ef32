use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Server-assigned issue identifier.
pub type IssueId = u64;

/// Derived classification state of an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueStatus {
    #[default]
    Pending,
    Classified,
}

impl IssueStatus {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Classified => "classified",
        }
    }
}

impl fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an enum value from text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    pub expected: &'static str,
    pub got: String,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: '{}'", self.expected, self.got)
    }
}

impl std::error::Error for ParseEnumError {}

impl FromStr for IssueStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "classified" => Ok(Self::Classified),
            _ => Err(ParseEnumError {
                expected: "status",
                got: s.to_string(),
            }),
        }
    }
}

/// The `{category, priority, confidence, tags}` tuple assigned to an issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: String,
    pub priority: String,
    pub confidence: f64,
    pub tags: Vec<String>,
}

/// An issue as cached by the client.
///
/// Descriptive fields (`number`, `title`, `repository`, timestamps) are owned
/// by the backend and only change when a server response replaces the whole
/// record. `status` is derived; call [`Issue::refresh_status`] after touching
/// `category` or `priority` directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: IssueId,
    pub number: u64,
    pub title: String,
    pub repository: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default)]
    pub status: IssueStatus,
}

fn is_set(value: Option<&String>) -> bool {
    value.is_some_and(|v| !v.trim().is_empty())
}

impl Issue {
    /// Create an unclassified issue.
    #[must_use]
    pub fn new(id: IssueId, number: u64, title: impl Into<String>, repository: impl Into<String>) -> Self {
        Self {
            id,
            number,
            title: title.into(),
            repository: repository.into(),
            category: None,
            priority: None,
            confidence: None,
            tags: Vec::new(),
            created_at: String::new(),
            updated_at: String::new(),
            status: IssueStatus::Pending,
        }
    }

    /// Whether both category and priority carry a non-empty value.
    #[must_use]
    pub fn has_classification(&self) -> bool {
        is_set(self.category.as_ref()) && is_set(self.priority.as_ref())
    }

    /// Recompute `status` from the classification fields.
    pub fn refresh_status(&mut self) {
        self.status = if self.has_classification() {
            IssueStatus::Classified
        } else {
            IssueStatus::Pending
        };
    }

    /// Overwrite all four classification fields at once.
    pub fn apply_classification(&mut self, classification: &Classification) {
        self.category = Some(classification.category.clone());
        self.priority = Some(classification.priority.clone());
        self.confidence = Some(classification.confidence);
        self.tags.clone_from(&classification.tags);
        self.refresh_status();
    }

    /// Current classification, if the issue has one.
    #[must_use]
    pub fn classification(&self) -> Option<Classification> {
        if !self.has_classification() {
            return None;
        }
        Some(Classification {
            category: self.category.clone().unwrap_or_default(),
            priority: self.priority.clone().unwrap_or_default(),
            confidence: self.confidence.unwrap_or(0.0),
            tags: self.tags.clone(),
        })
    }
}
