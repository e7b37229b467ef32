use std::fmt;

/// Machine-readable error codes shared by every error type in the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    InvalidEndpoint,
    IssueNotFound,
    NoPendingEdit,
    IncompleteEdit,
    SubmitInFlight,
    MalformedEvent,
    EventSchemaMismatch,
    BackendUnreachable,
    BackendRejected,
    ResponseDecodeFailed,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1001",
            Self::InvalidEndpoint => "E1002",
            Self::IssueNotFound => "E2001",
            Self::NoPendingEdit => "E2002",
            Self::IncompleteEdit => "E2003",
            Self::SubmitInFlight => "E2004",
            Self::MalformedEvent => "E3001",
            Self::EventSchemaMismatch => "E3002",
            Self::BackendUnreachable => "E4001",
            Self::BackendRejected => "E4002",
            Self::ResponseDecodeFailed => "E4003",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigParseError => "Config file parse error",
            Self::InvalidEndpoint => "Invalid endpoint URL",
            Self::IssueNotFound => "Issue not found",
            Self::NoPendingEdit => "No edit in progress",
            Self::IncompleteEdit => "Edit is missing category or priority",
            Self::SubmitInFlight => "Correction already being submitted",
            Self::MalformedEvent => "Malformed realtime payload",
            Self::EventSchemaMismatch => "Realtime payload schema mismatch",
            Self::BackendUnreachable => "Backend unreachable",
            Self::BackendRejected => "Backend returned an error status",
            Self::ResponseDecodeFailed => "Backend response could not be decoded",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => Some("Fix syntax in dispatch/config.toml and retry."),
            Self::InvalidEndpoint => Some("Use ws:// or wss:// for the realtime URL and http(s):// for the API."),
            Self::IssueNotFound => Some("Refresh the issue list; the snapshot may be stale."),
            Self::NoPendingEdit => Some("Start an edit before saving a correction."),
            Self::IncompleteEdit => Some("Pick both a category and a priority before saving."),
            Self::SubmitInFlight => Some("Wait for the current save to finish."),
            Self::MalformedEvent | Self::EventSchemaMismatch => None,
            Self::BackendUnreachable => Some("Check that the gateway is running and DISPATCH_API_URL is correct."),
            Self::BackendRejected => Some("Inspect the gateway logs for the failing request."),
            Self::ResponseDecodeFailed => Some("Check that client and gateway versions match."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
