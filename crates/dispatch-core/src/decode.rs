//! Realtime payload decoder.
//!
//! Turns raw text frames from the realtime stream into typed
//! [`DomainEvent`]s. The gateway wraps every message in an envelope:
//!
//! ```text
//! { "type": "classification_update",
//!   "data": { "issue_id": 3, "category": "bug", "priority": "high",
//!             "confidence": 0.92, "tags": ["ui"], ... } }
//! ```
//!
//! - Unknown `type` values decode to [`Decoded::Ignored`] so newer gateways
//!   can add message kinds without breaking older clients.
//! - Extra fields inside `data` (e.g. `similar_issues`) are tolerated.
//! - Anything else that does not fit yields a [`DecodeFailure`]. Failures
//!   are reported, never fatal: the caller keeps reading the stream.

use serde::Deserialize;
use serde_json::Value;

use crate::error::ErrorCode;
use crate::model::{Classification, IssueId};

/// The `type` discriminator of a classification update.
pub const CLASSIFICATION_UPDATE: &str = "classification_update";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A recognized realtime event.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    /// A classification finished server-side.
    ClassificationUpdate {
        issue_id: IssueId,
        classification: Classification,
    },
}

impl DomainEvent {
    /// The issue this event is about.
    #[must_use]
    pub const fn issue_id(&self) -> IssueId {
        match self {
            Self::ClassificationUpdate { issue_id, .. } => *issue_id,
        }
    }
}

/// Outcome of decoding one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Event(DomainEvent),
    /// Well-formed envelope with a `type` this client does not handle.
    Ignored { kind: String },
}

/// Why a frame could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeFailure {
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("payload has no string `type` discriminator")]
    MissingType,

    #[error("schema mismatch for {kind}: {details}")]
    SchemaMismatch { kind: String, details: String },

    #[error("invalid {field} for {kind}: {details}")]
    InvalidField {
        kind: String,
        field: &'static str,
        details: String,
    },
}

impl DecodeFailure {
    /// Machine-readable code associated with this failure.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidJson(_) | Self::MissingType => ErrorCode::MalformedEvent,
            Self::SchemaMismatch { .. } | Self::InvalidField { .. } => {
                ErrorCode::EventSchemaMismatch
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: Option<Value>,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct ClassificationUpdateData {
    issue_id: IssueId,
    category: String,
    priority: String,
    confidence: f64,
    tags: Vec<String>,
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode one raw realtime frame.
///
/// # Errors
///
/// Returns a [`DecodeFailure`] when the frame is not JSON, lacks a string
/// `type`, or a recognized event carries a payload that does not match its
/// schema or holds out-of-range values.
pub fn decode(raw: &str) -> Result<Decoded, DecodeFailure> {
    let envelope: Envelope =
        serde_json::from_str(raw).map_err(|e| DecodeFailure::InvalidJson(e.to_string()))?;

    let kind = match envelope.kind {
        Some(Value::String(kind)) => kind,
        _ => return Err(DecodeFailure::MissingType),
    };

    match kind.as_str() {
        CLASSIFICATION_UPDATE => decode_classification(&kind, envelope.data),
        _ => Ok(Decoded::Ignored { kind }),
    }
}

fn decode_classification(kind: &str, data: Value) -> Result<Decoded, DecodeFailure> {
    let data: ClassificationUpdateData =
        serde_json::from_value(data).map_err(|e| DecodeFailure::SchemaMismatch {
            kind: kind.to_string(),
            details: e.to_string(),
        })?;

    let invalid = |field: &'static str, details: &str| DecodeFailure::InvalidField {
        kind: kind.to_string(),
        field,
        details: details.to_string(),
    };

    if data.category.trim().is_empty() {
        return Err(invalid("category", "must not be empty"));
    }
    if data.priority.trim().is_empty() {
        return Err(invalid("priority", "must not be empty"));
    }
    if !data.confidence.is_finite() || !(0.0..=1.0).contains(&data.confidence) {
        return Err(invalid(
            "confidence",
            &format!("{} is outside [0, 1]", data.confidence),
        ));
    }

    Ok(Decoded::Event(DomainEvent::ClassificationUpdate {
        issue_id: data.issue_id,
        classification: Classification {
            category: data.category,
            priority: data.priority,
            confidence: data.confidence,
            tags: data.tags,
        },
    }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn update(data: &str) -> String {
        format!(r#"{{"type":"classification_update","data":{data}}}"#)
    }

    #[test]
    fn decodes_classification_update() {
        let raw = update(
            r#"{"issue_id":3,"category":"bug","priority":"high","confidence":0.92,"tags":["ui"],"similar_issues":[]}"#,
        );
        let decoded = decode(&raw).expect("valid update");
        assert_eq!(
            decoded,
            Decoded::Event(DomainEvent::ClassificationUpdate {
                issue_id: 3,
                classification: Classification {
                    category: "bug".into(),
                    priority: "high".into(),
                    confidence: 0.92,
                    tags: vec!["ui".into()],
                },
            })
        );
    }

    #[test]
    fn unknown_type_is_ignored() {
        let decoded = decode(r#"{"type":"stats_update","data":{"total":3}}"#).expect("ignored");
        assert_eq!(
            decoded,
            Decoded::Ignored {
                kind: "stats_update".into()
            }
        );
    }

    #[test]
    fn gateway_echo_text_is_malformed() {
        let err = decode("Echo: hello").expect_err("not JSON");
        assert!(matches!(err, DecodeFailure::InvalidJson(_)));
        assert_eq!(err.code(), ErrorCode::MalformedEvent);
    }

    #[test]
    fn missing_or_non_string_type_is_rejected() {
        assert_eq!(decode(r#"{"data":{}}"#), Err(DecodeFailure::MissingType));
        assert_eq!(decode(r#"{"type":7}"#), Err(DecodeFailure::MissingType));
        assert!(matches!(decode("42"), Err(DecodeFailure::InvalidJson(_))));
    }

    #[test]
    fn missing_fields_are_schema_mismatch() {
        let err = decode(&update(r#"{"issue_id":3,"category":"bug"}"#)).expect_err("mismatch");
        assert!(matches!(err, DecodeFailure::SchemaMismatch { .. }));
        assert_eq!(err.code(), ErrorCode::EventSchemaMismatch);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let too_confident = update(
            r#"{"issue_id":3,"category":"bug","priority":"high","confidence":1.5,"tags":[]}"#,
        );
        assert!(matches!(
            decode(&too_confident),
            Err(DecodeFailure::InvalidField {
                field: "confidence",
                ..
            })
        ));

        let blank_priority = update(
            r#"{"issue_id":3,"category":"bug","priority":" ","confidence":0.5,"tags":[]}"#,
        );
        assert!(matches!(
            decode(&blank_priority),
            Err(DecodeFailure::InvalidField {
                field: "priority",
                ..
            })
        ));
    }
}
