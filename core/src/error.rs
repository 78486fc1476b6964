use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::pipeline::PipelineError;

/// Structured error body shared by the HTTP API and the MCP runtime.
/// Carries a stable code and enough context for a caller to fix the request,
/// never internal error detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// Machine-readable error code (e.g. "validation_failed", "unknown_scaffold")
    pub error: String,
    /// Human/agent-readable description of what went wrong
    pub message: String,
    /// Which field caused the error (if applicable)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// The value that was received (if applicable)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received: Option<serde_json::Value>,
    /// Request ID for tracing and debugging
    pub request_id: String,
    /// Hint about what the correct usage looks like
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docs_hint: Option<String>,
}

impl ApiError {
    pub fn new(code: &str, message: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            error: code.to_string(),
            message: message.into(),
            field: None,
            received: None,
            request_id: request_id.into(),
            docs_hint: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_received(mut self, received: serde_json::Value) -> Self {
        self.received = Some(received);
        self
    }

    pub fn with_docs_hint(mut self, hint: impl Into<String>) -> Self {
        self.docs_hint = Some(hint.into());
        self
    }

    /// Map a pipeline failure onto the public error contract.
    pub fn from_pipeline(err: &PipelineError, request_id: impl Into<String>) -> Self {
        match err {
            PipelineError::InvalidSnapshot(inner) => {
                let error = Self::new(codes::VALIDATION_FAILED, inner.to_string(), request_id)
                    .with_docs_hint(
                        "Readings must be finite numbers inside plausible human ranges; omit a reading rather than sending a placeholder.",
                    );
                match inner.field() {
                    Some(field) => error.with_field(field),
                    None => error,
                }
            }
            PipelineError::UnknownScaffold(unknown) => {
                let hint = match unknown.suggestion {
                    Some(suggestion) => format!("Did you mean '{suggestion}'?"),
                    None => "Omit scaffold_id to let the router choose.".to_string(),
                };
                Self::new(codes::UNKNOWN_SCAFFOLD, unknown.to_string(), request_id)
                    .with_field("scaffold_id")
                    .with_received(serde_json::Value::String(unknown.requested.clone()))
                    .with_docs_hint(hint)
            }
            PipelineError::InvalidArgument { field, message } => {
                Self::new(codes::VALIDATION_FAILED, message.clone(), request_id).with_field(*field)
            }
            PipelineError::NoScaffoldAvailable(_) => Self::new(
                codes::SCAFFOLD_UNAVAILABLE,
                "No reasoning scaffold is available to interpret this request.",
                request_id,
            ),
        }
    }

    pub fn is_client_error(&self) -> bool {
        matches!(
            self.error.as_str(),
            codes::VALIDATION_FAILED | codes::UNKNOWN_SCAFFOLD | codes::NOT_FOUND
        )
    }
}

/// Error codes used across the API and tool surface
pub mod codes {
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const UNKNOWN_SCAFFOLD: &str = "unknown_scaffold";
    pub const NOT_FOUND: &str = "not_found";
    pub const SCAFFOLD_UNAVAILABLE: &str = "scaffold_unavailable";
    pub const INTERNAL_ERROR: &str = "internal_error";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{ScaffoldId, UnknownScaffold};
    use crate::snapshot::SnapshotError;

    #[test]
    fn snapshot_errors_map_to_validation_failed_with_field() {
        let err = PipelineError::InvalidSnapshot(SnapshotError::OutOfRange {
            field: "vitals.spo2_pct",
            value: 140.0,
            min: 50.0,
            max: 100.0,
        });
        let api = ApiError::from_pipeline(&err, "req-1");
        assert_eq!(api.error, codes::VALIDATION_FAILED);
        assert_eq!(api.field.as_deref(), Some("vitals.spo2_pct"));
        assert!(api.is_client_error());
    }

    #[test]
    fn unknown_scaffold_carries_suggestion() {
        let err = PipelineError::UnknownScaffold(UnknownScaffold {
            requested: "personal_health_signal.grwth".to_string(),
            suggestion: Some("personal_health_signal.growth"),
        });
        let api = ApiError::from_pipeline(&err, "req-2");
        assert_eq!(api.error, codes::UNKNOWN_SCAFFOLD);
        assert_eq!(
            api.docs_hint.as_deref(),
            Some("Did you mean 'personal_health_signal.growth'?")
        );
    }

    #[test]
    fn missing_scaffold_hides_internal_detail() {
        let err = PipelineError::NoScaffoldAvailable(ScaffoldId::Growth);
        let api = ApiError::from_pipeline(&err, "req-3");
        assert_eq!(api.error, codes::SCAFFOLD_UNAVAILABLE);
        assert!(!api.message.contains("growth"));
        assert!(!api.is_client_error());
    }
}
