use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::detection::{DetectionProvenance, FallbackReason};
use crate::privacy::PrivacyMode;
use crate::routing::ScaffoldId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Completed,
    Escalated,
    GuardrailFallback,
    GenerationFallback,
    Rejected,
}

impl AuditOutcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Escalated => "escalated",
            Self::GuardrailFallback => "guardrail_fallback",
            Self::GenerationFallback => "generation_fallback",
            Self::Rejected => "rejected",
        }
    }
}

/// PHI-free record of one tool invocation.
///
/// The input is stored only as a SHA-256 digest of its canonical JSON form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub tool_name: String,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub privacy_mode: PrivacyMode,
    /// True when user data beyond the fixed safety text reached the generator.
    pub llm_disclosed: bool,
    pub input_hash: String,
    pub outcome: AuditOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaffold_used: Option<ScaffoldId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detection_provenance: Option<DetectionProvenance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<FallbackReason>,
}

impl AuditEvent {
    pub fn new(tool_name: &str, privacy_mode: PrivacyMode, input: &Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            tool_name: tool_name.to_string(),
            timestamp: Utc::now(),
            duration_ms: 0,
            privacy_mode,
            llm_disclosed: false,
            input_hash: hash_input(input),
            outcome: AuditOutcome::Completed,
            scaffold_used: None,
            detection_provenance: None,
            fallback_reason: None,
        }
    }
}

/// Canonical JSON: object keys sorted at every depth, no whitespace.
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let body = entries
                .into_iter()
                .map(|(key, value)| {
                    format!(
                        "{}:{}",
                        Value::String(key.clone()),
                        canonical_json(value)
                    )
                })
                .collect::<Vec<_>>()
                .join(",");
            format!("{{{body}}}")
        }
        Value::Array(items) => {
            let body = items.iter().map(canonical_json).collect::<Vec<_>>().join(",");
            format!("[{body}]")
        }
        other => other.to_string(),
    }
}

/// SHA-256 (hex) of the canonical JSON form of `input`.
pub fn hash_input(input: &Value) -> String {
    hex::encode(Sha256::digest(canonical_json(input).as_bytes()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn hash_ignores_key_order() {
        let a = json!({ "b": 1, "a": { "y": [1, 2], "x": "z" } });
        let b = json!({ "a": { "x": "z", "y": [1, 2] }, "b": 1 });
        assert_eq!(hash_input(&a), hash_input(&b));
        assert_ne!(hash_input(&a), hash_input(&json!({ "b": 2 })));
    }

    #[test]
    fn canonical_form_is_compact_and_sorted() {
        let value = json!({ "z": true, "a": [null, "x"] });
        assert_eq!(canonical_json(&value), r#"{"a":[null,"x"],"z":true}"#);
    }

    #[test]
    fn event_never_contains_raw_input() {
        let input = json!({ "vitals": { "systolic_mmhg": 191.5 } });
        let event = AuditEvent::new("personal_health_signal", PrivacyMode::Strict, &input);
        let text = serde_json::to_string(&event).unwrap();
        assert!(!text.contains("191.5"));
        assert_eq!(event.input_hash.len(), 64);
        assert!(!event.llm_disclosed);
    }
}
