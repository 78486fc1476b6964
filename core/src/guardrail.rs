use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::scaffold::ScaffoldDescriptor;

/// Narrative used whenever generated text cannot be shown.
pub const SAFE_FALLBACK_NARRATIVE: &str = "We could not produce a personalised summary this time. \
Your health signal scores above were calculated from your data and are still valid. \
For interpretation of specific readings or any symptoms, please talk with a qualified healthcare professional.";

/// Appended when generated text touches an escalation trigger.
pub const SEEK_CARE_ADVISORY: &str = "If you are experiencing any of the symptoms mentioned above, \
please contact a healthcare professional promptly. In an emergency, call your local emergency number.";

/// Share of a trigger's words that must appear in the text for it to match.
const TRIGGER_MATCH_RATIO: f64 = 0.6;

static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\p{L}\p{N}']+").expect("word regex is valid"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum GuardrailVerdict {
    Pass,
    Flagged { reasons: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct GuardrailResult {
    #[serde(flatten)]
    pub verdict: GuardrailVerdict,
    /// Text safe to show: repaired original, or the safe fallback when flagged.
    #[serde(skip)]
    pub text: String,
    pub notices: Vec<String>,
}

impl GuardrailResult {
    pub fn is_flagged(&self) -> bool {
        matches!(self.verdict, GuardrailVerdict::Flagged { .. })
    }

    /// Safe fallback used when no generated text is available at all.
    pub fn fallback(descriptor: &ScaffoldDescriptor, notice: &str) -> Self {
        let mut notices = vec![notice.to_string()];
        let text = append_disclaimers(SAFE_FALLBACK_NARRATIVE, descriptor, &mut notices);
        Self {
            verdict: GuardrailVerdict::Pass,
            text,
            notices,
        }
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn words(text: &str) -> Vec<String> {
    WORD_RE
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

fn append_disclaimers(
    text: &str,
    descriptor: &ScaffoldDescriptor,
    notices: &mut Vec<String>,
) -> String {
    let normalized = normalize(text);
    let missing: Vec<&str> = descriptor
        .guardrails
        .disclaimers
        .iter()
        .map(|d| d.trim())
        .filter(|d| !d.is_empty() && !normalized.contains(&normalize(d)))
        .collect();
    if missing.is_empty() {
        return text.to_string();
    }
    let mut out = format!("{text}\n\n---\nDisclaimers:");
    for disclaimer in missing {
        out.push_str("\n- ");
        out.push_str(disclaimer);
        notices.push(format!("disclaimer_appended: {disclaimer}"));
    }
    out
}

/// Check generated text against the scaffold's guardrail rules.
///
/// Prohibited phrases flag the text and replace it with the safe fallback.
/// Escalation triggers add a seek-care advisory. Missing disclaimers are
/// appended. Matching ignores case and whitespace runs.
pub fn validate(text: &str, descriptor: &ScaffoldDescriptor) -> GuardrailResult {
    let normalized = normalize(text);

    let mut reasons = Vec::new();
    for (category, phrases) in &descriptor.guardrails.prohibited_patterns {
        for phrase in phrases {
            let needle = normalize(phrase);
            if !needle.is_empty() && normalized.contains(&needle) {
                reasons.push(format!("prohibited_pattern: {category} ('{needle}')"));
            }
        }
    }

    let mut notices = Vec::new();
    if !reasons.is_empty() {
        tracing::warn!(
            scaffold = descriptor.id.as_str(),
            hits = reasons.len(),
            "generated text hit prohibited patterns, substituting safe fallback"
        );
        let text = append_disclaimers(SAFE_FALLBACK_NARRATIVE, descriptor, &mut notices);
        return GuardrailResult {
            verdict: GuardrailVerdict::Flagged { reasons },
            text,
            notices,
        };
    }

    let present: BTreeSet<String> = words(text).into_iter().collect();
    let mut repaired = text.to_string();
    let mut advisory_needed = false;
    for trigger in &descriptor.guardrails.escalation_triggers {
        let trigger_words = words(trigger);
        if trigger_words.is_empty() {
            continue;
        }
        let hits = trigger_words.iter().filter(|w| present.contains(*w)).count();
        if hits as f64 >= trigger_words.len() as f64 * TRIGGER_MATCH_RATIO {
            notices.push(format!("escalation_trigger: {trigger}"));
            advisory_needed = true;
        }
    }
    if advisory_needed {
        repaired.push_str("\n\n");
        repaired.push_str(SEEK_CARE_ADVISORY);
    }

    let text = append_disclaimers(&repaired, descriptor, &mut notices);
    GuardrailResult {
        verdict: GuardrailVerdict::Pass,
        text,
        notices,
    }
}
