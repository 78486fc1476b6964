use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use utoipa::ToSchema;

use crate::routing::ScaffoldId;

/// A reasoning scaffold: framing, steps and guardrails for one kind of answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ScaffoldDescriptor {
    #[schema(value_type = String, example = "personal_health_signal")]
    pub id: ScaffoldId,
    pub version: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    pub framing: Framing,
    #[serde(default)]
    pub reasoning_steps: Vec<String>,
    #[serde(default)]
    pub domain_knowledge: Vec<String>,
    pub output: OutputCalibration,
    pub guardrails: GuardrailRules,
    #[serde(default)]
    pub context_exports: Vec<ContextField>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Framing {
    pub role: String,
    pub perspective: String,
    pub tone: String,
    #[serde(default)]
    pub tone_variants: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OutputCalibration {
    /// Allowed output formats; the first one is the default.
    pub formats: Vec<String>,
    #[serde(default)]
    pub max_length_guidance: String,
    #[serde(default)]
    pub must_include: Vec<String>,
    #[serde(default)]
    pub never_include: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct GuardrailRules {
    /// Category (e.g. "making medical diagnoses") to forbidden phrases.
    pub prohibited_patterns: BTreeMap<String, Vec<String>>,
    pub disclaimers: Vec<String>,
    #[serde(default)]
    pub escalation_triggers: Vec<String>,
    #[serde(default)]
    pub prohibited_actions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ContextField {
    pub field_name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LintIssue {
    pub field: &'static str,
    pub message: String,
}

impl ScaffoldDescriptor {
    pub fn default_format(&self) -> Option<&str> {
        self.output.formats.first().map(String::as_str)
    }

    pub fn exports_field(&self, name: &str) -> bool {
        self.context_exports.iter().any(|f| f.field_name == name)
    }

    /// Structural checks a scaffold must pass before it may be registered.
    pub fn lint(&self) -> Vec<LintIssue> {
        let mut issues = Vec::new();
        let mut issue = |field: &'static str, message: &str| {
            issues.push(LintIssue {
                field,
                message: message.to_string(),
            });
        };

        if self.display_name.trim().is_empty() {
            issue("display_name", "display_name must not be empty");
        }
        let version = self.version.trim();
        if version.is_empty()
            || !version.chars().all(|c| c.is_ascii_digit() || c == '.')
            || version.split('.').any(str::is_empty)
        {
            issue("version", "version must look like 1.0 or 1.2.3");
        }
        if self.framing.role.trim().is_empty() {
            issue("framing.role", "role must not be empty");
        }
        if self.reasoning_steps.is_empty() {
            issue("reasoning_steps", "at least one reasoning step is required");
        }
        if self.output.formats.is_empty() {
            issue("output.formats", "at least one output format is required");
        }
        if self.guardrails.disclaimers.iter().all(|d| d.trim().is_empty()) {
            issue("guardrails.disclaimers", "at least one disclaimer is required");
        }
        if self.guardrails.prohibited_patterns.is_empty() {
            issue(
                "guardrails.prohibited_patterns",
                "at least one prohibited pattern category is required",
            );
        }
        for (category, phrases) in &self.guardrails.prohibited_patterns {
            if phrases.iter().all(|p| p.trim().is_empty()) {
                issues.push(LintIssue {
                    field: "guardrails.prohibited_patterns",
                    message: format!("category '{category}' has no phrases"),
                });
            }
        }
        issues
    }
}

#[derive(Debug, Error)]
pub enum ScaffoldRegistryError {
    #[error("scaffold '{0}' is registered more than once")]
    Duplicate(ScaffoldId),

    #[error("scaffold '{id}' failed lint: {}", join_issues(.issues))]
    Invalid { id: ScaffoldId, issues: Vec<LintIssue> },

    #[error("neither scaffold '{requested}' nor the neutral scaffold is registered")]
    NoScaffoldAvailable { requested: ScaffoldId },
}

fn join_issues(issues: &[LintIssue]) -> String {
    issues
        .iter()
        .map(|issue| format!("{}: {}", issue.field, issue.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Immutable set of scaffold descriptors, populated once at startup.
#[derive(Debug, Clone, Default)]
pub struct ScaffoldRegistry {
    descriptors: BTreeMap<ScaffoldId, ScaffoldDescriptor>,
}

impl ScaffoldRegistry {
    pub fn from_descriptors(
        descriptors: impl IntoIterator<Item = ScaffoldDescriptor>,
    ) -> Result<Self, ScaffoldRegistryError> {
        let mut map = BTreeMap::new();
        for descriptor in descriptors {
            let issues = descriptor.lint();
            if !issues.is_empty() {
                return Err(ScaffoldRegistryError::Invalid {
                    id: descriptor.id,
                    issues,
                });
            }
            let id = descriptor.id;
            if map.insert(id, descriptor).is_some() {
                return Err(ScaffoldRegistryError::Duplicate(id));
            }
        }
        Ok(Self { descriptors: map })
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn get(&self, id: ScaffoldId) -> Option<&ScaffoldDescriptor> {
        self.descriptors.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScaffoldDescriptor> {
        self.descriptors.values()
    }

    /// Look up `id`, falling back to the neutral scaffold.
    pub fn resolve(&self, id: ScaffoldId) -> Result<&ScaffoldDescriptor, ScaffoldRegistryError> {
        if let Some(descriptor) = self.get(id) {
            return Ok(descriptor);
        }
        match self.get(ScaffoldId::Neutral) {
            Some(neutral) => {
                tracing::warn!(
                    requested = id.as_str(),
                    "scaffold not registered, using neutral scaffold"
                );
                Ok(neutral)
            }
            None => Err(ScaffoldRegistryError::NoScaffoldAvailable { requested: id }),
        }
    }
}

/// Prompt handed to a narrative generator.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct AssembledPrompt {
    pub system_message: String,
    pub user_message: String,
    /// Privacy-filtered data the user message was built from.
    pub data_context: Value,
    pub metadata: PromptMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PromptMetadata {
    #[schema(value_type = String)]
    pub scaffold_id: ScaffoldId,
    pub scaffold_version: String,
    pub tone: String,
    /// Name of the tone variant actually applied, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tone_variant: Option<String>,
    pub output_format: String,
}

/// Options a caller may pass to shape the prompt.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions<'a> {
    pub tone_variant: Option<&'a str>,
    pub output_format: Option<&'a str>,
    pub cross_domain_context: Option<&'a Value>,
}

fn bullet_section(out: &mut String, heading: &str, intro: Option<&str>, items: &[String]) {
    if items.is_empty() {
        return;
    }
    let _ = write!(out, "\n\n## {heading}");
    if let Some(intro) = intro {
        let _ = write!(out, "\n{intro}");
    }
    for item in items {
        let _ = write!(out, "\n- {item}");
    }
}

/// Assemble the scaffold, query and privacy-filtered data into a prompt.
///
/// Unknown tone variants and output formats fall back to the scaffold defaults.
pub fn render(
    descriptor: &ScaffoldDescriptor,
    query: &str,
    data_context: &Value,
    options: RenderOptions<'_>,
) -> AssembledPrompt {
    let tone_variant = options
        .tone_variant
        .filter(|name| descriptor.framing.tone_variants.contains_key(*name));
    let tone = tone_variant
        .and_then(|name| descriptor.framing.tone_variants.get(name))
        .unwrap_or(&descriptor.framing.tone)
        .clone();
    let output_format = options
        .output_format
        .filter(|format| descriptor.output.formats.iter().any(|f| f == format))
        .or_else(|| descriptor.default_format())
        .unwrap_or("structured_narrative")
        .to_string();

    let mut system = format!(
        "## Your Role\n{}\n\n## Your Perspective\n{}\n\n## Communication Tone\n{}",
        descriptor.framing.role, descriptor.framing.perspective, tone
    );
    if !descriptor.reasoning_steps.is_empty() {
        system.push_str("\n\n## Reasoning Steps\nFollow these steps in order:");
        for (index, step) in descriptor.reasoning_steps.iter().enumerate() {
            let _ = write!(system, "\n{}. {step}", index + 1);
        }
    }
    bullet_section(
        &mut system,
        "Domain Knowledge to Apply",
        None,
        &descriptor.domain_knowledge,
    );
    let _ = write!(system, "\n\n## Output Format\nFormat: {output_format}");
    if !descriptor.output.max_length_guidance.is_empty() {
        let _ = write!(
            system,
            "\nLength guidance: {}",
            descriptor.output.max_length_guidance
        );
    }
    bullet_section(
        &mut system,
        "Required Elements",
        Some("Your response MUST include:"),
        &descriptor.output.must_include,
    );
    bullet_section(
        &mut system,
        "Prohibited Elements",
        Some("Your response must NEVER include:"),
        &descriptor.output.never_include,
    );
    bullet_section(
        &mut system,
        "Required Disclaimers",
        Some("Include these where appropriate:"),
        &descriptor.guardrails.disclaimers,
    );
    bullet_section(
        &mut system,
        "Prohibited Actions",
        Some("You must NEVER:"),
        &descriptor.guardrails.prohibited_actions,
    );
    bullet_section(
        &mut system,
        "Escalation Triggers",
        Some("If any of these conditions are detected, recommend the user seek professional help:"),
        &descriptor.guardrails.escalation_triggers,
    );

    let mut user = format!("## User Request\n{query}");
    if !data_context.is_null() {
        let _ = write!(
            user,
            "\n\n## Health Data\n```json\n{}\n```",
            pretty(data_context)
        );
    }
    if let Some(cross) = options.cross_domain_context.filter(|v| !v.is_null()) {
        let _ = write!(
            user,
            "\n\n## Context From Other Domains\n```json\n{}\n```",
            pretty(cross)
        );
    }

    AssembledPrompt {
        system_message: system,
        user_message: user,
        data_context: data_context.clone(),
        metadata: PromptMetadata {
            scaffold_id: descriptor.id,
            scaffold_version: descriptor.version.clone(),
            tone,
            tone_variant: tone_variant.map(str::to_string),
            output_format,
        },
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
