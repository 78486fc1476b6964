use std::collections::BTreeMap;
use std::fmt::Write as _;

use pulse_core::pipeline::{GenerationError, NarrativeGenerator};
use pulse_core::routing::ScaffoldId;
use pulse_core::scaffold::AssembledPrompt;
use pulse_core::signals::Signal;
use pulse_core::snapshot::Period;
use serde_json::Value;

/// Deterministic narrator built from the privacy-filtered data context.
///
/// Runs in-process, so nothing leaves the device and the audit trail
/// records `llm_disclosed = false`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateNarrator;

struct Reading {
    period_days: Option<u32>,
    signals: BTreeMap<Signal, f64>,
    friction_level: String,
    friction: f64,
    coherence: f64,
    emergence_window: bool,
    metrics: Vec<String>,
}

impl Reading {
    fn from_context(context: &Value) -> Result<Self, GenerationError> {
        let signals: BTreeMap<Signal, f64> = context
            .get("signals")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| GenerationError::Failed(format!("unreadable signals: {e}")))?
            .unwrap_or_default();
        if signals.len() != Signal::ALL.len() {
            return Err(GenerationError::Failed(
                "data context is missing signal scores".to_string(),
            ));
        }

        let detection = context.get("detection").cloned().unwrap_or(Value::Null);
        Ok(Self {
            period_days: context
                .get("period")
                .and_then(Value::as_str)
                .and_then(|raw| raw.parse::<Period>().ok())
                .map(Period::days),
            signals,
            friction_level: detection
                .get("friction_level")
                .and_then(Value::as_str)
                .unwrap_or("low")
                .to_string(),
            friction: detection.get("friction").and_then(Value::as_f64).unwrap_or(0.0),
            coherence: detection.get("coherence").and_then(Value::as_f64).unwrap_or(1.0),
            emergence_window: detection
                .get("emergence_window")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            metrics: context.get("metrics").map(friendly_metrics).unwrap_or_default(),
        })
    }

    fn overall(&self) -> f64 {
        self.signals
            .iter()
            .map(|(signal, value)| signal.weight() * value)
            .sum()
    }

    fn extremes(&self) -> ((Signal, f64), (Signal, f64)) {
        let mut strongest = (Signal::VitalStability, f64::MIN);
        let mut weakest = (Signal::VitalStability, f64::MAX);
        for signal in Signal::ALL {
            let value = self.signals.get(&signal).copied().unwrap_or(0.0);
            if value > strongest.1 {
                strongest = (signal, value);
            }
            if value < weakest.1 {
                weakest = (signal, value);
            }
        }
        (strongest, weakest)
    }
}

fn friendly_metrics(metrics: &Value) -> Vec<String> {
    let mut lines = Vec::new();
    let number = |key: &str| metrics.get(key).and_then(Value::as_f64);
    if let Some(bpm) = number("resting_heart_rate_bpm") {
        lines.push(format!("resting heart rate {bpm:.0} bpm"));
    }
    let bp = metrics.get("blood_pressure");
    let systolic = bp.and_then(|v| v.get("systolic_avg")).and_then(Value::as_f64);
    let diastolic = bp.and_then(|v| v.get("diastolic_avg")).and_then(Value::as_f64);
    if let (Some(sys), Some(dia)) = (systolic, diastolic) {
        lines.push(format!("blood pressure {sys:.0}/{dia:.0} mmHg"));
    }
    if let Some(hours) = number("sleep_duration_hours") {
        lines.push(format!("{hours:.1} hours of sleep a night"));
    }
    if let Some(sessions) = number("exercise_sessions_per_week") {
        lines.push(format!("{sessions:.0} exercise sessions a week"));
    }
    lines
}

fn next_step(signal: Signal) -> &'static str {
    match signal {
        Signal::VitalStability => {
            "Log resting readings at the same time each day and add a few minutes of slow breathing in the evening."
        }
        Signal::MetabolicBalance => {
            "Add a short walk after your largest meal and keep routine lab check-ups on your calendar."
        }
        Signal::ActivityRecovery => {
            "Keep a consistent bedtime this week and add one light movement session."
        }
        Signal::PreventiveReadiness => {
            "Check which screenings are due and book the next one at a time that suits you."
        }
    }
}

fn framing(scaffold: ScaffoldId, gap: f64) -> String {
    match scaffold {
        ScaffoldId::Growth => "Your signals are high and closely aligned. This is a good moment to set one modest goal that builds on your strongest area.".to_string(),
        ScaffoldId::Risk => format!(
            "Your signals point in different directions, with a gap of {gap:.2} between your strongest and weakest areas. If this pattern persists, talk it through with a health professional."
        ),
        ScaffoldId::Neutral => {
            "Your signals are broadly balanced, without a strong divergence between areas.".to_string()
        }
    }
}

pub(crate) fn compose(prompt: &AssembledPrompt) -> Result<String, GenerationError> {
    let reading = Reading::from_context(&prompt.data_context)?;
    let ((strongest, strong_value), (weakest, weak_value)) = reading.extremes();
    let window = match reading.period_days {
        Some(days) => format!("Over the last {days} days"),
        None => "Over the selected period".to_string(),
    };
    let headline = format!(
        "{window} your overall health index is {:.2}.",
        reading.overall()
    );
    let strongest_line = format!("Strongest area: {} ({strong_value:.2}).", strongest.label());
    let weakest_line = format!("Area to focus on: {} ({weak_value:.2}).", weakest.label());
    let mut detection_line = format!(
        "Cross-signal friction is {} ({:.2}) and coherence is {:.2}.",
        reading.friction_level, reading.friction, reading.coherence
    );
    if reading.emergence_window {
        detection_line.push_str(" An alignment window is open.");
    }
    let framing = framing(prompt.metadata.scaffold_id, strong_value - weak_value);
    let step = format!("Next step: {}", next_step(weakest));

    let mut text = String::new();
    match prompt.metadata.output_format.as_str() {
        "bullet_summary" => {
            let _ = write!(text, "- {headline}\n- {strongest_line}\n- {weakest_line}\n- {detection_line}");
            for metric in &reading.metrics {
                let _ = write!(text, "\n- Recent readings: {metric}");
            }
            let _ = write!(text, "\n- {framing}\n- {step}");
        }
        "brief" => {
            let _ = write!(text, "{headline} {weakest_line} {step}");
        }
        _ => {
            let _ = write!(text, "{headline}\n\n{strongest_line} {weakest_line}\n\n{detection_line} {framing}");
            if !reading.metrics.is_empty() {
                let _ = write!(text, "\n\nRecent readings: {}.", reading.metrics.join(", "));
            }
            let _ = write!(text, "\n\n{step}");
        }
    }
    Ok(text)
}

impl NarrativeGenerator for TemplateNarrator {
    async fn generate(&self, prompt: &AssembledPrompt) -> Result<String, GenerationError> {
        compose(prompt)
    }

    fn discloses_externally(&self) -> bool {
        false
    }
}
