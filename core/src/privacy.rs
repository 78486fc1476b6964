use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use utoipa::ToSchema;

use crate::detection::{DetectionProvenance, DetectionResult, DetectionSummary, FallbackReason};
use crate::signals::{Signal, SignalScoreSet, SubSignal, round_to};
use crate::snapshot::{
    ActivityMetrics, Biometrics, HealthSnapshot, LabResult, Period, PreventiveCare, Vitals,
};

/// How much of the user's data may reach the narrative generator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PrivacyMode {
    #[default]
    Strict,
    Standard,
    Explicit,
}

impl PrivacyMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Standard => "standard",
            Self::Explicit => "explicit",
        }
    }
}

impl fmt::Display for PrivacyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("privacy_mode must be one of: strict | standard | explicit (got '{0}')")]
pub struct InvalidPrivacyMode(pub String);

impl FromStr for PrivacyMode {
    type Err = InvalidPrivacyMode;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "standard" => Ok(Self::Standard),
            "explicit" => Ok(Self::Explicit),
            other => Err(InvalidPrivacyMode(other.to_string())),
        }
    }
}

/// Data subset handed to the generator, tagged with the mode it was built under.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "privacy_mode", rename_all = "snake_case")]
pub enum PrivacyPayload {
    Strict(StrictContext),
    Standard(StandardContext),
    Explicit(ExplicitContext),
}

impl PrivacyPayload {
    pub fn mode(&self) -> PrivacyMode {
        match self {
            Self::Strict(_) => PrivacyMode::Strict,
            Self::Standard(_) => PrivacyMode::Standard,
            Self::Explicit(_) => PrivacyMode::Explicit,
        }
    }

    /// Whether any per-user measurement beyond scores leaves the pipeline.
    pub fn discloses_raw_data(&self) -> bool {
        !matches!(self, Self::Strict(_))
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrictContext {
    pub period: Period,
    pub signals: BTreeMap<Signal, f64>,
    pub detection: DetectionSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BloodPressure {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub systolic_avg: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diastolic_avg: Option<f64>,
}

/// User-friendly aggregates. Lab panels are reduced to a count.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FriendlyMetrics {
    pub resting_heart_rate_bpm: Option<f64>,
    pub blood_pressure: BloodPressure,
    pub hrv_ms: Option<f64>,
    pub sleep_duration_hours: Option<f64>,
    pub exercise_sessions_per_week: Option<f64>,
    pub bmi: Option<f64>,
    pub lab_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StandardContext {
    #[serde(flatten)]
    pub base: StrictContext,
    pub metrics: FriendlyMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExplicitContext {
    #[serde(flatten)]
    pub standard: StandardContext,
    pub signal_breakdown: BTreeMap<Signal, Vec<SubSignal>>,
    pub vitals: Option<Vitals>,
    pub labs: Option<Vec<LabResult>>,
    pub biometrics: Option<Biometrics>,
    pub activity: Option<ActivityMetrics>,
    pub preventive: Option<PreventiveCare>,
    pub detection_provenance: DetectionProvenance,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<FallbackReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detector_raw: Option<Value>,
}

fn rounded(value: Option<f64>) -> Option<f64> {
    value.map(|v| round_to(v, 2))
}

fn strict_context(scores: &SignalScoreSet, detection: &DetectionResult) -> StrictContext {
    StrictContext {
        period: scores.period,
        signals: scores
            .iter()
            .map(|(signal, score)| (signal, round_to(score.value, 4)))
            .collect(),
        detection: detection.summary(),
    }
}

fn friendly_metrics(snapshot: &HealthSnapshot) -> FriendlyMetrics {
    let vitals = snapshot.vitals.as_ref();
    let activity = snapshot.activity.as_ref();
    FriendlyMetrics {
        resting_heart_rate_bpm: rounded(vitals.and_then(|v| v.resting_heart_rate_bpm)),
        blood_pressure: BloodPressure {
            systolic_avg: rounded(vitals.and_then(|v| v.systolic_mmhg)),
            diastolic_avg: rounded(vitals.and_then(|v| v.diastolic_mmhg)),
        },
        hrv_ms: rounded(vitals.and_then(|v| v.hrv_ms)),
        sleep_duration_hours: rounded(activity.and_then(|a| a.sleep_duration_hours)),
        exercise_sessions_per_week: rounded(activity.and_then(|a| a.sessions_per_week)),
        bmi: rounded(snapshot.biometrics.as_ref().and_then(|b| b.bmi)),
        lab_count: snapshot.lab_count(),
    }
}

fn standard_context(
    scores: &SignalScoreSet,
    detection: &DetectionResult,
    snapshot: &HealthSnapshot,
) -> StandardContext {
    StandardContext {
        base: strict_context(scores, detection),
        metrics: friendly_metrics(snapshot),
        data_source: snapshot.data_source.clone(),
    }
}

/// Build the generator payload for `mode`.
///
/// Each tier is composed from typed inputs; `include_detector_raw` only has an
/// effect in explicit mode.
pub fn shape(
    mode: PrivacyMode,
    scores: &SignalScoreSet,
    detection: &DetectionResult,
    snapshot: &HealthSnapshot,
    include_detector_raw: bool,
) -> PrivacyPayload {
    match mode {
        PrivacyMode::Strict => PrivacyPayload::Strict(strict_context(scores, detection)),
        PrivacyMode::Standard => {
            PrivacyPayload::Standard(standard_context(scores, detection, snapshot))
        }
        PrivacyMode::Explicit => PrivacyPayload::Explicit(ExplicitContext {
            standard: standard_context(scores, detection, snapshot),
            signal_breakdown: scores
                .iter()
                .map(|(signal, score)| (signal, score.contributors.clone()))
                .collect(),
            vitals: snapshot.vitals.clone(),
            labs: snapshot.labs.clone(),
            biometrics: snapshot.biometrics.clone(),
            activity: snapshot.activity.clone(),
            preventive: snapshot.preventive.clone(),
            detection_provenance: detection.provenance,
            fallback_reason: detection.fallback_reason,
            detector_raw: if include_detector_raw {
                detection.raw.clone()
            } else {
                None
            },
        }),
    }
}
