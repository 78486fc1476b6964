use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Bundle of raw health readings for one analysis request.
///
/// Every section and every reading is optional. `None` means "not measured",
/// which the translator treats differently from a measured zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct HealthSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vitals: Option<Vitals>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labs: Option<Vec<LabResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub biometrics: Option<Biometrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity: Option<ActivityMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preventive: Option<PreventiveCare>,
    /// Free-form label of where the readings came from (e.g. "apple_health").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_source: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Vitals {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resting_heart_rate_bpm: Option<f64>,
    /// Change in resting heart rate over the last 30 days (negative = improving).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resting_heart_rate_trend_30d: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub systolic_mmhg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diastolic_mmhg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hrv_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spo2_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LabResult {
    pub test_name: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Biometrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bmi: Option<f64>,
    /// BMI change over 90 days (negative = trending down).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bmi_trend_90d: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ActivityMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sessions_per_week: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consistency_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_duration_hours: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_quality_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strain_balance: Option<StrainBalance>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StrainBalance {
    Low,
    Balanced,
    SlightlyHigh,
    High,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PreventiveCare {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenings: Option<BTreeMap<String, CareItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vaccinations: Option<BTreeMap<String, CareItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medications: Option<Medications>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CareItem {
    pub status: CareStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_date: Option<chrono::NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CareStatus {
    Current,
    Due,
    Overdue,
    NeverDone,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Medications {
    pub active_prescriptions: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adherence_pct: Option<f64>,
}

/// Analysis window requested by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum Period {
    #[serde(rename = "last_7_days")]
    Last7Days,
    #[default]
    #[serde(rename = "last_30_days")]
    Last30Days,
    #[serde(rename = "last_90_days")]
    Last90Days,
    #[serde(rename = "last_180_days")]
    Last180Days,
    #[serde(rename = "last_365_days")]
    Last365Days,
}

impl Period {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Last7Days => "last_7_days",
            Self::Last30Days => "last_30_days",
            Self::Last90Days => "last_90_days",
            Self::Last180Days => "last_180_days",
            Self::Last365Days => "last_365_days",
        }
    }

    pub const fn days(self) -> u32 {
        match self {
            Self::Last7Days => 7,
            Self::Last30Days => 30,
            Self::Last90Days => 90,
            Self::Last180Days => 180,
            Self::Last365Days => 365,
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = SnapshotError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "last_7_days" => Ok(Self::Last7Days),
            "last_30_days" => Ok(Self::Last30Days),
            "last_90_days" => Ok(Self::Last90Days),
            "last_180_days" => Ok(Self::Last180Days),
            "last_365_days" => Ok(Self::Last365Days),
            other => Err(SnapshotError::InvalidPeriod(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SnapshotError {
    #[error("{field} must be a finite number")]
    NotFinite { field: &'static str },

    #[error("{field} = {value} is outside the plausible range {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{field}: {message}")]
    Inconsistent {
        field: &'static str,
        message: String,
    },

    #[error("unknown period '{0}' (expected last_7_days, last_30_days, last_90_days, last_180_days or last_365_days)")]
    InvalidPeriod(String),
}

impl SnapshotError {
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::NotFinite { field }
            | Self::OutOfRange { field, .. }
            | Self::Inconsistent { field, .. } => Some(field),
            Self::InvalidPeriod(_) => Some("period"),
        }
    }
}

fn check_range(
    field: &'static str,
    value: Option<f64>,
    min: f64,
    max: f64,
) -> Result<(), SnapshotError> {
    let Some(value) = value else {
        return Ok(());
    };
    if !value.is_finite() {
        return Err(SnapshotError::NotFinite { field });
    }
    if value < min || value > max {
        return Err(SnapshotError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

fn check_finite(field: &'static str, value: Option<f64>) -> Result<(), SnapshotError> {
    match value {
        Some(v) if !v.is_finite() => Err(SnapshotError::NotFinite { field }),
        _ => Ok(()),
    }
}

impl HealthSnapshot {
    /// Reject physiologically impossible or malformed readings.
    ///
    /// Runs before translation. Missing readings are fine; present readings
    /// must be finite and inside a plausible human range.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        if let Some(vitals) = &self.vitals {
            check_range(
                "vitals.resting_heart_rate_bpm",
                vitals.resting_heart_rate_bpm,
                20.0,
                250.0,
            )?;
            check_finite(
                "vitals.resting_heart_rate_trend_30d",
                vitals.resting_heart_rate_trend_30d,
            )?;
            check_range("vitals.systolic_mmhg", vitals.systolic_mmhg, 50.0, 300.0)?;
            check_range("vitals.diastolic_mmhg", vitals.diastolic_mmhg, 20.0, 200.0)?;
            if let (Some(sys), Some(dia)) = (vitals.systolic_mmhg, vitals.diastolic_mmhg) {
                if dia >= sys {
                    return Err(SnapshotError::Inconsistent {
                        field: "vitals.diastolic_mmhg",
                        message: format!(
                            "diastolic pressure ({dia}) must be lower than systolic pressure ({sys})"
                        ),
                    });
                }
            }
            check_range("vitals.hrv_ms", vitals.hrv_ms, 0.0, 400.0)?;
            check_range("vitals.spo2_pct", vitals.spo2_pct, 50.0, 100.0)?;
        }

        if let Some(labs) = &self.labs {
            for lab in labs {
                if lab.test_name.trim().is_empty() {
                    return Err(SnapshotError::Inconsistent {
                        field: "labs.test_name",
                        message: "lab test_name must not be empty".to_string(),
                    });
                }
                check_range("labs.value", Some(lab.value), 0.0, 10_000.0)?;
            }
        }

        if let Some(biometrics) = &self.biometrics {
            check_range("biometrics.bmi", biometrics.bmi, 10.0, 80.0)?;
            check_finite("biometrics.bmi_trend_90d", biometrics.bmi_trend_90d)?;
        }

        if let Some(activity) = &self.activity {
            check_range(
                "activity.sessions_per_week",
                activity.sessions_per_week,
                0.0,
                50.0,
            )?;
            check_range("activity.consistency_pct", activity.consistency_pct, 0.0, 100.0)?;
            check_range(
                "activity.sleep_duration_hours",
                activity.sleep_duration_hours,
                0.0,
                24.0,
            )?;
            check_range(
                "activity.sleep_quality_score",
                activity.sleep_quality_score,
                0.0,
                100.0,
            )?;
            check_range("activity.recovery_score", activity.recovery_score, 0.0, 100.0)?;
        }

        if let Some(medications) = self
            .preventive
            .as_ref()
            .and_then(|preventive| preventive.medications.as_ref())
        {
            check_range(
                "preventive.medications.adherence_pct",
                medications.adherence_pct,
                0.0,
                100.0,
            )?;
        }

        Ok(())
    }

    pub fn systolic_mmhg(&self) -> Option<f64> {
        self.vitals.as_ref().and_then(|v| v.systolic_mmhg)
    }

    /// Case-insensitive lab lookup by test name.
    pub fn lab(&self, test_name: &str) -> Option<&LabResult> {
        self.labs.as_ref()?.iter().find(|lab| {
            lab.test_name
                .trim()
                .eq_ignore_ascii_case(test_name.trim())
        })
    }

    pub fn lab_count(&self) -> usize {
        self.labs.as_ref().map_or(0, Vec::len)
    }
}
