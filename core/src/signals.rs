use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::snapshot::{
    ActivityMetrics, Biometrics, CareItem, CareStatus, HealthSnapshot, Period, PreventiveCare,
    StrainBalance, Vitals,
};

/// Section fallback when vitals or activity are wholly absent.
pub const FALLBACK_NO_DATA: f64 = 0.3;
/// Neutral value for a missing leaf input inside a present section.
pub const FALLBACK_PARTIAL: f64 = 0.5;
/// Cautious value for missing labs (and for metabolic with neither labs nor biometrics).
pub const FALLBACK_NO_LABS: f64 = 0.4;
/// No active prescriptions is a known healthy state, not missing data.
pub const GOOD_DEFAULT: f64 = 0.7;

/// Detector profile the four signals are registered under.
pub const PROFILE_NAME: &str = "consumer_health";

/// The four health signals, in detector layer order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    VitalStability,
    MetabolicBalance,
    ActivityRecovery,
    PreventiveReadiness,
}

impl Signal {
    pub const ALL: [Signal; 4] = [
        Signal::VitalStability,
        Signal::MetabolicBalance,
        Signal::ActivityRecovery,
        Signal::PreventiveReadiness,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::VitalStability => "vital_stability",
            Self::MetabolicBalance => "metabolic_balance",
            Self::ActivityRecovery => "activity_recovery",
            Self::PreventiveReadiness => "preventive_readiness",
        }
    }

    /// Weight of the signal in the overall health index.
    pub const fn weight(self) -> f64 {
        match self {
            Self::VitalStability => 0.25,
            Self::MetabolicBalance => 0.30,
            Self::ActivityRecovery => 0.20,
            Self::PreventiveReadiness => 0.25,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::VitalStability => "Vital stability",
            Self::MetabolicBalance => "Metabolic balance",
            Self::ActivityRecovery => "Activity & recovery",
            Self::PreventiveReadiness => "Preventive readiness",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One normalized contributor to a signal score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SubSignal {
    pub name: String,
    pub weight: f64,
    pub value: f64,
    pub fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SignalScore {
    pub value: f64,
    pub contributors: Vec<SubSignal>,
    /// True when any contributor (or the whole section) was imputed.
    pub used_fallback: bool,
}

impl SignalScore {
    fn section_fallback(value: f64) -> Self {
        Self {
            value,
            contributors: Vec::new(),
            used_fallback: true,
        }
    }

    fn blend(contributors: Vec<SubSignal>) -> Self {
        let total_weight: f64 = contributors.iter().map(|c| c.weight).sum();
        let value = if total_weight > 0.0 {
            contributors.iter().map(|c| c.weight * c.value).sum::<f64>() / total_weight
        } else {
            FALLBACK_PARTIAL
        };
        let used_fallback = contributors.iter().any(|c| c.fallback);
        Self {
            value: clamp01(value),
            contributors,
            used_fallback,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SignalScoreSet {
    pub period: Period,
    pub vital_stability: SignalScore,
    pub metabolic_balance: SignalScore,
    pub activity_recovery: SignalScore,
    pub preventive_readiness: SignalScore,
}

impl SignalScoreSet {
    /// Build a set from bare values with no fallbacks or contributors.
    pub fn from_values(period: Period, values: [f64; 4]) -> Self {
        let score = |value: f64| SignalScore {
            value: clamp01(value),
            contributors: Vec::new(),
            used_fallback: false,
        };
        Self {
            period,
            vital_stability: score(values[0]),
            metabolic_balance: score(values[1]),
            activity_recovery: score(values[2]),
            preventive_readiness: score(values[3]),
        }
    }

    pub fn get(&self, signal: Signal) -> &SignalScore {
        match signal {
            Signal::VitalStability => &self.vital_stability,
            Signal::MetabolicBalance => &self.metabolic_balance,
            Signal::ActivityRecovery => &self.activity_recovery,
            Signal::PreventiveReadiness => &self.preventive_readiness,
        }
    }

    /// Values in layer order.
    pub fn values(&self) -> [f64; 4] {
        Signal::ALL.map(|signal| self.get(signal).value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Signal, &SignalScore)> {
        Signal::ALL.into_iter().map(|signal| (signal, self.get(signal)))
    }

    pub fn any_fallback(&self) -> bool {
        self.iter().any(|(_, score)| score.used_fallback)
    }

    /// Weighted overall health index.
    pub fn overall(&self) -> f64 {
        clamp01(
            self.iter()
                .map(|(signal, score)| signal.weight() * score.value)
                .sum(),
        )
    }

    pub fn strongest(&self) -> Signal {
        // Ties go to the earlier signal in layer order.
        self.iter()
            .fold(None::<(Signal, f64)>, |best, (signal, score)| match best {
                Some((_, v)) if v >= score.value => best,
                _ => Some((signal, score.value)),
            })
            .map_or(Signal::VitalStability, |(signal, _)| signal)
    }

    pub fn weakest(&self) -> Signal {
        self.iter()
            .fold(None::<(Signal, f64)>, |worst, (signal, score)| match worst {
                Some((_, v)) if v <= score.value => worst,
                _ => Some((signal, score.value)),
            })
            .map_or(Signal::VitalStability, |(signal, _)| signal)
    }
}

pub(crate) fn clamp01(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

pub(crate) fn round_to(value: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    (value * factor).round() / factor
}

fn measured(name: &str, weight: f64, value: f64) -> SubSignal {
    SubSignal {
        name: name.to_string(),
        weight,
        value: clamp01(value),
        fallback: false,
    }
}

fn imputed(name: &str, weight: f64, value: f64) -> SubSignal {
    SubSignal {
        name: name.to_string(),
        weight,
        value,
        fallback: true,
    }
}

fn leaf(name: &str, weight: f64, reading: Option<f64>, normalize: impl Fn(f64) -> f64) -> SubSignal {
    match reading {
        Some(raw) => measured(name, weight, normalize(raw)),
        None => imputed(name, weight, FALLBACK_PARTIAL),
    }
}

/// Translate a snapshot into the four bounded signal scores.
///
/// Pure and deterministic. Missing sections use a section fallback and missing
/// leaves inside a present section use a neutral value; both set
/// `used_fallback` on the affected score.
pub fn translate(snapshot: &HealthSnapshot, period: Period) -> SignalScoreSet {
    SignalScoreSet {
        period,
        vital_stability: vital_stability(snapshot.vitals.as_ref()),
        metabolic_balance: metabolic_balance(snapshot),
        activity_recovery: activity_recovery(snapshot.activity.as_ref()),
        preventive_readiness: preventive_readiness(snapshot.preventive.as_ref()),
    }
}

fn vital_stability(vitals: Option<&Vitals>) -> SignalScore {
    let Some(vitals) = vitals else {
        return SignalScore::section_fallback(FALLBACK_NO_DATA);
    };

    let heart_rate = leaf("heart_rate", 0.30, vitals.resting_heart_rate_bpm, |bpm| {
        let mut value = clamp01(1.0 - (bpm - 65.0).abs() / 25.0);
        match vitals.resting_heart_rate_trend_30d {
            Some(trend) if trend < 0.0 => value += 0.05,
            Some(trend) if trend > 3.0 => value -= 0.05,
            _ => {}
        }
        value
    });

    let blood_pressure = match (vitals.systolic_mmhg, vitals.diastolic_mmhg) {
        (None, None) => imputed("blood_pressure", 0.35, FALLBACK_PARTIAL),
        (systolic, diastolic) => {
            let sys_penalty = systolic.map_or(0.0, |sys| (sys - 120.0).max(0.0) / 40.0);
            let dia_penalty = diastolic.map_or(0.0, |dia| (dia - 80.0).max(0.0) / 20.0);
            let mut sub = measured(
                "blood_pressure",
                0.35,
                1.0 - (sys_penalty + dia_penalty) / 2.0,
            );
            sub.fallback = systolic.is_none() || diastolic.is_none();
            sub
        }
    };

    let hrv = leaf("hrv", 0.20, vitals.hrv_ms, |ms| ms / 60.0);
    let spo2 = leaf("spo2", 0.15, vitals.spo2_pct, |pct| (pct - 90.0) / 8.0);

    SignalScore::blend(vec![heart_rate, blood_pressure, hrv, spo2])
}

fn metabolic_balance(snapshot: &HealthSnapshot) -> SignalScore {
    let has_labs = snapshot.lab_count() > 0;
    let biometrics = snapshot.biometrics.as_ref();
    if !has_labs && biometrics.is_none() {
        return SignalScore::section_fallback(FALLBACK_NO_LABS);
    }

    let lab_value = |name: &str| snapshot.lab(name).map(|lab| lab.value);

    let glucose_parts: Vec<f64> = [
        lab_value("fasting glucose").map(|g| clamp01(1.0 - (g - 85.0).max(0.0) / 40.0)),
        lab_value("hba1c").map(|h| clamp01(1.0 - (h - 5.0).max(0.0) / 1.5)),
    ]
    .into_iter()
    .flatten()
    .collect();
    let glucose = if glucose_parts.is_empty() {
        imputed("glucose", 0.30, FALLBACK_NO_LABS)
    } else {
        measured(
            "glucose",
            0.30,
            glucose_parts.iter().sum::<f64>() / glucose_parts.len() as f64,
        )
    };

    let ldl = lab_value("ldl cholesterol");
    let hdl = lab_value("hdl cholesterol");
    let cholesterol = if ldl.is_none() && hdl.is_none() {
        imputed("cholesterol", 0.35, FALLBACK_NO_LABS)
    } else {
        let ldl_value = ldl.map_or(FALLBACK_PARTIAL, |v| clamp01(1.0 - (v - 70.0).max(0.0) / 100.0));
        let hdl_value = hdl.map_or(FALLBACK_PARTIAL, |v| clamp01((v - 30.0) / 40.0));
        let mut sub = measured("cholesterol", 0.35, 0.6 * ldl_value + 0.4 * hdl_value);
        sub.fallback = ldl.is_none() || hdl.is_none();
        sub
    };

    let bmi = bmi_sub_signal(biometrics);

    let triglycerides = match lab_value("triglycerides") {
        Some(t) => measured("triglycerides", 0.15, 1.0 - (t - 100.0).max(0.0) / 100.0),
        None => imputed("triglycerides", 0.15, FALLBACK_NO_LABS),
    };

    SignalScore::blend(vec![glucose, cholesterol, bmi, triglycerides])
}

fn bmi_sub_signal(biometrics: Option<&Biometrics>) -> SubSignal {
    let reading = biometrics.and_then(|b| b.bmi);
    leaf("bmi", 0.20, reading, |bmi| {
        let mut value = clamp01(1.0 - ((bmi - 22.0).abs() - 3.0).max(0.0) / 8.0);
        if biometrics
            .and_then(|b| b.bmi_trend_90d)
            .is_some_and(|trend| trend < 0.0)
        {
            value += 0.05;
        }
        value
    })
}

fn activity_recovery(activity: Option<&ActivityMetrics>) -> SignalScore {
    let Some(activity) = activity else {
        return SignalScore::section_fallback(FALLBACK_NO_DATA);
    };

    let exercise = two_part(
        "exercise",
        0.35,
        (0.6, activity.sessions_per_week.map(|s| clamp01(s / 4.0))),
        (0.4, activity.consistency_pct.map(|pct| pct / 100.0)),
    );
    let sleep = two_part(
        "sleep",
        0.35,
        (
            0.5,
            activity
                .sleep_duration_hours
                .map(|hours| clamp01(1.0 - (hours - 8.0).abs() / 3.0)),
        ),
        (0.5, activity.sleep_quality_score.map(|q| q / 100.0)),
    );
    let mut recovery = leaf("recovery", 0.30, activity.recovery_score, |score| score / 100.0);
    if activity.strain_balance == Some(StrainBalance::High) {
        recovery.value = clamp01(recovery.value - 0.1);
    }

    SignalScore::blend(vec![exercise, sleep, recovery])
}

/// Sub-signal composed of two weighted parts; a missing part is neutral.
fn two_part(
    name: &str,
    weight: f64,
    (first_weight, first): (f64, Option<f64>),
    (second_weight, second): (f64, Option<f64>),
) -> SubSignal {
    if first.is_none() && second.is_none() {
        return imputed(name, weight, FALLBACK_PARTIAL);
    }
    let value = first_weight * first.unwrap_or(FALLBACK_PARTIAL)
        + second_weight * second.unwrap_or(FALLBACK_PARTIAL);
    let mut sub = measured(name, weight, value);
    sub.fallback = first.is_none() || second.is_none();
    sub
}

fn preventive_readiness(preventive: Option<&PreventiveCare>) -> SignalScore {
    let Some(preventive) = preventive else {
        return SignalScore::section_fallback(FALLBACK_PARTIAL);
    };

    let screenings = currency("screenings", 0.40, preventive.screenings.as_ref());
    let vaccinations = currency("vaccinations", 0.30, preventive.vaccinations.as_ref());

    let medication = match &preventive.medications {
        None => imputed("medication", 0.30, FALLBACK_PARTIAL),
        Some(meds) if meds.active_prescriptions == 0 => measured("medication", 0.30, GOOD_DEFAULT),
        Some(meds) => leaf("medication", 0.30, meds.adherence_pct, |pct| pct / 100.0),
    };

    SignalScore::blend(vec![screenings, vaccinations, medication])
}

fn currency(
    name: &str,
    weight: f64,
    items: Option<&std::collections::BTreeMap<String, CareItem>>,
) -> SubSignal {
    match items {
        Some(items) if !items.is_empty() => {
            let current = items
                .values()
                .filter(|item| item.status == CareStatus::Current)
                .count();
            measured(name, weight, current as f64 / items.len() as f64)
        }
        _ => imputed(name, weight, FALLBACK_PARTIAL),
    }
}
