use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::signals::SignalScoreSet;
use crate::snapshot::HealthSnapshot;

/// Systolic pressure above this is treated as a hypertensive crisis.
pub const CRISIS_SYSTOLIC_MMHG: f64 = 180.0;
/// Every signal below this (with full confidence) is a systemic risk.
pub const SYSTEMIC_RISK_CEILING: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EscalationDecision {
    None,
    CrisisBp,
    SystemicRisk,
}

impl EscalationDecision {
    pub fn is_escalated(self) -> bool {
        !matches!(self, Self::None)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::CrisisBp => "crisis_bp",
            Self::SystemicRisk => "systemic_risk",
        }
    }
}

/// Decide whether the request must stop before any interpretation.
///
/// `systemic_risk` requires every score to be measured; any fallback in any
/// score makes the set ineligible. When both rules fire, `crisis_bp` wins.
pub fn check(snapshot: &HealthSnapshot, scores: &SignalScoreSet) -> EscalationDecision {
    let crisis = snapshot
        .systolic_mmhg()
        .is_some_and(|systolic| systolic > CRISIS_SYSTOLIC_MMHG);
    if crisis {
        return EscalationDecision::CrisisBp;
    }

    let systemic = scores
        .iter()
        .all(|(_, score)| score.value < SYSTEMIC_RISK_CEILING && !score.used_fallback);
    if systemic {
        return EscalationDecision::SystemicRisk;
    }

    EscalationDecision::None
}

/// Fixed, non-personalized response returned when the gate fires.
///
/// Carries no readings or scores so nothing about the user leaves the process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SafetyResponse {
    pub escalation: EscalationDecision,
    pub title: String,
    pub message: String,
    pub actions: Vec<String>,
    pub disclaimer: String,
}

impl SafetyResponse {
    pub fn for_decision(decision: EscalationDecision) -> Self {
        let (title, message) = match decision {
            EscalationDecision::CrisisBp => (
                "Your readings need prompt medical attention",
                "One of your recent readings is in a range where a clinician should be involved now, not later. This service will not interpret it.",
            ),
            _ => (
                "Please talk with a healthcare professional",
                "Several areas of your recent data look concerning at the same time. A clinician can look at the full picture with you.",
            ),
        };
        Self {
            escalation: decision,
            title: title.to_string(),
            message: message.to_string(),
            actions: vec![
                "Contact your doctor or a local urgent care service today.".to_string(),
                "Recheck the reading after resting quietly for five minutes to rule out a measurement error.".to_string(),
                "If you have chest pain, shortness of breath, severe headache, confusion or vision changes, call your local emergency number immediately.".to_string(),
            ],
            disclaimer: "This is general safety guidance, not a diagnosis or medical advice.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::translate;
    use crate::snapshot::{Period, Vitals};

    fn with_systolic(systolic: f64) -> HealthSnapshot {
        HealthSnapshot {
            vitals: Some(Vitals {
                systolic_mmhg: Some(systolic),
                diastolic_mmhg: Some(100.0),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn crisis_fires_strictly_above_threshold() {
        let scores = SignalScoreSet::from_values(Period::Last30Days, [0.5; 4]);
        assert_eq!(check(&with_systolic(180.0), &scores), EscalationDecision::None);
        assert_eq!(
            check(&with_systolic(190.0), &scores),
            EscalationDecision::CrisisBp
        );
    }

    #[test]
    fn systemic_risk_requires_all_scores_low() {
        let snapshot = HealthSnapshot::default();
        let low = SignalScoreSet::from_values(Period::Last30Days, [0.2, 0.1, 0.25, 0.29]);
        assert_eq!(check(&snapshot, &low), EscalationDecision::SystemicRisk);

        let one_ok = SignalScoreSet::from_values(Period::Last30Days, [0.2, 0.1, 0.3, 0.29]);
        assert_eq!(check(&snapshot, &one_ok), EscalationDecision::None);
    }

    #[test]
    fn any_fallback_blocks_systemic_risk() {
        let mut low = SignalScoreSet::from_values(Period::Last30Days, [0.2, 0.1, 0.25, 0.29]);
        low.activity_recovery.used_fallback = true;
        assert_eq!(
            check(&HealthSnapshot::default(), &low),
            EscalationDecision::None
        );
    }

    #[test]
    fn empty_snapshot_never_escalates() {
        let snapshot = HealthSnapshot::default();
        let scores = translate(&snapshot, Period::Last30Days);
        assert_eq!(check(&snapshot, &scores), EscalationDecision::None);
    }

    #[test]
    fn crisis_wins_when_both_rules_fire() {
        let low = SignalScoreSet::from_values(Period::Last30Days, [0.1; 4]);
        assert_eq!(
            check(&with_systolic(200.0), &low),
            EscalationDecision::CrisisBp
        );
    }

    #[test]
    fn safety_response_is_identical_for_any_input() {
        let a = SafetyResponse::for_decision(EscalationDecision::CrisisBp);
        let b = SafetyResponse::for_decision(EscalationDecision::CrisisBp);
        assert_eq!(a, b);
        let text = serde_json::to_string(&a).unwrap();
        assert!(!text.contains("190"));
    }
}
