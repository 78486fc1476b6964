use std::collections::BTreeMap;

use serde::Serialize;
use utoipa::ToSchema;

use crate::detection::{COHERENCE_FLOOR, DetectionSummary, FrictionLevel};
use crate::scaffold::ScaffoldDescriptor;
use crate::signals::{Signal, SignalScoreSet, round_to};

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct HealthSignalSummary {
    pub signals: BTreeMap<Signal, f64>,
    pub strongest: Signal,
    pub weakest: Signal,
}

/// Deterministic context other consumers can pick up from an analysis.
///
/// Only fields the scaffold's export schema names are populated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct ContextExports {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_signal_summary: Option<HealthSignalSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_health_risk: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_health_opportunity: Option<String>,
}

pub fn compute(
    scores: &SignalScoreSet,
    detection: &DetectionSummary,
    descriptor: &ScaffoldDescriptor,
) -> ContextExports {
    let weakest = scores.weakest();

    let risk = if detection.friction_level == FrictionLevel::High {
        format!("High divergence detected; weakest area is '{weakest}'.")
    } else if detection.coherence < COHERENCE_FLOOR {
        format!("Signals are mismatched; weakest area is '{weakest}'.")
    } else {
        String::new()
    };
    let opportunity = if detection.emergence_window {
        "Signals are aligned enough to safely set a new health goal.".to_string()
    } else {
        String::new()
    };

    let mut exports = ContextExports::default();
    if descriptor.exports_field("health_signal_summary") {
        exports.health_signal_summary = Some(HealthSignalSummary {
            signals: scores
                .iter()
                .map(|(signal, score)| (signal, round_to(score.value, 4)))
                .collect(),
            strongest: scores.strongest(),
            weakest,
        });
    }
    if descriptor.exports_field("primary_health_risk") {
        exports.primary_health_risk = Some(risk);
    }
    if descriptor.exports_field("primary_health_opportunity") {
        exports.primary_health_opportunity = Some(opportunity);
    }
    exports
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{DetectionProvenance, DetectionResult};
    use crate::routing::ScaffoldId;
    use crate::scaffold::tests::descriptor;
    use crate::snapshot::Period;

    fn summary(friction: f64, emergence: bool, coherence: f64) -> DetectionSummary {
        DetectionResult {
            friction,
            emergence,
            coherence,
            provenance: DetectionProvenance::Remote,
            fallback_reason: None,
            raw: None,
        }
        .summary()
    }

    #[test]
    fn high_friction_names_weakest_signal() {
        let scores = SignalScoreSet::from_values(Period::Last30Days, [0.9, 0.1, 0.6, 0.7]);
        let exports = compute(&scores, &summary(0.8, false, 0.2), &descriptor(ScaffoldId::Risk));
        assert_eq!(
            exports.primary_health_risk.as_deref(),
            Some("High divergence detected; weakest area is 'metabolic_balance'.")
        );
        let signal_summary = exports.health_signal_summary.unwrap();
        assert_eq!(signal_summary.strongest, Signal::VitalStability);
        assert_eq!(exports.primary_health_opportunity.as_deref(), Some(""));
    }

    #[test]
    fn emergence_produces_opportunity() {
        let scores = SignalScoreSet::from_values(Period::Last30Days, [0.9; 4]);
        let exports = compute(&scores, &summary(0.0, true, 1.0), &descriptor(ScaffoldId::Growth));
        assert!(exports.primary_health_opportunity.unwrap().contains("new health goal"));
        assert_eq!(exports.primary_health_risk.as_deref(), Some(""));
    }

    #[test]
    fn only_schema_fields_are_exported() {
        let mut scaffold = descriptor(ScaffoldId::Neutral);
        scaffold.context_exports.retain(|f| f.field_name == "primary_health_risk");
        let scores = SignalScoreSet::from_values(Period::Last30Days, [0.5; 4]);
        let exports = compute(&scores, &summary(0.1, false, 0.9), &scaffold);
        assert!(exports.health_signal_summary.is_none());
        assert!(exports.primary_health_opportunity.is_none());
        assert!(exports.primary_health_risk.is_some());
    }
}
