use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::detection::{COHERENCE_FLOOR, DetectionResult, FRICTION_HIGH};

/// Closed set of reasoning scaffolds the router can select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ScaffoldId {
    Growth,
    Risk,
    Neutral,
}

impl ScaffoldId {
    pub const ALL: [ScaffoldId; 3] = [ScaffoldId::Growth, ScaffoldId::Risk, ScaffoldId::Neutral];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Growth => "personal_health_signal.growth",
            Self::Risk => "personal_health_signal.risk",
            Self::Neutral => "personal_health_signal",
        }
    }

    pub fn known_ids() -> impl Iterator<Item = &'static str> {
        Self::ALL.into_iter().map(Self::as_str)
    }
}

impl fmt::Display for ScaffoldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ScaffoldId> for String {
    fn from(id: ScaffoldId) -> Self {
        id.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownScaffold {
    pub requested: String,
    pub suggestion: Option<&'static str>,
}

impl fmt::Display for UnknownScaffold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown scaffold '{}'", self.requested)?;
        if let Some(suggestion) = self.suggestion {
            write!(f, " (did you mean '{suggestion}'?)")?;
        }
        Ok(())
    }
}

impl std::error::Error for UnknownScaffold {}

impl FromStr for ScaffoldId {
    type Err = UnknownScaffold;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let needle = raw.trim();
        Self::ALL
            .into_iter()
            .find(|id| id.as_str() == needle)
            .ok_or_else(|| UnknownScaffold {
                requested: needle.to_string(),
                suggestion: closest_id(needle),
            })
    }
}

impl TryFrom<String> for ScaffoldId {
    type Error = UnknownScaffold;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        raw.parse()
    }
}

fn closest_id(raw: &str) -> Option<&'static str> {
    ScaffoldId::known_ids()
        .map(|id| (id, strsim::normalized_levenshtein(raw, id)))
        .filter(|(_, similarity)| *similarity >= 0.5)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(id, _)| id)
}

/// Select a scaffold from detector output alone.
///
/// Emergence wins over everything; then high friction or low coherence
/// selects risk; everything else is neutral.
pub fn route(result: &DetectionResult) -> ScaffoldId {
    if result.emergence {
        ScaffoldId::Growth
    } else if result.friction >= FRICTION_HIGH || result.coherence < COHERENCE_FLOOR {
        ScaffoldId::Risk
    } else {
        ScaffoldId::Neutral
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::DetectionProvenance;

    fn result(friction: f64, emergence: bool, coherence: f64) -> DetectionResult {
        DetectionResult {
            friction,
            emergence,
            coherence,
            provenance: DetectionProvenance::Remote,
            fallback_reason: None,
            raw: None,
        }
    }

    #[test]
    fn emergence_beats_high_friction() {
        assert_eq!(route(&result(0.95, true, 0.1)), ScaffoldId::Growth);
    }

    #[test]
    fn friction_threshold_is_inclusive() {
        assert_eq!(route(&result(0.7, false, 0.9)), ScaffoldId::Risk);
        assert_eq!(route(&result(0.69, false, 0.9)), ScaffoldId::Neutral);
    }

    #[test]
    fn low_coherence_is_risk() {
        assert_eq!(route(&result(0.1, false, 0.59)), ScaffoldId::Risk);
        assert_eq!(route(&result(0.1, false, 0.6)), ScaffoldId::Neutral);
    }

    #[test]
    fn routing_is_deterministic() {
        let input = result(0.3, false, 0.8);
        let first = route(&input);
        assert!((0..50).all(|_| route(&input) == first));
    }

    #[test]
    fn parses_known_ids_and_suggests_for_typos() {
        assert_eq!(
            "personal_health_signal.risk".parse::<ScaffoldId>().unwrap(),
            ScaffoldId::Risk
        );
        let err = "personal_health_signal.grwth"
            .parse::<ScaffoldId>()
            .unwrap_err();
        assert_eq!(err.suggestion, Some("personal_health_signal.growth"));
        let err = "zzz".parse::<ScaffoldId>().unwrap_err();
        assert_eq!(err.suggestion, None);
    }

    #[test]
    fn serializes_as_dotted_id() {
        assert_eq!(
            serde_json::to_value(ScaffoldId::Neutral).unwrap(),
            serde_json::json!("personal_health_signal")
        );
    }
}
