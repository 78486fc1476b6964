use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use utoipa::ToSchema;

use crate::signals::{PROFILE_NAME, Signal, SignalScoreSet, round_to};

/// Friction at or above this routes to the risk scaffold.
pub const FRICTION_HIGH: f64 = 0.7;
/// Friction below this is reported as low.
pub const FRICTION_MODERATE: f64 = 0.4;
/// Coherence below this routes to the risk scaffold.
pub const COHERENCE_FLOOR: f64 = 0.6;
/// Every signal must exceed this for the local estimator to flag emergence.
pub const EMERGENCE_MIN_SIGNAL: f64 = 0.85;
/// Dispersion must stay under this for the local estimator to flag emergence.
pub const EMERGENCE_MAX_DISPERSION: f64 = 0.10;

/// Input handed to a pattern detector: four bounded floats plus metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionRequest {
    pub profile_name: String,
    pub layer_names: Vec<String>,
    pub layer_values: [f64; 4],
    pub metadata: Value,
}

impl DetectionRequest {
    pub fn from_scores(scores: &SignalScoreSet) -> Self {
        Self {
            profile_name: PROFILE_NAME.to_string(),
            layer_names: Signal::ALL.iter().map(|s| s.as_str().to_string()).collect(),
            layer_values: scores.values(),
            metadata: json!({
                "period": scores.period.as_str(),
                "fallback_layers": scores
                    .iter()
                    .filter(|(_, score)| score.used_fallback)
                    .map(|(signal, _)| signal.as_str())
                    .collect::<Vec<_>>(),
            }),
        }
    }

    fn dispersion(&self) -> f64 {
        let max = self.layer_values.iter().copied().fold(f64::MIN, f64::max);
        let min = self.layer_values.iter().copied().fold(f64::MAX, f64::min);
        (max - min).max(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DetectionProvenance {
    Remote,
    LocalFallback,
}

impl DetectionProvenance {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Remote => "remote",
            Self::LocalFallback => "local_fallback",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    Timeout,
    Unavailable,
    MalformedResponse,
    DetectorError,
    NotConfigured,
}

impl FallbackReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Unavailable => "unavailable",
            Self::MalformedResponse => "malformed_response",
            Self::DetectorError => "detector_error",
            Self::NotConfigured => "not_configured",
        }
    }
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DetectionResult {
    /// Cross-signal divergence in [0,1].
    pub friction: f64,
    /// Aligned-improvement window.
    pub emergence: bool,
    pub coherence: f64,
    pub provenance: DetectionProvenance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<FallbackReason>,
    /// Raw detector payload, only for remote results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

impl DetectionResult {
    pub fn friction_level(&self) -> FrictionLevel {
        FrictionLevel::from_friction(self.friction)
    }

    pub fn summary(&self) -> DetectionSummary {
        DetectionSummary {
            friction_level: self.friction_level(),
            friction: round_to(self.friction, 4),
            emergence_window: self.emergence,
            coherence: round_to(self.coherence, 4),
        }
    }

    fn check_bounds(&self) -> Result<(), DetectorError> {
        for (field, value) in [("friction", self.friction), ("coherence", self.coherence)] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(DetectorError::Malformed(format!(
                    "{field} = {value} is outside [0, 1]"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FrictionLevel {
    Low,
    Moderate,
    High,
}

impl FrictionLevel {
    pub fn from_friction(friction: f64) -> Self {
        if friction < FRICTION_MODERATE {
            Self::Low
        } else if friction < FRICTION_HIGH {
            Self::Moderate
        } else {
            Self::High
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Moderate => "moderate",
            Self::High => "high",
        }
    }
}

/// Privacy-safe view of a detection result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DetectionSummary {
    pub friction_level: FrictionLevel,
    pub friction: f64,
    pub emergence_window: bool,
    pub coherence: f64,
}

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("detector did not answer within {0} ms")]
    Timeout(u64),

    #[error("detector unreachable: {0}")]
    Unavailable(String),

    #[error("detector response malformed: {0}")]
    Malformed(String),

    #[error("detector reported an error: {0}")]
    Rejected(String),

    #[error("no remote detector configured")]
    NotConfigured,
}

impl DetectorError {
    pub fn fallback_reason(&self) -> FallbackReason {
        match self {
            Self::Timeout(_) => FallbackReason::Timeout,
            Self::Unavailable(_) => FallbackReason::Unavailable,
            Self::Malformed(_) => FallbackReason::MalformedResponse,
            Self::Rejected(_) => FallbackReason::DetectorError,
            Self::NotConfigured => FallbackReason::NotConfigured,
        }
    }
}

/// Something that scores four layer values for friction, emergence and coherence.
pub trait PatternDetector: Send + Sync {
    fn detect(
        &self,
        request: &DetectionRequest,
    ) -> impl Future<Output = Result<DetectionResult, DetectorError>> + Send;
}

/// Range-based estimator used when the remote detector is absent or fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalEstimator;

impl LocalEstimator {
    pub fn estimate(&self, request: &DetectionRequest) -> DetectionResult {
        let dispersion = request.dispersion().min(1.0);
        let emergence = request
            .layer_values
            .iter()
            .all(|value| *value > EMERGENCE_MIN_SIGNAL)
            && dispersion < EMERGENCE_MAX_DISPERSION;
        DetectionResult {
            friction: dispersion,
            emergence,
            coherence: 1.0 - dispersion,
            provenance: DetectionProvenance::LocalFallback,
            fallback_reason: None,
            raw: None,
        }
    }
}

impl PatternDetector for LocalEstimator {
    async fn detect(&self, request: &DetectionRequest) -> Result<DetectionResult, DetectorError> {
        Ok(self.estimate(request))
    }
}

/// Remote detector with a single degrade step to [`LocalEstimator`].
///
/// Never fails: every remote fault becomes a `local_fallback` result tagged
/// with the reason. No retries.
#[derive(Debug, Clone)]
pub struct DetectionClient<D> {
    remote: Option<D>,
    local: LocalEstimator,
}

impl<D: PatternDetector> DetectionClient<D> {
    pub fn new(remote: Option<D>) -> Self {
        Self {
            remote,
            local: LocalEstimator,
        }
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    pub async fn detect(&self, scores: &SignalScoreSet) -> DetectionResult {
        let request = DetectionRequest::from_scores(scores);
        let outcome = match &self.remote {
            Some(remote) => remote
                .detect(&request)
                .await
                .and_then(|result| result.check_bounds().map(|()| result)),
            None => Err(DetectorError::NotConfigured),
        };

        match outcome {
            Ok(mut result) => {
                result.provenance = DetectionProvenance::Remote;
                result.fallback_reason = None;
                result
            }
            Err(err) => {
                let reason = err.fallback_reason();
                if matches!(err, DetectorError::NotConfigured) {
                    tracing::debug!(reason = reason.as_str(), "using local pattern estimator");
                } else {
                    tracing::warn!(
                        reason = reason.as_str(),
                        error = %err,
                        "remote detector failed, degrading to local estimator"
                    );
                }
                let mut result = self.local.estimate(&request);
                result.fallback_reason = Some(reason);
                result
            }
        }
    }
}

impl DetectionClient<LocalEstimator> {
    pub fn local_only() -> Self {
        Self::new(None)
    }
}
