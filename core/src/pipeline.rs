use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use utoipa::ToSchema;

use crate::audit::{AuditEvent, AuditOutcome};
use crate::detection::{
    DetectionClient, DetectionProvenance, DetectionSummary, FallbackReason, PatternDetector,
};
use crate::escalation::{self, SafetyResponse};
use crate::exports::{self, ContextExports};
use crate::guardrail::{self, GuardrailResult};
use crate::privacy::{self, PrivacyMode};
use crate::routing::{self, ScaffoldId, UnknownScaffold};
use crate::scaffold::{self, AssembledPrompt, RenderOptions, ScaffoldRegistry, ScaffoldRegistryError};
use crate::signals::{SignalScoreSet, translate};
use crate::snapshot::{HealthSnapshot, Period, SnapshotError};

pub const ANALYZE_TOOL: &str = "personal_health_signal";

/// Notice recorded when the generator produced no usable text.
pub const GENERATION_UNAVAILABLE: &str = "generation_unavailable";

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("narrative generator unavailable: {0}")]
    Unavailable(String),
    #[error("narrative generator failed: {0}")]
    Failed(String),
}

/// Turns an assembled prompt into narrative text.
pub trait NarrativeGenerator: Send + Sync {
    fn generate(
        &self,
        prompt: &AssembledPrompt,
    ) -> impl Future<Output = Result<String, GenerationError>> + Send;

    /// Whether the prompt leaves this process (e.g. a hosted model).
    fn discloses_externally(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct AnalysisRequest {
    pub snapshot: HealthSnapshot,
    #[serde(default)]
    pub period: Period,
    /// Defaults to the pipeline's configured mode (strict unless overridden).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privacy_mode: Option<PrivacyMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tone_variant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_format: Option<String>,
    /// Explicit scaffold id; bypasses routing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaffold_id: Option<String>,
    #[serde(default)]
    pub include_detector_raw: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cross_domain_context: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct CompletedAnalysis {
    pub scores: SignalScoreSet,
    pub overall: f64,
    /// Derived aggregates only, so every privacy mode returns the same shape.
    /// Raw detector output reaches the generator context in explicit mode and
    /// is never echoed here.
    pub detection_summary: DetectionSummary,
    pub detection_provenance: DetectionProvenance,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<FallbackReason>,
    #[schema(value_type = String)]
    pub scaffold_used: ScaffoldId,
    pub scaffold_version: String,
    pub privacy_mode: PrivacyMode,
    pub narrative: String,
    pub disclaimers: Vec<String>,
    pub guardrail: GuardrailResult,
    pub context_exports: ContextExports,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnalysisResult {
    Escalated(SafetyResponse),
    Completed(Box<CompletedAnalysis>),
}

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub result: AnalysisResult,
    pub audit: AuditEvent,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(#[from] SnapshotError),

    #[error(transparent)]
    UnknownScaffold(#[from] UnknownScaffold),

    #[error("invalid {field}: {message}")]
    InvalidArgument {
        field: &'static str,
        message: String,
    },

    #[error("neither scaffold '{0}' nor the neutral scaffold is registered")]
    NoScaffoldAvailable(ScaffoldId),
}

impl From<ScaffoldRegistryError> for PipelineError {
    fn from(err: ScaffoldRegistryError) -> Self {
        match err {
            ScaffoldRegistryError::NoScaffoldAvailable { requested } => {
                Self::NoScaffoldAvailable(requested)
            }
            ScaffoldRegistryError::Duplicate(id) | ScaffoldRegistryError::Invalid { id, .. } => {
                Self::NoScaffoldAvailable(id)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct HealthStatus {
    pub status: String,
    pub scaffold_count: usize,
    /// Whether audit events are persisted beyond the log stream.
    pub storage_enabled: bool,
    pub detector_configured: bool,
}

/// The decision pipeline: translate, gate, detect, route, shape, generate, guard.
pub struct Pipeline<D, G> {
    registry: Arc<ScaffoldRegistry>,
    detector: DetectionClient<D>,
    generator: G,
    default_privacy_mode: PrivacyMode,
}

impl<D: PatternDetector, G: NarrativeGenerator> Pipeline<D, G> {
    pub fn new(registry: Arc<ScaffoldRegistry>, detector: DetectionClient<D>, generator: G) -> Self {
        Self {
            registry,
            detector,
            generator,
            default_privacy_mode: PrivacyMode::Strict,
        }
    }

    pub fn with_default_privacy_mode(mut self, mode: PrivacyMode) -> Self {
        self.default_privacy_mode = mode;
        self
    }

    pub fn registry(&self) -> &ScaffoldRegistry {
        &self.registry
    }

    pub fn health(&self, storage_enabled: bool) -> HealthStatus {
        HealthStatus {
            status: if self.registry.get(ScaffoldId::Neutral).is_some() {
                "ok".to_string()
            } else {
                "degraded".to_string()
            },
            scaffold_count: self.registry.len(),
            storage_enabled,
            detector_configured: self.detector.has_remote(),
        }
    }

    pub async fn analyze(&self, request: &AnalysisRequest) -> Result<PipelineOutcome, PipelineError> {
        let started = Instant::now();
        let privacy_mode = request.privacy_mode.unwrap_or(self.default_privacy_mode);
        let input = serde_json::to_value(request).unwrap_or(Value::Null);
        let mut audit = AuditEvent::new(ANALYZE_TOOL, privacy_mode, &input);

        request.snapshot.validate()?;
        let override_id = request
            .scaffold_id
            .as_deref()
            .filter(|raw| !raw.trim().is_empty())
            .map(str::parse::<ScaffoldId>)
            .transpose()?;

        let scores = translate(&request.snapshot, request.period);

        let decision = escalation::check(&request.snapshot, &scores);
        if decision.is_escalated() {
            tracing::info!(
                escalation = decision.as_str(),
                input_hash = %audit.input_hash,
                "safety gate fired, returning fixed safety response"
            );
            audit.outcome = AuditOutcome::Escalated;
            audit.duration_ms = elapsed_ms(started);
            return Ok(PipelineOutcome {
                result: AnalysisResult::Escalated(SafetyResponse::for_decision(decision)),
                audit,
            });
        }

        let detection = self.detector.detect(&scores).await;
        let selected = override_id.unwrap_or_else(|| routing::route(&detection));
        let descriptor = self.registry.resolve(selected)?;

        let payload = privacy::shape(
            privacy_mode,
            &scores,
            &detection,
            &request.snapshot,
            request.include_detector_raw,
        );
        let prompt = scaffold::render(
            descriptor,
            &format!("Assess my personal health for {}", request.period),
            &payload.to_value(),
            RenderOptions {
                tone_variant: request.tone_variant.as_deref(),
                output_format: request.output_format.as_deref(),
                cross_domain_context: request.cross_domain_context.as_ref(),
            },
        );

        let (mut guardrail, outcome) = match self.generator.generate(&prompt).await {
            Ok(text) => {
                let checked = guardrail::validate(&text, descriptor);
                let outcome = if checked.is_flagged() {
                    AuditOutcome::GuardrailFallback
                } else {
                    AuditOutcome::Completed
                };
                (checked, outcome)
            }
            Err(err) => {
                tracing::warn!(
                    scaffold = descriptor.id.as_str(),
                    error = %err,
                    "narrative generation failed, using safe fallback"
                );
                (
                    GuardrailResult::fallback(descriptor, GENERATION_UNAVAILABLE),
                    AuditOutcome::GenerationFallback,
                )
            }
        };

        if let Some(source) = request.snapshot.data_source.as_deref() {
            if !guardrail.text.contains("Data source:") {
                guardrail.text.push_str(&format!("\n\n---\nData source: {source}"));
            }
        }

        let summary = detection.summary();
        let context_exports = exports::compute(&scores, &summary, descriptor);

        audit.outcome = outcome;
        audit.llm_disclosed = self.generator.discloses_externally();
        audit.scaffold_used = Some(descriptor.id);
        audit.detection_provenance = Some(detection.provenance);
        audit.fallback_reason = detection.fallback_reason;
        audit.duration_ms = elapsed_ms(started);

        tracing::info!(
            scaffold = descriptor.id.as_str(),
            provenance = detection.provenance.as_str(),
            privacy_mode = privacy_mode.as_str(),
            outcome = outcome.as_str(),
            "health signal analysis completed"
        );

        Ok(PipelineOutcome {
            result: AnalysisResult::Completed(Box::new(CompletedAnalysis {
                overall: scores.overall(),
                detection_summary: summary,
                detection_provenance: detection.provenance,
                fallback_reason: detection.fallback_reason,
                scaffold_used: descriptor.id,
                scaffold_version: descriptor.version.clone(),
                privacy_mode,
                narrative: guardrail.text.clone(),
                disclaimers: descriptor.guardrails.disclaimers.clone(),
                guardrail,
                context_exports,
                scores,
            })),
            audit,
        })
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::detection::{DetectionRequest, DetectionResult, DetectorError, LocalEstimator};
    use crate::guardrail::{GuardrailVerdict, SAFE_FALLBACK_NARRATIVE};
    use crate::scaffold::tests::registry;
    use crate::snapshot::Vitals;

    struct CountingDetector {
        calls: Arc<AtomicUsize>,
        outcome: fn() -> Result<DetectionResult, DetectorError>,
    }

    impl PatternDetector for CountingDetector {
        async fn detect(&self, _: &DetectionRequest) -> Result<DetectionResult, DetectorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.outcome)()
        }
    }

    struct Scripted(Result<&'static str, ()>);

    impl NarrativeGenerator for Scripted {
        async fn generate(&self, _: &AssembledPrompt) -> Result<String, GenerationError> {
            self.0
                .map(str::to_string)
                .map_err(|()| GenerationError::Unavailable("offline".to_string()))
        }
    }

    fn pipeline(
        outcome: fn() -> Result<DetectionResult, DetectorError>,
        text: Result<&'static str, ()>,
    ) -> (Pipeline<CountingDetector, Scripted>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let detector = CountingDetector {
            calls: calls.clone(),
            outcome,
        };
        (
            Pipeline::new(
                Arc::new(registry()),
                DetectionClient::new(Some(detector)),
                Scripted(text),
            ),
            calls,
        )
    }

    fn neutral_remote() -> Result<DetectionResult, DetectorError> {
        Ok(DetectionResult {
            friction: 0.07,
            emergence: false,
            coherence: 0.9,
            provenance: DetectionProvenance::Remote,
            fallback_reason: None,
            raw: None,
        })
    }

    fn timeout() -> Result<DetectionResult, DetectorError> {
        Err(DetectorError::Timeout(2000))
    }

    fn healthy_request() -> AnalysisRequest {
        AnalysisRequest {
            snapshot: serde_json::from_value(json!({
                "vitals": { "resting_heart_rate_bpm": 62.0, "systolic_mmhg": 118.0, "diastolic_mmhg": 76.0, "hrv_ms": 58.0, "spo2_pct": 98.0 },
                "activity": { "sessions_per_week": 4.0, "consistency_pct": 90.0, "sleep_duration_hours": 7.8, "sleep_quality_score": 88.0, "recovery_score": 85.0 }
            }))
            .unwrap(),
            ..Default::default()
        }
    }

    fn completed(outcome: PipelineOutcome) -> CompletedAnalysis {
        match outcome.result {
            AnalysisResult::Completed(done) => *done,
            AnalysisResult::Escalated(_) => panic!("expected completed analysis"),
        }
    }

    #[tokio::test]
    async fn crisis_bp_short_circuits_before_detection() {
        let (pipeline, calls) = pipeline(neutral_remote, Ok("unused"));
        let request = AnalysisRequest {
            snapshot: HealthSnapshot {
                vitals: Some(Vitals {
                    systolic_mmhg: Some(190.0),
                    diastolic_mmhg: Some(110.0),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        };
        let outcome = pipeline.analyze(&request).await.unwrap();
        assert!(matches!(outcome.result, AnalysisResult::Escalated(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.audit.outcome, AuditOutcome::Escalated);
        assert!(!outcome.audit.llm_disclosed);
    }

    #[tokio::test]
    async fn balanced_scores_with_high_coherence_route_neutral() {
        let (pipeline, calls) = pipeline(neutral_remote, Ok("Your signals look steady."));
        let done = completed(pipeline.analyze(&healthy_request()).await.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(done.scaffold_used, ScaffoldId::Neutral);
        assert_eq!(done.detection_provenance, DetectionProvenance::Remote);
        assert!(done.narrative.starts_with("Your signals look steady."));
    }

    #[tokio::test]
    async fn remote_timeout_still_completes_with_fallback_tag() {
        let (pipeline, _) = pipeline(timeout, Ok("Steady overall."));
        let outcome = pipeline.analyze(&healthy_request()).await.unwrap();
        assert_eq!(
            outcome.audit.detection_provenance,
            Some(DetectionProvenance::LocalFallback)
        );
        let done = completed(outcome);
        assert_eq!(done.fallback_reason, Some(FallbackReason::Timeout));
        assert!(!done.narrative.is_empty());
    }

    #[tokio::test]
    async fn diagnosis_in_generated_text_is_replaced() {
        let (pipeline, _) = pipeline(neutral_remote, Ok("You have been diagnosed with hypertension."));
        let outcome = pipeline.analyze(&healthy_request()).await.unwrap();
        assert_eq!(outcome.audit.outcome, AuditOutcome::GuardrailFallback);
        let done = completed(outcome);
        assert!(matches!(done.guardrail.verdict, GuardrailVerdict::Flagged { .. }));
        assert!(done.narrative.starts_with(SAFE_FALLBACK_NARRATIVE));
        assert!(!done.narrative.contains("hypertension"));
    }

    #[tokio::test]
    async fn generator_failure_uses_safe_fallback_with_notice() {
        let (pipeline, _) = pipeline(neutral_remote, Err(()));
        let outcome = pipeline.analyze(&healthy_request()).await.unwrap();
        assert_eq!(outcome.audit.outcome, AuditOutcome::GenerationFallback);
        let done = completed(outcome);
        assert!(done.guardrail.notices.contains(&GENERATION_UNAVAILABLE.to_string()));
    }

    #[tokio::test]
    async fn override_bypasses_routing_and_unknown_override_is_rejected() {
        let (pipeline, _) = pipeline(neutral_remote, Ok("Fine."));
        let mut request = healthy_request();
        request.scaffold_id = Some("personal_health_signal.risk".to_string());
        let done = completed(pipeline.analyze(&request).await.unwrap());
        assert_eq!(done.scaffold_used, ScaffoldId::Risk);

        request.scaffold_id = Some("personal_health_signal.rsik".to_string());
        let err = pipeline.analyze(&request).await.unwrap_err();
        match err {
            PipelineError::UnknownScaffold(unknown) => {
                assert_eq!(unknown.suggestion, Some("personal_health_signal.risk"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn invalid_snapshot_is_rejected() {
        let (pipeline, calls) = pipeline(neutral_remote, Ok("Fine."));
        let mut request = healthy_request();
        request.snapshot.vitals = Some(Vitals {
            spo2_pct: Some(140.0),
            ..Default::default()
        });
        assert!(matches!(
            pipeline.analyze(&request).await,
            Err(PipelineError::InvalidSnapshot(_))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn data_source_adds_provenance_footer() {
        let (pipeline, _) = pipeline(neutral_remote, Ok("Fine."));
        let mut request = healthy_request();
        request.snapshot.data_source = Some("manual_entry".to_string());
        let done = completed(pipeline.analyze(&request).await.unwrap());
        assert!(done.narrative.ends_with("Data source: manual_entry"));
    }

    #[tokio::test]
    async fn tight_high_scores_route_growth_without_remote() {
        let pipeline = Pipeline::new(
            Arc::new(registry()),
            DetectionClient::<LocalEstimator>::local_only(),
            Scripted(Ok("Great alignment.")),
        );
        let request = AnalysisRequest {
            snapshot: serde_json::from_value(json!({
                "vitals": { "resting_heart_rate_bpm": 65.0, "resting_heart_rate_trend_30d": -1.0, "systolic_mmhg": 115.0, "diastolic_mmhg": 75.0, "hrv_ms": 70.0, "spo2_pct": 99.0 },
                "labs": [
                    { "test_name": "fasting glucose", "value": 82.0 },
                    { "test_name": "hba1c", "value": 4.9 },
                    { "test_name": "ldl cholesterol", "value": 65.0 },
                    { "test_name": "hdl cholesterol", "value": 70.0 },
                    { "test_name": "triglycerides", "value": 90.0 }
                ],
                "biometrics": { "bmi": 22.0 },
                "activity": { "sessions_per_week": 5.0, "consistency_pct": 95.0, "sleep_duration_hours": 8.0, "sleep_quality_score": 92.0, "recovery_score": 93.0 },
                "preventive": {
                    "screenings": { "physical": { "status": "current" } },
                    "vaccinations": { "flu": { "status": "current" } },
                    "medications": { "active_prescriptions": 1, "adherence_pct": 95.0 }
                }
            }))
            .unwrap(),
            ..Default::default()
        };
        let done = completed(pipeline.analyze(&request).await.unwrap());
        assert!(done.scores.values().iter().all(|v| *v > 0.85), "{:?}", done.scores.values());
        assert_eq!(done.scaffold_used, ScaffoldId::Growth);
        assert!(done.detection_summary.emergence_window);
    }

    #[tokio::test]
    async fn summary_carries_only_derived_fields_in_every_mode() {
        let mut shapes = Vec::new();
        for mode in [PrivacyMode::Strict, PrivacyMode::Standard, PrivacyMode::Explicit] {
            let (pipeline, _) = pipeline(neutral_remote, Ok("Steady."));
            let mut request = healthy_request();
            request.privacy_mode = Some(mode);
            request.include_detector_raw = true;
            let done = completed(pipeline.analyze(&request).await.unwrap());
            assert_eq!(done.privacy_mode, mode);

            let summary = serde_json::to_value(&done.detection_summary).unwrap();
            let mut keys: Vec<&str> = summary
                .as_object()
                .unwrap()
                .keys()
                .map(String::as_str)
                .collect();
            keys.sort_unstable();
            assert_eq!(keys, ["coherence", "emergence_window", "friction", "friction_level"]);

            let body = serde_json::to_string(&done).unwrap();
            assert!(!body.contains("detector_raw"));
            assert!(!body.contains("systolic_mmhg"));
            shapes.push(summary);
        }
        assert!(shapes.windows(2).all(|pair| pair[0] == pair[1]));
    }

    #[test]
    fn health_reports_registry_state() {
        let (pipeline, _) = pipeline(neutral_remote, Ok(""));
        let health = pipeline.health(false);
        assert_eq!(health.status, "ok");
        assert_eq!(health.scaffold_count, 3);
        assert!(health.detector_configured);
    }
}
