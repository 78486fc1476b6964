use std::sync::Arc;
use std::time::Instant;

use pulse_core::audit::{AuditEvent, AuditOutcome};
use pulse_core::detection::{DetectionClient, DetectorError, PatternDetector};
use pulse_core::pipeline::{
    ANALYZE_TOOL, AnalysisRequest, AnalysisResult, HealthStatus, NarrativeGenerator, Pipeline,
    PipelineError,
};
use pulse_core::privacy::PrivacyMode;
use pulse_core::scaffold::ScaffoldRegistry;
use pulse_core::trends::{self, HistoryEntry, TrendError, TrendReport};
use serde_json::{Value, json};
use thiserror::Error;

use crate::audit_log::AuditLog;
use crate::config::RuntimeConfig;
use crate::detector::RemoteDetector;
use crate::narrator::TemplateNarrator;
use crate::scaffolds::{ScaffoldLoadError, load_registry};

pub const HEALTH_CHECK_TOOL: &str = "health_check";
pub const TRENDS_TOOL: &str = "health_signal_trends";

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Scaffolds(#[from] ScaffoldLoadError),

    #[error("invalid detector configuration: {0}")]
    Detector(#[from] DetectorError),
}

/// Analyze, health-check and trend operations with auditing, shared by every surface.
pub struct HealthService<D = RemoteDetector, G = TemplateNarrator> {
    pipeline: Pipeline<D, G>,
    audit: AuditLog,
    default_privacy_mode: PrivacyMode,
}

impl HealthService {
    /// Load scaffolds and wire the detector, narrator and audit sink from config.
    pub fn from_config(config: &RuntimeConfig) -> Result<Self, ServiceError> {
        let registry = load_registry(config.scaffold_dir.as_deref())?;
        let remote = config
            .detector_url
            .as_deref()
            .map(|url| RemoteDetector::new(url, config.detector_timeout))
            .transpose()?;

        tracing::info!(
            scaffolds = registry.len(),
            detector = remote.as_ref().map(RemoteDetector::url),
            detector_timeout_ms = config.detector_timeout_ms(),
            audit_persisted = config.audit_log.is_some(),
            default_privacy_mode = config.default_privacy_mode.as_str(),
            "health service configured"
        );

        let pipeline = Pipeline::new(
            Arc::new(registry),
            DetectionClient::new(remote),
            TemplateNarrator,
        );
        Ok(Self::new(
            pipeline,
            AuditLog::new(config.audit_log.clone()),
            config.default_privacy_mode,
        ))
    }
}

impl<D: PatternDetector, G: NarrativeGenerator> HealthService<D, G> {
    pub fn new(pipeline: Pipeline<D, G>, audit: AuditLog, default_privacy_mode: PrivacyMode) -> Self {
        Self {
            pipeline: pipeline.with_default_privacy_mode(default_privacy_mode),
            audit,
            default_privacy_mode,
        }
    }

    pub fn registry(&self) -> &ScaffoldRegistry {
        self.pipeline.registry()
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    pub async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult, PipelineError> {
        let started = Instant::now();
        match self.pipeline.analyze(request).await {
            Ok(outcome) => {
                self.audit.record(&outcome.audit).await;
                Ok(outcome.result)
            }
            Err(err) => {
                self.audit.record(&self.rejected_event(request, started)).await;
                Err(err)
            }
        }
    }

    fn rejected_event(&self, request: &AnalysisRequest, started: Instant) -> AuditEvent {
        let input = serde_json::to_value(request).unwrap_or(Value::Null);
        let mode = request.privacy_mode.unwrap_or(self.default_privacy_mode);
        let mut event = AuditEvent::new(ANALYZE_TOOL, mode, &input);
        event.outcome = AuditOutcome::Rejected;
        event.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        event
    }

    pub async fn health_check(&self) -> HealthStatus {
        let status = self.pipeline.health(self.audit.storage_enabled());
        let event = AuditEvent::new(HEALTH_CHECK_TOOL, self.default_privacy_mode, &json!({}));
        self.audit.record(&event).await;
        status
    }

    /// Trend statistics over an inline, newest-first history. Nothing is stored.
    pub async fn trends(&self, history: &[HistoryEntry]) -> Result<TrendReport, TrendError> {
        let input = serde_json::to_value(history).unwrap_or(Value::Null);
        let mut event = AuditEvent::new(TRENDS_TOOL, self.default_privacy_mode, &input);
        let report = trends::analyze(history);
        if report.is_err() {
            event.outcome = AuditOutcome::Rejected;
        }
        self.audit.record(&event).await;
        report
    }
}

#[cfg(test)]
mod tests {
    use pulse_core::detection::{DetectionProvenance, FallbackReason};
    use pulse_core::routing::ScaffoldId;
    use pulse_core::snapshot::HealthSnapshot;
    use serde_json::json;

    use super::*;

    fn service(audit_path: Option<std::path::PathBuf>) -> HealthService {
        HealthService::from_config(&RuntimeConfig {
            audit_log: audit_path,
            ..RuntimeConfig::default()
        })
        .unwrap()
    }

    fn snapshot() -> HealthSnapshot {
        serde_json::from_value(json!({
            "vitals": { "resting_heart_rate_bpm": 62.0, "systolic_mmhg": 118.0, "diastolic_mmhg": 76.0, "hrv_ms": 58.0, "spo2_pct": 98.0 },
            "activity": { "sessions_per_week": 4.0, "consistency_pct": 90.0, "sleep_duration_hours": 7.8, "sleep_quality_score": 88.0, "recovery_score": 85.0 }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn analysis_without_detector_uses_local_estimator() {
        let svc = service(None);
        let result = svc
            .analyze(&AnalysisRequest {
                snapshot: snapshot(),
                ..Default::default()
            })
            .await
            .unwrap();
        let AnalysisResult::Completed(done) = result else {
            panic!("expected a completed analysis");
        };
        assert_eq!(done.detection_provenance, DetectionProvenance::LocalFallback);
        assert_eq!(done.fallback_reason, Some(FallbackReason::NotConfigured));
        assert_eq!(done.privacy_mode, PrivacyMode::Strict);
        assert!(done.narrative.contains("Next step:"));
        assert!(done.narrative.contains("not medical advice"));
    }

    #[tokio::test]
    async fn rejected_and_completed_calls_are_both_audited() {
        let dir = std::env::temp_dir().join(format!("pulse-service-{}", std::process::id()));
        let path = dir.join("audit.jsonl");
        let svc = service(Some(path.clone()));

        svc.analyze(&AnalysisRequest {
            snapshot: snapshot(),
            scaffold_id: Some(ScaffoldId::Risk.as_str().to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
        let err = svc
            .analyze(&AnalysisRequest {
                snapshot: snapshot(),
                scaffold_id: Some("nonsense".to_string()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::UnknownScaffold(_)));

        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        let events: Vec<AuditEvent> = raw.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].outcome, AuditOutcome::Completed);
        assert_eq!(events[0].scaffold_used, Some(ScaffoldId::Risk));
        assert!(!events[0].llm_disclosed);
        assert_eq!(events[1].outcome, AuditOutcome::Rejected);
        tokio::fs::remove_dir_all(dir).await.ok();
    }

    #[test]
    fn rejected_events_record_elapsed_time() {
        let svc = service(None);
        let started = Instant::now()
            .checked_sub(std::time::Duration::from_millis(40))
            .unwrap();
        let event = svc.rejected_event(
            &AnalysisRequest {
                snapshot: snapshot(),
                privacy_mode: Some(PrivacyMode::Standard),
                ..Default::default()
            },
            started,
        );
        assert_eq!(event.outcome, AuditOutcome::Rejected);
        assert_eq!(event.privacy_mode, PrivacyMode::Standard);
        assert!(event.duration_ms >= 40, "duration {}", event.duration_ms);
    }

    #[tokio::test]
    async fn health_check_reports_storage_and_detector() {
        let status = service(None).health_check().await;
        assert_eq!(status.status, "ok");
        assert_eq!(status.scaffold_count, 3);
        assert!(!status.storage_enabled);
        assert!(!status.detector_configured);
    }

    #[tokio::test]
    async fn trends_reject_out_of_range_history() {
        let history: Vec<HistoryEntry> = serde_json::from_value(json!([
            { "signals": { "vital_stability": 1.7 } }
        ]))
        .unwrap();
        assert!(service(None).trends(&history).await.is_err());
    }
}
