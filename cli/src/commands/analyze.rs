use clap::Args;
use pulse_core::error::ApiError;
use pulse_core::pipeline::{AnalysisRequest, AnalysisResult};
use pulse_core::privacy::PrivacyMode;
use pulse_core::snapshot::{HealthSnapshot, Period};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::util::{
    EXIT_OK, EXIT_REJECTED, EXIT_USAGE, api_request, cli_error, emit, local_service,
    read_json_from_file,
};

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// Snapshot JSON file (use '-' for stdin)
    #[arg(long)]
    pub snapshot: String,

    /// Analysis window (last_7_days, last_30_days, last_90_days, last_180_days, last_365_days)
    #[arg(long, default_value = "last_30_days")]
    pub period: Period,

    /// strict, standard or explicit (defaults to PULSE_DEFAULT_PRIVACY_MODE)
    #[arg(long)]
    pub privacy_mode: Option<PrivacyMode>,

    /// Tone variant defined by the scaffold (e.g. "concise")
    #[arg(long)]
    pub tone_variant: Option<String>,

    /// Output format defined by the scaffold (e.g. "bullet_summary")
    #[arg(long = "format")]
    pub output_format: Option<String>,

    /// Force a scaffold instead of letting the router choose
    #[arg(long)]
    pub scaffold_id: Option<String>,

    /// Include the raw detector response in the detection summary
    #[arg(long)]
    pub include_detector_raw: bool,

    /// Print only the narrative (or the safety message) as plain text
    #[arg(long)]
    pub narrative_only: bool,
}

impl AnalyzeArgs {
    pub fn to_request(&self, snapshot: HealthSnapshot) -> AnalysisRequest {
        AnalysisRequest {
            snapshot,
            period: self.period,
            privacy_mode: self.privacy_mode,
            tone_variant: self.tone_variant.clone(),
            output_format: self.output_format.clone(),
            scaffold_id: self.scaffold_id.clone(),
            include_detector_raw: self.include_detector_raw,
            cross_domain_context: None,
        }
    }
}

pub async fn run(api_url: Option<&str>, args: AnalyzeArgs) -> i32 {
    let raw = match read_json_from_file(&args.snapshot) {
        Ok(v) => v,
        Err(e) => return cli_error(EXIT_USAGE, &e, Some("Pass --snapshot <file.json> or '-' for stdin.")),
    };
    let snapshot: HealthSnapshot = match serde_json::from_value(raw) {
        Ok(s) => s,
        Err(e) => {
            return cli_error(
                EXIT_REJECTED,
                &format!("Snapshot does not match the expected shape: {e}"),
                Some("Group readings under vitals, labs, biometrics, activity and preventive."),
            );
        }
    };
    let request = args.to_request(snapshot);

    if let Some(url) = api_url {
        tracing::debug!(api_url = url, period = request.period.as_str(), "sending analysis to the API");
        let body = match serde_json::to_value(&request) {
            Ok(v) => v,
            Err(e) => return cli_error(EXIT_USAGE, &format!("Failed to encode request: {e}"), None),
        };
        return api_request(url, reqwest::Method::POST, "/v1/analyze", Some(&body)).await;
    }

    let service = match local_service() {
        Ok(s) => s,
        Err(code) => return code,
    };
    tracing::debug!(period = request.period.as_str(), "running analysis in-process");
    match service.analyze(&request).await {
        Ok(result) if args.narrative_only => {
            println!("{}", narrative_text(&result));
            EXIT_OK
        }
        Ok(result) => {
            let value = serde_json::to_value(&result)
                .unwrap_or_else(|e| json!({"error": "encode_failed", "message": e.to_string()}));
            emit(&value, EXIT_OK)
        }
        Err(err) => {
            let api_error = ApiError::from_pipeline(&err, Uuid::now_v7().to_string());
            let value = serde_json::to_value(&api_error).unwrap_or(Value::Null);
            emit(&value, EXIT_REJECTED)
        }
    }
}

fn narrative_text(result: &AnalysisResult) -> String {
    match result {
        AnalysisResult::Completed(done) => done.narrative.clone(),
        AnalysisResult::Escalated(safety) => {
            let mut text = format!("{}\n\n{}", safety.title, safety.message);
            for action in &safety.actions {
                text.push_str("\n- ");
                text.push_str(action);
            }
            text.push_str("\n\n");
            text.push_str(&safety.disclaimer);
            text
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use pulse_core::escalation::{EscalationDecision, SafetyResponse};

    use super::*;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: AnalyzeArgs,
    }

    #[test]
    fn flags_map_onto_the_analysis_request() {
        let cli = TestCli::parse_from([
            "pulse",
            "--snapshot",
            "snap.json",
            "--period",
            "last_90_days",
            "--privacy-mode",
            "standard",
            "--format",
            "brief",
            "--scaffold-id",
            "personal_health_signal.risk",
        ]);
        let request = cli.args.to_request(HealthSnapshot::default());
        assert_eq!(request.period, Period::Last90Days);
        assert_eq!(request.privacy_mode, Some(PrivacyMode::Standard));
        assert_eq!(request.output_format.as_deref(), Some("brief"));
        assert_eq!(request.scaffold_id.as_deref(), Some("personal_health_signal.risk"));
        assert!(request.tone_variant.is_none());
        assert!(!request.include_detector_raw);
    }

    #[test]
    fn period_defaults_to_thirty_days_and_rejects_unknown_windows() {
        let cli = TestCli::parse_from(["pulse", "--snapshot", "-"]);
        assert_eq!(cli.args.period, Period::Last30Days);
        assert!(cli.args.privacy_mode.is_none());
        assert!(TestCli::try_parse_from(["pulse", "--snapshot", "-", "--period", "last_week"]).is_err());
    }

    #[test]
    fn escalated_results_print_the_safety_message() {
        let result = AnalysisResult::Escalated(SafetyResponse::for_decision(
            EscalationDecision::CrisisBp,
        ));
        let text = narrative_text(&result);
        let AnalysisResult::Escalated(safety) = &result else {
            unreachable!()
        };
        assert!(text.starts_with(&safety.title));
        assert!(text.ends_with(&safety.disclaimer));
    }
}
