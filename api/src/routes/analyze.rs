use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use pulse_core::pipeline::{AnalysisRequest, AnalysisResult};

use crate::error::AppError;
use crate::extract::{AppJson, RequestId};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/analyze", post(analyze))
}

/// Analyze a health snapshot
///
/// Returns either a completed analysis (scores, detection summary, routed
/// scaffold, guarded narrative, disclaimers, context exports) or the fixed
/// safety response when an escalation condition is met. A safety response is
/// a successful outcome, not an error.
#[utoipa::path(
    post,
    path = "/v1/analyze",
    request_body = AnalysisRequest,
    responses(
        (status = 200, description = "Completed analysis or safety response", body = AnalysisResult),
        (status = 400, description = "Invalid snapshot, argument or scaffold id", body = pulse_core::error::ApiError),
        (status = 503, description = "No scaffold available", body = pulse_core::error::ApiError)
    ),
    tag = "analysis"
)]
pub async fn analyze(
    State(state): State<AppState>,
    request_id: RequestId,
    AppJson(request): AppJson<AnalysisRequest>,
) -> Result<Json<AnalysisResult>, AppError> {
    state
        .service
        .analyze(&request)
        .await
        .map(Json)
        .map_err(|err| AppError::from_pipeline(&err, request_id.as_str()))
}
