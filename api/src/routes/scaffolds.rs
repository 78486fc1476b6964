use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use pulse_core::error::{ApiError, codes};
use pulse_core::pipeline::PipelineError;
use pulse_core::routing::ScaffoldId;
use pulse_core::scaffold::ScaffoldDescriptor;
use serde::Serialize;
use utoipa::ToSchema;

use crate::error::AppError;
use crate::extract::RequestId;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/scaffolds", get(list_scaffolds))
        .route("/v1/scaffolds/{id}", get(get_scaffold))
}

#[derive(Serialize, ToSchema)]
pub struct ScaffoldSummary {
    #[schema(example = "personal_health_signal.growth")]
    pub id: String,
    pub version: String,
    pub display_name: String,
    pub description: String,
    /// Allowed output formats; the first one is the default
    pub formats: Vec<String>,
    pub tone_variants: Vec<String>,
}

#[derive(Serialize, ToSchema)]
pub struct ScaffoldListResponse {
    pub scaffolds: Vec<ScaffoldSummary>,
}

impl From<&ScaffoldDescriptor> for ScaffoldSummary {
    fn from(descriptor: &ScaffoldDescriptor) -> Self {
        Self {
            id: descriptor.id.as_str().to_string(),
            version: descriptor.version.clone(),
            display_name: descriptor.display_name.clone(),
            description: descriptor.description.clone(),
            formats: descriptor.output.formats.clone(),
            tone_variants: descriptor.framing.tone_variants.keys().cloned().collect(),
        }
    }
}

/// List registered reasoning scaffolds
#[utoipa::path(
    get,
    path = "/v1/scaffolds",
    responses(
        (status = 200, description = "Registered scaffolds", body = ScaffoldListResponse)
    ),
    tag = "scaffolds"
)]
pub async fn list_scaffolds(State(state): State<AppState>) -> Json<ScaffoldListResponse> {
    Json(ScaffoldListResponse {
        scaffolds: state
            .service
            .registry()
            .iter()
            .map(ScaffoldSummary::from)
            .collect(),
    })
}

/// Get one scaffold descriptor
#[utoipa::path(
    get,
    path = "/v1/scaffolds/{id}",
    params(("id" = String, Path, description = "Scaffold id, e.g. personal_health_signal.risk")),
    responses(
        (status = 200, description = "Scaffold descriptor", body = ScaffoldDescriptor),
        (status = 400, description = "Unknown scaffold id", body = ApiError),
        (status = 404, description = "Known id but not registered", body = ApiError)
    ),
    tag = "scaffolds"
)]
pub async fn get_scaffold(
    State(state): State<AppState>,
    request_id: RequestId,
    Path(id): Path<String>,
) -> Result<Json<ScaffoldDescriptor>, AppError> {
    let scaffold_id = id.parse::<ScaffoldId>().map_err(|unknown| {
        AppError::from_pipeline(&PipelineError::from(unknown), request_id.as_str())
    })?;
    state
        .service
        .registry()
        .get(scaffold_id)
        .cloned()
        .map(Json)
        .ok_or_else(|| {
            AppError::Api(
                ApiError::new(
                    codes::NOT_FOUND,
                    format!("Scaffold '{scaffold_id}' is not registered"),
                    request_id.as_str(),
                )
                .with_field("id"),
            )
        })
}
