use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use pulse_core::error::{ApiError, codes};
use pulse_core::pipeline::PipelineError;

/// Internal error type that converts to structured API responses
#[derive(Debug)]
pub enum AppError {
    /// Request body rejected before the pipeline ran (400)
    Validation {
        message: String,
        field: Option<String>,
        received: Option<serde_json::Value>,
        docs_hint: Option<String>,
        request_id: String,
    },
    /// Error already shaped for the public contract; status follows its code
    Api(ApiError),
}

impl AppError {
    pub fn from_pipeline(err: &PipelineError, request_id: &str) -> Self {
        AppError::Api(ApiError::from_pipeline(err, request_id))
    }
}

pub fn status_for_code(code: &str) -> StatusCode {
    match code {
        codes::VALIDATION_FAILED | codes::UNKNOWN_SCAFFOLD => StatusCode::BAD_REQUEST,
        codes::NOT_FOUND => StatusCode::NOT_FOUND,
        codes::SCAFFOLD_UNAVAILABLE => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let api_error = match self {
            AppError::Validation {
                message,
                field,
                received,
                docs_hint,
                request_id,
            } => ApiError {
                error: codes::VALIDATION_FAILED.to_string(),
                message,
                field,
                received,
                request_id,
                docs_hint,
            },
            AppError::Api(api_error) => {
                if !api_error.is_client_error() {
                    tracing::error!(
                        code = api_error.error.as_str(),
                        request_id = api_error.request_id.as_str(),
                        "request failed"
                    );
                }
                api_error
            }
        };

        (status_for_code(&api_error.error), Json(api_error)).into_response()
    }
}
