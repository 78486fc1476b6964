use std::net::SocketAddr;

use axum::Router;
use pulse_mcp_runtime::{HealthService, RuntimeConfig};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod error;
mod extract;
mod middleware;
mod routes;
mod state;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Pulse API",
        version = "0.1.0",
        description = "Personal health signal analysis with safety escalation, privacy shaping and guarded narratives. Wellness information, not medical advice."
    ),
    paths(
        routes::health::health_check,
        routes::analyze::analyze,
        routes::scaffolds::list_scaffolds,
        routes::scaffolds::get_scaffold,
    ),
    components(schemas(
        HealthResponse,
        pulse_core::error::ApiError,
        pulse_core::pipeline::AnalysisRequest,
        pulse_core::pipeline::AnalysisResult,
        pulse_core::scaffold::ScaffoldDescriptor,
        routes::scaffolds::ScaffoldSummary,
        routes::scaffolds::ScaffoldListResponse,
    )),
    tags(
        (name = "system", description = "Service health"),
        (name = "analysis", description = "Health snapshot analysis"),
        (name = "scaffolds", description = "Reasoning scaffold registry")
    )
)]
struct ApiDoc;

#[derive(Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub scaffold_count: usize,
    /// Whether audit events are persisted beyond the log stream
    pub storage_enabled: bool,
    pub detector_configured: bool,
}

fn build_app(app_state: state::AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::router())
        .merge(routes::analyze::router())
        .merge(routes::scaffolds::router())
        .merge(routes::mcp_http::router())
        .layer(axum::middleware::from_fn(middleware::security_headers::apply))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(
                    middleware::request_id::MakeRequestUuidV7,
                ))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(middleware::cors::build_cors_layer()),
        )
        .with_state(app_state)
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pulse_api=debug,pulse_core=info,pulse_mcp_runtime=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let service = match HealthService::from_config(&RuntimeConfig::from_env()) {
        Ok(service) => service,
        Err(err) => {
            tracing::error!(error = %err, "failed to start health service");
            std::process::exit(1);
        }
    };
    let app = build_app(state::AppState::new(service));

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Pulse API listening on {}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, %addr, "failed to bind listener");
            std::process::exit(1);
        }
    };
    if let Err(err) = axum::serve(listener, app).await {
        tracing::error!(error = %err, "server error");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;

    #[test]
    fn openapi_documents_every_route() {
        let doc = ApiDoc::openapi();
        for path in ["/health", "/v1/analyze", "/v1/scaffolds", "/v1/scaffolds/{id}"] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }

    #[tokio::test]
    async fn full_stack_sets_request_id_and_cache_headers() {
        let response = build_app(state::test_state())
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        assert_eq!(
            response
                .headers()
                .get("cache-control")
                .expect("cache-control header should exist"),
            "no-store"
        );
    }

    #[tokio::test]
    async fn error_bodies_carry_the_layer_request_id() {
        let response = build_app(state::test_state())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/analyze")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"snapshot": {}, "scaffold_id": "nope"}"#))
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let header_id = response
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .expect("x-request-id header should exist");
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should read");
        let body: Value = serde_json::from_slice(&bytes).expect("body should be json");
        assert_eq!(body["request_id"], header_id.as_str());
    }
}
