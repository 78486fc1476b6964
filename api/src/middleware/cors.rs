use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};

pub const CORS_ORIGINS_ENV: &str = "PULSE_CORS_ORIGINS";
const DEFAULT_ORIGIN: &str = "http://localhost:3000";

/// Build a CORS layer from the `PULSE_CORS_ORIGINS` env var.
///
/// - Origins: comma-separated list (default: `http://localhost:3000`), `*` for any
/// - Methods: GET, POST, OPTIONS
/// - Headers: Content-Type, X-Request-Id
/// - Max age: 3600s
pub fn build_cors_layer() -> CorsLayer {
    let raw = std::env::var(CORS_ORIGINS_ENV).unwrap_or_else(|_| DEFAULT_ORIGIN.to_string());
    cors_layer_for(&raw)
}

pub fn cors_layer_for(raw: &str) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            HeaderName::from_static("content-type"),
            HeaderName::from_static("x-request-id"),
        ])
        .expose_headers([HeaderName::from_static("x-request-id")])
        .max_age(std::time::Duration::from_secs(3600));

    match parse_origins(raw) {
        None => base.allow_origin(AllowOrigin::any()),
        Some(origins) => base.allow_origin(origins),
    }
}

/// `None` means any origin.
fn parse_origins(raw: &str) -> Option<Vec<HeaderValue>> {
    let entries: Vec<&str> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if entries.contains(&"*") {
        return None;
    }
    let origins: Vec<HeaderValue> = entries
        .into_iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();
    if origins.is_empty() {
        return Some(vec![HeaderValue::from_static(DEFAULT_ORIGIN)]);
    }
    Some(origins)
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    use super::*;

    #[test]
    fn parses_comma_separated_origins() {
        let origins = parse_origins(" https://a.example , https://b.example,").unwrap();
        assert_eq!(origins, vec!["https://a.example", "https://b.example"]);
    }

    #[test]
    fn wildcard_allows_any_origin() {
        assert!(parse_origins("https://a.example,*").is_none());
    }

    #[test]
    fn blank_value_falls_back_to_localhost() {
        assert_eq!(parse_origins(" , ").unwrap(), vec![DEFAULT_ORIGIN]);
    }

    #[tokio::test]
    async fn allowed_origin_is_echoed() {
        async fn ok() -> StatusCode {
            StatusCode::OK
        }
        let app = Router::new()
            .route("/health", get(ok))
            .layer(cors_layer_for("https://app.example"));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header("origin", "https://app.example")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");

        assert_eq!(
            response
                .headers()
                .get("access-control-allow-origin")
                .expect("allow-origin header should exist"),
            "https://app.example"
        );
    }
}
