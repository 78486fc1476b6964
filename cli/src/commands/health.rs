use serde_json::json;

use crate::util::{EXIT_OK, EXIT_SERVER, api_request, emit, local_service};

pub async fn run(api_url: Option<&str>) -> i32 {
    if let Some(url) = api_url {
        return api_request(url, reqwest::Method::GET, "/health", None).await;
    }

    let service = match local_service() {
        Ok(s) => s,
        Err(code) => return code,
    };
    let status = service.health_check().await;
    let code = if status.status == "ok" { EXIT_OK } else { EXIT_SERVER };
    let value = serde_json::to_value(&status)
        .unwrap_or_else(|e| json!({"error": "encode_failed", "message": e.to_string()}));
    emit(&value, code)
}
