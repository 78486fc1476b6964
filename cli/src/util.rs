use pulse_mcp_runtime::{HealthService, RuntimeConfig};
use serde_json::{Value, json};

/// Exit codes: 0=success, 1=rejected input (4xx), 2=server or degraded state (5xx),
/// 3=connection error, 4=usage error
pub const EXIT_OK: i32 = 0;
pub const EXIT_REJECTED: i32 = 1;
pub const EXIT_SERVER: i32 = 2;
pub const EXIT_CONNECTION: i32 = 3;
pub const EXIT_USAGE: i32 = 4;

pub fn client() -> reqwest::Client {
    reqwest::Client::new()
}

pub fn to_pretty_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Print a structured CLI error to stderr and return the given exit code.
pub fn cli_error(code: i32, message: &str, docs_hint: Option<&str>) -> i32 {
    let mut err = json!({
        "error": "cli_error",
        "message": message
    });
    if let Some(hint) = docs_hint {
        err["docs_hint"] = json!(hint);
    }
    eprintln!("{}", to_pretty_json(&err));
    code
}

/// Successful output goes to stdout, everything else to stderr.
pub fn emit(value: &Value, exit_code: i32) -> i32 {
    if exit_code == EXIT_OK {
        println!("{}", to_pretty_json(value));
    } else {
        eprintln!("{}", to_pretty_json(value));
    }
    exit_code
}

/// Build the in-process service from the environment, printing startup errors.
pub fn local_service() -> Result<HealthService, i32> {
    HealthService::from_config(&RuntimeConfig::from_env()).map_err(|err| {
        cli_error(
            EXIT_SERVER,
            &format!("Failed to start the health pipeline: {err}"),
            Some("Check PULSE_SCAFFOLD_DIR and PULSE_DETECTOR_URL."),
        )
    })
}

/// Send a request to the Pulse API and print the JSON response.
pub async fn api_request(
    api_url: &str,
    method: reqwest::Method,
    path: &str,
    body: Option<&Value>,
) -> i32 {
    let url = match reqwest::Url::parse(&format!("{api_url}{path}")) {
        Ok(url) => url,
        Err(e) => {
            return cli_error(
                EXIT_USAGE,
                &format!("Invalid URL: {api_url}{path}: {e}"),
                None,
            );
        }
    };

    let mut req = client().request(method, url);
    if let Some(b) = body {
        req = req.json(b);
    }

    let resp = match req.send().await {
        Ok(r) => r,
        Err(e) => {
            let err = json!({
                "error": "connection_error",
                "message": format!("{e}"),
                "docs_hint": "Is the API server running? Check PULSE_API_URL."
            });
            return emit(&err, EXIT_CONNECTION);
        }
    };

    let exit_code = exit_code_for_status(resp.status().as_u16());
    let resp_body: Value = match resp.json().await {
        Ok(v) => v,
        Err(e) => json!({"raw_error": format!("Failed to parse response as JSON: {e}")}),
    };
    emit(&resp_body, exit_code)
}

pub fn exit_code_for_status(status: u16) -> i32 {
    match status {
        200..=299 => EXIT_OK,
        400..=499 => EXIT_REJECTED,
        _ => EXIT_SERVER,
    }
}

/// Read JSON from a file path or stdin (when path is "-").
pub fn read_json_from_file(path: &str) -> Result<Value, String> {
    let raw = if path == "-" {
        std::io::read_to_string(std::io::stdin())
            .map_err(|e| format!("Failed to read stdin: {e}"))?
    } else {
        std::fs::read_to_string(path).map_err(|e| format!("Failed to read file '{path}': {e}"))?
    };
    serde_json::from_str(&raw).map_err(|e| format!("Invalid JSON in '{path}': {e}"))
}
