use std::time::Duration;

use pulse_core::detection::{
    DetectionProvenance, DetectionRequest, DetectionResult, DetectorError, PatternDetector,
};
use serde_json::{Value, json};
use uuid::Uuid;

/// Tool name the remote detector exposes over JSON-RPC.
pub const DETECT_TOOL: &str = "detect_patterns";

/// Pattern detector reached over JSON-RPC 2.0 `tools/call`.
///
/// One request per call, bounded by the configured timeout. No retries;
/// the caller degrades to the local estimator on any error.
#[derive(Debug, Clone)]
pub struct RemoteDetector {
    url: String,
    timeout: Duration,
    http: reqwest::Client,
}

impl RemoteDetector {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, DetectorError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DetectorError::Unavailable(e.to_string()))?;
        Ok(Self {
            url: url.into(),
            timeout,
            http,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn classify(&self, err: reqwest::Error) -> DetectorError {
        if err.is_timeout() {
            DetectorError::Timeout(u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX))
        } else if err.is_decode() {
            DetectorError::Malformed(err.to_string())
        } else {
            DetectorError::Unavailable(err.to_string())
        }
    }
}

impl PatternDetector for RemoteDetector {
    async fn detect(&self, request: &DetectionRequest) -> Result<DetectionResult, DetectorError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": Uuid::now_v7().to_string(),
            "method": "tools/call",
            "params": {
                "name": DETECT_TOOL,
                "arguments": request,
            }
        });

        let response = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DetectorError::Rejected(format!("HTTP {status}")));
        }

        let payload: Value = response.json().await.map_err(|e| self.classify(e))?;
        parse_rpc_response(payload)
    }
}

/// Extract a detection result from a JSON-RPC response envelope.
pub(crate) fn parse_rpc_response(payload: Value) -> Result<DetectionResult, DetectorError> {
    let Some(obj) = payload.as_object() else {
        return Err(DetectorError::Malformed(
            "response is not a JSON object".to_string(),
        ));
    };

    if let Some(error) = obj.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unspecified JSON-RPC error");
        return Err(DetectorError::Rejected(message.to_string()));
    }

    let result = obj
        .get("result")
        .ok_or_else(|| DetectorError::Malformed("missing 'result'".to_string()))?;
    let tool_error = result
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let content = tool_payload(result)?;
    if tool_error || content.get("status").and_then(Value::as_str) == Some("error") {
        return Err(DetectorError::Rejected(error_message(&content)));
    }

    // Some detectors wrap the values in an envelope: {"status": "ok", "result": {...}}
    let values = match content.get("result") {
        Some(inner) if inner.is_object() => inner.clone(),
        _ => content.clone(),
    };

    Ok(DetectionResult {
        friction: number(&values, "friction")?,
        emergence: flag(&values, "emergence")?,
        coherence: number(&values, "coherence")?,
        provenance: DetectionProvenance::Remote,
        fallback_reason: None,
        raw: Some(content),
    })
}

/// Prefer `structuredContent`; otherwise the first text block holding JSON.
fn tool_payload(result: &Value) -> Result<Value, DetectorError> {
    if let Some(structured) = result.get("structuredContent").filter(|v| v.is_object()) {
        return Ok(structured.clone());
    }

    let text = result
        .get("content")
        .and_then(Value::as_array)
        .and_then(|blocks| {
            blocks.iter().find_map(|block| {
                (block.get("type").and_then(Value::as_str) == Some("text"))
                    .then(|| block.get("text").and_then(Value::as_str))
                    .flatten()
            })
        })
        .ok_or_else(|| DetectorError::Malformed("no usable content block".to_string()))?;

    let parsed: Value = serde_json::from_str(text)
        .map_err(|e| DetectorError::Malformed(format!("text block is not JSON: {e}")))?;
    if !parsed.is_object() {
        return Err(DetectorError::Malformed(
            "text block is not a JSON object".to_string(),
        ));
    }
    Ok(parsed)
}

fn error_message(content: &Value) -> String {
    match content.get("error") {
        Some(Value::String(message)) => message.clone(),
        Some(Value::Object(map)) => map
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("detector error")
            .to_string(),
        _ => "detector error".to_string(),
    }
}

fn number(values: &Value, field: &str) -> Result<f64, DetectorError> {
    values
        .get(field)
        .and_then(Value::as_f64)
        .ok_or_else(|| DetectorError::Malformed(format!("'{field}' missing or not a number")))
}

fn flag(values: &Value, field: &str) -> Result<bool, DetectorError> {
    match values.get(field) {
        Some(Value::Bool(value)) => Ok(*value),
        Some(Value::Object(map)) => map
            .get("window_detected")
            .and_then(Value::as_bool)
            .ok_or_else(|| DetectorError::Malformed(format!("'{field}' object has no window_detected"))),
        _ => Err(DetectorError::Malformed(format!(
            "'{field}' missing or not a boolean"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use pulse_core::detection::{DetectionClient, FallbackReason};
    use pulse_core::signals::SignalScoreSet;
    use pulse_core::snapshot::Period;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    fn request() -> DetectionRequest {
        DetectionRequest::from_scores(&SignalScoreSet::from_values(
            Period::Last30Days,
            [0.8, 0.75, 0.82, 0.79],
        ))
    }

    /// Serve a single HTTP response with `body`, then close.
    async fn serve_once(status: &'static str, body: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            let mut buf = [0_u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&buf[..n]);
                if request_complete(&received) {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });
        format!("http://{addr}/mcp")
    }

    fn request_complete(raw: &[u8]) -> bool {
        let text = String::from_utf8_lossy(raw);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let length = text[..header_end]
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        raw.len() >= header_end + 4 + length
    }

    #[test]
    fn parses_structured_content() {
        let result = parse_rpc_response(json!({
            "jsonrpc": "2.0",
            "id": "1",
            "result": {
                "structuredContent": { "friction": 0.12, "emergence": false, "coherence": 0.88 }
            }
        }))
        .unwrap();
        assert_eq!(result.friction, 0.12);
        assert!(!result.emergence);
        assert_eq!(result.provenance, DetectionProvenance::Remote);
        assert!(result.raw.is_some());
    }

    #[test]
    fn parses_json_text_block_and_envelope() {
        let text = json!({
            "status": "ok",
            "result": { "friction": 0.3, "emergence": { "window_detected": true }, "coherence": 0.7 }
        })
        .to_string();
        let result = parse_rpc_response(json!({
            "jsonrpc": "2.0",
            "id": "1",
            "result": { "content": [{ "type": "text", "text": text }] }
        }))
        .unwrap();
        assert!(result.emergence);
        assert_eq!(result.coherence, 0.7);
    }

    #[test]
    fn error_status_is_rejected() {
        let err = parse_rpc_response(json!({
            "jsonrpc": "2.0",
            "id": "1",
            "result": { "structuredContent": { "status": "error", "error": "unknown profile" } }
        }))
        .unwrap_err();
        assert!(matches!(err, DetectorError::Rejected(ref m) if m == "unknown profile"));

        let rpc = parse_rpc_response(json!({
            "jsonrpc": "2.0",
            "id": "1",
            "error": { "code": -32601, "message": "Method not found" }
        }))
        .unwrap_err();
        assert_eq!(rpc.fallback_reason(), FallbackReason::DetectorError);
    }

    #[test]
    fn missing_fields_are_malformed() {
        let err = parse_rpc_response(json!({
            "jsonrpc": "2.0",
            "id": "1",
            "result": { "structuredContent": { "friction": "high" } }
        }))
        .unwrap_err();
        assert_eq!(err.fallback_reason(), FallbackReason::MalformedResponse);

        let text = parse_rpc_response(json!({
            "jsonrpc": "2.0",
            "id": "1",
            "result": { "content": [{ "type": "text", "text": "friction is low" }] }
        }))
        .unwrap_err();
        assert_eq!(text.fallback_reason(), FallbackReason::MalformedResponse);
    }

    #[tokio::test]
    async fn remote_answer_is_used() {
        let body = json!({
            "jsonrpc": "2.0",
            "id": "1",
            "result": { "structuredContent": { "friction": 0.07, "emergence": false, "coherence": 0.9 } }
        })
        .to_string();
        let url = serve_once("200 OK", body).await;
        let detector = RemoteDetector::new(url, Duration::from_secs(2)).unwrap();
        let result = detector.detect(&request()).await.unwrap();
        assert_eq!(result.coherence, 0.9);
    }

    #[tokio::test]
    async fn silent_detector_times_out_and_degrades() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // Accept and hold the connection without ever answering.
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let detector =
            RemoteDetector::new(format!("http://{addr}/mcp"), Duration::from_millis(100)).unwrap();
        let err = detector.detect(&request()).await.unwrap_err();
        assert!(matches!(err, DetectorError::Timeout(100)));

        let client = DetectionClient::new(Some(detector));
        let scores = SignalScoreSet::from_values(Period::Last30Days, [0.8, 0.75, 0.82, 0.79]);
        let result = client.detect(&scores).await;
        assert_eq!(result.provenance, DetectionProvenance::LocalFallback);
        assert_eq!(result.fallback_reason, Some(FallbackReason::Timeout));
    }

    #[tokio::test]
    async fn refused_connection_is_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let detector =
            RemoteDetector::new(format!("http://{addr}/mcp"), Duration::from_secs(1)).unwrap();
        let err = detector.detect(&request()).await.unwrap_err();
        assert_eq!(err.fallback_reason(), FallbackReason::Unavailable);
    }

    #[tokio::test]
    async fn error_status_code_is_detector_error() {
        let url = serve_once("503 Service Unavailable", "{}".to_string()).await;
        let detector = RemoteDetector::new(url, Duration::from_secs(2)).unwrap();
        let err = detector.detect(&request()).await.unwrap_err();
        assert_eq!(err.fallback_reason(), FallbackReason::DetectorError);
    }

    #[tokio::test]
    async fn non_json_body_is_malformed() {
        let url = serve_once("200 OK", "not json".to_string()).await;
        let detector = RemoteDetector::new(url, Duration::from_secs(2)).unwrap();
        let err = detector.detect(&request()).await.unwrap_err();
        assert_eq!(err.fallback_reason(), FallbackReason::MalformedResponse);
    }
}
