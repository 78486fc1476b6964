use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Subcommand};
use pulse_core::detection::DetectionProvenance;
use pulse_core::error::{ApiError, codes};
use pulse_core::pipeline::{ANALYZE_TOOL, AnalysisRequest, AnalysisResult};
use pulse_core::privacy::PrivacyMode;
use pulse_core::routing::ScaffoldId;
use pulse_core::trends::HistoryEntry;
use serde_json::{Map, Value, json};
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use uuid::Uuid;

pub mod audit_log;
pub mod config;
pub mod detector;
pub mod narrator;
pub mod scaffolds;
pub mod service;

pub use config::RuntimeConfig;
pub use service::{HEALTH_CHECK_TOOL, HealthService, ServiceError, TRENDS_TOOL};

const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
const MCP_SERVER_NAME: &str = "pulse-mcp";
const SCAFFOLD_URI_PREFIX: &str = "scaffold://";
const SCAFFOLD_REGISTRY_URI: &str = "scaffold://registry";

#[derive(Subcommand)]
pub enum McpCommands {
    /// Run the Pulse MCP server over stdio
    Serve(McpServeArgs),
    /// Load scaffolds, probe the detector and print a readiness report
    Diagnose(McpServeArgs),
}

#[derive(Args, Clone, Debug, Default)]
pub struct McpServeArgs {
    /// Remote pattern detector endpoint (overrides PULSE_DETECTOR_URL)
    #[arg(long)]
    pub detector_url: Option<String>,
    /// Directory of scaffold JSON overrides (overrides PULSE_SCAFFOLD_DIR)
    #[arg(long)]
    pub scaffold_dir: Option<PathBuf>,
    /// Privacy mode used when a call does not name one
    #[arg(long)]
    pub privacy_mode: Option<PrivacyMode>,
    /// Append audit events to this JSON Lines file (overrides PULSE_AUDIT_LOG)
    #[arg(long)]
    pub audit_log: Option<PathBuf>,
}

impl McpServeArgs {
    pub fn apply(&self, mut config: RuntimeConfig) -> RuntimeConfig {
        if let Some(url) = &self.detector_url {
            config.detector_url = Some(url.clone());
        }
        if let Some(dir) = &self.scaffold_dir {
            config.scaffold_dir = Some(dir.clone());
        }
        if let Some(mode) = self.privacy_mode {
            config.default_privacy_mode = mode;
        }
        if let Some(path) = &self.audit_log {
            config.audit_log = Some(path.clone());
        }
        config
    }
}

pub async fn run(config: RuntimeConfig, command: McpCommands) -> i32 {
    let (args, diagnose) = match command {
        McpCommands::Serve(args) => (args, false),
        McpCommands::Diagnose(args) => (args, true),
    };
    let service = match HealthService::from_config(&args.apply(config)) {
        Ok(service) => Arc::new(service),
        Err(err) => {
            let payload = json!({
                "error": "mcp_startup_failed",
                "message": err.to_string(),
            });
            eprintln!("{}", to_pretty_json(&payload));
            return 1;
        }
    };

    if diagnose {
        let report = diagnostics(&service).await;
        println!("{}", to_pretty_json(&report));
        return if report.get("status").and_then(Value::as_str) == Some("ready") {
            0
        } else {
            2
        };
    }

    let server = McpServer::new(service);
    match server.serve_stdio().await {
        Ok(()) => 0,
        Err(err) => {
            let payload = json!({
                "error": "mcp_server_error",
                "message": err,
            });
            eprintln!("{}", to_pretty_json(&payload));
            1
        }
    }
}

/// Handle one JSON-RPC message (or batch) received over HTTP.
pub async fn handle_http_jsonrpc(service: Arc<HealthService>, incoming: Value) -> Vec<Value> {
    McpServer::new(service).handle_incoming_message(incoming).await
}

/// Readiness report: scaffolds loaded, neutral present, and whether a probe
/// analysis reached the configured detector.
pub async fn diagnostics(service: &HealthService) -> Value {
    let health = service.health_check().await;
    let probe = service
        .analyze(&AnalysisRequest {
            snapshot: serde_json::from_value(json!({
                "vitals": { "resting_heart_rate_bpm": 64.0, "systolic_mmhg": 118.0, "diastolic_mmhg": 76.0 },
                "activity": { "sessions_per_week": 3.0, "sleep_duration_hours": 7.5 }
            }))
            .unwrap_or_default(),
            ..Default::default()
        })
        .await;

    let mut warnings = Vec::new();
    let detector = match &probe {
        Ok(AnalysisResult::Completed(done)) => {
            if health.detector_configured && done.detection_provenance != DetectionProvenance::Remote {
                warnings.push(format!(
                    "detector configured but probe fell back locally ({})",
                    done.fallback_reason.map(|r| r.as_str()).unwrap_or("unknown")
                ));
            }
            json!({
                "configured": health.detector_configured,
                "provenance": done.detection_provenance,
                "fallback_reason": done.fallback_reason,
            })
        }
        Ok(AnalysisResult::Escalated(_)) => {
            warnings.push("probe snapshot unexpectedly escalated".to_string());
            json!({ "configured": health.detector_configured })
        }
        Err(err) => {
            warnings.push(format!("probe analysis failed: {err}"));
            json!({ "configured": health.detector_configured })
        }
    };
    if health.status != "ok" {
        warnings.push("neutral scaffold is not registered".to_string());
    }

    let scaffolds: Vec<Value> = service
        .registry()
        .iter()
        .map(|d| json!({ "id": d.id.as_str(), "version": d.version }))
        .collect();

    json!({
        "status": if warnings.is_empty() { "ready" } else { "degraded" },
        "server": MCP_SERVER_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "scaffolds": scaffolds,
        "detector": detector,
        "audit": {
            "persisted": health.storage_enabled,
            "path": service.audit_log().path().map(|p| p.display().to_string()),
        },
        "warnings": warnings,
    })
}

struct McpServer {
    service: Arc<HealthService>,
}

impl McpServer {
    fn new(service: Arc<HealthService>) -> Self {
        Self { service }
    }

    async fn serve_stdio(&self) -> Result<(), String> {
        let mut reader = BufReader::new(io::stdin());
        let mut stdout = io::stdout();
        tracing::info!(
            server = MCP_SERVER_NAME,
            version = env!("CARGO_PKG_VERSION"),
            scaffolds = self.service.registry().len(),
            "mcp server listening on stdio"
        );
        self.serve(&mut reader, &mut stdout).await
    }

    async fn serve<R, W>(&self, reader: &mut R, writer: &mut W) -> Result<(), String>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        loop {
            let payload = read_frame(reader)
                .await
                .map_err(|e| format!("Failed to read MCP message: {e}"))?;
            let Some(payload) = payload else {
                break;
            };

            let responses = match serde_json::from_slice::<Value>(&payload) {
                Ok(incoming) => self.handle_incoming_message(incoming).await,
                Err(e) => {
                    tracing::warn!(error = %e, "discarding undecodable mcp message");
                    vec![error_response(
                        Value::Null,
                        RpcError::parse_error(format!("Parse error: {e}")),
                    )]
                }
            };
            for response in responses {
                write_framed_json(writer, &response)
                    .await
                    .map_err(|e| format!("Failed to write MCP response: {e}"))?;
            }
        }
        Ok(())
    }

    async fn handle_incoming_message(&self, incoming: Value) -> Vec<Value> {
        let mut responses = Vec::new();

        if let Some(batch) = incoming.as_array() {
            if batch.is_empty() {
                responses.push(error_response(
                    Value::Null,
                    RpcError::invalid_request("Batch request must not be empty"),
                ));
                return responses;
            }
            for item in batch {
                if let Some(response) = self.handle_single_message(item.clone()).await {
                    responses.push(response);
                }
            }
            return responses;
        }

        if let Some(response) = self.handle_single_message(incoming).await {
            responses.push(response);
        }
        responses
    }

    async fn handle_single_message(&self, incoming: Value) -> Option<Value> {
        let Some(obj) = incoming.as_object() else {
            return Some(error_response(
                Value::Null,
                RpcError::invalid_request("Request must be a JSON object"),
            ));
        };

        if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            let id = obj.get("id").cloned().unwrap_or(Value::Null);
            return Some(error_response(
                id,
                RpcError::invalid_request("jsonrpc must be '2.0'"),
            ));
        }

        // Messages without a method are client responses; the server never sends requests.
        let method = obj.get("method").and_then(Value::as_str)?;

        let params = obj.get("params").cloned().unwrap_or(Value::Null);
        match obj.get("id").cloned() {
            Some(id) => Some(match self.handle_request(method, params).await {
                Ok(payload) => success_response(id, payload),
                Err(err) => error_response(id, err),
            }),
            None => {
                tracing::debug!(method, "ignoring notification");
                None
            }
        }
    }

    async fn handle_request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        match method {
            "initialize" => Ok(self.initialize_payload()),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(tools_list_payload()),
            "tools/call" => self.handle_tools_call(params).await,
            "resources/list" => Ok(self.resources_list_payload()),
            "resources/read" => self.handle_resources_read(params),
            "prompts/list" => Ok(json!({ "prompts": [] })),
            _ => Err(RpcError::method_not_found(method)),
        }
    }

    fn initialize_payload(&self) -> Value {
        json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {
                "tools": { "listChanged": false },
                "resources": { "listChanged": false },
                "prompts": { "listChanged": false }
            },
            "serverInfo": {
                "name": MCP_SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION")
            },
            "instructions": "Call personal_health_signal with a health snapshot to get four bounded signal scores and a guarded narrative. If the result status is 'escalated', show the safety message verbatim and do not add interpretation. Use health_signal_trends with an inline newest-first history of score sets. Scaffold descriptors are readable as scaffold:// resources."
        })
    }

    async fn handle_tools_call(&self, params: Value) -> Result<Value, RpcError> {
        let params = params
            .as_object()
            .ok_or_else(|| RpcError::invalid_params("tools/call params must be an object"))?;

        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("tools/call requires string field 'name'"))?;

        let args = match params.get("arguments") {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::Null) | None => Map::new(),
            Some(_) => {
                return Err(RpcError::invalid_params(
                    "tools/call 'arguments' must be an object",
                ));
            }
        };

        let outcome = match name {
            ANALYZE_TOOL => self.call_analyze(args).await,
            HEALTH_CHECK_TOOL => self.call_health_check().await,
            TRENDS_TOOL => self.call_trends(args).await,
            _ => {
                let known: Vec<&str> = tool_definitions().iter().map(|t| t.name).collect();
                Err(ToolError::new("unknown_tool", format!("Unknown tool '{name}'"))
                    .with_field("name")
                    .with_details(json!({ "available_tools": known })))
            }
        };

        Ok(match outcome {
            Ok(payload) => build_tool_call_response(payload, false),
            Err(err) => {
                tracing::debug!(tool = name, code = err.code.as_str(), "tool call rejected");
                build_tool_call_response(
                    json!({
                        "status": "error",
                        "tool": name,
                        "error": err.to_value(),
                    }),
                    true,
                )
            }
        })
    }

    async fn call_analyze(&self, args: Map<String, Value>) -> Result<Value, ToolError> {
        let request: AnalysisRequest = serde_json::from_value(Value::Object(args)).map_err(|e| {
            ToolError::new(codes::VALIDATION_FAILED, format!("Invalid arguments: {e}"))
                .with_field("arguments")
                .with_docs_hint(
                    "Pass 'snapshot' as an object; 'period' is one of last_7_days, last_30_days, last_90_days, last_180_days, last_365_days.",
                )
        })?;

        let result = self
            .service
            .analyze(&request)
            .await
            .map_err(|err| ToolError::from(ApiError::from_pipeline(&err, request_id())))?;
        serde_json::to_value(&result).map_err(|e| ToolError::new(codes::INTERNAL_ERROR, e.to_string()))
    }

    async fn call_health_check(&self) -> Result<Value, ToolError> {
        let status = self.service.health_check().await;
        let mut payload = serde_json::to_value(&status)
            .map_err(|e| ToolError::new(codes::INTERNAL_ERROR, e.to_string()))?;
        payload["server"] = json!(MCP_SERVER_NAME);
        payload["version"] = json!(env!("CARGO_PKG_VERSION"));
        payload["checked_at"] = json!(chrono::Utc::now());
        Ok(payload)
    }

    async fn call_trends(&self, mut args: Map<String, Value>) -> Result<Value, ToolError> {
        let raw = args.remove("history").ok_or_else(|| {
            ToolError::new(codes::VALIDATION_FAILED, "Missing required field 'history'")
                .with_field("history")
        })?;
        let history: Vec<HistoryEntry> = serde_json::from_value(raw).map_err(|e| {
            ToolError::new(codes::VALIDATION_FAILED, format!("Invalid history: {e}"))
                .with_field("history")
                .with_docs_hint(
                    "Each entry is {\"signals\": {\"vital_stability\": 0.7, ...}} with scores in [0, 1], newest first.",
                )
        })?;

        let report = self.service.trends(&history).await.map_err(|e| {
            ToolError::new(codes::VALIDATION_FAILED, e.to_string()).with_field("history")
        })?;
        serde_json::to_value(&report).map_err(|e| ToolError::new(codes::INTERNAL_ERROR, e.to_string()))
    }

    fn resources_list_payload(&self) -> Value {
        let mut resources = vec![json!({
            "uri": SCAFFOLD_REGISTRY_URI,
            "name": "Scaffold Registry",
            "description": "All registered health scaffolds with tone variants and output formats",
            "mimeType": "application/json"
        })];
        resources.extend(self.service.registry().iter().map(|descriptor| {
            json!({
                "uri": format!("{SCAFFOLD_URI_PREFIX}{}", descriptor.id),
                "name": descriptor.display_name,
                "description": descriptor.description,
                "mimeType": "application/json"
            })
        }));
        json!({ "resources": resources })
    }

    fn handle_resources_read(&self, params: Value) -> Result<Value, RpcError> {
        let params = params
            .as_object()
            .ok_or_else(|| RpcError::invalid_params("resources/read params must be an object"))?;
        let uri = params.get("uri").and_then(Value::as_str).ok_or_else(|| {
            RpcError::invalid_params("resources/read requires string field 'uri'")
        })?;

        let content = if uri == SCAFFOLD_REGISTRY_URI {
            self.registry_summary()
        } else {
            let raw_id = uri.strip_prefix(SCAFFOLD_URI_PREFIX).ok_or_else(|| {
                RpcError::invalid_params(format!("Unknown resource URI: {uri}"))
            })?;
            let id: ScaffoldId = raw_id.parse().map_err(|err: pulse_core::routing::UnknownScaffold| {
                RpcError::invalid_params(format!("Unknown resource URI: {uri}")).with_data(json!({
                    "suggestion": err.suggestion.map(|s| format!("{SCAFFOLD_URI_PREFIX}{s}")),
                }))
            })?;
            let descriptor = self.service.registry().get(id).ok_or_else(|| {
                RpcError::invalid_params(format!("Scaffold '{id}' is not registered"))
            })?;
            serde_json::to_value(descriptor).map_err(|e| RpcError::internal(e.to_string()))?
        };

        Ok(json!({
            "contents": [{
                "uri": uri,
                "mimeType": "application/json",
                "text": to_pretty_json(&content)
            }]
        }))
    }

    fn registry_summary(&self) -> Value {
        let scaffolds: Vec<Value> = self
            .service
            .registry()
            .iter()
            .map(|d| {
                json!({
                    "id": d.id.as_str(),
                    "version": d.version,
                    "display_name": d.display_name,
                    "description": d.description,
                    "tone_variants": d.framing.tone_variants.keys().collect::<Vec<_>>(),
                    "output_formats": d.output.formats,
                    "context_exports": d.context_exports.iter().map(|f| f.field_name.as_str()).collect::<Vec<_>>(),
                })
            })
            .collect();
        json!({
            "domain": "personal_health",
            "scaffold_count": scaffolds.len(),
            "scaffolds": scaffolds,
        })
    }
}

#[derive(Debug)]
struct RpcError {
    code: i64,
    message: String,
    data: Option<Value>,
}

impl RpcError {
    fn parse_error(message: impl Into<String>) -> Self {
        Self {
            code: -32700,
            message: message.into(),
            data: None,
        }
    }

    fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: -32600,
            message: message.into(),
            data: None,
        }
    }

    fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("Method not found: {method}"),
            data: None,
        }
    }

    fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: -32602,
            message: message.into(),
            data: None,
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            code: -32603,
            message: message.into(),
            data: None,
        }
    }

    fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[derive(Debug, Clone)]
struct ToolError {
    code: String,
    message: String,
    field: Option<String>,
    docs_hint: Option<String>,
    details: Option<Value>,
}

impl ToolError {
    fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            field: None,
            docs_hint: None,
            details: None,
        }
    }

    fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    fn with_docs_hint(mut self, docs_hint: impl Into<String>) -> Self {
        self.docs_hint = Some(docs_hint.into());
        self
    }

    fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    fn to_value(&self) -> Value {
        let mut payload = json!({
            "error": self.code,
            "message": self.message
        });
        if let Some(field) = &self.field {
            payload["field"] = Value::String(field.clone());
        }
        if let Some(docs_hint) = &self.docs_hint {
            payload["docs_hint"] = Value::String(docs_hint.clone());
        }
        if let Some(details) = &self.details {
            payload["details"] = details.clone();
        }
        payload
    }
}

impl From<ApiError> for ToolError {
    fn from(err: ApiError) -> Self {
        let mut tool = Self::new(err.error, err.message);
        tool.field = err.field;
        tool.docs_hint = err.docs_hint;
        tool.details = Some(match err.received {
            Some(received) => json!({ "request_id": err.request_id, "received": received }),
            None => json!({ "request_id": err.request_id }),
        });
        tool
    }
}

#[derive(Debug)]
struct ToolDefinition {
    name: &'static str,
    description: &'static str,
    input_schema: Value,
}

fn tool_definitions() -> Vec<ToolDefinition> {
    let period = json!({
        "type": "string",
        "enum": ["last_7_days", "last_30_days", "last_90_days", "last_180_days", "last_365_days"],
        "default": "last_30_days"
    });
    let scaffold_ids: Vec<&str> = ScaffoldId::known_ids().collect();
    vec![
        ToolDefinition {
            name: ANALYZE_TOOL,
            description: "Translate a health snapshot into four bounded signal scores, check safety, detect cross-signal patterns and return a guarded narrative.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "snapshot": {
                        "type": "object",
                        "description": "Health readings. Every section is optional: vitals, labs, biometrics, activity, preventive, data_source."
                    },
                    "period": period,
                    "privacy_mode": { "type": "string", "enum": ["strict", "standard", "explicit"] },
                    "tone_variant": { "type": "string" },
                    "output_format": { "type": "string" },
                    "scaffold_id": { "type": "string", "enum": scaffold_ids },
                    "include_detector_raw": { "type": "boolean", "default": false },
                    "cross_domain_context": { "type": "object" }
                },
                "required": ["snapshot"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: HEALTH_CHECK_TOOL,
            description: "Report server status, registered scaffold count, audit persistence and detector configuration.",
            input_schema: json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: TRENDS_TOOL,
            description: "Trend statistics and divergence patterns over an inline newest-first history of signal score sets.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "history": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "recorded_at": { "type": "string", "format": "date-time" },
                                "signals": {
                                    "type": "object",
                                    "additionalProperties": { "type": "number", "minimum": 0, "maximum": 1 }
                                }
                            },
                            "required": ["signals"]
                        }
                    }
                },
                "required": ["history"],
                "additionalProperties": false
            }),
        },
    ]
}

fn tools_list_payload() -> Value {
    let tools: Vec<Value> = tool_definitions()
        .into_iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "inputSchema": tool.input_schema,
            })
        })
        .collect();
    json!({ "tools": tools })
}

fn build_tool_call_response(envelope: Value, is_error: bool) -> Value {
    // Agents read the text block, so it always carries the full envelope.
    let text = to_pretty_json(&envelope);
    if is_error {
        json!({
            "isError": true,
            "content": [{ "type": "text", "text": text }],
            "structuredContent": envelope
        })
    } else {
        json!({
            "content": [{ "type": "text", "text": text }],
            "structuredContent": envelope
        })
    }
}

fn request_id() -> String {
    Uuid::now_v7().to_string()
}

fn success_response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

fn error_response(id: Value, error: RpcError) -> Value {
    let mut payload = json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": error.code,
            "message": error.message
        }
    });
    if let Some(data) = error.data {
        payload["error"]["data"] = data;
    }
    payload
}

/// Read one raw message body. Content-Length framing is the default; a line
/// that opens with `{` or `[` is taken as a whole newline-delimited message.
async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, std::io::Error>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut saw_header = false;

    loop {
        let mut line = String::new();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            if !saw_header {
                return Ok(None);
            }
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "Unexpected EOF while reading MCP headers",
            ));
        }

        let trimmed = line.trim();
        if !saw_header {
            if trimmed.is_empty() {
                continue;
            }
            if trimmed.starts_with('{') || trimmed.starts_with('[') {
                return Ok(Some(trimmed.as_bytes().to_vec()));
            }
        }

        if line == "\r\n" || line == "\n" {
            break;
        }
        saw_header = true;

        let line = line.trim_end_matches(['\r', '\n']);
        if line.to_ascii_lowercase().starts_with("content-length:") {
            let raw_len = line
                .split_once(':')
                .map(|(_, right)| right.trim())
                .unwrap_or_default();
            let parsed = raw_len.parse::<usize>().map_err(|_| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "Invalid Content-Length header",
                )
            })?;
            content_length = Some(parsed);
        }
    }

    let content_length = content_length.ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "Missing Content-Length header",
        )
    })?;
    let mut payload = vec![0_u8; content_length];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

#[cfg(test)]
async fn read_framed_json<R>(reader: &mut R) -> Result<Option<Value>, std::io::Error>
where
    R: AsyncBufRead + Unpin,
{
    let Some(payload) = read_frame(reader).await? else {
        return Ok(None);
    };
    serde_json::from_slice(&payload).map(Some).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Invalid JSON payload: {e}"),
        )
    })
}

async fn write_framed_json<W>(writer: &mut W, value: &Value) -> Result<(), std::io::Error>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(value).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Failed to serialize JSON: {e}"),
        )
    })?;
    let header = format!(
        "Content-Length: {}\r\nContent-Type: application/json\r\n\r\n",
        body.len()
    );
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

fn to_pretty_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}
