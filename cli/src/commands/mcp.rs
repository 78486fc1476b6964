use pulse_mcp_runtime::{McpCommands, RuntimeConfig};

pub async fn run(command: McpCommands) -> i32 {
    pulse_mcp_runtime::run(RuntimeConfig::from_env(), command).await
}
