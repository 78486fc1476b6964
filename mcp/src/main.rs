use clap::Parser;

use pulse_mcp_runtime::{McpCommands, RuntimeConfig, run as run_mcp};

#[derive(Parser)]
#[command(
    name = "pulse-mcp",
    version,
    about = "Pulse MCP server: personal health signal tools over stdio"
)]
struct Cli {
    #[command(subcommand)]
    command: McpCommands,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    // stdout carries the protocol, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pulse_mcp_runtime=info,pulse_core=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let code = run_mcp(RuntimeConfig::from_env(), cli.command).await;
    std::process::exit(code);
}
