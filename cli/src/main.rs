use clap::{Parser, Subcommand};

mod commands;
mod util;

use commands::analyze::AnalyzeArgs;
use commands::scaffolds::ScaffoldCommands;
use pulse_mcp_runtime::McpCommands;

#[derive(Parser)]
#[command(
    name = "pulse",
    version,
    about = "Pulse CLI: personal health signal analysis with guardrails"
)]
struct Cli {
    /// Pulse API base URL. When set, analyze and health go through the HTTP API
    /// instead of running the pipeline in-process.
    #[arg(long, env = "PULSE_API_URL", global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a health snapshot and print the result as JSON
    Analyze(AnalyzeArgs),
    /// Check service health (scaffolds loaded, audit storage, detector)
    Health,
    /// Inspect and lint scaffold descriptors
    Scaffolds {
        #[command(subcommand)]
        command: ScaffoldCommands,
    },
    /// Run or diagnose the MCP server
    Mcp {
        #[command(subcommand)]
        command: McpCommands,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let api_url = cli.api_url.as_deref().map(|url| url.trim_end_matches('/'));

    let code = match cli.command {
        Commands::Analyze(args) => commands::analyze::run(api_url, args).await,
        Commands::Health => commands::health::run(api_url).await,
        Commands::Scaffolds { command } => commands::scaffolds::run(command),
        Commands::Mcp { command } => commands::mcp::run(command).await,
    };
    std::process::exit(code);
}
