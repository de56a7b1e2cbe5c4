use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use mcphost_config::HostConfig;

#[derive(Parser)]
#[command(name = "mcphost", about = "mcphost — local MCP server orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Preferred listen port (overrides MCP_HOST_PORT).
    #[arg(long, global = true)]
    port: Option<u16>,

    /// State directory (overrides MCP_DATA_DIR).
    #[arg(long, global = true, env = "MCP_DATA_DIR")]
    data_dir: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the host and block until interrupted (default).
    Run,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "mcphost starting");

    match cli.command {
        None | Some(Commands::Run) => {
            let mut config = HostConfig::from_env();
            if let Some(port) = cli.port {
                config.listen_port = port;
            }
            if let Some(dir) = cli.data_dir {
                config.data_dir = dir;
            }
            mcphost_gateway::start_host(config).await
        },
    }
}
