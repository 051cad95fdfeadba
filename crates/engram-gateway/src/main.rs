use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

mod app;
mod auth;
mod error;
mod http;
mod mcp_bridge;
mod rate_limit;

#[derive(Parser)]
#[command(name = "engram-gateway", about = "Git-like memory layer for AI agents")]
struct Cli {
    /// Path to engram.toml (default: ~/.engram/engram.toml).
    #[arg(long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP gateway (default).
    Serve,
    /// Run as an MCP stdio server for agent hosts.
    Mcp,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // config: explicit flag > ENGRAM_CONFIG env > ~/.engram/engram.toml
    let config_path = cli.config.or_else(|| std::env::var("ENGRAM_CONFIG").ok());
    let config = engram_core::EngramConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        eprintln!("Config load failed ({e}), using defaults");
        engram_core::EngramConfig::default()
    });

    match cli.command.unwrap_or(Command::Serve) {
        Command::Mcp => {
            // stdout is the MCP wire; logs must stay on stderr.
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| "engram_gateway=warn".into()),
                )
                .init();
            mcp_bridge::run(&config).await
        }
        Command::Serve => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                        format!("engram_gateway={},tower_http=debug", config.log_level).into()
                    }),
                )
                .init();

            let storage = Arc::new(engram_storage::Storage::open(&config.database_url)?);
            let bind = config.host.clone();
            let port = config.port;
            let state = Arc::new(app::AppState::new(config, storage));
            let router = app::build_router(state);

            let addr: SocketAddr = format!("{bind}:{port}").parse()?;
            info!("Engram gateway listening on {addr}");

            let listener = tokio::net::TcpListener::bind(addr).await?;
            // ConnectInfo feeds the per-IP rate-limit key in auth::guard.
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await?;
            Ok(())
        }
    }
}
