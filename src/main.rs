use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use aicanvas_core::config::AppConfig;
use aicanvas_gateway::{AppState, GatewayServer};

#[derive(Parser)]
#[command(name = "aicanvas", version, about = "AI Canvas workflow execution server")]
struct Cli {
    /// Path to config file
    #[arg(short, long, env = "AICANVAS_CONFIG", default_value = "aicanvas.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway (default)
    Serve,
    /// Show the resolved configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("aicanvas=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Some(Commands::Config) => {
            let mut shown = config.clone();
            if shown.groq.api_key.is_some() {
                shown.groq.api_key = Some("***".to_string());
            }
            println!("{}", toml::to_string_pretty(&shown)?);
        }
        Some(Commands::Serve) | None => serve(config).await?,
    }

    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        info!(path = %path.display(), "Loading config");
        Ok(AppConfig::load(path)?)
    } else {
        warn!(path = %path.display(), "No config file found, using defaults");
        Ok(AppConfig::default())
    }
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let state = Arc::new(AppState::from_config(&config));
    info!(
        bind = %config.gateway.bind,
        ollama = %config.ollama.base_url,
        timeout_secs = config.engine.timeout_secs,
        "Starting gateway"
    );
    let server = GatewayServer::new(config.gateway.clone(), state);

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();

    // Graceful shutdown on Ctrl-C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down gateway...");
        cancel_clone.cancel();
    });

    server.run(cancel).await
}
