use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use wda_relay::config::{CliOverrides, RelayConfig};
use wda_relay::{AppState, build_router};

#[derive(Parser)]
#[command(name = "wda-relay")]
#[command(about = "Screen stream fan-out and reverse proxy for WebDriverAgent")]
struct Cli {
    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Base URL of the WebDriverAgent backend
    #[arg(long)]
    wda_url: Option<String>,

    /// URL of the MJPEG screen stream
    #[arg(long)]
    mjpeg_url: Option<String>,

    /// TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let default_directive = if cli.debug {
        "wda_relay=debug,tower_http=debug,info"
    } else {
        "wda_relay=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let overrides = CliOverrides {
        host: cli.host,
        port: cli.port,
        wda_url: cli.wda_url,
        mjpeg_url: cli.mjpeg_url,
    };
    let config = RelayConfig::load(cli.config.as_deref(), &overrides)
        .context("Invalid configuration")?;

    let state = AppState::new(&config).context("Failed to build HTTP clients")?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    let actual_addr = listener.local_addr()?;

    info!("WDA relay listening on http://{}", actual_addr);
    info!("  Backend:      {}", config.backend.base_url);
    info!("  Screen feed:  {}", config.upstream.mjpeg_url);
    info!("Endpoints:");
    info!("  GET    /screen   - WebSocket MJPEG stream");
    info!("  GET    /health   - Relay and hub status");
    info!("  GET    /metrics  - Relay counters");
    info!("  *      /*        - Proxied to the backend");

    let shutdown_signal = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal"),
            Err(e) => {
                warn!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error")?;

    info!("Shutdown complete");
    Ok(())
}
