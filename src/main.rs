//! Camera capture service CLI application

// Use jemalloc for better memory management (optional feature)
#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::{Context, Result};
use clap::Parser;
use rtsp_watcher::config::Config;
use rtsp_watcher::web::{self, AppState};
use rtsp_watcher::{GstTransport, RasterEncoder, StreamCaptureEngine};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "rtsp-watcher")]
#[command(about = "Self-healing network camera capture with snapshot, MJPEG and status endpoints")]
#[command(version)]
struct Cli {
    /// Path to configuration file (defaults are used when it doesn't exist)
    #[arg(short, long, default_value = "watcher.toml")]
    config: PathBuf,

    /// Camera URL, overriding the configuration file
    #[arg(short, long)]
    url: Option<String>,

    /// HTTP port, overriding the configuration file
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    fmt().with_env_filter(filter).with_target(false).init();

    info!("Watcher starting");

    // Load configuration
    let (mut config, config_path) = if cli.config.exists() {
        info!(config_path = %cli.config.display(), "Loading configuration");
        let config = Config::load(&cli.config)
            .with_context(|| format!("loading {}", cli.config.display()))?;
        (config, Some(cli.config.clone()))
    } else {
        info!(config_path = %cli.config.display(), "No configuration file, using defaults");
        (Config::default(), None)
    };

    if let Some(url) = cli.url {
        config.stream.url = url;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    config.validate()?;

    info!(
        url = %config.stream.url,
        backoff = %format!(
            "{}s x{} up to {}s",
            config.reconnect.initial_delay_secs,
            config.reconnect.multiplier,
            config.reconnect.max_delay_secs
        ),
        "Configuration loaded"
    );

    let transport = GstTransport::new(config.transport_config())?;
    let engine = Arc::new(StreamCaptureEngine::new(
        config.engine_config(),
        Arc::new(transport),
        Arc::new(RasterEncoder),
    )?);
    engine.start()?;

    let addr: SocketAddr = format!("{}:{}", config.server.bind_ip, config.server.port)
        .parse()
        .context("invalid server bind address")?;

    let state = AppState::new(Arc::clone(&engine), config, config_path);
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        }
        info!("Shutting down");
    };

    web::run_server(state, addr, shutdown).await?;

    // Joins the capture thread with its grace timeout
    tokio::task::spawn_blocking(move || engine.stop()).await?;
    info!("Watcher shut down");

    Ok(())
}
