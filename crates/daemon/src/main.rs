//! Skymock Daemon
//!
//! Serves the emulated Compute-style and EC2-style control planes over HTTP
//! from a single in-memory store.

use clap::Parser;
use skymock_common::{Engine, Store};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod compute;
mod config;
mod ec2;
mod server;
mod wire;

use config::DaemonConfig;

#[derive(Parser)]
#[command(name = "skymockd")]
#[command(about = "Skymock daemon - in-memory cloud control-plane emulator")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "skymock.toml")]
    config: PathBuf,

    /// HTTP listen address (overrides the config file)
    #[arg(short, long, env = "SKYMOCK_LISTEN")]
    listen: Option<String>,

    /// Project used in Compute-style links (overrides the config file)
    #[arg(long)]
    project: Option<String>,

    /// Write the effective configuration to the config path and exit
    #[arg(long)]
    write_config: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!("Skymock daemon v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration, then apply CLI overrides
    let mut config = DaemonConfig::load(&cli.config)?;
    if let Some(listen) = cli.listen {
        config.listen.address = listen;
    }
    if let Some(project) = cli.project {
        config.engine.project = project;
    }

    if cli.write_config {
        config.save(&cli.config)?;
        info!("Wrote configuration to {}", cli.config.display());
        return Ok(());
    }

    let addr: SocketAddr = config.listen.address.parse()?;
    let engine = Engine::new(Store::new(), config.engine.clone());
    let mut state = server::AppState::new(engine);
    state.enable_reset = config.listen.enable_reset;

    let server_handle = tokio::spawn(server::serve(addr, state));

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Err(e)) => tracing::error!("HTTP server error: {}", e),
                Err(e) => tracing::error!("HTTP server task failed: {}", e),
                Ok(Ok(())) => {}
            }
        }
    }

    info!("Daemon shutdown complete");
    Ok(())
}
