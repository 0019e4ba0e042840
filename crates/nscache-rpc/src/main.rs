//! nscache RPC Server - HTTP front end for the namespace-cache gateway.
//!
//! Loads an optional JSON configuration file, bootstraps the hub resources
//! and namespace buckets it declares, and serves until Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use nscache_core::{Gateway, GatewayConfig};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "nscache-rpc")]
#[command(about = "Namespace-cache gateway server")]
struct Args {
    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value = "0")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Gateway configuration file (JSON). Without one the gateway runs an
    /// in-memory hub and cache with nothing registered.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

fn init_logging(args: &Args) {
    let default_level = if args.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if args.json_logs {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    info!("Starting nscache RPC Server");

    let config = match &args.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            GatewayConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?
        }
        None => GatewayConfig::default(),
    };

    let gateway = Gateway::from_config(config)
        .await
        .context("initializing gateway")?;

    let addr = nscache_rpc::start_server(gateway.clone(), &args.host, args.port).await?;

    // Print port for supervisors to read (intentional stdout)
    println!("NSCACHE_PORT={}", addr.port());

    info!("nscache server running on {}", addr);

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");
    gateway.shutdown().await;

    Ok(())
}
